//! Segment generator.
//!
//! Plays the block at the head of the queue out as a series of short
//! constant-jerk segments. Heads and tails are S-curves split into two
//! halves of equal segment count; bodies run at cruise. The last segment of
//! every section lands exactly on that section's waypoint so rounding in the
//! velocity profile never accumulates into position error.

use core::array;

use libm::ceil;

use crate::config::{Kinematics, AXES, MOTORS};
use crate::error::Alarm;
use crate::stepper::SegmentPrep;

use super::block::{Block, BlockId, MoveKind, MoveState};
use super::profile::VelocityProfile;
use super::{fp_zero, HoldState, MotionState, Planner, SegmentTiming};

/// Section of a block being played out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Section {
    /// Acceleration.
    #[default]
    Head,
    /// Cruise.
    Body,
    /// Deceleration.
    Tail,
}

impl Section {
    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// Progress inside the current section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SectionState {
    /// No section running.
    #[default]
    Off,
    /// Section selected; its segments are not computed yet.
    New,
    /// Concave half of a head or tail.
    FirstHalf,
    /// Convex half of a head or tail, or a body.
    SecondHalf,
}

/// Result of one [`Planner::exec`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExecStatus {
    /// Nothing staged. The queue is empty, held, or the head is not ready.
    Noop,
    /// A segment was staged and the block has more.
    Again,
    /// The last segment (or the dwell or command) of a block was staged.
    Done,
    /// A block completed without staging anything. Call again.
    Skipped,
}

enum Progress {
    Continue,
    Complete,
    CompleteEmpty,
}

/// Prep slot, encoder snapshot and scaling used while staging segments.
struct SegmentSink<'a> {
    prep: &'a mut SegmentPrep,
    encoders: &'a [i64; MOTORS],
    kinematics: &'a Kinematics,
}

/// State of the move being played out.
#[derive(Debug, Clone, Default)]
pub struct Runtime<P: VelocityProfile> {
    pub(crate) move_state: MoveState,
    pub(crate) section: Section,
    pub(crate) section_state: SectionState,

    pub(crate) unit: [f64; AXES],
    pub(crate) target: [f64; AXES],
    pub(crate) position: [f64; AXES],
    pub(crate) waypoint: [[f64; AXES]; 3],

    pub(crate) head_length: f64,
    pub(crate) body_length: f64,
    pub(crate) tail_length: f64,
    pub(crate) entry_velocity: f64,
    pub(crate) cruise_velocity: f64,
    pub(crate) exit_velocity: f64,

    pub(crate) segments: u32,
    pub(crate) segment_count: u32,
    pub(crate) segment_time: f64,
    pub(crate) segment_velocity: f64,

    /// Steps at the end of the last staged segment.
    pub(crate) position_steps: [f64; MOTORS],
    /// Steps at the start of the last staged segment, where the encoders
    /// were sampled when it was requested.
    pub(crate) commanded_steps: [f64; MOTORS],
    pub(crate) following_error: [f64; MOTORS],

    pub(crate) profile: P,
}

impl<P: VelocityProfile> Runtime<P> {
    /// Whether a move is in progress.
    #[inline]
    pub fn move_state(&self) -> MoveState {
        self.move_state
    }

    /// Section being played out.
    #[inline]
    pub fn section(&self) -> Section {
        self.section
    }

    /// Progress inside the section.
    #[inline]
    pub fn section_state(&self) -> SectionState {
        self.section_state
    }

    /// Position at the end of the last staged segment.
    #[inline]
    pub fn position(&self) -> &[f64; AXES] {
        &self.position
    }

    /// Endpoint of the running move.
    #[inline]
    pub fn target(&self) -> &[f64; AXES] {
        &self.target
    }

    /// Velocity at the end of the last staged segment.
    #[inline]
    pub fn segment_velocity(&self) -> f64 {
        self.segment_velocity
    }

    /// Planned exit velocity of the running move.
    #[inline]
    pub fn exit_velocity(&self) -> f64 {
        self.exit_velocity
    }

    /// Duration of the current segments in minutes.
    #[inline]
    pub fn segment_time(&self) -> f64 {
        self.segment_time
    }

    /// Fractional motor steps at the end of the last staged segment.
    #[inline]
    pub fn position_steps(&self) -> &[f64; MOTORS] {
        &self.position_steps
    }

    /// Encoder minus commanded steps, as measured for the last segment.
    #[inline]
    pub fn following_error(&self) -> &[f64; MOTORS] {
        &self.following_error
    }

    /// Stop the move, keeping position and step counters.
    pub(crate) fn reset(&mut self) {
        self.move_state = MoveState::Off;
        self.section = Section::Head;
        self.section_state = SectionState::Off;
        self.target = self.position;
        self.waypoint = [self.position; 3];
        self.head_length = 0.0;
        self.body_length = 0.0;
        self.tail_length = 0.0;
        self.entry_velocity = 0.0;
        self.cruise_velocity = 0.0;
        self.exit_velocity = 0.0;
        self.segments = 0;
        self.segment_count = 0;
        self.segment_velocity = 0.0;
        self.profile = P::default();
    }

    pub(crate) fn set_steps(&mut self, steps: &[f64; MOTORS]) {
        self.position_steps = *steps;
        self.commanded_steps = *steps;
        self.following_error = [0.0; MOTORS];
    }

    /// Velocity the next segment will end at. Used by feedhold to pick the
    /// velocity braking starts from.
    pub(crate) fn next_segment_velocity(&self) -> f64 {
        match (self.section_state, self.section) {
            (SectionState::New, Section::Head) => self.entry_velocity,
            (SectionState::New, _) | (_, Section::Body) => self.cruise_velocity,
            _ => self.profile.peek(),
        }
    }

    fn section_length(&self, section: Section) -> f64 {
        match section {
            Section::Head => self.head_length,
            Section::Body => self.body_length,
            Section::Tail => self.tail_length,
        }
    }

    fn start(&mut self, block: &Block) {
        self.move_state = MoveState::Run;
        self.section = Section::Head;
        self.section_state = SectionState::New;
        self.unit = block.unit;
        self.target = block.target;
        self.head_length = block.head_length;
        self.body_length = block.body_length;
        self.tail_length = block.tail_length;
        self.entry_velocity = block.entry_velocity;
        self.cruise_velocity = block.cruise_velocity;
        self.exit_velocity = block.exit_velocity;
        self.segment_velocity = block.entry_velocity;

        let lengths = [block.head_length, block.body_length, block.tail_length];
        let (position, unit) = (self.position, self.unit);
        let mut travelled = 0.0;
        for (waypoint, length) in self.waypoint.iter_mut().zip(lengths) {
            travelled += length;
            *waypoint = array::from_fn(|i| position[i] + unit[i] * travelled);
        }
        // the last non-empty section, and anything after it, ends on the target
        for s in (0..3).rev() {
            self.waypoint[s] = block.target;
            if !fp_zero(lengths[s]) {
                break;
            }
        }
    }

    fn begin_section(&mut self, length: f64, timing: &SegmentTiming) {
        let (v0, v1) = match self.section {
            Section::Head => (self.entry_velocity, self.cruise_velocity),
            Section::Body => (self.cruise_velocity, self.cruise_velocity),
            Section::Tail => (self.cruise_velocity, self.exit_velocity),
        };
        let section_time = length / ((v0 + v1) / 2.0);
        let halves = if self.section == Section::Body { 1.0 } else { 2.0 };
        let segments = (ceil(section_time / (halves * timing.nominal_segment_time)) as u32).max(1);
        self.segment_time = section_time / (halves * f64::from(segments));

        if self.segment_time < timing.min_segment_time {
            warn!("section of {} min below minimum segment time", section_time);
            self.segment_time = section_time;
            self.segments = 1;
            self.segment_count = 1;
            self.profile.begin(v1, v1, 1);
            self.section_state = SectionState::SecondHalf;
            return;
        }

        self.segments = segments;
        self.segment_count = segments;
        if self.section == Section::Body {
            self.profile.begin(v0, v0, segments);
            self.section_state = SectionState::SecondHalf;
        } else {
            self.profile.begin(v0, (v0 + v1) / 2.0, segments);
            self.section_state = SectionState::FirstHalf;
        }
    }

    /// Stage the next segment of the current section, moving on to the
    /// following section when this one runs out.
    fn run_section(
        &mut self,
        timing: &SegmentTiming,
        io: &mut SegmentSink<'_>,
    ) -> Result<Progress, Alarm> {
        while self.section_state == SectionState::New {
            let length = self.section_length(self.section);
            if !fp_zero(length) {
                self.begin_section(length, timing);
                break;
            }
            match self.section {
                Section::Head => self.section = Section::Body,
                Section::Body => self.section = Section::Tail,
                Section::Tail => {
                    self.position = self.waypoint[Section::Tail.index()];
                    return Ok(Progress::CompleteEmpty);
                }
            }
        }

        let velocity = self.profile.advance().max(0.0);
        if !self.segment(velocity, io)? {
            return Ok(Progress::Continue);
        }

        if self.section_state == SectionState::FirstHalf {
            self.segment_count = self.segments;
            self.section_state = SectionState::SecondHalf;
            return Ok(Progress::Continue);
        }

        let progress = match self.section {
            Section::Head if fp_zero(self.body_length) && fp_zero(self.tail_length) => {
                Progress::Complete
            }
            Section::Head => {
                self.section = Section::Body;
                Progress::Continue
            }
            Section::Body if fp_zero(self.tail_length) => Progress::Complete,
            Section::Body => {
                self.section = Section::Tail;
                Progress::Continue
            }
            Section::Tail => Progress::Complete,
        };
        if matches!(progress, Progress::Continue) {
            self.section_state = SectionState::New;
        }
        Ok(progress)
    }

    /// Stage one segment ending at `velocity`. Returns whether it was the
    /// last segment of the current half or body.
    fn segment(&mut self, velocity: f64, io: &mut SegmentSink<'_>) -> Result<bool, Alarm> {
        self.segment_count = self.segment_count.saturating_sub(1);
        let last = self.segment_count == 0;

        let target = if last && self.section_state == SectionState::SecondHalf {
            self.waypoint[self.section.index()]
        } else {
            let distance = (self.segment_velocity + velocity) / 2.0 * self.segment_time;
            array::from_fn(|i| self.position[i] + self.unit[i] * distance)
        };

        // the encoders were sampled when the running segment started
        for m in 0..MOTORS {
            self.following_error[m] = io.encoders[m] as f64 - self.commanded_steps[m];
        }
        let target_steps = io.kinematics.inverse(&target);
        let travel: [f64; MOTORS] = array::from_fn(|m| target_steps[m] - self.position_steps[m]);
        self.commanded_steps = self.position_steps;
        self.position_steps = target_steps;

        io.prep.prep_line(
            self.segment_velocity,
            velocity,
            &travel,
            &self.following_error,
            self.segment_time,
        )?;

        self.position = target;
        self.segment_velocity = velocity;
        Ok(last)
    }
}

impl<P: VelocityProfile> Planner<P> {
    /// Stage the next piece of work from the head of the queue into `prep`.
    ///
    /// `encoders` is the step count captured when the running segment was
    /// loaded. It feeds the following-error correction.
    ///
    /// # Errors
    ///
    /// Alarms if the prep slot is still owned by the loader, a segment time
    /// is not finite, or the queue head is corrupt.
    pub fn exec(
        &mut self,
        prep: &mut SegmentPrep,
        encoders: &[i64; MOTORS],
        kinematics: &Kinematics,
    ) -> Result<ExecStatus, Alarm> {
        let Some(bf) = self.pool.get_run_buffer() else {
            if matches!(self.hold_state, HoldState::Sync | HoldState::Plan) {
                info!("queue drained before feedhold took effect");
                self.hold_state = HoldState::Off;
            }
            if self.hold_state != HoldState::Hold {
                self.motion_state = MotionState::Stop;
            }
            return Ok(ExecStatus::Noop);
        };

        match self.pool[bf].kind {
            MoveKind::Aline => {
                let mut io = SegmentSink {
                    prep,
                    encoders,
                    kinematics,
                };
                self.exec_aline(bf, &mut io)
            }
            MoveKind::Dwell { seconds } => {
                if self.hold_state == HoldState::Hold {
                    return Ok(ExecStatus::Noop);
                }
                prep.prep_dwell(seconds * 1_000_000.0)?;
                self.pool.free_run_buffer();
                Ok(ExecStatus::Done)
            }
            MoveKind::Command(command) => {
                if self.hold_state == HoldState::Hold {
                    return Ok(ExecStatus::Noop);
                }
                prep.prep_command(command)?;
                self.pool.free_run_buffer();
                Ok(ExecStatus::Done)
            }
            MoveKind::Null => {
                error!("empty block at the head of the queue");
                Err(Alarm::InternalError("empty block at queue head"))
            }
        }
    }

    /// Set the runtime's step counters, for example after homing.
    pub fn set_step_position(&mut self, steps: &[f64; MOTORS]) {
        self.mr.set_steps(steps);
    }

    fn exec_aline(&mut self, bf: BlockId, io: &mut SegmentSink<'_>) -> Result<ExecStatus, Alarm> {
        if self.pool[bf].move_state == MoveState::Off {
            return Ok(ExecStatus::Noop);
        }

        if self.mr.move_state == MoveState::Off {
            if self.hold_state == HoldState::Hold {
                return Ok(ExecStatus::Noop);
            }
            if self.motion_state == MotionState::Stop {
                self.motion_state = MotionState::Run;
            }
            self.pool[bf].replannable = false;

            let block = self.pool[bf];
            if fp_zero(block.length)
                || (fp_zero(block.head_length)
                    && fp_zero(block.body_length)
                    && fp_zero(block.tail_length))
            {
                debug!("skipping block of length {}", block.length);
                self.mr.position = block.target;
                self.mr.reset();
                let nx = self.pool.next(bf);
                self.pool[nx].replannable = false;
                io.prep.prep_null();
                self.pool.free_run_buffer();
                return Ok(ExecStatus::Skipped);
            }
            self.pool[bf].move_state = MoveState::Run;
            self.mr.start(&block);
        }

        let progress = self.mr.run_section(&self.timing, io)?;
        let complete = !matches!(progress, Progress::Continue);

        match self.hold_state {
            HoldState::Sync if !complete => self.hold_state = HoldState::Plan,
            HoldState::Plan if complete => self.hold_state = HoldState::Sync,
            HoldState::Decel if complete && fp_zero(self.mr.exit_velocity) => {
                self.hold_state = HoldState::Hold;
                self.motion_state = MotionState::Hold;
                info!("feedhold reached");
            }
            _ => {}
        }

        if !complete {
            return Ok(ExecStatus::Again);
        }

        self.mr.move_state = MoveState::Off;
        self.mr.section_state = SectionState::Off;
        let nx = self.pool.next(bf);
        self.pool[nx].replannable = false;
        if self.pool[bf].move_state == MoveState::Run {
            self.pool.free_run_buffer();
        }
        Ok(match progress {
            Progress::CompleteEmpty => ExecStatus::Skipped,
            _ => ExecStatus::Done,
        })
    }
}
