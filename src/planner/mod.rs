//! Look-ahead motion planner.
//!
//! Moves enter as [`Line`] requests and are planned into a fixed ring of
//! [`Block`]s. Each insertion re-runs a bounded backward/forward pass over the
//! still-replannable tail of the queue so every block carries a jerk-limited
//! head/body/tail velocity profile that joins its neighbours continuously.
//!
//! The segment generator ([`Planner::exec`]) consumes the head block one
//! segment at a time and hands each segment to the stepper prep slot.
//! Feedhold replans the in-flight runtime and the queue to stop as soon as
//! jerk allows, leaving the remaining distance queued for resume.
//!
//! Units: length units (mm or degrees), velocities in units/min, times in
//! minutes.

mod block;
mod exec;
mod feedhold;
mod line;
mod pool;
mod profile;
mod zoid;

pub use block::{Block, BlockId, BufferState, MoveKind, MoveState};
pub use exec::{ExecStatus, Runtime, Section, SectionState};
pub use line::junction_vmax;
pub use pool::Pool;
pub use profile::{ExactProfile, ForwardDifference, VelocityProfile};

use libm::fabs;

use crate::config::{AxisConfig, AxisName, MachineConfig, PlannerSettings, AXES};

/// Number of blocks in the planner ring.
pub const POOL_SIZE: usize = 28;

/// Free blocks the caller should keep in reserve before submitting more moves.
pub const PLANNER_HEADROOM: usize = 4;

/// Configured jerk values are multiplied by this factor.
pub const JERK_MULTIPLIER: f64 = 1_000_000.0;

/// Jerks closer than this reuse the cached cube root and reciprocal.
pub const JERK_MATCH_PRECISION: f64 = 1000.0;

/// Tolerance for planner floating point comparisons.
pub const EPSILON: f64 = 0.00001;

/// Junction velocity returned for straight-through corners.
pub const UNCONSTRAINED_VELOCITY: f64 = 10_000_000.0;

/// Microseconds per minute.
pub const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;

/// Trapezoid length mismatch considered a fit.
pub const TRAPEZOID_LENGTH_FIT_TOLERANCE: f64 = 0.0001;

/// Iteration cap for the velocity solvers.
pub const TRAPEZOID_ITERATION_MAX: usize = 10;

#[inline]
pub(crate) fn fp_zero(a: f64) -> bool {
    fabs(a) < EPSILON
}

#[inline]
pub(crate) fn fp_not_zero(a: f64) -> bool {
    fabs(a) >= EPSILON
}

#[inline]
pub(crate) fn fp_eq(a: f64, b: f64) -> bool {
    fabs(a - b) < EPSILON
}

#[inline]
pub(crate) fn min3(a: f64, b: f64, c: f64) -> f64 {
    a.min(b).min(c)
}

#[inline]
pub(crate) fn min4(a: f64, b: f64, c: f64, d: f64) -> f64 {
    a.min(b).min(c).min(d)
}

/// Velocity slack below which head or tail sections are dropped.
#[inline]
pub(crate) fn trapezoid_velocity_tolerance(entry_velocity: f64) -> f64 {
    (entry_velocity / 100.0).max(2.0)
}

/// Vector length between two positions.
pub(crate) fn axis_vector_length(a: &[f64; AXES], b: &[f64; AXES]) -> f64 {
    libm::sqrt(a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum())
}

/// Segment and block timing derived from [`PlannerSettings`], in minutes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentTiming {
    /// Target segment duration.
    pub nominal_segment_time: f64,
    /// Shortest segment the runtime accepts.
    pub min_segment_time: f64,
    /// Shortest move accepted into the queue.
    pub min_block_time: f64,
    /// Minimum segment time plus one microsecond.
    pub min_segment_time_plus_margin: f64,
}

impl SegmentTiming {
    /// Derive timing from planner settings.
    pub fn new(settings: &PlannerSettings) -> Self {
        let min_segment_time = settings.min_segment_us / MICROSECONDS_PER_MINUTE;
        Self {
            nominal_segment_time: settings.nominal_segment_us / MICROSECONDS_PER_MINUTE,
            min_segment_time,
            min_block_time: min_segment_time,
            min_segment_time_plus_margin: (settings.min_segment_us + 1.0) / MICROSECONDS_PER_MINUTE,
        }
    }

    /// Nominal segment duration in microseconds.
    #[inline]
    pub fn nominal_segment_us(&self) -> f64 {
        self.nominal_segment_time * MICROSECONDS_PER_MINUTE
    }
}

impl Default for SegmentTiming {
    fn default() -> Self {
        Self::new(&PlannerSettings::default())
    }
}

/// Per-axis limits in planner units. Unconfigured axes are zero and never move.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisLimits {
    /// Traverse velocity limit.
    pub velocity_max: f64,
    /// Feed velocity limit.
    pub feedrate_max: f64,
    /// Jerk limit before the multiplier.
    pub jerk_max: f64,
    /// Cornering deviation.
    pub junction_deviation: f64,
}

impl AxisLimits {
    /// Whether the axis has usable limits.
    #[inline]
    pub fn is_configured(&self) -> bool {
        self.velocity_max > 0.0 && self.feedrate_max > 0.0 && self.jerk_max > 0.0
    }
}

impl From<&AxisConfig> for AxisLimits {
    fn from(config: &AxisConfig) -> Self {
        Self {
            velocity_max: config.velocity_max.0,
            feedrate_max: config.feedrate_max.0,
            jerk_max: config.jerk_max.0,
            junction_deviation: config.junction_deviation,
        }
    }
}

/// How the move time of a line is derived.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Feed {
    /// Rapid move limited only by each axis' traverse velocity.
    Traverse,
    /// Feed at the given rate in units/min.
    UnitsPerMinute(f64),
    /// Feed taking the given number of minutes.
    InverseTime(f64),
}

/// A straight-line move request in absolute machine coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    /// Endpoint for every axis.
    pub target: [f64; AXES],
    /// Feed mode.
    pub feed: Feed,
    /// Come to a full stop at both ends of the move.
    pub exact_stop: bool,
}

impl Line {
    /// Rapid move to `target`.
    pub fn traverse(target: [f64; AXES]) -> Self {
        Self {
            target,
            feed: Feed::Traverse,
            exact_stop: false,
        }
    }

    /// Feed move to `target` at `rate` units/min.
    pub fn feed(target: [f64; AXES], rate: f64) -> Self {
        Self {
            target,
            feed: Feed::UnitsPerMinute(rate),
            exact_stop: false,
        }
    }

    /// Feed move to `target` completing in `minutes`.
    pub fn inverse_time(target: [f64; AXES], minutes: f64) -> Self {
        Self {
            target,
            feed: Feed::InverseTime(minutes),
            exact_stop: false,
        }
    }

    /// Request exact-stop path control for this move.
    pub fn with_exact_stop(mut self) -> Self {
        self.exact_stop = true;
        self
    }

    /// Set one axis of the target.
    pub fn with_axis(mut self, axis: AxisName, value: f64) -> Self {
        self.target[axis.index()] = value;
        self
    }
}

/// Opaque synchronous command token. Returned to the host when the stepper
/// reaches it in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Command(pub u32);

/// Outcome of a move request that did not raise an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MoveStatus {
    /// Block planned and committed.
    Queued,
    /// Target equals the model position; nothing to do.
    ZeroLength,
    /// Move would run shorter than the minimum block time; not queued.
    MinimumTime,
}

/// Feedhold progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HoldState {
    /// No hold in progress.
    #[default]
    Off,
    /// Hold requested; waiting for the segment generator to sync.
    Sync,
    /// Synced; the replan runs on the next background poll.
    Plan,
    /// Decelerating to the hold point.
    Decel,
    /// Stopped at the hold point.
    Hold,
    /// Resume requested.
    EndHold,
}

/// Machine motion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotionState {
    /// Nothing running.
    #[default]
    Stop,
    /// Executing moves.
    Run,
    /// Stopped in a feedhold with work remaining.
    Hold,
}

/// Planner context: the block ring, the model position and the segment runtime.
#[derive(Debug, Clone)]
pub struct Planner<P: VelocityProfile = ForwardDifference> {
    pub(crate) pool: Pool,
    pub(crate) mr: Runtime<P>,
    pub(crate) position: [f64; AXES],
    pub(crate) prev_jerk: f64,
    pub(crate) prev_cbrt_jerk: f64,
    pub(crate) prev_recip_jerk: f64,
    pub(crate) axes: [AxisLimits; AXES],
    pub(crate) junction_acceleration: f64,
    pub(crate) timing: SegmentTiming,
    pub(crate) hold_state: HoldState,
    pub(crate) motion_state: MotionState,
}

impl<P: VelocityProfile + Default> Planner<P> {
    /// Create a planner with explicit axis limits.
    pub fn new(settings: &PlannerSettings, axes: [AxisLimits; AXES]) -> Self {
        Self {
            pool: Pool::new(),
            mr: Runtime::default(),
            position: [0.0; AXES],
            prev_jerk: 0.0,
            prev_cbrt_jerk: 0.0,
            prev_recip_jerk: 0.0,
            axes,
            junction_acceleration: settings.junction_acceleration,
            timing: SegmentTiming::new(settings),
            hold_state: HoldState::Off,
            motion_state: MotionState::Stop,
        }
    }

    /// Create a planner from a validated machine configuration.
    pub fn from_config(config: &MachineConfig) -> Self {
        let mut axes = [AxisLimits::default(); AXES];
        for (name, axis) in config.axes.iter() {
            axes[name.index()] = AxisLimits::from(axis);
        }
        Self::new(&config.planner, axes)
    }
}

impl<P: VelocityProfile> Planner<P> {
    /// The block ring.
    #[inline]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// The segment runtime.
    #[inline]
    pub fn runtime(&self) -> &Runtime<P> {
        &self.mr
    }

    /// Segment timing in effect.
    #[inline]
    pub fn timing(&self) -> &SegmentTiming {
        &self.timing
    }

    /// Limits for one axis.
    #[inline]
    pub fn axis_limits(&self, axis: AxisName) -> &AxisLimits {
        &self.axes[axis.index()]
    }

    /// Position at the end of the last committed block.
    #[inline]
    pub fn model_position(&self) -> [f64; AXES] {
        self.position
    }

    /// Position at the end of the last prepared segment.
    #[inline]
    pub fn runtime_position(&self) -> [f64; AXES] {
        self.mr.position
    }

    /// Free blocks in the ring.
    #[inline]
    pub fn buffers_available(&self) -> usize {
        self.pool.buffers_available()
    }

    /// Whether the caller may submit another move.
    #[inline]
    pub fn has_headroom(&self) -> bool {
        self.pool.has_headroom()
    }

    /// Current feedhold state.
    #[inline]
    pub fn hold_state(&self) -> HoldState {
        self.hold_state
    }

    /// Current motion state.
    #[inline]
    pub fn motion_state(&self) -> MotionState {
        self.motion_state
    }

    /// Whether the segment generator has a move in progress.
    #[inline]
    pub fn runtime_active(&self) -> bool {
        self.mr.move_state == MoveState::Run
    }

    /// Whether any block is queued or running.
    #[inline]
    pub fn has_queued_blocks(&self) -> bool {
        self.pool.buffers_available() < POOL_SIZE
    }

    /// Request a feedhold. Only honoured while running with no hold in progress.
    pub fn request_hold(&mut self) -> bool {
        if self.motion_state == MotionState::Run && self.hold_state == HoldState::Off {
            self.hold_state = HoldState::Sync;
            info!("feedhold requested");
            true
        } else {
            false
        }
    }

    /// Request resume from a hold. Returns whether the request was accepted.
    pub fn request_resume(&mut self) -> bool {
        if self.hold_state == HoldState::Hold {
            self.hold_state = HoldState::EndHold;
            true
        } else {
            false
        }
    }

    /// Set model and runtime positions. Queued work is not touched.
    pub fn set_position(&mut self, position: &[f64; AXES]) {
        self.position = *position;
        self.mr.position = *position;
        for w in self.mr.waypoint.iter_mut() {
            *w = *position;
        }
        self.mr.target = *position;
    }

    /// Discard all queued and running blocks. The model position snaps back
    /// to the runtime position and any hold is cleared.
    pub fn flush(&mut self) {
        self.pool.init();
        self.mr.reset();
        self.position = self.mr.position;
        self.hold_state = HoldState::Off;
        self.motion_state = MotionState::Stop;
        info!("planner queue flushed");
    }

    /// Mark every queued block replannable.
    pub(crate) fn reset_replannable_list(&mut self) {
        let Some(first) = self.pool.get_first_buffer() else {
            return;
        };
        let mut bp = first;
        loop {
            self.pool[bp].replannable = true;
            bp = self.pool.next(bp);
            if bp == first || self.pool[bp].move_state == MoveState::Off {
                break;
            }
        }
    }
}
