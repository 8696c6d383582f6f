//! Prepared-segment slot shared by the segment generator and the loader.
//!
//! Exactly one side owns the slot at a time. The segment generator fills it
//! while it is owned by exec and hands it over by flipping ownership to the
//! loader; the loader copies it into the DDA runtime and flips it back.

use core::sync::atomic::{AtomicU8, Ordering};

use libm::{fabs, floor, round};

use crate::config::{StepperSettings, MOTORS};
use crate::error::Alarm;
use crate::planner::{fp_zero, Command};

use super::{
    DDA_SUBSTEPS, STEP_CORRECTION_FACTOR, STEP_CORRECTION_HOLDOFF, STEP_CORRECTION_MAX,
    STEP_CORRECTION_THRESHOLD,
};

const OWNED_BY_EXEC: u8 = 0;
const OWNED_BY_LOADER: u8 = 1;

/// Kind of work waiting in the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PrepKind {
    /// Nothing to load.
    #[default]
    Null,
    /// Stepping segment.
    Aline,
    /// Timed pause counted on the system tick.
    Dwell,
    /// Host command surfaced at load time.
    Command(Command),
}

/// Per-motor sub-step parameters for one segment.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorPrep {
    /// Sub-steps added to the accumulator on the first tick.
    pub substep_increment: i64,
    /// Change of the increment on every tick.
    pub substep_increment_increment: i64,
    /// Logical direction (negative travel).
    pub reverse: bool,
    /// Whether the motor travels in this segment. A segment starting from
    /// rest has a zero first increment but is still active.
    pub active: bool,
    pub(crate) correction_holdoff: i32,
    pub(crate) corrected_steps: f64,
}

/// The single prepared-segment slot.
#[derive(Debug)]
pub struct SegmentPrep {
    owner: AtomicU8,
    pub(crate) kind: PrepKind,
    pub(crate) dda_ticks: u32,
    pub(crate) dwell_ticks: u32,
    pub(crate) motors: [MotorPrep; MOTORS],
    tick_residual: f64,
    dda_frequency: f64,
    dwell_frequency: f64,
}

impl SegmentPrep {
    /// Create an empty slot owned by exec.
    pub fn new(settings: &StepperSettings) -> Self {
        Self {
            owner: AtomicU8::new(OWNED_BY_EXEC),
            kind: PrepKind::Null,
            dda_ticks: 0,
            dwell_ticks: 0,
            motors: [MotorPrep::default(); MOTORS],
            tick_residual: 0.0,
            dda_frequency: f64::from(settings.dda_frequency_hz),
            dwell_frequency: f64::from(settings.dwell_frequency_hz),
        }
    }

    /// Whether the segment generator may write the slot.
    #[inline]
    pub fn is_owned_by_exec(&self) -> bool {
        self.owner.load(Ordering::Acquire) == OWNED_BY_EXEC
    }

    /// Whether a prepared segment is waiting for the loader.
    #[inline]
    pub fn is_owned_by_loader(&self) -> bool {
        self.owner.load(Ordering::Acquire) == OWNED_BY_LOADER
    }

    /// What is staged.
    #[inline]
    pub fn kind(&self) -> PrepKind {
        self.kind
    }

    /// DDA ticks of the staged segment.
    #[inline]
    pub fn dda_ticks(&self) -> u32 {
        self.dda_ticks
    }

    /// System ticks of the staged dwell.
    #[inline]
    pub fn dwell_ticks(&self) -> u32 {
        self.dwell_ticks
    }

    /// Staged parameters for one motor.
    #[inline]
    pub fn motor(&self, motor: usize) -> Option<&MotorPrep> {
        self.motors.get(motor)
    }

    /// Steps removed by following-error correction so far, per motor.
    pub fn corrected_steps(&self) -> [f64; MOTORS] {
        core::array::from_fn(|m| self.motors[m].corrected_steps)
    }

    fn claim(&self) -> Result<(), Alarm> {
        if self.is_owned_by_exec() {
            Ok(())
        } else {
            error!("prep sync error");
            Err(Alarm::PrepSyncError)
        }
    }

    fn publish(&self) {
        self.owner.store(OWNED_BY_LOADER, Ordering::Release);
    }

    pub(crate) fn release_to_exec(&mut self) {
        self.kind = PrepKind::Null;
        self.owner.store(OWNED_BY_EXEC, Ordering::Release);
    }

    /// Stage a stepping segment.
    ///
    /// `travel_steps` is signed, possibly fractional, motion per motor.
    /// `following_error` is encoder minus commanded steps and drives the
    /// nudge correction. Velocities are in units/min, `segment_time` in
    /// minutes. Fractional DDA ticks carry over to the next segment.
    ///
    /// # Errors
    ///
    /// Alarms if the slot is owned by the loader or the segment time is not
    /// a positive finite number.
    pub fn prep_line(
        &mut self,
        start_velocity: f64,
        end_velocity: f64,
        travel_steps: &[f64; MOTORS],
        following_error: &[f64; MOTORS],
        segment_time: f64,
    ) -> Result<(), Alarm> {
        self.claim()?;
        if segment_time.is_infinite() {
            error!("segment time is infinite");
            return Err(Alarm::SegmentTimeInfinite);
        }
        if segment_time.is_nan() {
            error!("segment time is NaN");
            return Err(Alarm::SegmentTimeNaN);
        }
        if segment_time <= 0.0 {
            error!("segment time {} is not positive", segment_time);
            return Err(Alarm::InternalError("non-positive segment time"));
        }

        let exact_ticks = segment_time * 60.0 * self.dda_frequency + self.tick_residual;
        let ticks = floor(exact_ticks).max(1.0);
        self.tick_residual = exact_ticks - ticks;
        self.dda_ticks = ticks as u32;

        let t_v0_v1 = ticks * (start_velocity + end_velocity);
        let substeps = DDA_SUBSTEPS as f64;

        for (motor, prep) in self.motors.iter_mut().enumerate() {
            let mut steps = travel_steps[motor];
            if fp_zero(steps) {
                prep.active = false;
                prep.substep_increment = 0;
                prep.substep_increment_increment = 0;
                continue;
            }
            prep.active = true;
            prep.reverse = steps < 0.0;

            prep.correction_holdoff = prep.correction_holdoff.saturating_sub(1);
            if prep.correction_holdoff < 0 && fabs(following_error[motor]) > STEP_CORRECTION_THRESHOLD {
                prep.correction_holdoff = STEP_CORRECTION_HOLDOFF;
                let raw = following_error[motor] * STEP_CORRECTION_FACTOR;
                let correction = if raw > 0.0 {
                    raw.min(fabs(steps)).min(STEP_CORRECTION_MAX)
                } else {
                    raw.max(-fabs(steps)).max(-STEP_CORRECTION_MAX)
                };
                debug!("motor {} corrected by {} steps", motor, correction);
                prep.corrected_steps += correction;
                steps -= correction;
            }

            let s_double = fabs(steps * 2.0);
            if t_v0_v1 > 0.0 && ticks > 1.0 {
                prep.substep_increment = round(s_double * start_velocity / t_v0_v1 * substeps) as i64;
                prep.substep_increment_increment = round(
                    s_double * (end_velocity - start_velocity) / ((ticks - 1.0) * t_v0_v1) * substeps,
                ) as i64;
            } else {
                prep.substep_increment = round(fabs(steps) / ticks * substeps) as i64;
                prep.substep_increment_increment = 0;
            }
        }

        self.kind = PrepKind::Aline;
        self.publish();
        Ok(())
    }

    /// Stage nothing. Ownership stays with exec so the next block can prep.
    pub fn prep_null(&mut self) {
        self.kind = PrepKind::Null;
        self.owner.store(OWNED_BY_EXEC, Ordering::Release);
    }

    /// Stage a dwell of at least one system tick.
    ///
    /// # Errors
    ///
    /// Alarms if the slot is owned by the loader.
    pub fn prep_dwell(&mut self, microseconds: f64) -> Result<(), Alarm> {
        self.claim()?;
        let ticks = floor(microseconds / 1_000_000.0 * self.dwell_frequency);
        self.dwell_ticks = if ticks >= 1.0 { ticks as u32 } else { 1 };
        self.kind = PrepKind::Dwell;
        self.publish();
        Ok(())
    }

    /// Stage a command for delivery when the stepper reaches it.
    ///
    /// # Errors
    ///
    /// Alarms if the slot is owned by the loader.
    pub fn prep_command(&mut self, command: Command) -> Result<(), Alarm> {
        self.claim()?;
        self.kind = PrepKind::Command(command);
        self.publish();
        Ok(())
    }

    /// Zero correction state (used when positions are set).
    pub fn clear_corrections(&mut self) {
        for prep in self.motors.iter_mut() {
            prep.correction_holdoff = 0;
            prep.corrected_steps = 0.0;
        }
    }

    /// Empty the slot and return it to exec.
    pub fn reset(&mut self) {
        self.kind = PrepKind::Null;
        self.dda_ticks = 0;
        self.dwell_ticks = 0;
        self.tick_residual = 0.0;
        for prep in self.motors.iter_mut() {
            prep.active = false;
            prep.substep_increment = 0;
            prep.substep_increment_increment = 0;
        }
        self.owner.store(OWNED_BY_EXEC, Ordering::Release);
    }
}
