//! DDA step generation.
//!
//! The segment generator stages one segment at a time in [`SegmentPrep`].
//! The DDA interrupt ([`Stepper::dda_tick`]) runs a fixed-point phase
//! accumulator per motor and loads the next staged segment as soon as the
//! current one runs out. Dwells count down on the slower system tick
//! ([`Stepper::systick`]), which also drives motor power timeouts.

mod dda;
mod motor;
mod prep;

pub use motor::{StepOutput, StepperPins};
pub use prep::{MotorPrep, PrepKind, SegmentPrep};

use core::sync::atomic::{AtomicBool, Ordering};

use heapless::{Deque, Vec};

use crate::config::{MotorConfig, PowerMode, StepperSettings, MOTORS};
use crate::error::MotorError;
use crate::planner::Command;

use dda::DdaRuntime;

/// Accumulator modulus: sub-steps per whole step.
pub const DDA_SUBSTEPS: i64 = 2_147_483_600;

/// Following error (steps) that triggers a correction.
pub const STEP_CORRECTION_THRESHOLD: f64 = 2.0;

/// Fraction of the following error removed per correction.
pub const STEP_CORRECTION_FACTOR: f64 = 0.25;

/// Largest single correction in steps.
pub const STEP_CORRECTION_MAX: f64 = 0.60;

/// Segments to wait after a correction before the next one.
pub const STEP_CORRECTION_HOLDOFF: i32 = 5;

/// Commands waiting for the host.
pub const COMMAND_QUEUE_DEPTH: usize = 8;

/// Static per-motor output settings.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotorChannel {
    /// Flip the physical direction line.
    pub invert_direction: bool,
    /// Driver power policy.
    pub power_mode: PowerMode,
}

impl From<&MotorConfig> for MotorChannel {
    fn from(config: &MotorConfig) -> Self {
        Self {
            invert_direction: config.invert_direction,
            power_mode: config.power_mode,
        }
    }
}

/// Motor outputs plus the prep slot, DDA runtime and virtual encoders.
pub struct Stepper<M: StepOutput> {
    motors: Vec<M, MOTORS>,
    channels: Vec<MotorChannel, MOTORS>,
    prep: SegmentPrep,
    run: DdaRuntime,
    encoders: [i64; MOTORS],
    encoder_snapshot: [i64; MOTORS],
    commands: Deque<Command, COMMAND_QUEUE_DEPTH>,
    exec_requested: AtomicBool,
    idle_timeout_ticks: u32,
}

impl<M: StepOutput> Stepper<M> {
    /// Build a stepper over `motors`, applying initial direction and power.
    ///
    /// # Errors
    ///
    /// Returns [`MotorError::InvalidMotor`] if the channel and motor counts
    /// differ, or a pin error from the initial output writes.
    pub fn new(
        settings: &StepperSettings,
        motors: Vec<M, MOTORS>,
        channels: Vec<MotorChannel, MOTORS>,
    ) -> Result<Self, MotorError> {
        if motors.len() != channels.len() {
            return Err(MotorError::InvalidMotor(channels.len()));
        }
        let idle_timeout_ticks =
            libm::ceil(settings.motor_idle_timeout * f64::from(settings.dwell_frequency_hz)) as u32;

        let mut stepper = Self {
            motors,
            channels,
            prep: SegmentPrep::new(settings),
            run: DdaRuntime::default(),
            encoders: [0; MOTORS],
            encoder_snapshot: [0; MOTORS],
            commands: Deque::new(),
            exec_requested: AtomicBool::new(false),
            idle_timeout_ticks: idle_timeout_ticks.max(1),
        };
        stepper.init_outputs()?;
        Ok(stepper)
    }

    /// Number of motor channels.
    #[inline]
    pub fn motor_count(&self) -> usize {
        self.motors.len()
    }

    /// Output channel for one motor.
    pub fn motor(&self, motor: usize) -> Result<&M, MotorError> {
        self.motors.get(motor).ok_or(MotorError::InvalidMotor(motor))
    }

    /// Mutable output channel for one motor.
    pub fn motor_mut(&mut self, motor: usize) -> Result<&mut M, MotorError> {
        self.motors.get_mut(motor).ok_or(MotorError::InvalidMotor(motor))
    }

    /// The prepared-segment slot.
    #[inline]
    pub fn prep(&self) -> &SegmentPrep {
        &self.prep
    }

    /// Mutable prep slot for the segment generator.
    #[inline]
    pub fn prep_mut(&mut self) -> &mut SegmentPrep {
        &mut self.prep
    }

    /// Steps emitted per motor, signed.
    #[inline]
    pub fn encoders(&self) -> &[i64; MOTORS] {
        &self.encoders
    }

    /// Encoder values captured when the running segment was loaded.
    #[inline]
    pub fn encoder_snapshot(&self) -> &[i64; MOTORS] {
        &self.encoder_snapshot
    }

    /// Prep slot and the encoder snapshot, borrowed together for exec.
    pub fn exec_io(&mut self) -> (&mut SegmentPrep, &[i64; MOTORS]) {
        (&mut self.prep, &self.encoder_snapshot)
    }

    /// Overwrite encoder counts, for example after homing.
    pub fn set_encoders(&mut self, steps: &[f64; MOTORS]) {
        for (m, encoder) in self.encoders.iter_mut().enumerate() {
            *encoder = libm::round(steps[m]) as i64;
        }
        self.encoder_snapshot = self.encoders;
        self.prep.clear_corrections();
    }

    /// Whether a segment or dwell is being played out.
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.run.dda_downcount > 0 || self.run.dwell_downcount > 0
    }

    /// Ask for the segment generator to run.
    #[inline]
    pub fn request_exec(&self) {
        self.exec_requested.store(true, Ordering::Release);
    }

    /// Consume a pending exec request.
    #[inline]
    pub fn take_exec_request(&self) -> bool {
        self.exec_requested.swap(false, Ordering::AcqRel)
    }

    /// Whether an exec request is pending.
    #[inline]
    pub fn exec_requested(&self) -> bool {
        self.exec_requested.load(Ordering::Acquire)
    }

    /// Load a staged segment now if the runtime is idle.
    ///
    /// # Errors
    ///
    /// Propagates pin errors from the load.
    pub fn request_load(&mut self) -> Result<(), MotorError> {
        if self.is_busy() || !self.prep.is_owned_by_loader() {
            return Ok(());
        }
        self.load_move()
    }

    /// Next command the stepper has reached, oldest first.
    pub fn take_command(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }

    /// Stop the runtime and return the prep slot to exec. Encoders and
    /// motor power are left as they are.
    pub fn reset(&mut self) {
        self.run.reset();
        self.prep.reset();
        self.commands.clear();
        self.exec_requested.store(false, Ordering::Release);
    }

    fn init_outputs(&mut self) -> Result<(), MotorError> {
        for m in 0..self.motors.len() {
            let channel = self.channels[m];
            self.motors[m].set_direction(channel.invert_direction)?;
            match channel.power_mode {
                PowerMode::AlwaysPowered => self.energize(m)?,
                _ => self.motors[m].disable()?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Output event recorded by [`RecordingMotor`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Event {
        Step,
        Direction(bool),
        Enable,
        Disable,
    }

    /// Motor double that counts pulses and keeps recent events.
    #[derive(Debug, Default)]
    pub struct RecordingMotor {
        pub steps: u32,
        pub high: bool,
        pub enabled: bool,
        pub events: heapless::Vec<Event, 64>,
    }

    impl RecordingMotor {
        fn record(&mut self, event: Event) {
            if self.events.is_full() {
                self.events.remove(0);
            }
            let _ = self.events.push(event);
        }
    }

    impl StepOutput for RecordingMotor {
        fn step_start(&mut self) -> Result<(), MotorError> {
            assert!(!self.high, "step raised twice without end");
            self.high = true;
            self.steps += 1;
            self.record(Event::Step);
            Ok(())
        }

        fn step_end(&mut self) -> Result<(), MotorError> {
            self.high = false;
            Ok(())
        }

        fn set_direction(&mut self, reverse: bool) -> Result<(), MotorError> {
            self.record(Event::Direction(reverse));
            Ok(())
        }

        fn enable(&mut self) -> Result<(), MotorError> {
            self.enabled = true;
            self.record(Event::Enable);
            Ok(())
        }

        fn disable(&mut self) -> Result<(), MotorError> {
            self.enabled = false;
            self.record(Event::Disable);
            Ok(())
        }
    }

    pub fn stepper(modes: &[PowerMode]) -> Stepper<RecordingMotor> {
        let motors = modes.iter().map(|_| RecordingMotor::default()).collect();
        let channels = modes
            .iter()
            .map(|&power_mode| MotorChannel {
                invert_direction: false,
                power_mode,
            })
            .collect();
        Stepper::new(&StepperSettings::default(), motors, channels).unwrap()
    }
}
