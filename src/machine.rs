//! Motion controller facade.
//!
//! [`MotionController`] ties the planner, the stepper runtime and the
//! kinematics together and splits the work by priority:
//!
//! - background: [`queue_line`](MotionController::queue_line),
//!   [`poll`](MotionController::poll) and status queries
//! - medium: [`service_exec`](MotionController::service_exec), the segment generator
//! - high: [`dda_tick`](MotionController::dda_tick) and
//!   [`systick`](MotionController::systick)
//!
//! Feedhold, cycle start and flush arrive through [`Signals`], which can be
//! raised through a shared reference from any context.
//!
//! # Example
//!
//! ```rust,ignore
//! use stepper_planner::{Line, MotionController, StepperPins};
//!
//! let config = stepper_planner::load_config("machine.toml")?;
//! let mut machine: MotionController<_> = MotionController::builder()
//!     .config(&config)
//!     .motor(StepperPins::new(x_step, x_dir, x_en))
//!     .motor(StepperPins::new(y_step, y_dir, y_en))
//!     .build()?;
//!
//! machine.queue_line(&Line::feed([10.0, 5.0, 0.0, 0.0, 0.0, 0.0], 1200.0))?;
//! ```

use core::marker::PhantomData;
use core::sync::atomic::{AtomicBool, Ordering};

use heapless::Vec;

use crate::config::{validate_config, Kinematics, MachineConfig, AXES, MOTORS};
use crate::error::{Alarm, ConfigError, Error, MotorError, PlannerError, Result};
use crate::planner::{
    Command, ExecStatus, ForwardDifference, HoldState, Line, MotionState, MoveStatus, Planner,
    VelocityProfile, POOL_SIZE,
};
use crate::stepper::{MotorChannel, StepOutput, Stepper};

/// Asynchronous requests from the host or from input pins.
#[derive(Debug, Default)]
pub struct Signals {
    feedhold: AtomicBool,
    cycle_start: AtomicBool,
    flush: AtomicBool,
}

impl Signals {
    /// Ask for a feedhold.
    pub fn request_feedhold(&self) {
        self.feedhold.store(true, Ordering::Release);
    }

    /// Ask for a resume from hold.
    pub fn request_cycle_start(&self) {
        self.cycle_start.store(true, Ordering::Release);
    }

    /// Ask for the queue to be discarded once motion has stopped.
    pub fn request_flush(&self) {
        self.flush.store(true, Ordering::Release);
    }

    /// Whether a flush is waiting.
    pub fn flush_pending(&self) -> bool {
        self.flush.load(Ordering::Acquire)
    }

    fn take(flag: &AtomicBool) -> bool {
        flag.swap(false, Ordering::AcqRel)
    }
}

/// Planner, stepper runtime and kinematics of one machine.
pub struct MotionController<M: StepOutput, P: VelocityProfile = ForwardDifference> {
    planner: Planner<P>,
    stepper: Stepper<M>,
    kinematics: Kinematics,
    signals: Signals,
    alarm: Option<Alarm>,
}

impl<M: StepOutput> MotionController<M> {
    /// Start building a controller.
    pub fn builder<'a>() -> MotionControllerBuilder<'a, M> {
        MotionControllerBuilder::new()
    }
}

impl<M: StepOutput, P: VelocityProfile> MotionController<M, P> {
    /// Plan a straight line to `line.target`.
    ///
    /// # Errors
    ///
    /// Returns [`PlannerError::Halted`] while an alarm is active, or raises
    /// [`Alarm::BufferFull`] if the queue is full.
    pub fn queue_line(&mut self, line: &Line) -> Result<MoveStatus> {
        self.check_alarm()?;
        match self.planner.queue_line(line) {
            Ok(status) => {
                if status == MoveStatus::Queued {
                    self.stepper.request_exec();
                }
                Ok(status)
            }
            Err(alarm) => Err(self.raise(alarm)),
        }
    }

    /// Queue a pause of `seconds`.
    ///
    /// # Errors
    ///
    /// As for [`queue_line`](Self::queue_line).
    pub fn dwell(&mut self, seconds: f64) -> Result<()> {
        self.check_alarm()?;
        match self.planner.dwell(seconds) {
            Ok(()) => {
                self.stepper.request_exec();
                Ok(())
            }
            Err(alarm) => Err(self.raise(alarm)),
        }
    }

    /// Queue a command, returned by [`take_command`](Self::take_command)
    /// once the stepper reaches it.
    ///
    /// # Errors
    ///
    /// As for [`queue_line`](Self::queue_line).
    pub fn queue_command(&mut self, command: Command) -> Result<()> {
        self.check_alarm()?;
        match self.planner.queue_command(command) {
            Ok(()) => {
                self.stepper.request_exec();
                Ok(())
            }
            Err(alarm) => Err(self.raise(alarm)),
        }
    }

    /// Background housekeeping: act on signals, plan a pending feedhold and
    /// restart after resume.
    ///
    /// A flush that arrives while moving stays pending until motion stops.
    ///
    /// # Errors
    ///
    /// Returns [`PlannerError::Halted`] while an alarm is active.
    pub fn poll(&mut self) -> Result<()> {
        self.check_alarm()?;

        if Signals::take(&self.signals.feedhold) {
            self.planner.request_hold();
        }
        self.planner.plan_hold();

        if Signals::take(&self.signals.cycle_start) {
            if self.planner.request_resume() {
                debug!("cycle start accepted");
            } else if self.planner.hold_state() == HoldState::Off {
                self.stepper.request_exec();
            }
        }
        if self.planner.end_hold() {
            self.stepper.request_exec();
        }

        if self.signals.flush_pending() && self.can_flush() {
            Signals::take(&self.signals.flush);
            self.flush_queue();
        }
        Ok(())
    }

    /// Run the segment generator if it was requested and the prep slot is
    /// free. Stages at most one segment; zero-length blocks, dwells and
    /// commands ahead of it are passed through in the same call.
    ///
    /// # Errors
    ///
    /// Raises the alarm from the segment generator, or returns
    /// [`PlannerError::Halted`] while one is active.
    pub fn service_exec(&mut self) -> Result<()> {
        self.check_alarm()?;
        for _ in 0..=POOL_SIZE {
            if !self.stepper.take_exec_request() {
                break;
            }
            if !self.stepper.prep().is_owned_by_exec() {
                // the loader requests exec again when it frees the slot
                break;
            }
            let (prep, encoders) = self.stepper.exec_io();
            match self.planner.exec(prep, encoders, &self.kinematics) {
                Ok(ExecStatus::Noop) => break,
                Ok(ExecStatus::Skipped) => self.stepper.request_exec(),
                Ok(ExecStatus::Again) | Ok(ExecStatus::Done) => self.stepper.request_load()?,
                Err(alarm) => return Err(self.raise(alarm)),
            }
        }
        Ok(())
    }

    /// DDA interrupt body.
    ///
    /// # Errors
    ///
    /// Propagates pin errors.
    #[inline]
    pub fn dda_tick(&mut self) -> Result<()> {
        self.stepper.dda_tick().map_err(Error::from)
    }

    /// System tick body: dwell countdown and motor power timeouts.
    ///
    /// # Errors
    ///
    /// Propagates pin errors.
    #[inline]
    pub fn systick(&mut self) -> Result<()> {
        self.stepper.systick().map_err(Error::from)
    }

    /// Redefine the current position. Step counters and encoders follow.
    ///
    /// # Errors
    ///
    /// Returns [`PlannerError::Busy`] unless the machine is idle.
    pub fn set_position(&mut self, position: &[f64; AXES]) -> Result<()> {
        if self.is_busy() {
            return Err(PlannerError::Busy.into());
        }
        let steps = self.kinematics.inverse(position);
        self.planner.set_position(position);
        self.planner.set_step_position(&steps);
        self.stepper.set_encoders(&steps);
        Ok(())
    }

    /// Discard all queued work.
    ///
    /// # Errors
    ///
    /// Returns [`PlannerError::Busy`] unless the machine is held or idle.
    pub fn flush(&mut self) -> Result<()> {
        if !self.can_flush() {
            return Err(PlannerError::Busy.into());
        }
        self.flush_queue();
        Ok(())
    }

    /// Clear an active alarm. The queue is discarded and the runtime stays
    /// where the last staged segment ended.
    pub fn clear_alarm(&mut self) {
        if let Some(alarm) = self.alarm.take() {
            info!("alarm cleared: {}", alarm);
        }
        self.stepper.reset();
        self.planner.flush();
    }

    /// Signals that may be raised from other contexts.
    #[inline]
    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    /// Active alarm, if any.
    #[inline]
    pub fn alarm(&self) -> Option<Alarm> {
        self.alarm
    }

    /// Free blocks in the planner queue.
    #[inline]
    pub fn buffers_available(&self) -> usize {
        self.planner.buffers_available()
    }

    /// Whether the caller may submit another move.
    #[inline]
    pub fn has_headroom(&self) -> bool {
        self.planner.has_headroom()
    }

    /// Whether the stepper is ticking or the runtime has a move in progress.
    pub fn is_runtime_busy(&self) -> bool {
        self.stepper.is_busy() || self.planner.runtime_active()
    }

    /// Whether anything is moving or queued.
    pub fn is_busy(&self) -> bool {
        self.is_runtime_busy() || self.planner.has_queued_blocks()
    }

    /// Current feedhold state.
    #[inline]
    pub fn hold_state(&self) -> HoldState {
        self.planner.hold_state()
    }

    /// Current motion state.
    #[inline]
    pub fn motion_state(&self) -> MotionState {
        self.planner.motion_state()
    }

    /// Position at the end of the last queued move.
    #[inline]
    pub fn model_position(&self) -> [f64; AXES] {
        self.planner.model_position()
    }

    /// Position at the end of the last staged segment.
    #[inline]
    pub fn runtime_position(&self) -> [f64; AXES] {
        self.planner.runtime_position()
    }

    /// Steps emitted per motor.
    #[inline]
    pub fn encoders(&self) -> &[i64; MOTORS] {
        self.stepper.encoders()
    }

    /// Next command the stepper has reached.
    #[inline]
    pub fn take_command(&mut self) -> Option<Command> {
        self.stepper.take_command()
    }

    /// The planner.
    #[inline]
    pub fn planner(&self) -> &Planner<P> {
        &self.planner
    }

    /// The stepper runtime.
    #[inline]
    pub fn stepper(&self) -> &Stepper<M> {
        &self.stepper
    }

    /// Axis to motor scaling.
    #[inline]
    pub fn kinematics(&self) -> &Kinematics {
        &self.kinematics
    }

    fn can_flush(&self) -> bool {
        !self.stepper.is_busy()
            && (self.planner.hold_state() == HoldState::Hold
                || self.planner.motion_state() == MotionState::Stop)
    }

    fn flush_queue(&mut self) {
        self.planner.flush();
        self.stepper.reset();
    }

    fn check_alarm(&self) -> Result<()> {
        match self.alarm {
            Some(_) => Err(PlannerError::Halted.into()),
            None => Ok(()),
        }
    }

    fn raise(&mut self, alarm: Alarm) -> Error {
        error!("alarm: {}", alarm);
        self.alarm = Some(alarm);
        self.stepper.reset();
        Error::Alarm(alarm)
    }
}

/// Builder for [`MotionController`].
pub struct MotionControllerBuilder<'a, M: StepOutput, P: VelocityProfile = ForwardDifference> {
    config: Option<&'a MachineConfig>,
    motors: Vec<M, MOTORS>,
    overflow: bool,
    profile: PhantomData<P>,
}

impl<'a, M: StepOutput, P: VelocityProfile> Default for MotionControllerBuilder<'a, M, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, M: StepOutput, P: VelocityProfile> MotionControllerBuilder<'a, M, P> {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            config: None,
            motors: Vec::new(),
            overflow: false,
            profile: PhantomData,
        }
    }

    /// Machine configuration. Validated on [`build`](Self::build).
    pub fn config(mut self, config: &'a MachineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Add the output for the next motor, in configuration order.
    pub fn motor(mut self, motor: M) -> Self {
        if self.motors.push(motor).is_err() {
            self.overflow = true;
        }
        self
    }

    /// Evaluate segment velocities with a different profile.
    pub fn with_profile<Q: VelocityProfile>(self) -> MotionControllerBuilder<'a, M, Q> {
        MotionControllerBuilder {
            config: self.config,
            motors: self.motors,
            overflow: self.overflow,
            profile: PhantomData,
        }
    }

    /// Build the controller.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is missing or invalid, the
    /// number of motors differs from the configured motors, or the initial
    /// pin writes fail.
    pub fn build(self) -> Result<MotionController<M, P>> {
        let config = self.config.ok_or(ConfigError::MissingField("config"))?;
        validate_config(config)?;
        if self.overflow {
            return Err(MotorError::InvalidMotor(MOTORS).into());
        }

        let channels = config.motors.iter().map(MotorChannel::from).collect();
        let stepper = Stepper::new(&config.stepper, self.motors, channels)?;
        info!("motion controller ready with {} motors", stepper.motor_count());

        Ok(MotionController {
            planner: Planner::from_config(config),
            stepper,
            kinematics: Kinematics::from_config(config),
            signals: Signals::default(),
            alarm: None,
        })
    }
}
