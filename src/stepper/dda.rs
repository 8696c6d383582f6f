//! DDA interrupt, segment loader and system tick.

use crate::config::{PowerMode, MOTORS};
use crate::error::MotorError;

use super::prep::PrepKind;
use super::{StepOutput, Stepper, DDA_SUBSTEPS};

/// Driver power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum PowerState {
    #[default]
    Off,
    Running,
    /// Still energized; counts down on the system tick.
    Idle(u32),
}

/// Run state of one motor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct MotorRun {
    pub(crate) substep_accumulator: i64,
    pub(crate) substep_increment: i64,
    pub(crate) substep_increment_increment: i64,
    pub(crate) reverse: bool,
    pub(crate) step_high: bool,
    pub(crate) power: PowerState,
}

impl Default for MotorRun {
    fn default() -> Self {
        Self {
            substep_accumulator: -DDA_SUBSTEPS / 2,
            substep_increment: 0,
            substep_increment_increment: 0,
            reverse: false,
            step_high: false,
            power: PowerState::Off,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct DdaRuntime {
    pub(crate) dda_downcount: u32,
    pub(crate) dwell_downcount: u32,
    pub(crate) motors: [MotorRun; MOTORS],
}

impl DdaRuntime {
    /// Stop counting and re-centre the accumulators. Direction, pending step
    /// pulses and power state survive.
    pub(crate) fn reset(&mut self) {
        self.dda_downcount = 0;
        self.dwell_downcount = 0;
        for run in self.motors.iter_mut() {
            run.substep_accumulator = -DDA_SUBSTEPS / 2;
            run.substep_increment = 0;
            run.substep_increment_increment = 0;
        }
    }
}

impl<M: StepOutput> Stepper<M> {
    /// DDA timer interrupt.
    ///
    /// Ends the pulses raised on the previous tick, advances every motor's
    /// accumulator and loads the next segment when the current one expires.
    ///
    /// # Errors
    ///
    /// Propagates pin errors.
    pub fn dda_tick(&mut self) -> Result<(), MotorError> {
        for (motor, run) in self.motors.iter_mut().zip(self.run.motors.iter_mut()) {
            if run.step_high {
                motor.step_end()?;
                run.step_high = false;
            }
        }

        if self.run.dda_downcount == 0 {
            return Ok(());
        }

        for (m, (motor, run)) in self.motors.iter_mut().zip(self.run.motors.iter_mut()).enumerate() {
            run.substep_accumulator += run.substep_increment;
            // a step fires on crossing above zero; zero itself is still mid-phase
            if run.substep_accumulator > 0 {
                motor.step_start()?;
                run.step_high = true;
                run.substep_accumulator -= DDA_SUBSTEPS;
                self.encoders[m] += if run.reverse { -1 } else { 1 };
            }
            run.substep_increment += run.substep_increment_increment;
        }

        self.run.dda_downcount -= 1;
        if self.run.dda_downcount == 0 {
            self.load_move()?;
        }
        Ok(())
    }

    /// System tick interrupt (dwell frequency).
    ///
    /// Counts down dwells and motor idle timeouts.
    ///
    /// # Errors
    ///
    /// Propagates pin errors.
    pub fn systick(&mut self) -> Result<(), MotorError> {
        if self.run.dwell_downcount > 0 {
            self.run.dwell_downcount -= 1;
            if self.run.dwell_downcount == 0 {
                self.load_move()?;
            }
        }

        for (motor, run) in self.motors.iter_mut().zip(self.run.motors.iter_mut()) {
            if let PowerState::Idle(remaining) = run.power {
                if remaining <= 1 {
                    motor.disable()?;
                    run.power = PowerState::Off;
                    trace!("motor idle timeout");
                } else {
                    run.power = PowerState::Idle(remaining - 1);
                }
            }
        }
        Ok(())
    }

    /// Move the staged segment into the runtime.
    ///
    /// Does nothing while a segment or dwell is still playing. With nothing
    /// staged, motion has stopped and idle timeouts start.
    pub(crate) fn load_move(&mut self) -> Result<(), MotorError> {
        if self.is_busy() {
            return Ok(());
        }
        if !self.prep.is_owned_by_loader() {
            self.motion_stopped();
            return Ok(());
        }

        match self.prep.kind {
            PrepKind::Aline => {
                self.run.dda_downcount = self.prep.dda_ticks;
                for m in 0..self.motors.len() {
                    let pre = self.prep.motors[m];
                    let run = &mut self.run.motors[m];
                    run.substep_increment = pre.substep_increment;
                    if pre.active {
                        run.substep_increment_increment = pre.substep_increment_increment;
                        if pre.reverse != run.reverse {
                            run.reverse = pre.reverse;
                            // mirror the phase about the midpoint
                            run.substep_accumulator = -(DDA_SUBSTEPS + run.substep_accumulator);
                            let physical = pre.reverse != self.channels[m].invert_direction;
                            self.motors[m].set_direction(physical)?;
                        }
                        self.energize(m)?;
                    } else {
                        run.substep_increment_increment = 0;
                        if self.channels[m].power_mode == PowerMode::PoweredWhenMoving {
                            self.start_idle(m);
                        }
                    }
                }
                for m in 0..self.motors.len() {
                    if self.channels[m].power_mode == PowerMode::PoweredInCycle {
                        self.energize(m)?;
                    }
                }
                self.encoder_snapshot = self.encoders;
            }
            PrepKind::Dwell => {
                self.run.dwell_downcount = self.prep.dwell_ticks;
            }
            PrepKind::Command(command) => {
                if self.commands.push_back(command).is_err() {
                    warn!("command queue full, dropping command {}", command.0);
                }
            }
            PrepKind::Null => {}
        }

        self.prep.release_to_exec();
        self.request_exec();
        Ok(())
    }

    pub(crate) fn energize(&mut self, m: usize) -> Result<(), MotorError> {
        if self.channels[m].power_mode == PowerMode::Disabled {
            return Ok(());
        }
        if self.run.motors[m].power == PowerState::Off {
            self.motors[m].enable()?;
        }
        self.run.motors[m].power = PowerState::Running;
        Ok(())
    }

    fn start_idle(&mut self, m: usize) {
        let run = &mut self.run.motors[m];
        if run.power == PowerState::Running {
            run.power = PowerState::Idle(self.idle_timeout_ticks);
        }
    }

    fn motion_stopped(&mut self) {
        for m in 0..self.motors.len() {
            match self.channels[m].power_mode {
                PowerMode::PoweredInCycle | PowerMode::PoweredWhenMoving => self.start_idle(m),
                PowerMode::AlwaysPowered | PowerMode::Disabled => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{stepper, Event, RecordingMotor};
    use super::*;
    use crate::planner::Command;

    const SEGMENT_1MS: f64 = 1.0 / 60_000.0;

    fn travel(steps: &[f64]) -> [f64; MOTORS] {
        let mut t = [0.0; MOTORS];
        t[..steps.len()].copy_from_slice(steps);
        t
    }

    fn stage(st: &mut Stepper<RecordingMotor>, steps: &[f64], v0: f64, v1: f64) {
        st.prep_mut()
            .prep_line(v0, v1, &travel(steps), &[0.0; MOTORS], SEGMENT_1MS)
            .unwrap();
    }

    fn run_until_idle(st: &mut Stepper<RecordingMotor>) {
        st.request_load().unwrap();
        for _ in 0..10_000 {
            if !st.is_busy() {
                break;
            }
            st.dda_tick().unwrap();
        }
        // trailing tick ends the last pulse
        st.dda_tick().unwrap();
    }

    #[test]
    fn test_segment_emits_exact_steps() {
        let mut st = stepper(&[PowerMode::PoweredInCycle, PowerMode::PoweredInCycle]);
        stage(&mut st, &[37.0, -12.0], 1000.0, 1000.0);
        run_until_idle(&mut st);

        assert_eq!(st.motor(0).unwrap().steps, 37);
        assert_eq!(st.motor(1).unwrap().steps, 12);
        assert_eq!(st.encoders()[0], 37);
        assert_eq!(st.encoders()[1], -12);
        assert!(!st.motor(0).unwrap().high);
    }

    #[test]
    fn test_fractional_steps_carry_across_segments() {
        let mut st = stepper(&[PowerMode::PoweredInCycle]);
        for _ in 0..8 {
            stage(&mut st, &[2.5], 500.0, 500.0);
            run_until_idle(&mut st);
        }
        assert_eq!(st.encoders()[0], 20);
    }

    #[test]
    fn test_ramped_segment_steps() {
        let mut st = stepper(&[PowerMode::PoweredInCycle]);
        stage(&mut st, &[40.0], 0.0, 1000.0);
        run_until_idle(&mut st);
        assert_eq!(st.encoders()[0], 40);
    }

    #[test]
    fn test_segment_from_rest_sets_direction() {
        let mut st = stepper(&[PowerMode::PoweredWhenMoving, PowerMode::PoweredInCycle]);
        stage(&mut st, &[-24.0, 6.0], 0.0, 1200.0);
        st.request_load().unwrap();
        // the first increment is zero but both motors take part
        assert!(st.motor(0).unwrap().enabled);
        assert!(st.run.motors[0].substep_increment_increment > 0);
        run_until_idle(&mut st);

        assert_eq!(st.encoders()[0], -24);
        assert_eq!(st.encoders()[1], 6);
        assert!(st.motor(0).unwrap().events.contains(&Event::Direction(true)));
    }

    #[test]
    fn test_idle_motor_keeps_ramp_cleared() {
        let mut st = stepper(&[PowerMode::PoweredInCycle, PowerMode::PoweredInCycle]);
        stage(&mut st, &[10.0, 10.0], 0.0, 1000.0);
        st.request_load().unwrap();
        stage(&mut st, &[10.0, 0.0], 1000.0, 1000.0);
        run_until_idle(&mut st);
        assert_eq!(st.encoders()[0], 20);
        assert_eq!(st.encoders()[1], 10);
        assert_eq!(st.run.motors[1].substep_increment_increment, 0);
    }

    #[test]
    fn test_reversal_preserves_phase() {
        let mut st = stepper(&[PowerMode::PoweredInCycle]);
        stage(&mut st, &[10.25], 1000.0, 1000.0);
        run_until_idle(&mut st);
        stage(&mut st, &[-10.25], 1000.0, 1000.0);
        run_until_idle(&mut st);
        assert_eq!(st.encoders()[0], 0);

        let events = &st.motor(0).unwrap().events;
        assert!(events.contains(&Event::Direction(true)));
    }

    #[test]
    fn test_loader_waits_for_running_segment() {
        let mut st = stepper(&[PowerMode::PoweredInCycle]);
        stage(&mut st, &[5.0], 1000.0, 1000.0);
        st.request_load().unwrap();
        assert!(st.is_busy());
        assert!(st.take_exec_request());

        stage(&mut st, &[5.0], 1000.0, 1000.0);
        st.request_load().unwrap();
        // still staged: the first segment has not finished
        assert!(st.prep().is_owned_by_loader());

        for _ in 0..100 {
            st.dda_tick().unwrap();
        }
        // first segment ended and the second was loaded from the interrupt
        assert!(st.prep().is_owned_by_exec());
        assert!(st.is_busy());
    }

    #[test]
    fn test_dwell_counts_on_systick() {
        let mut st = stepper(&[PowerMode::PoweredInCycle]);
        st.prep_mut().prep_dwell(5_000.0).unwrap();
        st.request_load().unwrap();
        assert!(st.is_busy());
        for _ in 0..4 {
            st.systick().unwrap();
        }
        assert!(st.is_busy());
        st.systick().unwrap();
        assert!(!st.is_busy());
    }

    #[test]
    fn test_commands_surface_in_order() {
        let mut st = stepper(&[PowerMode::PoweredInCycle]);
        st.prep_mut().prep_command(Command(1)).unwrap();
        st.request_load().unwrap();
        st.prep_mut().prep_command(Command(2)).unwrap();
        st.request_load().unwrap();
        assert_eq!(st.take_command(), Some(Command(1)));
        assert_eq!(st.take_command(), Some(Command(2)));
        assert_eq!(st.take_command(), None);
    }

    #[test]
    fn test_idle_timeout_disables_in_cycle_motor() {
        let mut st = stepper(&[PowerMode::PoweredInCycle, PowerMode::AlwaysPowered]);
        assert!(st.motor(1).unwrap().enabled);
        stage(&mut st, &[3.0, 0.0], 1000.0, 1000.0);
        run_until_idle(&mut st);
        assert!(st.motor(0).unwrap().enabled);

        // nothing staged: the last load started the timeout (2 s at 1 kHz)
        for _ in 0..1999 {
            st.systick().unwrap();
        }
        assert!(st.motor(0).unwrap().enabled);
        st.systick().unwrap();
        assert!(!st.motor(0).unwrap().enabled);
        assert!(st.motor(1).unwrap().enabled);
    }

    #[test]
    fn test_powered_when_moving_only_with_steps() {
        let mut st = stepper(&[PowerMode::PoweredWhenMoving, PowerMode::PoweredWhenMoving]);
        stage(&mut st, &[3.0, 0.0], 1000.0, 1000.0);
        st.request_load().unwrap();
        assert!(st.motor(0).unwrap().enabled);
        assert!(!st.motor(1).unwrap().enabled);
    }

    #[test]
    fn test_disabled_motor_never_energized() {
        let mut st = stepper(&[PowerMode::Disabled]);
        stage(&mut st, &[3.0], 1000.0, 1000.0);
        run_until_idle(&mut st);
        assert!(!st.motor(0).unwrap().enabled);
        // pulses are still produced
        assert_eq!(st.motor(0).unwrap().steps, 3);
    }

    #[test]
    fn test_reset_returns_prep_to_exec() {
        let mut st = stepper(&[PowerMode::PoweredInCycle]);
        stage(&mut st, &[50.0], 1000.0, 1000.0);
        st.request_load().unwrap();
        stage(&mut st, &[50.0], 1000.0, 1000.0);
        st.reset();
        assert!(!st.is_busy());
        assert!(st.prep().is_owned_by_exec());
        assert!(!st.exec_requested());
    }
}
