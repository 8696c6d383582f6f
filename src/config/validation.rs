//! Configuration validation.

use crate::error::{ConfigError, Error, Result};

use super::{AxisConfig, MachineConfig, MotorConfig, MotorMechanics};

/// Validate a machine configuration.
///
/// Checks:
/// - Axis velocity, jerk and junction limits are positive
/// - Motor step scaling is positive and mapped axes are configured
/// - No motor needs more than one step per DDA tick at its axis limits
/// - Motor names are unique
/// - Segment timing and timer rates are usable
pub fn validate_config(config: &MachineConfig) -> Result<()> {
    let stepper = &config.stepper;
    if stepper.dda_frequency_hz == 0 {
        return Err(Error::Config(ConfigError::InvalidFrequency(stepper.dda_frequency_hz)));
    }
    if stepper.dwell_frequency_hz == 0 {
        return Err(Error::Config(ConfigError::InvalidFrequency(stepper.dwell_frequency_hz)));
    }
    if stepper.motor_idle_timeout <= 0.0 {
        return Err(Error::Config(ConfigError::InvalidIdleTimeout(
            stepper.motor_idle_timeout,
        )));
    }

    for (_, axis) in config.axes.iter() {
        validate_axis(axis)?;
    }

    for (i, motor) in config.motors.iter().enumerate() {
        validate_motor(motor, config)?;
        if config.motors[..i].iter().any(|m| m.name == motor.name) {
            return Err(Error::Config(ConfigError::DuplicateMotorName(motor.name.clone())));
        }
    }

    let planner = &config.planner;
    if planner.junction_acceleration <= 0.0 {
        return Err(Error::Config(ConfigError::InvalidJunction(
            planner.junction_acceleration,
        )));
    }
    if planner.min_segment_us <= 0.0 || planner.min_segment_us >= planner.nominal_segment_us {
        return Err(Error::Config(ConfigError::InvalidSegmentTime {
            min_us: planner.min_segment_us,
            nominal_us: planner.nominal_segment_us,
        }));
    }

    Ok(())
}

fn validate_axis(axis: &AxisConfig) -> Result<()> {
    if axis.velocity_max.0 <= 0.0 {
        return Err(Error::Config(ConfigError::InvalidMaxVelocity(axis.velocity_max.0)));
    }
    if axis.feedrate_max.0 <= 0.0 {
        return Err(Error::Config(ConfigError::InvalidMaxVelocity(axis.feedrate_max.0)));
    }
    if axis.jerk_max.0 <= 0.0 {
        return Err(Error::Config(ConfigError::InvalidJerk(axis.jerk_max.0)));
    }
    if axis.junction_deviation <= 0.0 {
        return Err(Error::Config(ConfigError::InvalidJunction(axis.junction_deviation)));
    }
    Ok(())
}

fn validate_motor(motor: &MotorConfig, config: &MachineConfig) -> Result<()> {
    if motor.step_angle.0 <= 0.0 {
        return Err(Error::Config(ConfigError::InvalidStepScaling(motor.step_angle.0)));
    }
    if motor.travel_per_rev <= 0.0 {
        return Err(Error::Config(ConfigError::InvalidStepScaling(motor.travel_per_rev)));
    }
    let Some(axis) = motor.axis else {
        return Ok(());
    };
    let Some(limits) = config.axis(axis) else {
        return Err(Error::Config(ConfigError::AxisNotConfigured(motor.name.clone())));
    };

    // the DDA emits at most one pulse per tick
    if let Some(mechanics) = MotorMechanics::from_config(motor) {
        let velocity = limits.velocity_max.0.max(limits.feedrate_max.0);
        let rate_hz = velocity * mechanics.steps_per_unit / 60.0;
        if rate_hz > f64::from(config.stepper.dda_frequency_hz) {
            return Err(Error::Config(ConfigError::StepRateTooHigh {
                motor: motor.name.clone(),
                rate_hz,
            }));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AxisName, Degrees, Microsteps, PowerMode};

    fn make_config() -> MachineConfig {
        let mut config = MachineConfig::default();
        config
            .axes
            .insert(AxisName::X, AxisConfig::new(10000.0, 5000.0, 0.05))
            .unwrap();
        config
            .motors
            .push(MotorConfig {
                name: heapless::String::try_from("x").unwrap(),
                axis: Some(AxisName::X),
                step_angle: Degrees(1.8),
                travel_per_rev: 40.0,
                microsteps: Microsteps::EIGHTH,
                invert_direction: false,
                power_mode: PowerMode::default(),
            })
            .unwrap();
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&make_config()).is_ok());
    }

    #[test]
    fn test_invalid_jerk() {
        let mut config = make_config();
        config.axes.get_mut(&AxisName::X).unwrap().jerk_max.0 = 0.0;
        assert!(matches!(
            validate_config(&config),
            Err(Error::Config(ConfigError::InvalidJerk(_)))
        ));
    }

    #[test]
    fn test_motor_on_unconfigured_axis() {
        let mut config = make_config();
        config.motors[0].axis = Some(AxisName::Z);
        assert!(matches!(
            validate_config(&config),
            Err(Error::Config(ConfigError::AxisNotConfigured(_)))
        ));
    }

    #[test]
    fn test_duplicate_motor_name() {
        let mut config = make_config();
        let dup = config.motors[0].clone();
        config.motors.push(dup).unwrap();
        assert!(matches!(
            validate_config(&config),
            Err(Error::Config(ConfigError::DuplicateMotorName(_)))
        ));
    }

    #[test]
    fn test_segment_time_ordering() {
        let mut config = make_config();
        config.planner.min_segment_us = 2000.0;
        assert!(matches!(
            validate_config(&config),
            Err(Error::Config(ConfigError::InvalidSegmentTime { .. }))
        ));
    }

    #[test]
    fn test_step_rate_above_dda_rejected() {
        let mut config = make_config();
        // 16 microsteps on a 2 mm lead: 1600 steps/mm, 266 kHz at 10000 mm/min
        config.motors[0].travel_per_rev = 2.0;
        config.motors[0].microsteps = Microsteps::SIXTEENTH;
        assert!(matches!(
            validate_config(&config),
            Err(Error::Config(ConfigError::StepRateTooHigh { .. }))
        ));

        // slowing the axis to 3000 mm/min brings it to 80 kHz
        let axis = config.axes.get_mut(&AxisName::X).unwrap();
        axis.velocity_max.0 = 3000.0;
        axis.feedrate_max.0 = 3000.0;
        assert!(validate_config(&config).is_ok());

        config.stepper.dda_frequency_hz = 50_000;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_dda_frequency() {
        let mut config = make_config();
        config.stepper.dda_frequency_hz = 0;
        assert!(matches!(
            validate_config(&config),
            Err(Error::Config(ConfigError::InvalidFrequency(0)))
        ));
    }
}
