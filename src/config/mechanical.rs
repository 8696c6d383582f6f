//! Step scaling and the axis-to-motor map derived from configuration.

use super::axis::AXES;
use super::motor::{MotorConfig, MOTORS};
use super::MachineConfig;

/// Derived per-motor scaling, computed once at initialization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorMechanics {
    /// Axis index driven by the motor.
    pub axis: usize,

    /// Microsteps per length unit of axis travel.
    pub steps_per_unit: f64,

    /// Length units per microstep.
    pub units_per_step: f64,
}

impl MotorMechanics {
    /// Compute scaling from a motor configuration. Returns `None` for unmapped motors.
    pub fn from_config(config: &MotorConfig) -> Option<Self> {
        let axis = config.axis?.index();
        let units_per_step = (config.travel_per_rev * config.step_angle.0)
            / (360.0 * config.microsteps.value() as f64);
        Some(Self {
            axis,
            steps_per_unit: 1.0 / units_per_step,
            units_per_step,
        })
    }
}

/// Cartesian joint mapping: every motor follows exactly one axis.
#[derive(Debug, Clone, Default)]
pub struct Kinematics {
    motors: [Option<MotorMechanics>; MOTORS],
}

impl Kinematics {
    /// Build the motor map from a machine configuration.
    pub fn from_config(config: &MachineConfig) -> Self {
        let mut motors = [None; MOTORS];
        for (slot, motor) in motors.iter_mut().zip(config.motors.iter()) {
            *slot = MotorMechanics::from_config(motor);
        }
        Self { motors }
    }

    /// Build a map from explicit `(axis, steps_per_unit)` pairs, one per motor.
    pub fn from_scaling(map: &[(usize, f64)]) -> Self {
        let mut motors = [None; MOTORS];
        for (slot, &(axis, steps_per_unit)) in motors.iter_mut().zip(map.iter()) {
            *slot = Some(MotorMechanics {
                axis,
                steps_per_unit,
                units_per_step: 1.0 / steps_per_unit,
            });
        }
        Self { motors }
    }

    /// Scaling for one motor.
    pub fn motor(&self, motor: usize) -> Option<&MotorMechanics> {
        self.motors.get(motor).and_then(|m| m.as_ref())
    }

    /// Convert an axis position to fractional motor steps.
    pub fn inverse(&self, position: &[f64; AXES]) -> [f64; MOTORS] {
        let mut steps = [0.0; MOTORS];
        for (out, motor) in steps.iter_mut().zip(self.motors.iter()) {
            if let Some(m) = motor {
                *out = position[m.axis] * m.steps_per_unit;
            }
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AxisName, Degrees, Microsteps, PowerMode};

    fn make_motor(axis: Option<AxisName>) -> MotorConfig {
        MotorConfig {
            name: heapless::String::try_from("m").unwrap(),
            axis,
            step_angle: Degrees(1.8),
            travel_per_rev: 40.0,
            microsteps: Microsteps::EIGHTH,
            invert_direction: false,
            power_mode: PowerMode::default(),
        }
    }

    #[test]
    fn test_steps_per_unit() {
        let mech = MotorMechanics::from_config(&make_motor(Some(AxisName::Y))).unwrap();

        // 200 * 8 / 40mm = 40 steps/mm
        assert!((mech.steps_per_unit - 40.0).abs() < 1e-9);
        assert_eq!(mech.axis, 1);
    }

    #[test]
    fn test_unmapped_motor() {
        assert!(MotorMechanics::from_config(&make_motor(None)).is_none());
    }

    #[test]
    fn test_inverse_shared_axis() {
        // Two motors on X (gantry), one on Z
        let kin = Kinematics::from_scaling(&[(0, 80.0), (0, 80.0), (2, 400.0)]);
        let steps = kin.inverse(&[1.5, 7.0, -0.25, 0.0, 0.0, 0.0]);

        assert!((steps[0] - 120.0).abs() < 1e-9);
        assert!((steps[1] - 120.0).abs() < 1e-9);
        assert!((steps[2] + 100.0).abs() < 1e-9);
        assert_eq!(steps[3], 0.0);
    }
}
