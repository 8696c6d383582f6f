//! Axis configuration.

use serde::Deserialize;

use super::units::{MegaUnitsPerMin3, UnitsPerMin};

/// Number of axes known to the planner.
pub const AXES: usize = 6;

/// Cartesian and rotary axes, in planner vector order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(rename_all = "lowercase")]
pub enum AxisName {
    /// Linear X
    X,
    /// Linear Y
    Y,
    /// Linear Z
    Z,
    /// Rotary about X
    A,
    /// Rotary about Y
    B,
    /// Rotary about Z
    C,
}

impl AxisName {
    /// All axes in vector order.
    pub const ALL: [AxisName; AXES] = [
        AxisName::X,
        AxisName::Y,
        AxisName::Z,
        AxisName::A,
        AxisName::B,
        AxisName::C,
    ];

    /// Position of this axis in planner vectors.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether the axis is rotary (A, B, C).
    #[inline]
    pub const fn is_rotary(self) -> bool {
        matches!(self, AxisName::A | AxisName::B | AxisName::C)
    }
}

/// Dynamic limits for one axis.
#[derive(Debug, Clone, Deserialize)]
pub struct AxisConfig {
    /// Traverse (rapid) velocity limit.
    pub velocity_max: UnitsPerMin,

    /// Feed velocity limit.
    pub feedrate_max: UnitsPerMin,

    /// Jerk limit, multiplied by the jerk multiplier at planning time.
    pub jerk_max: MegaUnitsPerMin3,

    /// Allowed path deviation at corners, in length units.
    #[serde(default = "default_junction_deviation")]
    pub junction_deviation: f64,
}

fn default_junction_deviation() -> f64 {
    0.05
}

impl AxisConfig {
    /// Create an axis with identical traverse and feed limits.
    pub fn new(velocity_max: f64, jerk_max: f64, junction_deviation: f64) -> Self {
        Self {
            velocity_max: UnitsPerMin(velocity_max),
            feedrate_max: UnitsPerMin(velocity_max),
            jerk_max: MegaUnitsPerMin3(jerk_max),
            junction_deviation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_index_order() {
        for (i, axis) in AxisName::ALL.iter().enumerate() {
            assert_eq!(axis.index(), i);
        }
        assert!(AxisName::B.is_rotary());
        assert!(!AxisName::Z.is_rotary());
    }
}
