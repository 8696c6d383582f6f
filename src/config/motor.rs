//! Motor configuration from TOML.

use heapless::String;
use serde::Deserialize;

use super::axis::AxisName;
use super::units::{Degrees, Microsteps};

/// Number of motor channels driven by the stepper runtime.
pub const MOTORS: usize = 6;

/// When a motor's driver is energized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(rename_all = "snake_case")]
pub enum PowerMode {
    /// Never energized.
    Disabled,
    /// Energized from startup and never released.
    AlwaysPowered,
    /// Energized while any motion runs, released after the idle timeout.
    #[default]
    PoweredInCycle,
    /// Energized only while this motor has steps to take.
    PoweredWhenMoving,
}

/// Complete motor configuration from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct MotorConfig {
    /// Human-readable name (max 32 chars).
    pub name: String<32>,

    /// Axis driven by this motor. Unmapped motors never step.
    #[serde(default)]
    pub axis: Option<AxisName>,

    /// Full-step angle (1.8 for 200 step/rev motors).
    #[serde(rename = "step_angle_deg", default = "default_step_angle")]
    pub step_angle: Degrees,

    /// Axis travel per motor revolution, in length units.
    pub travel_per_rev: f64,

    /// Microstep setting (1, 2, 4, 8, 16, 32, etc.).
    pub microsteps: Microsteps,

    /// Invert direction pin logic.
    #[serde(default)]
    pub invert_direction: bool,

    /// Driver enable policy.
    #[serde(default)]
    pub power_mode: PowerMode,
}

fn default_step_angle() -> Degrees {
    Degrees(1.8)
}

impl MotorConfig {
    /// Calculate microsteps per motor revolution.
    pub fn steps_per_revolution(&self) -> f64 {
        360.0 / self.step_angle.0 * self.microsteps.value() as f64
    }
}
