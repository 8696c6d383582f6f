//! Machine configuration - root configuration structure.

use heapless::{FnvIndexMap, Vec};
use serde::Deserialize;

use super::axis::{AxisConfig, AxisName};
use super::motor::{MotorConfig, MOTORS};

/// Root configuration structure from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    /// Look-ahead planner and segment timing.
    #[serde(default)]
    pub planner: PlannerSettings,

    /// Step timer and motor power timing.
    #[serde(default)]
    pub stepper: StepperSettings,

    /// Per-axis dynamic limits. Axes without an entry are not driven.
    pub axes: FnvIndexMap<AxisName, AxisConfig, 8>,

    /// Motor channels, in output order.
    #[serde(default)]
    pub motors: Vec<MotorConfig, MOTORS>,
}

/// Planner tuning.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PlannerSettings {
    /// Centripetal acceleration allowed at corners, in units/min².
    #[serde(default = "default_junction_acceleration")]
    pub junction_acceleration: f64,

    /// Target duration of one segment, in microseconds.
    #[serde(default = "default_nominal_segment_us")]
    pub nominal_segment_us: f64,

    /// Shortest segment the runtime accepts, in microseconds.
    #[serde(default = "default_min_segment_us")]
    pub min_segment_us: f64,
}

fn default_junction_acceleration() -> f64 {
    100_000.0
}

fn default_nominal_segment_us() -> f64 {
    1000.0
}

fn default_min_segment_us() -> f64 {
    750.0
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            junction_acceleration: default_junction_acceleration(),
            nominal_segment_us: default_nominal_segment_us(),
            min_segment_us: default_min_segment_us(),
        }
    }
}

/// Stepper runtime timing.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct StepperSettings {
    /// DDA interrupt rate.
    #[serde(default = "default_dda_frequency")]
    pub dda_frequency_hz: u32,

    /// System tick rate used for dwells and idle timeouts.
    #[serde(default = "default_dwell_frequency")]
    pub dwell_frequency_hz: u32,

    /// Time after motion stops before in-cycle motors are released.
    #[serde(rename = "motor_idle_timeout_sec", default = "default_idle_timeout")]
    pub motor_idle_timeout: f64,
}

fn default_dda_frequency() -> u32 {
    100_000
}

fn default_dwell_frequency() -> u32 {
    1000
}

fn default_idle_timeout() -> f64 {
    2.0
}

impl Default for StepperSettings {
    fn default() -> Self {
        Self {
            dda_frequency_hz: default_dda_frequency(),
            dwell_frequency_hz: default_dwell_frequency(),
            motor_idle_timeout: default_idle_timeout(),
        }
    }
}

impl MachineConfig {
    /// Get an axis configuration.
    pub fn axis(&self, axis: AxisName) -> Option<&AxisConfig> {
        self.axes.get(&axis)
    }

    /// Get a motor configuration by name.
    pub fn motor(&self, name: &str) -> Option<&MotorConfig> {
        self.motors.iter().find(|m| m.name.as_str() == name)
    }

    /// List all motor names.
    pub fn motor_names(&self) -> impl Iterator<Item = &str> {
        self.motors.iter().map(|m| m.name.as_str())
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            planner: PlannerSettings::default(),
            stepper: StepperSettings::default(),
            axes: FnvIndexMap::new(),
            motors: Vec::new(),
        }
    }
}
