//! Configuration module for stepper-planner.
//!
//! Provides types for loading and validating axis, motor and timing
//! configuration from TOML files (with `std` feature) or pre-parsed data.

mod axis;
mod mechanical;
mod motor;
mod system;
pub mod units;
#[cfg(feature = "std")]
mod loader;
mod validation;

pub use axis::{AxisConfig, AxisName, AXES};
pub use mechanical::{Kinematics, MotorMechanics};
pub use motor::{MotorConfig, PowerMode, MOTORS};
pub use system::{MachineConfig, PlannerSettings, StepperSettings};
pub use validation::validate_config;

#[cfg(feature = "std")]
pub use loader::{load_config, parse_config};

// Re-export unit types at config level
pub use units::{Degrees, MegaUnitsPerMin3, Microsteps, UnitsPerMin};
