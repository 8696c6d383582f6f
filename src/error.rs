//! Error types for stepper-planner.
//!
//! Fatal conditions are [`Alarm`]s: they halt motion until the alarm is
//! cleared. Rejected moves (too short, zero length) are reported through
//! [`MoveStatus`](crate::planner::MoveStatus) and are not errors.

use core::fmt;

/// Result type alias using the library's Error type.
pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for all stepper-planner operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Configuration parsing or validation error
    Config(ConfigError),
    /// Hard alarm. Motion is halted until cleared.
    Alarm(Alarm),
    /// Motor output error
    Motor(MotorError),
    /// Planner refused the operation in its current state
    Planner(PlannerError),
}

/// Configuration-related errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Failed to parse TOML configuration
    ParseError(heapless::String<128>),
    /// Invalid microstep value (must be power of 2: 1, 2, 4, 8, 16, 32, 64, 128, 256)
    InvalidMicrosteps(u16),
    /// Motor references an axis that has no configuration
    AxisNotConfigured(heapless::String<32>),
    /// Duplicate motor name in configuration
    DuplicateMotorName(heapless::String<32>),
    /// Invalid max velocity or feed rate (must be > 0)
    InvalidMaxVelocity(f64),
    /// Invalid jerk (must be > 0)
    InvalidJerk(f64),
    /// Invalid junction deviation or junction acceleration (must be > 0)
    InvalidJunction(f64),
    /// Invalid step angle or travel per revolution (must be > 0)
    InvalidStepScaling(f64),
    /// Segment timing is inconsistent (min must be > 0 and < nominal)
    InvalidSegmentTime {
        /// Minimum segment time in microseconds
        min_us: f64,
        /// Nominal segment time in microseconds
        nominal_us: f64,
    },
    /// Timer frequency must be > 0
    InvalidFrequency(u32),
    /// Motor idle timeout must be > 0
    InvalidIdleTimeout(f64),
    /// Peak step rate of a motor exceeds the DDA frequency
    StepRateTooHigh {
        /// Motor name
        motor: heapless::String<32>,
        /// Steps per second at the axis velocity limit
        rate_hz: f64,
    },
    /// A required builder input was not supplied
    MissingField(&'static str),
    /// File I/O error (std only)
    #[cfg(feature = "std")]
    IoError(heapless::String<128>),
}

/// Fatal conditions that stop all motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Alarm {
    /// No free planner block was available for a new move
    BufferFull,
    /// The segment generator ran while the prep slot was owned by the loader
    PrepSyncError,
    /// A segment with infinite duration reached the stepper prep
    SegmentTimeInfinite,
    /// A segment with NaN duration reached the stepper prep
    SegmentTimeNaN,
    /// Internal consistency check failed
    InternalError(&'static str),
}

/// Motor output errors.
#[derive(Debug, Clone, PartialEq)]
pub enum MotorError {
    /// Pin operation failed
    PinError,
    /// Motor index out of range
    InvalidMotor(usize),
}

/// Planner state errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlannerError {
    /// Operation requires the machine to be idle or held
    Busy,
    /// An alarm is active; clear it before issuing new work
    Halted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Alarm(e) => write!(f, "Alarm: {}", e),
            Error::Motor(e) => write!(f, "Motor error: {}", e),
            Error::Planner(e) => write!(f, "Planner error: {}", e),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            ConfigError::InvalidMicrosteps(v) => {
                write!(f, "Invalid microsteps: {}. Valid values: 1, 2, 4, 8, 16, 32, 64, 128, 256", v)
            }
            ConfigError::AxisNotConfigured(name) => {
                write!(f, "Motor '{}' is mapped to an axis with no configuration", name)
            }
            ConfigError::DuplicateMotorName(name) => write!(f, "Duplicate motor name: '{}'", name),
            ConfigError::InvalidMaxVelocity(v) => write!(f, "Invalid max velocity: {}. Must be > 0", v),
            ConfigError::InvalidJerk(v) => write!(f, "Invalid jerk: {}. Must be > 0", v),
            ConfigError::InvalidJunction(v) => write!(f, "Invalid junction setting: {}. Must be > 0", v),
            ConfigError::InvalidStepScaling(v) => {
                write!(f, "Invalid step angle or travel per revolution: {}. Must be > 0", v)
            }
            ConfigError::InvalidSegmentTime { min_us, nominal_us } => {
                write!(f, "Invalid segment time: min ({}us) must be > 0 and < nominal ({}us)", min_us, nominal_us)
            }
            ConfigError::InvalidFrequency(v) => write!(f, "Invalid timer frequency: {}. Must be > 0", v),
            ConfigError::InvalidIdleTimeout(v) => write!(f, "Invalid motor idle timeout: {}. Must be > 0", v),
            ConfigError::StepRateTooHigh { motor, rate_hz } => {
                write!(f, "Motor '{}' needs {} steps/s, above the DDA frequency", motor, rate_hz)
            }
            ConfigError::MissingField(name) => write!(f, "{} is required", name),
            #[cfg(feature = "std")]
            ConfigError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl fmt::Display for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alarm::BufferFull => write!(f, "planner buffer pool exhausted"),
            Alarm::PrepSyncError => write!(f, "segment prep ran while the loader owned the prep buffer"),
            Alarm::SegmentTimeInfinite => write!(f, "segment time is infinite"),
            Alarm::SegmentTimeNaN => write!(f, "segment time is NaN"),
            Alarm::InternalError(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl fmt::Display for MotorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotorError::PinError => write!(f, "GPIO pin operation failed"),
            MotorError::InvalidMotor(index) => write!(f, "Motor index {} out of range", index),
        }
    }
}

impl fmt::Display for PlannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannerError::Busy => write!(f, "machine must be idle or in feedhold"),
            PlannerError::Halted => write!(f, "machine is halted by an alarm"),
        }
    }
}

// Conversion impls
impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<Alarm> for Error {
    fn from(e: Alarm) -> Self {
        Error::Alarm(e)
    }
}

impl From<MotorError> for Error {
    fn from(e: MotorError) -> Self {
        Error::Motor(e)
    }
}

impl From<PlannerError> for Error {
    fn from(e: PlannerError) -> Self {
        Error::Planner(e)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

#[cfg(feature = "std")]
impl std::error::Error for Alarm {}

#[cfg(feature = "std")]
impl std::error::Error for MotorError {}

#[cfg(feature = "std")]
impl std::error::Error for PlannerError {}
