//! Unit types for physical quantities.
//!
//! Configuration values carry their unit in the type so a feed rate can not be
//! passed where a step angle is expected. Planner internals work on raw `f64`.

use serde::Deserialize;

use crate::error::ConfigError;

/// Angle in degrees. Used for motor step angles.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Deserialize)]
#[serde(transparent)]
pub struct Degrees(pub f64);

impl Degrees {
    /// Create a new Degrees value.
    #[inline]
    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    #[inline]
    pub const fn value(self) -> f64 {
        self.0
    }
}

/// Velocity in length units (mm, or degrees for rotary axes) per minute.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Deserialize)]
#[serde(transparent)]
pub struct UnitsPerMin(pub f64);

impl UnitsPerMin {
    /// Create a new UnitsPerMin value.
    #[inline]
    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    #[inline]
    pub const fn value(self) -> f64 {
        self.0
    }
}

/// Jerk limit in millions of length units per minute cubed.
///
/// Configuration files keep jerk values small; the planner multiplies by
/// [`JERK_MULTIPLIER`](crate::planner::JERK_MULTIPLIER).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Deserialize)]
#[serde(transparent)]
pub struct MegaUnitsPerMin3(pub f64);

impl MegaUnitsPerMin3 {
    /// Create a new jerk value.
    #[inline]
    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    /// Get the raw value (still divided by the jerk multiplier).
    #[inline]
    pub const fn value(self) -> f64 {
        self.0
    }
}

/// Microstep divisor (1, 2, 4, 8, 16, 32, 64, 128, 256).
///
/// Validated at construction to be a power of 2 within the valid range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Microsteps(u16);

impl Microsteps {
    /// Full step (no microstepping).
    pub const FULL: Self = Self(1);
    /// Half step.
    pub const HALF: Self = Self(2);
    /// Quarter step.
    pub const QUARTER: Self = Self(4);
    /// Eighth step.
    pub const EIGHTH: Self = Self(8);
    /// Sixteenth step.
    pub const SIXTEENTH: Self = Self(16);
    /// Thirty-second step.
    pub const THIRTY_SECOND: Self = Self(32);

    const VALID_VALUES: [u16; 9] = [1, 2, 4, 8, 16, 32, 64, 128, 256];

    /// Create a new Microsteps value with validation.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidMicrosteps` if the value is not a valid power of 2.
    pub fn new(value: u16) -> Result<Self, ConfigError> {
        if Self::VALID_VALUES.contains(&value) {
            Ok(Self(value))
        } else {
            Err(ConfigError::InvalidMicrosteps(value))
        }
    }

    /// Get the raw divisor value.
    #[inline]
    pub const fn value(self) -> u16 {
        self.0
    }
}

impl Default for Microsteps {
    fn default() -> Self {
        Self::FULL
    }
}

impl TryFrom<u16> for Microsteps {
    type Error = ConfigError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for Microsteps {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use core::fmt::Write;
        let value = u16::deserialize(deserializer)?;
        Microsteps::new(value).map_err(|e| {
            let mut buf = heapless::String::<128>::new();
            let _ = write!(buf, "{}", e);
            serde::de::Error::custom(buf.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_microsteps_valid_values() {
        for &v in &Microsteps::VALID_VALUES {
            assert!(Microsteps::new(v).is_ok());
        }
    }

    #[test]
    fn test_microsteps_invalid_values() {
        assert!(Microsteps::new(0).is_err());
        assert!(Microsteps::new(3).is_err());
        assert!(Microsteps::new(512).is_err());
    }

    #[test]
    #[cfg(feature = "std")]
    fn test_microsteps_deserialize_rejects_odd_divisor() {
        #[derive(Deserialize)]
        struct Motor {
            microsteps: Microsteps,
        }

        let motor: Motor = toml::from_str("microsteps = 16").unwrap();
        assert_eq!(motor.microsteps, Microsteps::SIXTEENTH);
        assert!(toml::from_str::<Motor>("microsteps = 12").is_err());
    }

    #[test]
    #[cfg(feature = "std")]
    fn test_rates_are_transparent() {
        #[derive(Deserialize)]
        struct Axis {
            feedrate_max: UnitsPerMin,
            jerk_max: MegaUnitsPerMin3,
        }

        let axis: Axis = toml::from_str("feedrate_max = 1200.0\njerk_max = 50.0").unwrap();
        assert_eq!(axis.feedrate_max.value(), 1200.0);
        assert_eq!(axis.jerk_max, MegaUnitsPerMin3::new(50.0));
    }
}
