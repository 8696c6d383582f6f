//! Per-motor step, direction and enable outputs.

use embedded_hal::digital::OutputPin;

use crate::error::MotorError;

/// Hardware outputs for one motor channel, driven from the DDA interrupt.
pub trait StepOutput {
    /// Raise the step line.
    fn step_start(&mut self) -> Result<(), MotorError>;

    /// Lower the step line. Called on the tick after [`step_start`](Self::step_start).
    fn step_end(&mut self) -> Result<(), MotorError>;

    /// Set the physical direction line. `reverse` already includes polarity.
    fn set_direction(&mut self, reverse: bool) -> Result<(), MotorError>;

    /// Energize the driver.
    fn enable(&mut self) -> Result<(), MotorError>;

    /// De-energize the driver.
    fn disable(&mut self) -> Result<(), MotorError>;
}

/// [`StepOutput`] over three embedded-hal output pins.
///
/// Direction high means forward. Enable is active-low unless
/// [`enable_active_high`](Self::enable_active_high) is used.
pub struct StepperPins<STEP, DIR, EN>
where
    STEP: OutputPin,
    DIR: OutputPin,
    EN: OutputPin,
{
    step_pin: STEP,
    dir_pin: DIR,
    enable_pin: EN,
    enable_active_low: bool,
}

impl<STEP, DIR, EN> StepperPins<STEP, DIR, EN>
where
    STEP: OutputPin,
    DIR: OutputPin,
    EN: OutputPin,
{
    /// Wrap the pins of one driver.
    pub fn new(step_pin: STEP, dir_pin: DIR, enable_pin: EN) -> Self {
        Self {
            step_pin,
            dir_pin,
            enable_pin,
            enable_active_low: true,
        }
    }

    /// Drive the enable pin high to energize.
    pub fn enable_active_high(mut self) -> Self {
        self.enable_active_low = false;
        self
    }

    /// Give the pins back.
    pub fn release(self) -> (STEP, DIR, EN) {
        (self.step_pin, self.dir_pin, self.enable_pin)
    }

    fn write_enable(&mut self, energized: bool) -> Result<(), MotorError> {
        let high = energized != self.enable_active_low;
        if high {
            self.enable_pin.set_high().map_err(|_| MotorError::PinError)
        } else {
            self.enable_pin.set_low().map_err(|_| MotorError::PinError)
        }
    }
}

impl<STEP, DIR, EN> StepOutput for StepperPins<STEP, DIR, EN>
where
    STEP: OutputPin,
    DIR: OutputPin,
    EN: OutputPin,
{
    fn step_start(&mut self) -> Result<(), MotorError> {
        self.step_pin.set_high().map_err(|_| MotorError::PinError)
    }

    fn step_end(&mut self) -> Result<(), MotorError> {
        self.step_pin.set_low().map_err(|_| MotorError::PinError)
    }

    fn set_direction(&mut self, reverse: bool) -> Result<(), MotorError> {
        if reverse {
            self.dir_pin.set_low().map_err(|_| MotorError::PinError)
        } else {
            self.dir_pin.set_high().map_err(|_| MotorError::PinError)
        }
    }

    fn enable(&mut self) -> Result<(), MotorError> {
        self.write_enable(true)
    }

    fn disable(&mut self) -> Result<(), MotorError> {
        self.write_enable(false)
    }
}
