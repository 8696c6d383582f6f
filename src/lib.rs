//! # stepper-planner
//!
//! Jerk-limited look-ahead motion planning and DDA step generation for
//! CNC machines and 3D printers, on embedded-hal 1.0.
//!
//! ## Features
//!
//! - **Look-ahead planner**: a fixed ring of blocks replanned on every move
//!   so corners and stops stay within configured jerk and velocity limits
//! - **Feedhold**: stop mid-queue as fast as jerk allows and resume to the
//!   exact commanded endpoint
//! - **Segment generator**: S-curve heads and tails evaluated by forward
//!   differences, with following-error correction
//! - **DDA stepper**: fixed-rate phase accumulators with fractional step and
//!   tick carry, motor power management and virtual encoders
//! - **no_std compatible**: no allocation in the core
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stepper_planner::{Line, MotionController, StepperPins};
//!
//! let config = stepper_planner::load_config("machine.toml")?;
//! let mut machine: MotionController<_> = MotionController::builder()
//!     .config(&config)
//!     .motor(StepperPins::new(step, dir, enable))
//!     .build()?;
//!
//! machine.queue_line(&Line::feed([25.0, 0.0, 0.0, 0.0, 0.0, 0.0], 1500.0))?;
//!
//! // from the step timer interrupt:   machine.dda_tick()?
//! // from the 1 kHz tick:             machine.systick()?
//! // from a lower priority interrupt: machine.service_exec()?
//! // from the main loop:              machine.poll()?
//! ```
//!
//! ## Feature Flags
//!
//! - `std` (default): Enables file I/O and TOML parsing
//! - `alloc`: Enables heap allocation for no_std with allocator
//! - `defmt`: Enables defmt logging for embedded targets

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]
// Allow large error types - necessary for no_std with heapless strings
#![allow(clippy::result_large_err)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[macro_use]
mod log;

// Core modules
pub mod config;
pub mod error;
pub mod machine;
pub mod planner;
pub mod stepper;

// Re-exports for ergonomic API
pub use config::{validate_config, AxisName, Kinematics, MachineConfig, PowerMode, AXES, MOTORS};
pub use error::{Alarm, Error, Result};
pub use machine::{MotionController, MotionControllerBuilder, Signals};
pub use planner::{Command, Feed, HoldState, Line, MotionState, MoveStatus, Planner};
pub use stepper::{StepOutput, Stepper, StepperPins};

// Configuration loading (std only)
#[cfg(feature = "std")]
pub use config::{load_config, parse_config};
