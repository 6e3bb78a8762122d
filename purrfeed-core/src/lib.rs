//! Board-agnostic core logic for the cat feeder firmware
//!
//! This crate contains all application logic that does not depend on
//! specific hardware implementations:
//!
//! - Hardware capability traits (step output, stall driver, sensors, clock)
//! - Trapezoidal motion control and per-axis stall flags
//! - Homing, fault recovery and stall threshold autotuning
//! - Device coordination (feeding primitives, scale calibration)
//! - The context-B node that serves the inter-context link
//! - Configuration types and persisted calibration records

#![no_std]
#![deny(unsafe_code)]

#[cfg(test)]
extern crate std;

#[macro_use]
mod logging;

pub mod autotune;
pub mod config;
pub mod device;
pub mod fill;
pub mod homing;
pub mod motion;
pub mod node;
pub mod recovery;
pub mod stall;
pub mod traits;

#[cfg(test)]
mod mocks;

pub use autotune::{AutotuneError, AutotunePreset, Autotuner, StallThresholds};
pub use device::{DeviceCoordinator, DeviceStatus, FeederDevice};
pub use homing::{HomingOutcome, HomingProcedure};
pub use motion::{MotionController, MotionError, MotionParams, Progress};
pub use node::{FeederNode, Lane, NodeError};
pub use recovery::{FaultClassification, FaultRecovery};
pub use stall::{AxisId, StallFlag, StallRegistry};
