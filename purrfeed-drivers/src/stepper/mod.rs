//! Stepper driver implementations

pub mod diag;
pub mod pins;
pub mod tmc2209;

pub use diag::DiagMonitor;
pub use pins::StepDirPins;
pub use tmc2209::{Tmc2209Config, Tmc2209Driver, Tmc2209Error};
