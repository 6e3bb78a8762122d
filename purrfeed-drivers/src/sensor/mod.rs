//! Sensor implementations

pub mod endstop;
pub mod hx711;
pub mod load_cell;

pub use endstop::{ActiveLevel, Endstop};
pub use hx711::{Gain, Hx711, Hx711Error};
pub use load_cell::{LoadCell, RawSource};
