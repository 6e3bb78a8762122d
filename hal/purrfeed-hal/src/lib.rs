//! Purrfeed Hardware Abstraction Layer
//!
//! This crate defines the small hardware surface the feeder core consumes
//! but does not own. Board support crates implement these traits; the
//! drivers crate builds step/direction outputs, endstops, the TMC2209 link
//! and the HX711 load cell on top of them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  purrfeed-core (device coordination)    │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  purrfeed-drivers (TMC2209, HX711, ...) │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  purrfeed-hal (this crate - traits)     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Traits
//!
//! - [`gpio::OutputPin`], [`gpio::InputPin`] - Digital I/O
//! - [`uart::UartTx`], [`uart::UartRx`] - Serial communication
//! - [`storage::BlobStore`] - Keyed calibration blobs

#![no_std]
#![deny(unsafe_code)]

pub mod gpio;
pub mod storage;
pub mod uart;

// Re-export key traits at crate root for convenience
pub use gpio::{ActiveLow, InputPin, OutputPin};
pub use storage::{BlobStore, RamStore, RecordKey, RecordKind, StoreError};
pub use uart::{UartRx, UartTx};
