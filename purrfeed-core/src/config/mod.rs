//! Configuration types
//!
//! Static per-device and per-node settings, plus the persisted calibration
//! records stored as postcard binary data.

pub mod device;
pub mod record;

pub use device::*;
pub use record::{load, save, Record, RecordError, ScaleRecord};
