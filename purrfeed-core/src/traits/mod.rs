//! Hardware capability traits
//!
//! The core consumes these; board and driver crates implement them.

pub mod clock;
pub mod scale;
pub mod sensor;
pub mod stepper;

pub use clock::Clock;
pub use scale::{MassSensor, ScaleError};
pub use sensor::{ExternalSignal, HomeSensor, NoHomeSensor};
pub use stepper::{Direction, DriverError, StallDriver, StepOutput};
