//! Home sensor sources
//!
//! Homing only ever asks one question: "is the home signal active right
//! now?". A digital endstop, a signal routed in from elsewhere (an IO
//! expander handled by another task) and a stall flag all answer it the
//! same way.

use portable_atomic::{AtomicBool, Ordering};

/// Boolean home signal
pub trait HomeSensor {
    /// Sample the signal
    ///
    /// Sources backed by a read-and-clear flag consume the event.
    fn is_active(&mut self) -> bool;
}

impl<T: HomeSensor + ?Sized> HomeSensor for &mut T {
    fn is_active(&mut self) -> bool {
        (**self).is_active()
    }
}

/// Home signal supplied by another part of the firmware
///
/// The producer calls [`ExternalSignal::set`] whenever it learns the level;
/// homing samples the last value written.
#[derive(Debug, Default)]
pub struct ExternalSignal(AtomicBool);

impl ExternalSignal {
    pub const fn new(active: bool) -> Self {
        Self(AtomicBool::new(active))
    }

    pub fn set(&self, active: bool) {
        self.0.store(active, Ordering::Release);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl HomeSensor for &ExternalSignal {
    fn is_active(&mut self) -> bool {
        self.get()
    }
}

/// Placeholder for axes that home on stall only
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHomeSensor;

impl HomeSensor for NoHomeSensor {
    fn is_active(&mut self) -> bool {
        false
    }
}
