//! Per-axis stall flags
//!
//! The driver's DIAG line (or a debounced poll of it) raises a flag from
//! interrupt context; the motion code consumes it with a single
//! read-and-clear. The flag saturates: two stalls raised before one read
//! are observed as one.
//!
//! There is one interrupt line per axis, so the system is capped at
//! [`MAX_AXES`] flags.

use portable_atomic::{AtomicBool, Ordering};

use crate::traits::HomeSensor;

/// Maximum number of stall-monitored axes
pub const MAX_AXES: usize = 4;

/// Saturating single-writer/single-reader stall flag
#[derive(Debug, Default)]
pub struct StallFlag(AtomicBool);

impl StallFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Record a stall (interrupt side)
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Read and clear (poll side)
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// A stall flag read is a valid home signal: the slider stalls against the
/// mechanical end stop.
impl HomeSensor for &StallFlag {
    fn is_active(&mut self) -> bool {
        self.take()
    }
}

/// Index of a stall-monitored axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AxisId(u8);

impl AxisId {
    /// Returns `None` past the hardware limit
    pub const fn new(index: u8) -> Option<Self> {
        if (index as usize) < MAX_AXES {
            Some(Self(index))
        } else {
            None
        }
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Fixed table of stall flags, one per interrupt line
///
/// Lives in a `static` so interrupt handlers can reach it.
#[derive(Debug, Default)]
pub struct StallRegistry {
    flags: [StallFlag; MAX_AXES],
}

impl StallRegistry {
    pub const fn new() -> Self {
        Self {
            flags: [
                StallFlag::new(),
                StallFlag::new(),
                StallFlag::new(),
                StallFlag::new(),
            ],
        }
    }

    pub fn flag(&self, axis: AxisId) -> &StallFlag {
        &self.flags[axis.index()]
    }

    /// Interrupt entry point for `axis`
    pub fn raise(&self, axis: AxisId) {
        self.flag(axis).raise();
    }
}
