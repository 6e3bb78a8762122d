//! Device operation status and the single-read fault latches

/// Result of one call to a device operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceStatus {
    /// Operation in progress, call again
    Busy,
    /// Operation (or one step of it) finished normally
    Ok,
    /// Operation failed; see [`super::DeviceCoordinator::take_error`]
    Error,
    /// Operation finished in a degraded but safe state
    Warning,
}

impl DeviceStatus {
    pub fn is_done(self) -> bool {
        self != DeviceStatus::Busy
    }
}

/// Holds the most recent code until it is read once
///
/// A newer code replaces an unread older one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Latch<T> {
    pending: Option<T>,
}

impl<T> Default for Latch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Latch<T> {
    pub const fn new() -> Self {
        Self { pending: None }
    }

    pub fn set(&mut self, code: T) {
        self.pending = Some(code);
    }

    /// Read and reset
    pub fn take(&mut self) -> Option<T> {
        self.pending.take()
    }

    pub fn is_set(&self) -> bool {
        self.pending.is_some()
    }
}
