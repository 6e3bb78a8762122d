//! Monotonic time source

/// Microsecond clock
pub trait Clock {
    /// Microseconds since an arbitrary epoch
    fn now_us(&self) -> u64;

    fn now_ms(&self) -> u64 {
        self.now_us() / 1000
    }

    /// Busy-wait for `ms` milliseconds
    ///
    /// Only the agitation pauses of scale emptying call this. Boards with
    /// a hardware delay should override it.
    fn delay_ms(&self, ms: u32) {
        let until = self.now_us().saturating_add(ms as u64 * 1000);
        while self.now_us() < until {}
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }

    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn delay_ms(&self, ms: u32) {
        (**self).delay_ms(ms)
    }
}
