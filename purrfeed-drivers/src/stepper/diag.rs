//! DIAG stall line monitor
//!
//! The TMC2209 pulses DIAG high when StallGuard detects a stall. Boards
//! that route DIAG to an interrupt raise the axis [`StallFlag`] from the
//! handler; this monitor does the same from a polled input.
//!
//! Rising edges closer together than the hold-off window are treated as
//! one stall.

use purrfeed_core::stall::StallFlag;
use purrfeed_hal::gpio::InputPin;

/// Default hold-off between reported stalls
pub const DEFAULT_HOLDOFF_US: u64 = 50_000;

/// Rising-edge detector on one DIAG line
pub struct DiagMonitor<'a, P> {
    pin: P,
    flag: &'a StallFlag,
    holdoff_us: u64,
    last_high: bool,
    last_edge_us: Option<u64>,
}

impl<'a, P: InputPin> DiagMonitor<'a, P> {
    /// Create a monitor
    ///
    /// A line that is already high is not a stall; only later edges count.
    pub fn new(pin: P, flag: &'a StallFlag, holdoff_us: u64) -> Self {
        let last_high = pin.is_high();
        Self {
            pin,
            flag,
            holdoff_us,
            last_high,
            last_edge_us: None,
        }
    }

    /// Sample the line; returns true when a stall was raised
    pub fn poll(&mut self, now_us: u64) -> bool {
        let high = self.pin.is_high();
        let rising = high && !self.last_high;
        self.last_high = high;
        if !rising {
            return false;
        }

        if let Some(last) = self.last_edge_us {
            if now_us.saturating_sub(last) < self.holdoff_us {
                return false;
            }
        }
        self.last_edge_us = Some(now_us);
        self.flag.raise();
        purrfeed_core::log_debug!("diag: stall edge at {} us", now_us);
        true
    }
}
