//! Food container fill level
//!
//! A side sensor marks the low level; an optional top sensor marks full.
//! Between the two, remaining food is estimated from what was fed since
//! the container was last seen full. All estimates are rough and reported
//! in whole days at the configured daily ration.
//!
//! Single- and dual-lane machines differ in how the daily ration is taken
//! (the one lane's total vs. the larger of the two) and in how the low
//! warning is repeated. Both behaviours are kept as they are.

use heapless::Vec;
use purrfeed_protocol::{FillBand, Report, WarningCode, NO_DEVICE};

use crate::config::{NodeConfig, MAX_LANES};

/// Reports per update: one warning and one fill level
pub const MAX_FILL_REPORTS: usize = 2;

/// How many feed lanes share the container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FillVariant {
    /// Low warning on edges only
    Single,
    /// Low warning on every update while low
    Dual,
}

/// One reading of the container sensors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FillSample {
    /// Side sensor sees no food
    pub side_low: bool,
    /// Top sensor reading, `None` if not fitted
    pub top_covered: Option<bool>,
}

/// Fill level estimator
#[derive(Debug, Clone)]
pub struct FillMonitor {
    variant: FillVariant,
    high_g: u16,
    low_g: u16,
    low: bool,
    was_full: bool,
    fed_since_full: u16,
    daily: [u16; MAX_LANES],
}

impl FillMonitor {
    pub fn new(variant: FillVariant, config: &NodeConfig) -> Self {
        Self {
            variant,
            high_g: config.high_capacity_g,
            low_g: config.low_capacity_g,
            low: false,
            was_full: false,
            // Assume nearly empty until the top sensor says otherwise
            fed_since_full: config.high_capacity_g,
            daily: [0; MAX_LANES],
        }
    }

    pub fn variant(&self) -> FillVariant {
        self.variant
    }

    /// Grams scheduled per day on each lane
    pub fn set_daily_totals(&mut self, totals: [u16; MAX_LANES]) {
        self.daily = totals;
    }

    pub fn is_low(&self) -> bool {
        self.low
    }

    fn daily_total(&self) -> u16 {
        match self.variant {
            FillVariant::Single => self.daily[0],
            FillVariant::Dual => self.daily.iter().copied().max().unwrap_or(0),
        }
    }

    fn days(&self, grams: u16) -> u16 {
        match self.daily_total() {
            0 => u16::MAX,
            daily => grams / daily,
        }
    }

    fn side_warning(&mut self, side_low: bool) -> Option<WarningCode> {
        let was_low = self.low;
        self.low = side_low;
        match self.variant {
            FillVariant::Single if side_low && !was_low => Some(WarningCode::RefillFood),
            FillVariant::Dual if side_low => Some(WarningCode::RefillFood),
            _ if !side_low && was_low => Some(WarningCode::None),
            _ => None,
        }
    }

    fn level(&mut self, top_covered: bool, last_fed: &[u16; MAX_LANES]) -> (FillBand, u16) {
        if self.low {
            return (FillBand::Below, self.days(self.low_g));
        }
        if top_covered {
            self.was_full = true;
            return (FillBand::Above, self.days(self.high_g));
        }

        if self.was_full {
            self.was_full = false;
            self.fed_since_full = 0;
            return (FillBand::Near, self.days(self.high_g));
        }
        let fed = match self.variant {
            FillVariant::Single => last_fed[0],
            FillVariant::Dual => last_fed.iter().copied().max().unwrap_or(0),
        };
        self.fed_since_full = self.fed_since_full.saturating_add(fed);
        let days = if self.fed_since_full >= self.high_g {
            self.days(self.low_g)
        } else {
            self.days(self.high_g - self.fed_since_full)
        };
        (FillBand::Near, days)
    }

    /// Process one sensor reading taken after a feeding
    ///
    /// `last_fed` holds the grams just dispensed on each lane. A fill level
    /// is only estimated when the top sensor is fitted.
    pub fn update(
        &mut self,
        sample: FillSample,
        last_fed: [u16; MAX_LANES],
    ) -> Vec<Report, MAX_FILL_REPORTS> {
        let mut reports = Vec::new();

        if let Some(code) = self.side_warning(sample.side_low) {
            if code == WarningCode::RefillFood {
                log_warn!("fill: container low");
            }
            let pushed = reports.push(Report::Warning {
                device: NO_DEVICE,
                code,
            });
            debug_assert!(pushed.is_ok());
        }

        if let Some(covered) = sample.top_covered {
            let (band, days) = self.level(covered, &last_fed);
            log_debug!("fill: {:?} {} days", band, days);
            let pushed = reports.push(Report::FillLevel { band, days });
            debug_assert!(pushed.is_ok());
        }
        reports
    }
}
