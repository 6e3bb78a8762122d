//! Load cell mass sensor
//!
//! Converts averaged raw converter counts to grams:
//! `grams = (raw - offset) / factor`, where the offset comes from a tare
//! and the factor (counts per gram) from calibration or a stored record.

use embedded_hal::delay::DelayNs;
use purrfeed_core::config::record::DEFAULT_SCALE_FACTOR;
use purrfeed_core::traits::{MassSensor, ScaleError};
use purrfeed_hal::gpio::{InputPin, OutputPin};

use super::hx711::{Hx711, Hx711Error};

/// Source of raw converter counts for platform abstraction
pub trait RawSource {
    fn read_raw(&mut self) -> Result<i32, ScaleError>;
}

impl From<Hx711Error> for ScaleError {
    fn from(err: Hx711Error) -> Self {
        match err {
            Hx711Error::Timeout => ScaleError::Timeout,
        }
    }
}

impl<DT: InputPin, SCK: OutputPin, D: DelayNs> RawSource for Hx711<DT, SCK, D> {
    fn read_raw(&mut self) -> Result<i32, ScaleError> {
        Ok(Hx711::read_raw(self)?)
    }
}

/// Load cell behind a raw converter
pub struct LoadCell<A> {
    adc: A,
    offset: f32,
    factor: f32,
}

impl<A: RawSource> LoadCell<A> {
    /// Create an untared load cell with the default factor
    pub fn new(adc: A) -> Self {
        Self {
            adc,
            offset: 0.0,
            factor: DEFAULT_SCALE_FACTOR,
        }
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }

    /// Mean of `samples` raw readings (at least one)
    pub fn read_average(&mut self, samples: u8) -> Result<f32, ScaleError> {
        let count = samples.max(1);
        let mut sum: i64 = 0;
        for _ in 0..count {
            sum += self.adc.read_raw()? as i64;
        }
        Ok(sum as f32 / count as f32)
    }
}

impl<A: RawSource> MassSensor for LoadCell<A> {
    fn read_grams(&mut self, samples: u8) -> Result<f32, ScaleError> {
        Ok((self.read_average(samples)? - self.offset) / self.factor)
    }

    fn tare(&mut self, samples: u8) -> Result<(), ScaleError> {
        self.offset = self.read_average(samples)?;
        Ok(())
    }

    fn calibrate(&mut self, reference_grams: f32, samples: u8) -> Result<f32, ScaleError> {
        if !reference_grams.is_finite() || reference_grams <= 0.0 {
            return Err(ScaleError::InvalidReference);
        }
        let factor = (self.read_average(samples)? - self.offset) / reference_grams;
        if !factor.is_finite() || factor <= 0.0 {
            purrfeed_core::log_warn!("load cell: calibration gave factor {}", factor);
            return Err(ScaleError::CalibrationFailed);
        }
        self.factor = factor;
        Ok(factor)
    }

    fn set_scale_factor(&mut self, factor: f32) {
        // A zero factor would turn every reading into infinity
        if factor.is_finite() && factor != 0.0 {
            self.factor = factor;
        } else {
            purrfeed_core::log_warn!("load cell: ignoring factor {}", factor);
        }
    }

    fn scale_factor(&self) -> f32 {
        self.factor
    }
}
