//! Mass sensor trait

/// Mass sensor errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScaleError {
    /// Converter never signalled data ready
    Timeout,
    /// Reference mass unusable (zero, negative or not finite)
    InvalidReference,
    /// Calibration produced an unusable scale factor
    CalibrationFailed,
    /// No mass sensor fitted to the device
    Absent,
}

/// Filtered load cell reading in grams
pub trait MassSensor {
    /// Average `samples` readings and convert to grams
    fn read_grams(&mut self, samples: u8) -> Result<f32, ScaleError>;

    /// Zero the sensor against its current load
    fn tare(&mut self, samples: u8) -> Result<(), ScaleError>;

    /// Derive the scale factor from a known reference mass on a tared sensor
    ///
    /// Returns the new factor, which is also applied.
    fn calibrate(&mut self, reference_grams: f32, samples: u8) -> Result<f32, ScaleError>;

    fn set_scale_factor(&mut self, factor: f32);

    fn scale_factor(&self) -> f32;
}
