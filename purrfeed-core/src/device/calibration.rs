//! Load cell calibration session
//!
//! ```text
//! Waiting -> Tare -> PlaceReference -> Computing -> Saving -> Finished
//!    ^                                                          |
//!    +----------------------------------------------------------+
//! ```
//!
//! Unattended sessions advance out of Waiting and PlaceReference after a
//! fixed wait; attended sessions advance on operator input instead. Any
//! sensor or storage failure moves to `Error`, which holds until reset.

use purrfeed_hal::storage::BlobStore;
use purrfeed_protocol::CalibrationStep;

use crate::config::record::{self, ScaleRecord};
use crate::traits::MassSensor;

/// Seconds allowed to empty the scale or place the reference mass
pub const PROMPT_WAIT_S: u64 = 20;

/// Reference mass for unattended calibration (g)
pub const REFERENCE_GRAMS: f32 = 20.0;

/// Samples averaged for tare and calibration
pub const CALIBRATION_SAMPLES: u8 = 20;

/// How prompts are answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationMode {
    /// Fixed waits, 20 g reference
    Unattended,
    /// Operator confirms each prompt
    Attended,
}

/// Operator answers in an attended session
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatorInput {
    ScaleEmpty,
    ReferencePlaced { grams: f32 },
}

/// Polled scale calibration
#[derive(Debug, Clone)]
pub struct ScaleCalibration {
    mode: CalibrationMode,
    step: CalibrationStep,
    wait_started_ms: Option<u64>,
    reference_grams: f32,
    factor: Option<f32>,
}

impl ScaleCalibration {
    pub const fn new(mode: CalibrationMode) -> Self {
        Self {
            mode,
            step: CalibrationStep::Waiting,
            wait_started_ms: None,
            reference_grams: REFERENCE_GRAMS,
            factor: None,
        }
    }

    pub fn mode(&self) -> CalibrationMode {
        self.mode
    }

    pub fn step(&self) -> CalibrationStep {
        self.step
    }

    /// Scale factor computed by the last successful run
    pub fn factor(&self) -> Option<f32> {
        self.factor
    }

    /// Back to Waiting, clearing an error
    pub fn reset(&mut self) {
        self.step = CalibrationStep::Waiting;
        self.wait_started_ms = None;
        self.reference_grams = REFERENCE_GRAMS;
    }

    /// The first call starts the wait; true once `seconds` have passed
    fn waited(&mut self, now_ms: u64, seconds: u64) -> bool {
        match self.wait_started_ms {
            None => {
                self.wait_started_ms = Some(now_ms);
                false
            }
            Some(start) if now_ms.saturating_sub(start) >= seconds * 1000 => {
                self.wait_started_ms = None;
                true
            }
            Some(_) => false,
        }
    }

    /// Advance the session by at most one step
    ///
    /// `input` is only consulted by attended sessions.
    pub fn poll<M: MassSensor + ?Sized, B: BlobStore + ?Sized>(
        &mut self,
        scale: &mut M,
        store: &mut B,
        address: u8,
        now_ms: u64,
        input: Option<OperatorInput>,
    ) -> CalibrationStep {
        let next = match self.step {
            CalibrationStep::Waiting => {
                let ready = match self.mode {
                    CalibrationMode::Unattended => self.waited(now_ms, PROMPT_WAIT_S),
                    CalibrationMode::Attended => input == Some(OperatorInput::ScaleEmpty),
                };
                if ready {
                    CalibrationStep::Tare
                } else {
                    CalibrationStep::Waiting
                }
            }
            CalibrationStep::Tare => match scale.tare(CALIBRATION_SAMPLES) {
                Ok(()) => CalibrationStep::PlaceReference,
                Err(_) => CalibrationStep::Error,
            },
            CalibrationStep::PlaceReference => match (self.mode, input) {
                (CalibrationMode::Unattended, _) if self.waited(now_ms, PROMPT_WAIT_S) => {
                    self.reference_grams = REFERENCE_GRAMS;
                    CalibrationStep::Computing
                }
                (CalibrationMode::Attended, Some(OperatorInput::ReferencePlaced { grams })) => {
                    self.reference_grams = grams;
                    CalibrationStep::Computing
                }
                _ => CalibrationStep::PlaceReference,
            },
            CalibrationStep::Computing => {
                match scale.calibrate(self.reference_grams, CALIBRATION_SAMPLES) {
                    Ok(factor) => {
                        self.factor = Some(factor);
                        CalibrationStep::Saving
                    }
                    Err(_) => CalibrationStep::Error,
                }
            }
            CalibrationStep::Saving => {
                let factor = scale.scale_factor();
                match record::save(store, address, &ScaleRecord { factor }) {
                    Ok(()) => CalibrationStep::Finished,
                    Err(_) => CalibrationStep::Error,
                }
            }
            CalibrationStep::Finished => {
                self.reset();
                CalibrationStep::Waiting
            }
            CalibrationStep::Error => CalibrationStep::Error,
        };

        if next != self.step {
            log_info!("calibration: {:?} -> {:?}", self.step, next);
            self.step = next;
        }
        next
    }
}
