//! Device coordination
//!
//! [`DeviceCoordinator`] is the concrete device. The node only sees the
//! object-safe [`FeederDevice`] view, so one node can drive devices built
//! from different hardware types.

pub mod calibration;
pub mod coordinator;
pub mod status;

pub use calibration::{CalibrationMode, OperatorInput, ScaleCalibration};
pub use coordinator::DeviceCoordinator;
pub use status::{DeviceStatus, Latch};

use purrfeed_hal::storage::BlobStore;
use purrfeed_protocol::{CalibrationStep, ErrorCode, WarningCode};

use crate::autotune::AutotunePreset;
use crate::config::DeviceRole;
use crate::traits::{Clock, HomeSensor, MassSensor, ScaleError, StallDriver, StepOutput};

/// Operations the node runs on a device
pub trait FeederDevice {
    fn address(&self) -> u8;
    fn role(&self) -> DeviceRole;
    fn has_scale(&self) -> bool;
    /// At rest on the home position
    fn is_home(&self) -> bool;

    fn prime(&mut self) -> DeviceStatus;
    fn move_cycle(&mut self) -> DeviceStatus;
    fn move_cycle_accurate(&mut self) -> DeviceStatus;
    fn return_home(&mut self) -> DeviceStatus;
    fn empty_scale(&mut self) -> DeviceStatus;
    fn emergency_move(&mut self) -> DeviceStatus;
    fn autotune(&mut self, preset: AutotunePreset) -> DeviceStatus;
    fn measure(&mut self, samples: u8) -> Result<f32, ScaleError>;

    fn thresholds_dirty(&self) -> bool;
    fn save_thresholds(&mut self, store: &mut dyn BlobStore) -> DeviceStatus;
    fn calibrate_scale(
        &mut self,
        store: &mut dyn BlobStore,
        input: Option<OperatorInput>,
    ) -> CalibrationStep;
    fn reset_calibration(&mut self);

    fn take_warning(&mut self) -> Option<WarningCode>;
    fn take_error(&mut self) -> Option<ErrorCode>;
}

impl<S, D, H, M, C> FeederDevice for DeviceCoordinator<'_, S, D, H, M, C>
where
    S: StepOutput,
    D: StallDriver,
    H: HomeSensor,
    M: MassSensor,
    C: Clock,
{
    fn address(&self) -> u8 {
        DeviceCoordinator::address(self)
    }

    fn role(&self) -> DeviceRole {
        self.config().role
    }

    fn has_scale(&self) -> bool {
        DeviceCoordinator::has_scale(self)
    }

    fn is_home(&self) -> bool {
        DeviceCoordinator::is_home(self)
    }

    fn prime(&mut self) -> DeviceStatus {
        DeviceCoordinator::prime(self)
    }

    fn move_cycle(&mut self) -> DeviceStatus {
        DeviceCoordinator::move_cycle(self)
    }

    fn move_cycle_accurate(&mut self) -> DeviceStatus {
        DeviceCoordinator::move_cycle_accurate(self)
    }

    fn return_home(&mut self) -> DeviceStatus {
        DeviceCoordinator::return_home(self)
    }

    fn empty_scale(&mut self) -> DeviceStatus {
        DeviceCoordinator::empty_scale(self)
    }

    fn emergency_move(&mut self) -> DeviceStatus {
        DeviceCoordinator::emergency_move(self)
    }

    fn autotune(&mut self, preset: AutotunePreset) -> DeviceStatus {
        DeviceCoordinator::autotune(self, preset)
    }

    fn measure(&mut self, samples: u8) -> Result<f32, ScaleError> {
        DeviceCoordinator::measure(self, samples)
    }

    fn thresholds_dirty(&self) -> bool {
        DeviceCoordinator::thresholds_dirty(self)
    }

    fn save_thresholds(&mut self, store: &mut dyn BlobStore) -> DeviceStatus {
        DeviceCoordinator::save_thresholds(self, store)
    }

    fn calibrate_scale(
        &mut self,
        store: &mut dyn BlobStore,
        input: Option<OperatorInput>,
    ) -> CalibrationStep {
        DeviceCoordinator::calibrate_scale(self, store, input)
    }

    fn reset_calibration(&mut self) {
        DeviceCoordinator::reset_calibration(self)
    }

    fn take_warning(&mut self) -> Option<WarningCode> {
        DeviceCoordinator::take_warning(self)
    }

    fn take_error(&mut self) -> Option<ErrorCode> {
        DeviceCoordinator::take_error(self)
    }
}
