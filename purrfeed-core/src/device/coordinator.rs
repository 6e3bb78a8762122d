//! One slider and everything attached to it
//!
//! `DeviceCoordinator` owns the axis, its driver, home sensor and optional
//! load cell, and turns them into feeding primitives. Each primitive is
//! polled: call it until it returns something other than
//! [`DeviceStatus::Busy`]. Warnings and errors raised along the way are
//! latched and read once through [`DeviceCoordinator::take_warning`] and
//! [`DeviceCoordinator::take_error`].
//!
//! Blocking paths (`bring_up`, the agitation tail of `empty_scale`,
//! `emergency_move`, `jog`) busy-poll the clock and must stay out of
//! steady-state feeding.

use purrfeed_hal::storage::BlobStore;
use purrfeed_protocol::{CalibrationStep, ErrorCode, WarningCode};

use crate::autotune::{AutotuneError, AutotunePreset, Autotuner, StallThresholds};
use crate::config::record::{self, RecordError, ScaleRecord};
use crate::config::{DeviceConfig, DeviceRole, HomeSource};
use crate::homing::{HomingOutcome, HomingProcedure};
use crate::motion::{move_relative, MotionController, MotionError, Progress};
use crate::recovery::{FaultClassification, FaultRecovery};
use crate::stall::StallFlag;
use crate::traits::{Clock, HomeSensor, MassSensor, ScaleError, StallDriver, StepOutput};

use super::calibration::{CalibrationMode, OperatorInput, ScaleCalibration};
use super::status::{DeviceStatus, Latch};

/// Samples averaged when taring during prime
pub const TARE_SAMPLES: u8 = 20;

/// Pause between agitation strokes while emptying the scale
pub const AGITATION_PAUSE_MS: u32 = 200;

/// Agitation strokes while emptying the scale
pub const AGITATION_ROUNDS: u8 = 3;

/// Fraction of the stroke where the accurate cycle starts micro-stepping
const PRE_POSITION: f32 = 0.5;

/// Micro-step of the accurate cycle as a fraction of the stroke
const MICRO_STEP: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HomeStep {
    Start,
    Homing,
    Recovering,
}

/// Coordinates one axis and its peripherals
pub struct DeviceCoordinator<'a, S, D, H, M, C> {
    config: DeviceConfig,
    axis: MotionController<S>,
    driver: D,
    home_sensor: H,
    scale: Option<M>,
    clock: C,
    stall: &'a StallFlag,
    thresholds: StallThresholds,
    thresholds_dirty: bool,
    reduce_pending: bool,
    warning: Latch<WarningCode>,
    error: Latch<ErrorCode>,
    home_step: HomeStep,
    homing: HomingProcedure,
    recovery: FaultRecovery,
    calibration: ScaleCalibration,
    autotuner: Option<Autotuner>,
}

impl<'a, S, D, H, M, C> DeviceCoordinator<'a, S, D, H, M, C>
where
    S: StepOutput,
    D: StallDriver,
    H: HomeSensor,
    M: MassSensor,
    C: Clock,
{
    /// Fails if the configured speed or acceleration is unusable
    pub fn new(
        config: DeviceConfig,
        output: S,
        driver: D,
        home_sensor: H,
        scale: Option<M>,
        clock: C,
        stall: &'a StallFlag,
    ) -> Result<Self, MotionError> {
        let axis = MotionController::new(output, config.motion_params())?;
        Ok(Self {
            config,
            axis,
            driver,
            home_sensor,
            scale,
            clock,
            stall,
            thresholds: StallThresholds::default(),
            thresholds_dirty: false,
            reduce_pending: false,
            warning: Latch::new(),
            error: Latch::new(),
            home_step: HomeStep::Start,
            homing: HomingProcedure::new(config.toward_home, config.max_range),
            recovery: FaultRecovery::new(config.recovery()),
            calibration: ScaleCalibration::new(CalibrationMode::Unattended),
            autotuner: None,
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn address(&self) -> u8 {
        self.config.address
    }

    pub fn axis(&self) -> &MotionController<S> {
        &self.axis
    }

    pub fn thresholds(&self) -> StallThresholds {
        self.thresholds
    }

    /// Thresholds changed since the last save
    pub fn thresholds_dirty(&self) -> bool {
        self.thresholds_dirty
    }

    pub fn has_scale(&self) -> bool {
        self.scale.is_some()
    }

    /// At rest on the home position
    pub fn is_home(&self) -> bool {
        self.axis.is_at_rest() && self.axis.position() == 0
    }

    /// Read and reset the pending warning
    ///
    /// A stall reduction requested by an earlier cycle is resolved here.
    pub fn take_warning(&mut self) -> Option<WarningCode> {
        if self.reduce_pending {
            self.reduce_pending = false;
            let code = self.reduce_stall();
            self.warning.set(code);
        }
        self.warning.take()
    }

    /// Read and reset the pending error
    pub fn take_error(&mut self) -> Option<ErrorCode> {
        self.error.take()
    }

    fn fail(&mut self, code: ErrorCode) -> DeviceStatus {
        log_error!("device {}: {:?}", self.config.address, code);
        self.error.set(code);
        DeviceStatus::Error
    }

    fn warn(&mut self, code: WarningCode) -> DeviceStatus {
        log_warn!("device {}: {:?}", self.config.address, code);
        self.warning.set(code);
        DeviceStatus::Warning
    }

    /// Load calibration, configure the driver and home
    ///
    /// Blocks until homing has finished.
    pub fn bring_up<B: BlobStore + ?Sized>(&mut self, store: &mut B) -> DeviceStatus {
        let address = self.config.address;

        match record::load::<StallThresholds, _>(store, address) {
            Ok(Some(thresholds)) => self.thresholds = thresholds,
            Ok(None) | Err(RecordError::Corrupt) | Err(RecordError::Encode) => {
                log_warn!("device {}: no stall thresholds stored, using defaults", address);
                self.thresholds = StallThresholds::default();
                self.warning.set(WarningCode::StallUncalibrated);
            }
            Err(RecordError::Store(_)) => return self.fail(ErrorCode::FileSystem),
        }

        // Latest warning wins: a missing scale factor hides a missing threshold record
        if let Some(scale) = self.scale.as_mut() {
            let factor = match record::load::<ScaleRecord, _>(store, address) {
                Ok(Some(stored)) => stored.factor,
                Ok(None) | Err(RecordError::Corrupt) | Err(RecordError::Encode) => {
                    log_warn!("device {}: no scale factor stored, using default", address);
                    self.warning.set(WarningCode::ScaleUncalibrated);
                    ScaleRecord::default().factor
                }
                Err(RecordError::Store(_)) => return self.fail(ErrorCode::FileSystem),
            };
            scale.set_scale_factor(factor);
        }

        let configured = self
            .driver
            .set_run_current(self.config.run_current_ma)
            .and_then(|()| self.driver.set_stall_threshold(self.thresholds.operating))
            .and_then(|()| self.driver.test_connection());
        if configured.is_err() {
            return self.fail(ErrorCode::DriverConnection);
        }

        let status = loop {
            let status = self.prime();
            if status.is_done() {
                break status;
            }
        };
        if status == DeviceStatus::Ok && self.warning.is_set() {
            DeviceStatus::Warning
        } else {
            status
        }
    }

    /// Drive to the home position, recovering from a failed approach
    pub fn home(&mut self) -> DeviceStatus {
        match self.home_step {
            HomeStep::Start => {
                if self.driver.set_stall_threshold(self.thresholds.homing).is_err() {
                    return self.fail(ErrorCode::DriverConnection);
                }
                self.stall.take();
                self.homing.reset();
                self.home_step = HomeStep::Homing;
                DeviceStatus::Busy
            }
            HomeStep::Homing => {
                let now = self.clock.now_us();
                let polled = match self.config.home_source {
                    HomeSource::Sensor => self.homing.poll(&mut self.axis, &mut self.home_sensor, now),
                    HomeSource::Stall => {
                        let mut sensor = self.stall;
                        self.homing.poll(&mut self.axis, &mut sensor, now)
                    }
                };
                let outcome = match polled {
                    Ok(Progress::Busy) => return DeviceStatus::Busy,
                    Ok(Progress::Done(outcome)) => outcome,
                    Err(_) => {
                        self.home_step = HomeStep::Start;
                        return self.fail(ErrorCode::StepperUnknown);
                    }
                };

                if self.driver.set_stall_threshold(self.thresholds.operating).is_err() {
                    self.home_step = HomeStep::Start;
                    return self.fail(ErrorCode::DriverConnection);
                }
                if outcome == HomingOutcome::Success {
                    self.home_step = HomeStep::Start;
                    return DeviceStatus::Ok;
                }

                let stalled = self.stall.take();
                self.recovery.start(outcome, stalled);
                self.home_step = HomeStep::Recovering;
                DeviceStatus::Busy
            }
            HomeStep::Recovering => {
                let now = self.clock.now_us();
                let classification = match self.recovery.poll(&mut self.axis, self.stall, now) {
                    Ok(Progress::Busy) => return DeviceStatus::Busy,
                    Ok(Progress::Done(classification)) => classification,
                    Err(_) => FaultClassification::Unknown,
                };
                self.home_step = HomeStep::Start;
                match classification {
                    FaultClassification::Freed => self.warn(WarningCode::StepperFreed),
                    FaultClassification::EndstopRecovered => self.warn(WarningCode::EndstopSuspect),
                    FaultClassification::Jammed => self.fail(ErrorCode::StepperJammed),
                    FaultClassification::Unknown => self.fail(ErrorCode::StepperUnknown),
                }
            }
        }
    }

    /// Home, then tare the load cell
    pub fn prime(&mut self) -> DeviceStatus {
        let status = self.home();
        if !matches!(status, DeviceStatus::Ok | DeviceStatus::Warning) {
            return status;
        }
        if let Some(scale) = self.scale.as_mut() {
            if scale.tare(TARE_SAMPLES).is_err() {
                return self.fail(ErrorCode::ScaleConnection);
            }
        }
        status
    }

    /// Latch `position` when at rest, otherwise keep moving
    ///
    /// True once the axis rests on `position`.
    fn move_to(&mut self, position: i32) -> bool {
        if self.axis.is_at_rest() {
            if self.axis.set_target(position).is_err() {
                return false;
            }
            return self.axis.is_at_rest();
        }
        let now = self.clock.now_us();
        self.axis.tick(now)
    }

    /// Status of a finished move: a stall during it asks for a reduction
    fn settle(&mut self) -> DeviceStatus {
        if self.stall.take() {
            self.reduce_pending = true;
            self.warn(WarningCode::StallDetected)
        } else {
            DeviceStatus::Ok
        }
    }

    /// One full stroke out and back
    ///
    /// Completes on the return home.
    pub fn move_cycle(&mut self) -> DeviceStatus {
        let full = self.config.away(1.0);
        let position = self.axis.position();
        // Anywhere off home the slider heads back
        let set = if position == 0 {
            if self.axis.is_at_rest() {
                self.stall.take();
            }
            full
        } else {
            0
        };

        if !self.move_to(set) {
            return DeviceStatus::Busy;
        }
        if self.axis.position() == 0 {
            self.settle()
        } else {
            DeviceStatus::Busy
        }
    }

    /// Stroke that crawls the second half in small steps
    ///
    /// Returns after each sub-move so the caller can weigh in between.
    /// The cycle is complete once [`Self::is_home`] holds again.
    pub fn move_cycle_accurate(&mut self) -> DeviceStatus {
        let pre = self.config.away(PRE_POSITION);
        let full = self.config.away(1.0);
        let micro = self.config.away(MICRO_STEP);
        let position = self.axis.position();

        let set = if position == 0 {
            if self.axis.is_at_rest() {
                self.stall.take();
            }
            pre
        } else if position.abs() >= full.abs() {
            0
        } else if position.abs() >= pre.abs() {
            let next = position + micro;
            if next.abs() > full.abs() {
                full
            } else {
                next
            }
        } else {
            0
        };

        if !self.move_to(set) {
            return DeviceStatus::Busy;
        }
        self.settle()
    }

    /// Drive back to the home position
    pub fn return_home(&mut self) -> DeviceStatus {
        if !self.move_to(0) {
            return DeviceStatus::Busy;
        }
        self.settle()
    }

    /// Tip the scale: full stroke, shake, then leave the slider open
    ///
    /// The agitation tail blocks.
    pub fn empty_scale(&mut self) -> DeviceStatus {
        let full = self.config.away(1.0);
        if self.axis.is_at_rest() && self.axis.position() != full {
            self.stall.take();
        }
        if !self.move_to(full) {
            return DeviceStatus::Busy;
        }

        let mut stalled = self.stall.take();
        let shaken = self.agitate();
        match shaken {
            Ok(shake_stalled) => stalled |= shake_stalled,
            Err(_) => return self.fail(ErrorCode::StepperUnknown),
        }
        if stalled {
            self.reduce_pending = true;
            self.warn(WarningCode::StallDetected)
        } else {
            DeviceStatus::Ok
        }
    }

    fn agitate(&mut self) -> Result<bool, MotionError> {
        let mut stalled = false;
        for _ in 0..AGITATION_ROUNDS {
            self.clock.delay_ms(AGITATION_PAUSE_MS);
            stalled |= self.blocking_move(self.config.toward(0.2))?;
            stalled |= self.blocking_move(self.config.away(0.2))?;
        }
        stalled |= self.blocking_move(self.config.toward(0.9))?;
        Ok(stalled)
    }

    fn blocking_move(&mut self, steps: i32) -> Result<bool, MotionError> {
        move_relative(&mut self.axis, self.stall, &self.clock, steps)
    }

    /// Slow, high-current dispensing run for a drivetrain that keeps failing
    ///
    /// Blocks. Speed and current are restored afterwards; the position is
    /// not trusted until the next prime.
    pub fn emergency_move(&mut self) -> DeviceStatus {
        let speed = self.axis.params().max_speed;
        if self.axis.set_max_speed(speed / 4.0).is_err() {
            return self.fail(ErrorCode::StepperUnknown);
        }
        if self.driver.set_run_current(self.config.emergency_current_ma).is_err() {
            log_warn!("device {}: emergency current not applied", self.config.address);
        }
        log_warn!("device {}: emergency move", self.config.address);

        let moved = self.emergency_strokes();

        let restored = self.axis.set_max_speed(speed);
        if self.driver.set_run_current(self.config.run_current_ma).is_err() {
            log_warn!("device {}: run current not restored", self.config.address);
        }
        self.stall.take();

        if moved.is_err() || restored.is_err() {
            return self.fail(ErrorCode::StepperUnknown);
        }
        DeviceStatus::Ok
    }

    fn emergency_strokes(&mut self) -> Result<(), MotionError> {
        match self.config.role {
            DeviceRole::Pump => {
                self.blocking_move(self.config.away(0.2))?;
                self.blocking_move(self.config.toward(1.2))?;
                for _ in 0..self.config.emergency_cycles {
                    self.blocking_move(self.config.away(1.2))?;
                    self.blocking_move(self.config.toward(1.2))?;
                }
            }
            DeviceRole::Dumper => {
                self.blocking_move(self.config.toward(0.2))?;
                self.blocking_move(self.config.away(1.2))?;
            }
        }
        Ok(())
    }

    /// Search for the stall threshold
    ///
    /// New thresholds are applied but only persisted by
    /// [`Self::save_thresholds`].
    pub fn autotune(&mut self, preset: AutotunePreset) -> DeviceStatus {
        let config = self.config;
        let tuner = self
            .autotuner
            .get_or_insert_with(|| Autotuner::new(preset, config.toward_home, config.travel));
        let now = self.clock.now_us();

        match tuner.poll(&mut self.axis, &mut self.driver, self.stall, now) {
            Ok(Progress::Busy) => DeviceStatus::Busy,
            Ok(Progress::Done(thresholds)) => {
                self.autotuner = None;
                self.thresholds = thresholds;
                self.thresholds_dirty = true;
                DeviceStatus::Ok
            }
            Err(err) => {
                self.autotuner = None;
                // Keep the previous sensitivity
                if self.driver.set_stall_threshold(self.thresholds.operating).is_err() {
                    log_warn!(
                        "device {}: could not restore stall threshold {}",
                        self.config.address,
                        self.thresholds.operating
                    );
                    return self.fail(ErrorCode::DriverConnection);
                }
                match err {
                    AutotuneError::BelowFloor => self.fail(ErrorCode::StallCalibration),
                    AutotuneError::Driver(_) => self.fail(ErrorCode::DriverConnection),
                    AutotuneError::Motion(_) => self.fail(ErrorCode::StepperUnknown),
                }
            }
        }
    }

    /// Persist the current thresholds
    pub fn save_thresholds<B: BlobStore + ?Sized>(&mut self, store: &mut B) -> DeviceStatus {
        match record::save(store, self.config.address, &self.thresholds) {
            Ok(()) => {
                self.thresholds_dirty = false;
                DeviceStatus::Ok
            }
            Err(_) => self.fail(ErrorCode::FileSystem),
        }
    }

    /// Lower both thresholds one notch, if allowed
    fn reduce_stall(&mut self) -> WarningCode {
        if !self.config.auto_stall_reduction {
            return WarningCode::StallDetected;
        }
        let Some(reduced) = self.thresholds.reduced() else {
            return WarningCode::StallDetected;
        };
        if self.driver.set_stall_threshold(reduced.operating).is_err() {
            return WarningCode::StallDetected;
        }
        log_info!(
            "device {}: stall threshold {} -> {}",
            self.config.address,
            self.thresholds.operating,
            reduced.operating
        );
        self.thresholds = reduced;
        self.thresholds_dirty = true;
        WarningCode::StallReduced
    }

    /// Weigh the scale contents
    pub fn measure(&mut self, samples: u8) -> Result<f32, ScaleError> {
        match self.scale.as_mut() {
            Some(scale) => scale.read_grams(samples),
            None => Err(ScaleError::Absent),
        }
    }

    pub fn test_connection(&mut self) -> DeviceStatus {
        match self.driver.test_connection() {
            Ok(()) => DeviceStatus::Ok,
            Err(_) => self.fail(ErrorCode::DriverConnection),
        }
    }

    /// Run one stroke in the given direction (blocking)
    pub fn jog(&mut self, toward_home: bool) -> DeviceStatus {
        let steps = if toward_home {
            self.config.toward(1.0)
        } else {
            self.config.away(1.0)
        };
        match self.blocking_move(steps) {
            Ok(false) => DeviceStatus::Ok,
            Ok(true) => self.warn(WarningCode::StallDetected),
            Err(_) => self.fail(ErrorCode::StepperUnknown),
        }
    }

    /// Switch between timed and operator-driven calibration
    pub fn set_calibration_mode(&mut self, mode: CalibrationMode) {
        self.calibration = ScaleCalibration::new(mode);
    }

    /// Advance the scale calibration session
    pub fn calibrate_scale<B: BlobStore + ?Sized>(
        &mut self,
        store: &mut B,
        input: Option<OperatorInput>,
    ) -> CalibrationStep {
        let Some(scale) = self.scale.as_mut() else {
            return CalibrationStep::Error;
        };
        let now_ms = self.clock.now_ms();
        self.calibration
            .poll(scale, store, self.config.address, now_ms, input)
    }

    /// Start the next calibration session from Waiting
    pub fn reset_calibration(&mut self) {
        self.calibration.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{
        EndstopMode, MockClock, MockDriver, MockScale, MockStepper, Rig, RigEndstop, HARD_STOP,
        TRUE_FACTOR,
    };
    use crate::traits::{Direction, NoHomeSensor};
    use purrfeed_hal::storage::RamStore;

    type Store = RamStore<4, { record::MAX_RECORD_LEN }>;
    type Device<'a> =
        DeviceCoordinator<'a, MockStepper<'a>, MockDriver<'a>, RigEndstop<'a>, MockScale<'a>, &'a MockClock>;

    fn device<'a>(rig: &'a Rig, clock: &'a MockClock, role: DeviceRole, scale: bool) -> Device<'a> {
        let config = DeviceConfig::new(1, role, Direction::Negative);
        DeviceCoordinator::new(
            config,
            MockStepper::new(rig),
            rig.driver(),
            rig.endstop(),
            scale.then(|| rig.scale()),
            clock,
            &rig.stall,
        )
        .unwrap()
    }

    fn run(mut op: impl FnMut() -> DeviceStatus) -> DeviceStatus {
        for _ in 0..1_000_000 {
            let status = op();
            if status.is_done() {
                return status;
            }
        }
        panic!("operation never finished");
    }

    #[test]
    fn test_bring_up_without_records() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        rig.set_physical(300);
        let mut store = Store::new();
        let mut dev = device(&rig, &clock, DeviceRole::Pump, true);

        assert_eq!(dev.bring_up(&mut store), DeviceStatus::Warning);
        // Latest warning wins
        assert_eq!(dev.take_warning(), Some(WarningCode::ScaleUncalibrated));
        assert_eq!(dev.take_warning(), None);
        assert_eq!(dev.thresholds(), StallThresholds::default());
        assert_eq!(rig.current_ma(), 600);
        assert_eq!(rig.threshold(), 30);
        assert!(dev.is_home());
        assert_eq!(rig.physical(), 0);
    }

    #[test]
    fn test_bring_up_without_records_or_scale() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        rig.set_physical(300);
        let mut store = Store::new();
        let mut dev = device(&rig, &clock, DeviceRole::Pump, false);

        assert_eq!(dev.bring_up(&mut store), DeviceStatus::Warning);
        assert_eq!(dev.take_warning(), Some(WarningCode::StallUncalibrated));
        assert_eq!(dev.take_warning(), None);
        assert_eq!(rig.threshold(), 30);
    }

    #[test]
    fn test_bring_up_with_records() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        let mut store = Store::new();
        record::save(&mut store, 1, &StallThresholds::from_operating(50)).unwrap();
        record::save(&mut store, 1, &ScaleRecord { factor: 2000.0 }).unwrap();
        let mut dev = device(&rig, &clock, DeviceRole::Pump, true);

        assert_eq!(dev.bring_up(&mut store), DeviceStatus::Ok);
        assert_eq!(dev.thresholds().operating, 50);
        assert_eq!(rig.threshold(), 50);
        rig.mass.set(1.0);
        let grams = dev.measure(1).unwrap();
        assert!((grams - TRUE_FACTOR / 2000.0).abs() < 1e-3);
    }

    #[test]
    fn test_bring_up_errors() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        let mut store = Store::new();
        store.set_offline(true);
        let mut dev = device(&rig, &clock, DeviceRole::Pump, false);
        assert_eq!(dev.bring_up(&mut store), DeviceStatus::Error);
        assert_eq!(dev.take_error(), Some(ErrorCode::FileSystem));
        assert_eq!(dev.take_error(), None);

        let mut store = Store::new();
        rig.set_driver_online(false);
        assert_eq!(dev.bring_up(&mut store), DeviceStatus::Error);
        assert_eq!(dev.take_error(), Some(ErrorCode::DriverConnection));
    }

    #[test]
    fn test_home_uses_homing_threshold() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        rig.set_physical(800);
        let mut dev = device(&rig, &clock, DeviceRole::Pump, false);

        assert_eq!(dev.home(), DeviceStatus::Busy);
        assert_eq!(rig.threshold(), 35);
        assert_eq!(run(|| dev.home()), DeviceStatus::Ok);
        assert_eq!(rig.threshold(), 30);
        assert!(dev.is_home());
    }

    #[test]
    fn test_home_with_dead_sensor_warns() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        rig.set_physical(1000);
        rig.set_endstop(EndstopMode::Dead);
        let mut dev = device(&rig, &clock, DeviceRole::Pump, false);

        assert_eq!(run(|| dev.home()), DeviceStatus::Warning);
        assert_eq!(dev.take_warning(), Some(WarningCode::EndstopSuspect));
        assert_eq!(dev.take_error(), None);
        assert_eq!(dev.axis().position(), 0);
    }

    #[test]
    fn test_home_jammed_is_error() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        rig.set_physical(1000);
        rig.set_endstop(EndstopMode::Dead);
        rig.obstruct(u32::MAX);
        let mut dev = device(&rig, &clock, DeviceRole::Pump, false);

        assert_eq!(run(|| dev.home()), DeviceStatus::Error);
        assert_eq!(dev.take_error(), Some(ErrorCode::StepperJammed));
    }

    #[test]
    fn test_stall_homing_source() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        rig.set_physical(400);
        let config = DeviceConfig::new(2, DeviceRole::Dumper, Direction::Negative)
            .with_home_source(HomeSource::Stall);
        let mut dev = DeviceCoordinator::new(
            config,
            MockStepper::new(&rig),
            rig.driver(),
            NoHomeSensor,
            None::<MockScale<'_>>,
            &clock,
            &rig.stall,
        )
        .unwrap();

        assert_eq!(run(|| dev.home()), DeviceStatus::Ok);
        assert_eq!(rig.physical(), HARD_STOP);
        assert!(dev.is_home());
    }

    #[test]
    fn test_prime_tares() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        rig.mass.set(3.0);
        let mut dev = device(&rig, &clock, DeviceRole::Pump, true);

        assert_eq!(run(|| dev.prime()), DeviceStatus::Ok);
        assert!(dev.measure(1).unwrap().abs() < 1e-3);
    }

    #[test]
    fn test_move_cycle_round_trip() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        let mut dev = device(&rig, &clock, DeviceRole::Pump, false);

        let mut peak = 0;
        let status = run(|| {
            let status = dev.move_cycle();
            peak = peak.max(rig.physical());
            status
        });
        assert_eq!(status, DeviceStatus::Ok);
        assert_eq!(peak, 4600);
        assert_eq!(rig.step_count(), 9200);
        assert!(dev.is_home());
    }

    #[test]
    fn test_move_cycle_stall_reduces_threshold() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        rig.set_wall(Some(4000));
        let mut dev = device(&rig, &clock, DeviceRole::Pump, false);

        assert_eq!(run(|| dev.move_cycle()), DeviceStatus::Warning);
        assert_eq!(dev.take_warning(), Some(WarningCode::StallReduced));
        assert_eq!(dev.thresholds(), StallThresholds { operating: 25, homing: 30 });
        assert_eq!(rig.threshold(), 25);
        assert!(dev.thresholds_dirty());

        let mut store = Store::new();
        assert_eq!(dev.save_thresholds(&mut store), DeviceStatus::Ok);
        assert!(!dev.thresholds_dirty());
        assert_eq!(
            record::load::<StallThresholds, _>(&mut store, 1),
            Ok(Some(StallThresholds { operating: 25, homing: 30 }))
        );
    }

    #[test]
    fn test_reduction_stops_at_floor() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        let mut dev = device(&rig, &clock, DeviceRole::Pump, false);
        dev.thresholds = StallThresholds::from_operating(15);

        dev.reduce_pending = true;
        assert_eq!(dev.take_warning(), Some(WarningCode::StallDetected));
        assert_eq!(dev.thresholds().operating, 15);
    }

    #[test]
    fn test_accurate_cycle_substeps() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        let mut dev = device(&rig, &clock, DeviceRole::Pump, false);

        let mut stops = heapless::Vec::<i32, 64>::new();
        loop {
            let status = run(|| dev.move_cycle_accurate());
            assert_eq!(status, DeviceStatus::Ok);
            stops.push(dev.axis().position()).unwrap();
            if dev.is_home() {
                break;
            }
        }

        // Pre-position, 50 micro-steps of 46, then home
        assert_eq!(stops.len(), 52);
        assert_eq!(stops[0], 2300);
        assert_eq!(stops[1], 2346);
        assert_eq!(stops[50], 4600);
        assert_eq!(stops[51], 0);
    }

    #[test]
    fn test_empty_scale_leaves_slider_open() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        let mut dev = device(&rig, &clock, DeviceRole::Dumper, false);

        assert_eq!(run(|| dev.empty_scale()), DeviceStatus::Ok);
        assert_eq!(dev.axis().position(), 460);
        assert!(dev.axis().is_at_rest());
    }

    #[test]
    fn test_only_agitation_pauses_block() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        rig.set_physical(300);
        let mut store = Store::new();
        let mut dev = device(&rig, &clock, DeviceRole::Dumper, false);

        dev.bring_up(&mut store);
        assert_eq!(run(|| dev.move_cycle()), DeviceStatus::Ok);
        assert_eq!(clock.delayed_ms(), 0);

        assert_eq!(run(|| dev.empty_scale()), DeviceStatus::Ok);
        assert_eq!(
            clock.delayed_ms(),
            AGITATION_ROUNDS as u64 * AGITATION_PAUSE_MS as u64
        );
    }

    #[test]
    fn test_emergency_move_restores_settings() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        let mut dev = device(&rig, &clock, DeviceRole::Pump, false);
        dev.bring_up(&mut Store::new());

        assert_eq!(dev.emergency_move(), DeviceStatus::Ok);
        assert_eq!(dev.axis().params().max_speed, 10_000.0);
        assert_eq!(rig.current_ma(), 600);
        // 0.2 out, 1.2 back, then four 1.2 round trips
        assert_eq!(dev.axis().position(), 920 - 5520);
    }

    #[test]
    fn test_emergency_dumper_opens_chute() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        rig.set_physical(500);
        let mut dev = device(&rig, &clock, DeviceRole::Dumper, false);

        assert_eq!(dev.emergency_move(), DeviceStatus::Ok);
        assert_eq!(dev.axis().position(), -920 + 5520);
    }

    #[test]
    fn test_autotune_marks_dirty() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        rig.set_false_stall_above(60);
        let mut dev = device(&rig, &clock, DeviceRole::Pump, false);

        assert_eq!(run(|| dev.autotune(AutotunePreset::Quick)), DeviceStatus::Ok);
        assert_eq!(dev.thresholds(), StallThresholds { operating: 50, homing: 55 });
        assert_eq!(rig.threshold(), 50);
        assert!(dev.thresholds_dirty());
    }

    #[test]
    fn test_autotune_floor_is_error() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        rig.set_false_stall_above(12);
        let mut dev = device(&rig, &clock, DeviceRole::Pump, false);

        assert_eq!(run(|| dev.autotune(AutotunePreset::Quick)), DeviceStatus::Error);
        assert_eq!(dev.take_error(), Some(ErrorCode::StallCalibration));
        assert_eq!(dev.thresholds(), StallThresholds::default());
        assert_eq!(rig.threshold(), 30);
    }

    #[test]
    fn test_autotune_lost_driver_on_restore() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        rig.set_false_stall_above(12);
        let mut dev = device(&rig, &clock, DeviceRole::Pump, false);

        // The last trial above the floor still stalls; drop the driver before it does
        let status = run(|| {
            if rig.threshold() == 15 {
                rig.set_driver_online(false);
            }
            dev.autotune(AutotunePreset::Quick)
        });
        assert_eq!(status, DeviceStatus::Error);
        assert_eq!(dev.take_error(), Some(ErrorCode::DriverConnection));
        assert_eq!(rig.threshold(), 15);
        assert_eq!(dev.thresholds(), StallThresholds::default());
    }

    #[test]
    fn test_measure_without_scale() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        let mut dev = device(&rig, &clock, DeviceRole::Dumper, false);
        assert_eq!(dev.measure(5), Err(ScaleError::Absent));
        assert_eq!(dev.calibrate_scale(&mut Store::new(), None), CalibrationStep::Error);
    }

    #[test]
    fn test_calibrate_scale_attended() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        let mut store = Store::new();
        let mut dev = device(&rig, &clock, DeviceRole::Pump, true);
        dev.set_calibration_mode(CalibrationMode::Attended);

        assert_eq!(
            dev.calibrate_scale(&mut store, Some(OperatorInput::ScaleEmpty)),
            CalibrationStep::Tare
        );
        assert_eq!(dev.calibrate_scale(&mut store, None), CalibrationStep::PlaceReference);
        rig.mass.set(20.0);
        let placed = Some(OperatorInput::ReferencePlaced { grams: 20.0 });
        assert_eq!(dev.calibrate_scale(&mut store, placed), CalibrationStep::Computing);
        assert_eq!(dev.calibrate_scale(&mut store, None), CalibrationStep::Saving);
        assert_eq!(dev.calibrate_scale(&mut store, None), CalibrationStep::Finished);
        assert!(record::load::<ScaleRecord, _>(&mut store, 1).unwrap().is_some());
    }

    #[test]
    fn test_jog_and_connection() {
        let rig = Rig::new();
        let clock = MockClock::new(5);
        let mut dev = device(&rig, &clock, DeviceRole::Pump, false);

        assert_eq!(dev.jog(false), DeviceStatus::Ok);
        assert_eq!(rig.physical(), 4600);
        assert_eq!(dev.jog(true), DeviceStatus::Ok);
        assert_eq!(rig.physical(), 0);

        assert_eq!(dev.test_connection(), DeviceStatus::Ok);
        rig.set_driver_online(false);
        assert_eq!(dev.test_connection(), DeviceStatus::Error);
        assert_eq!(dev.take_error(), Some(ErrorCode::DriverConnection));
    }
}
