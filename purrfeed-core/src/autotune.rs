//! Stall threshold autotuning
//!
//! The driver's stall threshold trades sensitivity against false stalls:
//! the higher the value, the sooner a stall is flagged. The autotuner
//! starts high and sweeps short round trips of growing length away from
//! home. Any stall lowers the threshold and restarts the sweep from the
//! shortest trip. A sweep that reaches 90% of travel cleanly is repeated
//! once more as verification before the value is accepted.
//!
//! The accepted value is then backed off by fixed safety margins.

use serde::{Deserialize, Serialize};

use crate::motion::{MotionController, MotionError, Progress, TrackedMove};
use crate::stall::StallFlag;
use crate::traits::{Direction, DriverError, StallDriver, StepOutput};

/// Thresholds at or below this are rejected
pub const STALL_FLOOR: u8 = 10;

/// Operating margin below the discovered value
pub const OPERATING_MARGIN: u8 = 10;

/// Homing margin below the discovered value
pub const HOMING_MARGIN: u8 = 5;

/// Lazy reduction step applied after repeated stalls
pub const REDUCTION_STEP: u8 = 5;

/// Lazy reduction only applies at or above this operating threshold
pub const REDUCTION_FLOOR: u8 = 20;

/// Sweep fraction (percent of travel) at which verification starts
const VERIFY_AT_PERCENT: u32 = 90;

/// Operating and homing stall thresholds of one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StallThresholds {
    pub operating: u8,
    pub homing: u8,
}

impl Default for StallThresholds {
    fn default() -> Self {
        Self::from_operating(30)
    }
}

impl StallThresholds {
    /// Homing runs slightly more sensitive than normal operation
    pub const fn from_operating(operating: u8) -> Self {
        Self {
            operating,
            homing: operating.saturating_add(OPERATING_MARGIN - HOMING_MARGIN),
        }
    }

    /// Apply the safety margins to an autotuned value
    pub const fn from_discovered(value: u8) -> Self {
        Self {
            operating: value.saturating_sub(OPERATING_MARGIN),
            homing: value.saturating_sub(HOMING_MARGIN),
        }
    }

    /// Both thresholds lowered by [`REDUCTION_STEP`], if still allowed
    pub fn reduced(self) -> Option<Self> {
        if self.operating >= REDUCTION_FLOOR {
            Some(Self {
                operating: self.operating - REDUCTION_STEP,
                homing: self.homing.saturating_sub(REDUCTION_STEP),
            })
        } else {
            None
        }
    }
}

/// Sweep resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AutotunePreset {
    /// Coarse sweep, recommended for routine use
    Quick,
    /// Fine sweep from a higher starting value
    Thorough,
}

impl AutotunePreset {
    pub fn start_value(self) -> u8 {
        match self {
            AutotunePreset::Quick => 100,
            AutotunePreset::Thorough => 200,
        }
    }

    /// First trip length, percent of travel
    pub fn first_percent(self) -> u32 {
        match self {
            AutotunePreset::Quick => 10,
            AutotunePreset::Thorough => 1,
        }
    }

    /// Trip length increment, percent of travel
    pub fn step_percent(self) -> u32 {
        match self {
            AutotunePreset::Quick => 5,
            AutotunePreset::Thorough => 1,
        }
    }

    /// Threshold decrement after a stall
    pub fn decrement(self) -> u8 {
        match self {
            AutotunePreset::Quick => 5,
            AutotunePreset::Thorough => 1,
        }
    }
}

/// Autotuning errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AutotuneError {
    /// Stalls persisted down to [`STALL_FLOOR`]
    BelowFloor,
    Driver(DriverError),
    Motion(MotionError),
}

impl From<DriverError> for AutotuneError {
    fn from(err: DriverError) -> Self {
        AutotuneError::Driver(err)
    }
}

impl From<MotionError> for AutotuneError {
    fn from(err: MotionError) -> Self {
        AutotuneError::Motion(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Apply the threshold for the next trial
    Setup,
    Outward,
    Return { stalled: bool },
    /// Leave the slider away from home
    Park(StallThresholds),
    Done,
    Failed,
}

/// Polled autotuning run for one axis
#[derive(Debug, Clone)]
pub struct Autotuner {
    preset: AutotunePreset,
    toward_home: Direction,
    travel: u32,
    stage: Stage,
    tracked: TrackedMove,
    value: u8,
    percent: u32,
    verifying: bool,
    restarts: u32,
}

impl Autotuner {
    /// Autotune over a feed travel of `travel` steps
    pub fn new(preset: AutotunePreset, toward_home: Direction, travel: u32) -> Self {
        Self {
            preset,
            toward_home,
            travel,
            stage: Stage::Setup,
            tracked: TrackedMove::new(),
            value: preset.start_value(),
            percent: preset.first_percent(),
            verifying: false,
            restarts: 0,
        }
    }

    /// Threshold currently under test
    pub fn value(&self) -> u8 {
        self.value
    }

    /// Sweeps restarted after a stall
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn is_verifying(&self) -> bool {
        self.verifying
    }

    fn trip_steps(&self) -> u32 {
        (self.travel as u64 * self.percent as u64 / 100) as u32
    }

    /// Lower the threshold after a stall and restart the sweep
    fn back_off(&mut self) -> Result<(), AutotuneError> {
        self.value = self.value.saturating_sub(self.preset.decrement());
        if self.value <= STALL_FLOOR {
            log_error!("autotune: stalls persist down to the floor");
            self.stage = Stage::Failed;
            return Err(AutotuneError::BelowFloor);
        }
        self.restarts += 1;
        log_debug!("autotune: stall, retrying with {}", self.value);
        Ok(())
    }

    /// Advance the run by one tick
    ///
    /// Returns the resulting thresholds once the slider is parked. The
    /// driver is left at the operating threshold.
    pub fn poll<S: StepOutput, D: StallDriver>(
        &mut self,
        axis: &mut MotionController<S>,
        driver: &mut D,
        stall: &StallFlag,
        now_us: u64,
    ) -> Result<Progress<StallThresholds>, AutotuneError> {
        let away = self.toward_home.opposite();

        match self.stage {
            Stage::Setup => {
                driver.set_stall_threshold(self.value)?;
                self.stage = Stage::Outward;
                Ok(Progress::Busy)
            }
            Stage::Outward => {
                let steps = away.steps(self.trip_steps());
                let Progress::Done(stalled) = self.tracked.poll(axis, stall, steps, now_us)? else {
                    return Ok(Progress::Busy);
                };
                if stalled {
                    self.back_off()?;
                }
                self.stage = Stage::Return { stalled };
                Ok(Progress::Busy)
            }
            Stage::Return { stalled } => {
                let steps = self.toward_home.steps(self.trip_steps());
                let Progress::Done(return_stalled) =
                    self.tracked.poll(axis, stall, steps, now_us)?
                else {
                    return Ok(Progress::Busy);
                };

                if stalled {
                    self.percent = self.preset.step_percent();
                } else if return_stalled {
                    self.back_off()?;
                    self.percent = self.preset.step_percent();
                } else {
                    self.percent += self.preset.step_percent();
                    if self.percent >= VERIFY_AT_PERCENT && !self.verifying {
                        self.percent = self.preset.step_percent();
                        self.verifying = true;
                    }
                }

                if self.percent <= 100 {
                    self.stage = Stage::Setup;
                } else {
                    let thresholds = StallThresholds::from_discovered(self.value);
                    driver.set_stall_threshold(thresholds.operating)?;
                    log_info!(
                        "autotune: discovered {} after {} restarts",
                        self.value,
                        self.restarts
                    );
                    self.stage = Stage::Park(thresholds);
                }
                Ok(Progress::Busy)
            }
            Stage::Park(thresholds) => {
                let steps = away.steps(self.travel);
                if self.tracked.poll(axis, stall, steps, now_us)?.is_busy() {
                    return Ok(Progress::Busy);
                }
                self.stage = Stage::Done;
                Ok(Progress::Done(thresholds))
            }
            Stage::Done => Ok(Progress::Done(StallThresholds::from_discovered(self.value))),
            Stage::Failed => Err(AutotuneError::BelowFloor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockClock, Rig};
    use crate::traits::Clock;

    fn tune(
        tuner: &mut Autotuner,
        rig: &Rig,
        clock: &MockClock,
    ) -> (Result<StallThresholds, AutotuneError>, u32) {
        let mut axis = rig.axis();
        let mut driver = rig.driver();
        let mut last_value = tuner.value();
        loop {
            match tuner.poll(&mut axis, &mut driver, &rig.stall, clock.now_us()) {
                Ok(Progress::Busy) => {}
                Ok(Progress::Done(thresholds)) => return (Ok(thresholds), axis.position() as u32),
                Err(err) => return (Err(err), axis.position() as u32),
            }
            // Never increases across restarts
            assert!(tuner.value() <= last_value);
            last_value = tuner.value();
        }
    }

    #[test]
    fn test_threshold_margins() {
        let thresholds = StallThresholds::from_discovered(60);
        assert_eq!(thresholds.operating, 50);
        assert_eq!(thresholds.homing, 55);
        assert_eq!(thresholds.homing, thresholds.operating + 5);

        assert_eq!(StallThresholds::default(), StallThresholds { operating: 30, homing: 35 });
    }

    #[test]
    fn test_reduction_floor() {
        let thresholds = StallThresholds::from_operating(20);
        assert_eq!(thresholds.reduced(), Some(StallThresholds { operating: 15, homing: 20 }));
        assert_eq!(StallThresholds::from_operating(19).reduced(), None);
    }

    #[test]
    fn test_quick_discovers_highest_clean_value() {
        let rig = Rig::new();
        rig.set_false_stall_above(60);
        let clock = MockClock::new(10);
        let mut tuner = Autotuner::new(AutotunePreset::Quick, Direction::Negative, 460);

        let (result, position) = tune(&mut tuner, &rig, &clock);
        assert_eq!(result, Ok(StallThresholds { operating: 50, homing: 55 }));
        // 100 down to 60 in steps of 5
        assert_eq!(tuner.restarts(), 8);
        assert!(tuner.is_verifying());
        assert_eq!(rig.threshold(), 50);
        // Parked a full travel away from home
        assert_eq!(position, 460);
    }

    #[test]
    fn test_clean_axis_keeps_start_value() {
        let rig = Rig::new();
        let clock = MockClock::new(10);
        let mut tuner = Autotuner::new(AutotunePreset::Quick, Direction::Negative, 200);

        let (result, _) = tune(&mut tuner, &rig, &clock);
        assert_eq!(result, Ok(StallThresholds::from_discovered(100)));
        assert_eq!(tuner.restarts(), 0);
    }

    #[test]
    fn test_thorough_uses_unit_steps() {
        let rig = Rig::new();
        rig.set_false_stall_above(196);
        rig.set_physical(1000);
        let clock = MockClock::new(10);
        let mut tuner = Autotuner::new(AutotunePreset::Thorough, Direction::Negative, 100);

        let (result, _) = tune(&mut tuner, &rig, &clock);
        assert_eq!(result, Ok(StallThresholds { operating: 186, homing: 191 }));
        assert_eq!(tuner.restarts(), 4);
    }

    #[test]
    fn test_persistent_stalls_hit_the_floor() {
        let rig = Rig::new();
        rig.set_false_stall_above(12);
        let clock = MockClock::new(10);
        let mut tuner = Autotuner::new(AutotunePreset::Quick, Direction::Negative, 460);

        let (result, position) = tune(&mut tuner, &rig, &clock);
        assert_eq!(result, Err(AutotuneError::BelowFloor));
        assert_eq!(tuner.value(), 10);
        // Fails right after the stalled 5% trip, without returning
        assert_eq!(position, 23);
    }

    #[test]
    fn test_driver_failure() {
        let rig = Rig::new();
        rig.set_driver_online(false);
        let clock = MockClock::new(10);
        let mut tuner = Autotuner::new(AutotunePreset::Quick, Direction::Negative, 460);

        let (result, _) = tune(&mut tuner, &rig, &clock);
        assert_eq!(result, Err(AutotuneError::Driver(DriverError::NoResponse)));
    }
}
