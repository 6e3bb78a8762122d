//! Fault recovery after a failed homing attempt
//!
//! Classifies why homing failed and, where possible, gets the axis back
//! to a usable home position:
//!
//! - sensor stuck active: re-home against the stall signal instead
//! - sensor never reached without a stall: unknown drivetrain fault
//! - sensor never reached after a stall: seek, shake the slider loose if
//!   it is blocked, re-home on stall, then verify with a normal move
//!
//! Every move count is a constant, so the procedure always terminates.

use crate::homing::{HomingOutcome, HomingProcedure, HomingState};
use crate::motion::{MotionController, MotionError, Progress, TrackedMove};
use crate::stall::StallFlag;
use crate::traits::{Direction, StepOutput};

/// Oscillation rounds in the free-up sequence
pub const FREE_UP_ROUNDS: u32 = 6;

/// Seek distance as a fraction of the maximum range
const SEEK_DIVISOR: u32 = 10;

/// Speed factor while shaking the slider loose
const FREE_UP_SPEED_FACTOR: f32 = 0.2;

/// Result of one recovery run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultClassification {
    /// Slider was stuck and has been freed; axis homed on stall
    Freed,
    /// Home sensor misbehaves; axis homed on stall
    EndstopRecovered,
    /// Slider cannot be moved
    Jammed,
    /// Unclassifiable drivetrain fault
    Unknown,
}

impl FaultClassification {
    /// The axis is homed and usable
    pub fn is_recovered(self) -> bool {
        matches!(
            self,
            FaultClassification::Freed | FaultClassification::EndstopRecovered
        )
    }
}

/// Axis geometry used by the recovery moves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RecoveryConfig {
    pub toward_home: Direction,
    /// Longest possible travel of the slider
    pub max_range: u32,
    /// Normal feed travel, used for the verification move
    pub normal_distance: u32,
}

impl RecoveryConfig {
    fn seek_steps(&self) -> u32 {
        self.max_range / SEEK_DIVISOR
    }

    fn away(&self, steps: u32) -> i32 {
        self.toward_home.opposite().steps(steps)
    }

    fn toward(&self, steps: u32) -> i32 {
        self.toward_home.steps(steps)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Finished(FaultClassification),
    /// Short retreat to see whether the slider moves at all
    Seek,
    FreeUp { round: u32, outward: bool },
    Reseek,
    /// Homing with the stall flag as sensor
    Rehome,
    Verify,
    Return(FaultClassification),
}

/// Polled fault recovery procedure for one axis
#[derive(Debug, Clone)]
pub struct FaultRecovery {
    config: RecoveryConfig,
    stage: Stage,
    homing: HomingProcedure,
    tracked: TrackedMove,
    /// Sensor was stuck active; no verification needed after re-homing
    sensor_stuck: bool,
    freed_up: bool,
    saved_speed: Option<f32>,
}

impl FaultRecovery {
    pub const fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            stage: Stage::Idle,
            homing: HomingProcedure::new(config.toward_home, config.max_range),
            tracked: TrackedMove::new(),
            sensor_stuck: false,
            freed_up: false,
            saved_speed: None,
        }
    }

    pub fn config(&self) -> RecoveryConfig {
        self.config
    }

    pub fn is_running(&self) -> bool {
        self.stage != Stage::Idle
    }

    /// Begin recovery after a failed homing attempt
    ///
    /// `stalled` reports whether the axis stalled during that attempt.
    /// Returns false for a successful outcome, which needs no recovery.
    pub fn start(&mut self, outcome: HomingOutcome, stalled: bool) -> bool {
        self.homing.reset();
        self.tracked.cancel();
        self.freed_up = false;
        self.saved_speed = None;
        self.sensor_stuck = outcome == HomingOutcome::StuckHigh;

        self.stage = match (outcome, stalled) {
            (HomingOutcome::Success, _) => Stage::Idle,
            (HomingOutcome::StuckHigh, _) => Stage::Rehome,
            (HomingOutcome::StuckLow, false) => Stage::Finished(FaultClassification::Unknown),
            (HomingOutcome::StuckLow, true) => Stage::Seek,
        };
        if self.stage == Stage::Idle {
            return false;
        }
        log_info!("recovery: start after {:?} (stalled: {})", outcome, stalled);
        true
    }

    /// Advance recovery by one tick
    pub fn poll<S: StepOutput>(
        &mut self,
        axis: &mut MotionController<S>,
        stall: &StallFlag,
        now_us: u64,
    ) -> Result<Progress<FaultClassification>, MotionError> {
        let result = self.step(axis, stall, now_us);
        if result.is_err() {
            self.restore_speed(axis);
            self.stage = Stage::Idle;
        }
        result
    }

    fn step<S: StepOutput>(
        &mut self,
        axis: &mut MotionController<S>,
        stall: &StallFlag,
        now_us: u64,
    ) -> Result<Progress<FaultClassification>, MotionError> {
        let config = self.config;

        match self.stage {
            Stage::Idle => Ok(Progress::Done(FaultClassification::Unknown)),
            Stage::Finished(classification) => Ok(self.finish(axis, classification)),
            Stage::Seek => {
                let Progress::Done(stalled) =
                    self.tracked.poll(axis, stall, config.away(config.seek_steps()), now_us)?
                else {
                    return Ok(Progress::Busy);
                };
                if stalled {
                    log_warn!("recovery: slider blocked, freeing up");
                    let speed = axis.params().max_speed;
                    axis.set_max_speed(speed * FREE_UP_SPEED_FACTOR)?;
                    self.saved_speed = Some(speed);
                    self.stage = Stage::FreeUp {
                        round: 1,
                        outward: true,
                    };
                } else {
                    self.stage = Stage::Rehome;
                }
                Ok(Progress::Busy)
            }
            Stage::FreeUp { round, outward } => {
                let amplitude = config.seek_steps() * round / FREE_UP_ROUNDS;
                let steps = if outward {
                    config.away(amplitude)
                } else {
                    config.toward(amplitude)
                };
                if self.tracked.poll(axis, stall, steps, now_us)?.is_busy() {
                    return Ok(Progress::Busy);
                }

                self.stage = if outward {
                    Stage::FreeUp {
                        round,
                        outward: false,
                    }
                } else if round < FREE_UP_ROUNDS {
                    Stage::FreeUp {
                        round: round + 1,
                        outward: true,
                    }
                } else {
                    self.restore_speed(axis);
                    Stage::Reseek
                };
                Ok(Progress::Busy)
            }
            Stage::Reseek => {
                let Progress::Done(stalled) =
                    self.tracked.poll(axis, stall, config.away(config.seek_steps()), now_us)?
                else {
                    return Ok(Progress::Busy);
                };
                if stalled {
                    Ok(self.finish(axis, FaultClassification::Jammed))
                } else {
                    self.freed_up = true;
                    self.stage = Stage::Rehome;
                    Ok(Progress::Busy)
                }
            }
            Stage::Rehome => {
                if self.homing.state() == HomingState::Idle {
                    // Stale stalls from the failed attempt must not count as home
                    stall.take();
                }
                let mut sensor = stall;
                let Progress::Done(outcome) = self.homing.poll(axis, &mut sensor, now_us)? else {
                    return Ok(Progress::Busy);
                };
                match outcome {
                    HomingOutcome::Success if self.sensor_stuck => {
                        Ok(self.finish(axis, FaultClassification::EndstopRecovered))
                    }
                    HomingOutcome::Success => {
                        self.stage = Stage::Verify;
                        Ok(Progress::Busy)
                    }
                    _ => Ok(self.finish(axis, FaultClassification::Unknown)),
                }
            }
            Stage::Verify => {
                let Progress::Done(stalled) =
                    self.tracked.poll(axis, stall, config.away(config.normal_distance), now_us)?
                else {
                    return Ok(Progress::Busy);
                };
                let classification = if stalled || self.freed_up {
                    FaultClassification::Freed
                } else {
                    FaultClassification::EndstopRecovered
                };
                self.stage = Stage::Return(classification);
                Ok(Progress::Busy)
            }
            Stage::Return(classification) => {
                let steps = config.toward(config.normal_distance);
                if self.tracked.poll(axis, stall, steps, now_us)?.is_busy() {
                    return Ok(Progress::Busy);
                }
                Ok(self.finish(axis, classification))
            }
        }
    }

    fn restore_speed<S: StepOutput>(&mut self, axis: &mut MotionController<S>) {
        if let Some(speed) = self.saved_speed.take() {
            if axis.set_max_speed(speed).is_err() {
                log_error!("recovery: could not restore speed");
            }
        }
    }

    fn finish<S: StepOutput>(
        &mut self,
        axis: &mut MotionController<S>,
        classification: FaultClassification,
    ) -> Progress<FaultClassification> {
        self.restore_speed(axis);
        self.stage = Stage::Idle;
        log_info!("recovery: classified as {:?}", classification);
        Progress::Done(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{EndstopMode, MockClock, Rig, HARD_STOP};
    use crate::traits::Clock;
    use proptest::prelude::*;

    const CONFIG: RecoveryConfig = RecoveryConfig {
        toward_home: Direction::Negative,
        max_range: 6000,
        normal_distance: 4600,
    };

    /// Poll to completion, returning the classification and the poll count
    fn recover<S: StepOutput>(
        recovery: &mut FaultRecovery,
        axis: &mut MotionController<S>,
        stall: &StallFlag,
        clock: &MockClock,
    ) -> (FaultClassification, u32) {
        let mut polls = 0;
        loop {
            polls += 1;
            if let Progress::Done(c) = recovery.poll(axis, stall, clock.now_us()).unwrap() {
                return (c, polls);
            }
            assert!(polls < 5_000_000, "recovery did not terminate");
        }
    }

    #[test]
    fn test_success_needs_no_recovery() {
        let mut recovery = FaultRecovery::new(CONFIG);
        assert!(!recovery.start(HomingOutcome::Success, true));
        assert!(!recovery.is_running());
    }

    #[test]
    fn test_stuck_low_without_stall_is_unknown() {
        let rig = Rig::new();
        let clock = MockClock::new(10);
        let mut axis = rig.axis();
        let mut recovery = FaultRecovery::new(CONFIG);

        assert!(recovery.start(HomingOutcome::StuckLow, false));
        let (classification, _) = recover(&mut recovery, &mut axis, &rig.stall, &clock);
        assert_eq!(classification, FaultClassification::Unknown);
        assert_eq!(rig.step_count(), 0);
        assert!(!recovery.is_running());
    }

    #[test]
    fn test_stuck_high_rehomes_on_stall() {
        let rig = Rig::new();
        rig.set_endstop(EndstopMode::StuckHigh);
        rig.set_physical(3000);
        let clock = MockClock::new(10);
        let mut axis = rig.axis();
        let mut recovery = FaultRecovery::new(CONFIG);

        assert!(recovery.start(HomingOutcome::StuckHigh, false));
        let (classification, _) = recover(&mut recovery, &mut axis, &rig.stall, &clock);
        assert_eq!(classification, FaultClassification::EndstopRecovered);
        assert!(classification.is_recovered());
        assert_eq!(axis.position(), 0);
        assert_eq!(rig.physical(), HARD_STOP);
    }

    #[test]
    fn test_stuck_high_out_of_range_is_unknown() {
        let rig = Rig::new();
        // Hard stop is beyond the homing budget
        rig.set_physical(7000);
        let clock = MockClock::new(10);
        let mut axis = rig.axis();
        let mut recovery = FaultRecovery::new(CONFIG);

        recovery.start(HomingOutcome::StuckHigh, false);
        let (classification, _) = recover(&mut recovery, &mut axis, &rig.stall, &clock);
        assert_eq!(classification, FaultClassification::Unknown);
    }

    #[test]
    fn test_dead_sensor_recovered_with_stall() {
        let rig = Rig::new();
        rig.set_endstop(EndstopMode::Dead);
        rig.set_physical(100);
        let clock = MockClock::new(10);
        let mut axis = rig.axis();
        let mut recovery = FaultRecovery::new(CONFIG);

        recovery.start(HomingOutcome::StuckLow, true);
        let (classification, _) = recover(&mut recovery, &mut axis, &rig.stall, &clock);
        assert_eq!(classification, FaultClassification::EndstopRecovered);
        assert_eq!(axis.position(), 0);
        assert!(axis.is_at_rest());
        assert_eq!(rig.physical(), HARD_STOP);
    }

    #[test]
    fn test_obstruction_is_freed() {
        let rig = Rig::new();
        rig.set_endstop(EndstopMode::Dead);
        rig.set_physical(500);
        rig.obstruct(700);
        let clock = MockClock::new(10);
        let mut axis = rig.axis();
        let mut recovery = FaultRecovery::new(CONFIG);

        recovery.start(HomingOutcome::StuckLow, true);
        let (classification, _) = recover(&mut recovery, &mut axis, &rig.stall, &clock);
        assert_eq!(classification, FaultClassification::Freed);
        assert_eq!(rig.blocked_remaining(), 0);
        assert_eq!(axis.position(), 0);
        // Speed restored after the slow shaking
        assert_eq!(axis.params().max_speed, 10_000.0);
    }

    #[test]
    fn test_stall_on_verification_is_freed() {
        let rig = Rig::new();
        rig.set_endstop(EndstopMode::Dead);
        rig.set_physical(100);
        rig.set_wall(Some(3000));
        let clock = MockClock::new(10);
        let mut axis = rig.axis();
        let mut recovery = FaultRecovery::new(CONFIG);

        recovery.start(HomingOutcome::StuckLow, true);
        let (classification, _) = recover(&mut recovery, &mut axis, &rig.stall, &clock);
        assert_eq!(classification, FaultClassification::Freed);
        assert_eq!(axis.position(), 0);
    }

    #[test]
    fn test_permanent_obstruction_is_jammed() {
        let rig = Rig::new();
        rig.set_endstop(EndstopMode::Dead);
        rig.set_physical(500);
        rig.obstruct(u32::MAX);
        let clock = MockClock::new(10);
        let mut axis = rig.axis();
        let mut recovery = FaultRecovery::new(CONFIG);

        recovery.start(HomingOutcome::StuckLow, true);
        let (classification, _) = recover(&mut recovery, &mut axis, &rig.stall, &clock);
        assert_eq!(classification, FaultClassification::Jammed);
        assert!(!classification.is_recovered());
        assert_eq!(rig.physical(), 500);
        assert_eq!(axis.params().max_speed, 10_000.0);

        // Seek, six out-and-back rounds, re-seek
        let shaking: u32 = (1..=FREE_UP_ROUNDS).map(|r| 2 * 600 * r / FREE_UP_ROUNDS).sum();
        assert_eq!(rig.step_count(), 600 + shaking + 600);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_recovery_always_terminates(
            start in 0i32..3000,
            blocked in prop_oneof![Just(0u32), 0u32..2000, Just(u32::MAX)],
            stuck_high in any::<bool>(),
            stalled in any::<bool>(),
        ) {
            let rig = Rig::new();
            rig.set_endstop(EndstopMode::Dead);
            rig.set_physical(start);
            rig.obstruct(blocked);
            let clock = MockClock::new(10);
            let mut axis = rig.axis();
            let mut recovery = FaultRecovery::new(CONFIG);

            let outcome = if stuck_high { HomingOutcome::StuckHigh } else { HomingOutcome::StuckLow };
            prop_assert!(recovery.start(outcome, stalled));
            let (classification, _) = recover(&mut recovery, &mut axis, &rig.stall, &clock);
            if classification.is_recovered() {
                prop_assert_eq!(axis.position(), 0);
            }
            prop_assert!(axis.is_at_rest());
            prop_assert_eq!(axis.params().max_speed, 10_000.0);
        }
    }
}
