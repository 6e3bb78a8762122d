//! Homing state machine
//!
//! Drives an axis toward a home sensor and redefines the position there
//! as 0. The sensor is passed to every poll, so the same procedure works
//! with an endstop input, an externally routed signal or a stall flag.

use crate::motion::{MotionController, MotionError, Progress};
use crate::traits::{Direction, HomeSensor, StepOutput};

/// Homing progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HomingState {
    Idle,
    /// Sensor was active at start; backing out of its zone
    RetreatFromSensor,
    SeekHome,
}

/// Terminal outcome of a homing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HomingOutcome {
    /// Sensor reached; position is now 0
    Success,
    /// Sensor stayed active for the whole retreat
    StuckHigh,
    /// Travel budget exhausted without the sensor activating
    StuckLow,
}

impl HomingOutcome {
    pub fn is_success(self) -> bool {
        self == HomingOutcome::Success
    }
}

/// Polled homing procedure for one axis
#[derive(Debug, Clone)]
pub struct HomingProcedure {
    toward_home: Direction,
    travel: u32,
    state: HomingState,
}

impl HomingProcedure {
    /// `travel` is the move budget in steps for both retreat and seek
    pub const fn new(toward_home: Direction, travel: u32) -> Self {
        Self {
            toward_home,
            travel,
            state: HomingState::Idle,
        }
    }

    pub fn state(&self) -> HomingState {
        self.state
    }

    pub fn toward_home(&self) -> Direction {
        self.toward_home
    }

    pub fn travel(&self) -> u32 {
        self.travel
    }

    /// Abandon an attempt in progress
    pub fn reset(&mut self) {
        self.state = HomingState::Idle;
    }

    /// Advance homing by one tick
    ///
    /// The sensor is sampled once per call. Fails only if the axis was
    /// already moving when homing started.
    pub fn poll<S: StepOutput, H: HomeSensor>(
        &mut self,
        axis: &mut MotionController<S>,
        sensor: &mut H,
        now_us: u64,
    ) -> Result<Progress<HomingOutcome>, MotionError> {
        let active = sensor.is_active();

        match self.state {
            HomingState::Idle => {
                if active {
                    axis.set_target_relative(self.toward_home.opposite().steps(self.travel))?;
                    self.state = HomingState::RetreatFromSensor;
                } else {
                    axis.set_target_relative(self.toward_home.steps(self.travel))?;
                    self.state = HomingState::SeekHome;
                }
                Ok(Progress::Busy)
            }
            HomingState::RetreatFromSensor => {
                if !active {
                    axis.halt();
                    axis.set_target_relative(self.toward_home.steps(self.travel))?;
                    self.state = HomingState::SeekHome;
                    Ok(Progress::Busy)
                } else if axis.tick(now_us) {
                    Ok(self.finish(HomingOutcome::StuckHigh))
                } else {
                    Ok(Progress::Busy)
                }
            }
            HomingState::SeekHome => {
                if active {
                    axis.zero_here();
                    Ok(self.finish(HomingOutcome::Success))
                } else if axis.tick(now_us) {
                    Ok(self.finish(HomingOutcome::StuckLow))
                } else {
                    Ok(Progress::Busy)
                }
            }
        }
    }

    fn finish(&mut self, outcome: HomingOutcome) -> Progress<HomingOutcome> {
        self.state = HomingState::Idle;
        match outcome {
            HomingOutcome::Success => log_debug!("homing: success"),
            HomingOutcome::StuckHigh => log_warn!("homing: sensor stuck active"),
            HomingOutcome::StuckLow => log_warn!("homing: sensor never reached"),
        }
        Progress::Done(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{EndstopMode, MockClock, Rig, HARD_STOP};
    use crate::traits::{Clock, ExternalSignal};

    fn home<S: StepOutput, H: HomeSensor>(
        homing: &mut HomingProcedure,
        axis: &mut MotionController<S>,
        sensor: &mut H,
        clock: &MockClock,
    ) -> HomingOutcome {
        loop {
            if let Progress::Done(outcome) = homing.poll(axis, sensor, clock.now_us()).unwrap() {
                return outcome;
            }
        }
    }

    #[test]
    fn test_seek_from_outside_sensor() {
        let rig = Rig::new();
        rig.set_physical(1500);
        let clock = MockClock::new(10);
        let mut axis = rig.axis();
        let mut homing = HomingProcedure::new(Direction::Negative, 6000);

        let outcome = home(&mut homing, &mut axis, &mut rig.endstop(), &clock);
        assert_eq!(outcome, HomingOutcome::Success);
        assert_eq!(axis.position(), 0);
        assert!(axis.is_at_rest());
        assert_eq!(rig.physical(), 0);
        assert_eq!(homing.state(), HomingState::Idle);
    }

    #[test]
    fn test_start_inside_sensor_zone() {
        let rig = Rig::new();
        let clock = MockClock::new(10);
        let mut axis = rig.axis();
        let mut homing = HomingProcedure::new(Direction::Negative, 6000);

        let outcome = home(&mut homing, &mut axis, &mut rig.endstop(), &clock);
        assert_eq!(outcome, HomingOutcome::Success);
        assert_eq!(axis.position(), 0);
        assert_eq!(rig.physical(), 0);
        // One step out of the zone and one step back in
        assert_eq!(rig.step_count(), 2);
    }

    #[test]
    fn test_sensor_stuck_high_consumes_retreat_budget() {
        let rig = Rig::new();
        rig.set_endstop(EndstopMode::StuckHigh);
        let clock = MockClock::new(10);
        let mut axis = rig.axis();
        let mut homing = HomingProcedure::new(Direction::Negative, 6000);

        let outcome = home(&mut homing, &mut axis, &mut rig.endstop(), &clock);
        assert_eq!(outcome, HomingOutcome::StuckHigh);
        assert_eq!(axis.position(), 6000);
        assert_eq!(rig.step_count(), 6000);
        assert_eq!(homing.state(), HomingState::Idle);
    }

    #[test]
    fn test_sensor_never_active() {
        let rig = Rig::new();
        rig.set_endstop(EndstopMode::Dead);
        rig.set_physical(100);
        let clock = MockClock::new(10);
        let mut axis = rig.axis();
        let mut homing = HomingProcedure::new(Direction::Negative, 600);

        let outcome = home(&mut homing, &mut axis, &mut rig.endstop(), &clock);
        assert_eq!(outcome, HomingOutcome::StuckLow);
        assert_eq!(axis.position(), -600);
        assert_eq!(rig.physical(), HARD_STOP);
        assert!(rig.stall.take());
    }

    #[test]
    fn test_stall_flag_as_home_sensor() {
        let rig = Rig::new();
        rig.set_endstop(EndstopMode::Dead);
        rig.set_physical(300);
        let clock = MockClock::new(10);
        let mut axis = rig.axis();
        let mut homing = HomingProcedure::new(Direction::Negative, 6000);

        let outcome = home(&mut homing, &mut axis, &mut &rig.stall, &clock);
        assert_eq!(outcome, HomingOutcome::Success);
        assert_eq!(axis.position(), 0);
        assert_eq!(rig.physical(), HARD_STOP);
    }

    #[test]
    fn test_external_signal_source() {
        let rig = Rig::new();
        let clock = MockClock::new(10);
        let signal = ExternalSignal::new(false);
        let mut source = &signal;
        let mut axis = rig.axis();
        let mut homing = HomingProcedure::new(Direction::Positive, 1000);

        for _ in 0..500 {
            assert!(homing.poll(&mut axis, &mut source, clock.now_us()).unwrap().is_busy());
        }
        assert_eq!(homing.state(), HomingState::SeekHome);
        assert!(axis.position() > 0);

        signal.set(true);
        assert_eq!(
            homing.poll(&mut axis, &mut source, clock.now_us()),
            Ok(Progress::Done(HomingOutcome::Success))
        );
        assert_eq!(axis.position(), 0);
    }

    #[test]
    fn test_moving_axis_is_rejected() {
        let rig = Rig::new();
        rig.set_physical(50);
        let mut axis = rig.axis();
        axis.set_target(10).unwrap();
        let mut homing = HomingProcedure::new(Direction::Negative, 6000);
        assert_eq!(
            homing.poll(&mut axis, &mut rig.endstop(), 0),
            Err(MotionError::InMotion)
        );
        assert_eq!(homing.state(), HomingState::Idle);
    }
}
