//! Test doubles: a simulated slider rig
//!
//! One [`Rig`] models one axis. Home is toward negative positions; the
//! physical home sensor covers positions `<= 0` and a hard stop sits at
//! [`HARD_STOP`]. Blocked steps raise the rig's stall flag.

use core::cell::Cell;

use crate::motion::{MotionController, MotionParams};
use crate::stall::StallFlag;
use crate::traits::{
    Clock, Direction, DriverError, HomeSensor, MassSensor, ScaleError, StallDriver, StepOutput,
};

/// Physical end of travel on the home side
pub const HARD_STOP: i32 = -20;

/// Raw counts per gram of the simulated load cell
pub const TRUE_FACTOR: f32 = 3145.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndstopMode {
    Working,
    /// Always active
    StuckHigh,
    /// Never active
    Dead,
}

pub struct Rig {
    pub stall: StallFlag,
    physical: Cell<i32>,
    steps: Cell<u32>,
    /// Remaining steps that will be blocked by an obstruction
    blocked_steps: Cell<u32>,
    /// Obstruction on the far side of travel
    wall: Cell<Option<i32>>,
    /// Driver reports false stalls while its threshold is above this
    false_stall_above: Cell<u8>,
    threshold: Cell<u8>,
    current_ma: Cell<u16>,
    driver_online: Cell<bool>,
    endstop: Cell<EndstopMode>,
    /// Mass delivered to the scale per step away from home
    grams_per_step: Cell<f32>,
    pub mass: Cell<f32>,
}

impl Rig {
    pub fn new() -> Self {
        Self {
            stall: StallFlag::new(),
            physical: Cell::new(0),
            steps: Cell::new(0),
            blocked_steps: Cell::new(0),
            wall: Cell::new(None),
            false_stall_above: Cell::new(u8::MAX),
            threshold: Cell::new(0),
            current_ma: Cell::new(0),
            driver_online: Cell::new(true),
            endstop: Cell::new(EndstopMode::Working),
            grams_per_step: Cell::new(0.0),
            mass: Cell::new(0.0),
        }
    }

    pub fn axis(&self) -> MotionController<MockStepper<'_>> {
        MotionController::new(MockStepper::new(self), MotionParams::default()).unwrap()
    }

    pub fn driver(&self) -> MockDriver<'_> {
        MockDriver { rig: self }
    }

    pub fn endstop(&self) -> RigEndstop<'_> {
        RigEndstop { rig: self }
    }

    pub fn scale(&self) -> MockScale<'_> {
        MockScale::new(&self.mass)
    }

    pub fn physical(&self) -> i32 {
        self.physical.get()
    }

    pub fn set_physical(&self, position: i32) {
        self.physical.set(position);
    }

    pub fn step_count(&self) -> u32 {
        self.steps.get()
    }

    pub fn obstruct(&self, steps: u32) {
        self.blocked_steps.set(steps);
    }

    pub fn set_wall(&self, position: Option<i32>) {
        self.wall.set(position);
    }

    pub fn blocked_remaining(&self) -> u32 {
        self.blocked_steps.get()
    }

    pub fn set_false_stall_above(&self, threshold: u8) {
        self.false_stall_above.set(threshold);
    }

    pub fn threshold(&self) -> u8 {
        self.threshold.get()
    }

    pub fn current_ma(&self) -> u16 {
        self.current_ma.get()
    }

    pub fn set_driver_online(&self, online: bool) {
        self.driver_online.set(online);
    }

    pub fn set_endstop(&self, mode: EndstopMode) {
        self.endstop.set(mode);
    }

    pub fn set_grams_per_step(&self, grams: f32) {
        self.grams_per_step.set(grams);
    }

    fn step(&self, direction: Direction) {
        self.steps.set(self.steps.get() + 1);
        if self.threshold.get() > self.false_stall_above.get() {
            self.stall.raise();
        }

        let next = self.physical.get() + direction.sign();
        if self.blocked_steps.get() > 0 {
            self.blocked_steps.set(self.blocked_steps.get() - 1);
            self.stall.raise();
        } else if next < HARD_STOP || self.wall.get().is_some_and(|wall| next > wall) {
            self.stall.raise();
        } else {
            self.physical.set(next);
            if direction == Direction::Positive {
                self.mass.set(self.mass.get() + self.grams_per_step.get());
            }
        }
    }
}

pub struct MockStepper<'a> {
    rig: &'a Rig,
    direction: Direction,
}

impl<'a> MockStepper<'a> {
    pub fn new(rig: &'a Rig) -> Self {
        Self {
            rig,
            direction: Direction::Positive,
        }
    }
}

impl StepOutput for MockStepper<'_> {
    fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    fn step(&mut self) {
        self.rig.step(self.direction);
    }
}

pub struct MockDriver<'a> {
    rig: &'a Rig,
}

impl StallDriver for MockDriver<'_> {
    fn set_stall_threshold(&mut self, threshold: u8) -> Result<(), DriverError> {
        if !self.rig.driver_online.get() {
            return Err(DriverError::NoResponse);
        }
        self.rig.threshold.set(threshold);
        Ok(())
    }

    fn set_run_current(&mut self, milliamps: u16) -> Result<(), DriverError> {
        if !self.rig.driver_online.get() {
            return Err(DriverError::NoResponse);
        }
        self.rig.current_ma.set(milliamps);
        Ok(())
    }

    fn test_connection(&mut self) -> Result<(), DriverError> {
        if self.rig.driver_online.get() {
            Ok(())
        } else {
            Err(DriverError::NoResponse)
        }
    }
}

pub struct RigEndstop<'a> {
    rig: &'a Rig,
}

impl HomeSensor for RigEndstop<'_> {
    fn is_active(&mut self) -> bool {
        match self.rig.endstop.get() {
            EndstopMode::Working => self.rig.physical.get() <= 0,
            EndstopMode::StuckHigh => true,
            EndstopMode::Dead => false,
        }
    }
}

/// Load cell reading a shared mass cell
pub struct MockScale<'a> {
    mass: &'a Cell<f32>,
    offset: f32,
    factor: f32,
    pub online: bool,
    pub tares: u32,
}

impl<'a> MockScale<'a> {
    pub fn new(mass: &'a Cell<f32>) -> Self {
        Self {
            mass,
            offset: 0.0,
            factor: TRUE_FACTOR,
            online: true,
            tares: 0,
        }
    }

    fn raw(&self) -> Result<f32, ScaleError> {
        if self.online {
            Ok(self.mass.get() * TRUE_FACTOR)
        } else {
            Err(ScaleError::Timeout)
        }
    }
}

impl MassSensor for MockScale<'_> {
    fn read_grams(&mut self, _samples: u8) -> Result<f32, ScaleError> {
        Ok((self.raw()? - self.offset) / self.factor)
    }

    fn tare(&mut self, _samples: u8) -> Result<(), ScaleError> {
        self.offset = self.raw()?;
        self.tares += 1;
        Ok(())
    }

    fn calibrate(&mut self, reference_grams: f32, _samples: u8) -> Result<f32, ScaleError> {
        if reference_grams <= 0.0 {
            return Err(ScaleError::InvalidReference);
        }
        let factor = (self.raw()? - self.offset) / reference_grams;
        if factor <= 0.0 {
            return Err(ScaleError::CalibrationFailed);
        }
        self.factor = factor;
        Ok(factor)
    }

    fn set_scale_factor(&mut self, factor: f32) {
        self.factor = factor;
    }

    fn scale_factor(&self) -> f32 {
        self.factor
    }
}

/// Clock that advances by a fixed amount on every read
pub struct MockClock {
    now: Cell<u64>,
    step_us: u64,
    /// Total time spent in `delay_ms`
    delayed_ms: Cell<u64>,
}

impl MockClock {
    pub fn new(step_us: u64) -> Self {
        Self {
            now: Cell::new(0),
            step_us,
            delayed_ms: Cell::new(0),
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now.set(self.now.get() + ms * 1000);
    }

    pub fn delayed_ms(&self) -> u64 {
        self.delayed_ms.get()
    }
}

impl Clock for MockClock {
    fn now_us(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + self.step_us);
        now
    }

    fn delay_ms(&self, ms: u32) {
        self.delayed_ms.set(self.delayed_ms.get() + ms as u64);
        self.advance_ms(ms as u64);
    }
}
