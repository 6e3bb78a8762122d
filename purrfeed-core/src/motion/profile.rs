//! Trapezoidal step-rate generator
//!
//! One [`MotionController`] drives one axis. A move is latched with
//! [`MotionController::set_target`] while the axis is at rest and then
//! advanced by calling [`MotionController::tick`] faster than the fastest
//! configured step rate. Each tick emits at most one step.
//!
//! # Ramp
//!
//! Periods are in microseconds. The first step waits `1e6 / sqrt(2a)`, and
//! every following period is derived from the previous one:
//!
//! ```text
//! p' = p * (1 - a * p^2)        a in steps/us^2, negated while decelerating
//! ```
//!
//! clamped from below by the cruise period `1e6 / v`. Deceleration starts
//! when the remaining distance equals `round(v^2 / 2a)`; moves too short to
//! reach cruise decelerate from their midpoint instead.

use micromath::F32Ext;

use crate::traits::{Direction, StepOutput};

/// Default cruise speed in steps per second
pub const DEFAULT_MAX_SPEED: f32 = 10_000.0;

/// Default acceleration in steps per second squared
pub const DEFAULT_ACCELERATION: f32 = 100_000.0;

/// Speed and acceleration of one axis
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotionParams {
    /// Cruise speed in steps/s
    pub max_speed: f32,
    /// Acceleration in steps/s²
    pub acceleration: f32,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            max_speed: DEFAULT_MAX_SPEED,
            acceleration: DEFAULT_ACCELERATION,
        }
    }
}

impl MotionParams {
    pub const fn new(max_speed: f32, acceleration: f32) -> Self {
        Self {
            max_speed,
            acceleration,
        }
    }

    /// Both values must be finite and positive
    pub fn validate(&self) -> Result<(), MotionError> {
        let valid = |v: f32| v.is_finite() && v > 0.0;
        if valid(self.max_speed) && valid(self.acceleration) {
            Ok(())
        } else {
            Err(MotionError::InvalidParams)
        }
    }

    /// Period between steps at cruise speed (µs)
    pub fn cruise_period_us(&self) -> f32 {
        1_000_000.0 / self.max_speed
    }

    /// Period of the first step of a move (µs), never faster than cruise
    pub fn initial_period_us(&self) -> f32 {
        (1_000_000.0 / sqrt(2.0 * self.acceleration)).max(self.cruise_period_us())
    }

    /// Steps needed to stop from cruise speed
    pub fn decel_distance(&self) -> u32 {
        let steps = self.max_speed * self.max_speed / (2.0 * self.acceleration);
        (steps + 0.5) as u32
    }
}

/// Square root refined with two Newton steps on top of micromath's estimate
fn sqrt(x: f32) -> f32 {
    let mut estimate = F32Ext::sqrt(x);
    if estimate > 0.0 {
        for _ in 0..2 {
            estimate = 0.5 * (estimate + x / estimate);
        }
    }
    estimate
}

/// Motion errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotionError {
    /// A move is still in progress
    InMotion,
    /// Speed or acceleration is not a finite positive number
    InvalidParams,
}

/// Ramp phase of the current move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RampPhase {
    /// At rest
    Idle,
    Accelerating,
    /// Period clamped at the cruise period
    Cruising,
    Decelerating,
}

/// Non-blocking trapezoidal step generator for one axis
#[derive(Debug)]
pub struct MotionController<S> {
    output: S,
    params: MotionParams,
    position: i32,
    target: i32,
    direction: Direction,
    phase: RampPhase,
    cruise_period_us: f32,
    /// Period until the next step
    next_period_us: f32,
    /// Period of the step just taken
    step_period_us: f32,
    /// Signed, steps/µs²
    accel_per_us2: f32,
    decel_distance: u32,
    last_step_us: u64,
    /// First tick of a move starts its clock
    awaiting_first_tick: bool,
}

impl<S: StepOutput> MotionController<S> {
    /// Create a controller at position 0
    pub fn new(output: S, params: MotionParams) -> Result<Self, MotionError> {
        params.validate()?;
        Ok(Self {
            output,
            params,
            position: 0,
            target: 0,
            direction: Direction::Positive,
            phase: RampPhase::Idle,
            cruise_period_us: params.cruise_period_us(),
            next_period_us: 0.0,
            step_period_us: 0.0,
            accel_per_us2: 0.0,
            decel_distance: 0,
            last_step_us: 0,
            awaiting_first_tick: false,
        })
    }

    /// Change speed and acceleration (rest only)
    pub fn configure(&mut self, params: MotionParams) -> Result<(), MotionError> {
        if !self.is_at_rest() {
            return Err(MotionError::InMotion);
        }
        params.validate()?;
        self.params = params;
        self.cruise_period_us = params.cruise_period_us();
        Ok(())
    }

    /// Change only the cruise speed (rest only)
    pub fn set_max_speed(&mut self, max_speed: f32) -> Result<(), MotionError> {
        self.configure(MotionParams {
            max_speed,
            ..self.params
        })
    }

    /// Latch a new absolute target (rest only)
    pub fn set_target(&mut self, target: i32) -> Result<(), MotionError> {
        if !self.is_at_rest() {
            return Err(MotionError::InMotion);
        }

        self.target = target;
        let distance = target.abs_diff(self.position);
        if distance == 0 {
            self.phase = RampPhase::Idle;
            return Ok(());
        }

        self.direction = if target < self.position {
            Direction::Negative
        } else {
            Direction::Positive
        };
        self.output.set_direction(self.direction);

        self.decel_distance = self.params.decel_distance();
        if distance <= self.decel_distance.saturating_mul(2) {
            // Triangular profile
            self.decel_distance = distance / 2;
        }

        self.next_period_us = self.params.initial_period_us();
        self.accel_per_us2 = self.params.acceleration / 1.0e12;
        self.awaiting_first_tick = true;
        self.phase = if self.next_period_us <= self.cruise_period_us {
            RampPhase::Cruising
        } else {
            RampPhase::Accelerating
        };
        Ok(())
    }

    /// Latch a target relative to the current position (rest only)
    pub fn set_target_relative(&mut self, steps: i32) -> Result<(), MotionError> {
        self.set_target(self.position.saturating_add(steps))
    }

    /// Advance the move
    ///
    /// Emits a step if the scheduled period has elapsed since the previous
    /// one. Returns true once the axis is at rest.
    pub fn tick(&mut self, now_us: u64) -> bool {
        if self.position == self.target {
            self.phase = RampPhase::Idle;
            return true;
        }

        if self.awaiting_first_tick {
            self.last_step_us = now_us;
            self.awaiting_first_tick = false;
        }

        let elapsed = now_us.wrapping_sub(self.last_step_us);
        if elapsed < self.next_period_us as u64 {
            return false;
        }

        let remaining = self.target.abs_diff(self.position);
        if remaining == self.decel_distance && self.accel_per_us2 > 0.0 {
            self.accel_per_us2 = -self.accel_per_us2;
            self.phase = RampPhase::Decelerating;
        }

        self.output.step();
        self.position += self.direction.sign();

        let period = self.next_period_us;
        self.step_period_us = period;
        self.next_period_us = period * (1.0 - self.accel_per_us2 * period * period);
        if self.next_period_us < self.cruise_period_us {
            self.next_period_us = self.cruise_period_us;
            if self.phase == RampPhase::Accelerating {
                self.phase = RampPhase::Cruising;
            }
        }
        self.last_step_us = now_us;

        if self.position == self.target {
            self.phase = RampPhase::Idle;
            true
        } else {
            false
        }
    }

    /// Redefine the current position as 0, cancelling any move
    pub fn zero_here(&mut self) {
        self.position = 0;
        self.halt();
    }

    /// Abandon the current move where the axis stands
    pub fn halt(&mut self) {
        self.target = self.position;
        self.phase = RampPhase::Idle;
        self.awaiting_first_tick = false;
    }

    pub fn is_at_rest(&self) -> bool {
        self.position == self.target
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn target(&self) -> i32 {
        self.target
    }

    /// Signed steps left in the current move
    pub fn distance_to_go(&self) -> i32 {
        self.target - self.position
    }

    /// Direction of the current (or last) move
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn phase(&self) -> RampPhase {
        self.phase
    }

    pub fn params(&self) -> MotionParams {
        self.params
    }

    /// Deceleration point of the current move, in steps before the target
    pub fn decel_distance(&self) -> u32 {
        self.decel_distance
    }

    pub fn cruise_period_us(&self) -> f32 {
        self.cruise_period_us
    }

    /// Period of the most recent step (µs)
    pub fn step_period_us(&self) -> f32 {
        self.step_period_us
    }

    pub fn output(&self) -> &S {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut S {
        &mut self.output
    }
}
