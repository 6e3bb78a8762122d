//! Step/direction pin output
//!
//! Any step/dir driver (TMC2209 in standalone or UART mode, A4988, DRV8825)
//! is moved through two GPIO lines. The pulse width covers the slowest of
//! them.

use embedded_hal::delay::DelayNs;
use purrfeed_core::traits::{Direction, StepOutput};
use purrfeed_hal::gpio::OutputPin;

/// Step pulse high time in nanoseconds (A4988 needs 1 us)
pub const STEP_PULSE_NS: u32 = 1_000;

/// Step and direction lines of one axis
pub struct StepDirPins<S, D, T> {
    step: S,
    dir: D,
    delay: T,
    /// Drive DIR low for positive moves
    invert_dir: bool,
}

impl<S: OutputPin, D: OutputPin, T: DelayNs> StepDirPins<S, D, T> {
    /// Create the output with both lines low
    pub fn new(mut step: S, mut dir: D, delay: T, invert_dir: bool) -> Self {
        step.set_low();
        dir.set_low();
        Self {
            step,
            dir,
            delay,
            invert_dir,
        }
    }

    /// Release the pins
    pub fn release(self) -> (S, D, T) {
        (self.step, self.dir, self.delay)
    }
}

impl<S: OutputPin, D: OutputPin, T: DelayNs> StepOutput for StepDirPins<S, D, T> {
    fn set_direction(&mut self, direction: Direction) {
        let high = (direction == Direction::Positive) != self.invert_dir;
        self.dir.set_state(high);
    }

    fn step(&mut self) {
        self.step.set_high();
        self.delay.delay_ns(STEP_PULSE_NS);
        self.step.set_low();
    }
}
