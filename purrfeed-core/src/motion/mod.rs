//! Axis motion
//!
//! [`MotionController`] generates the step train. [`TrackedMove`] wraps a
//! single relative move that also reports whether the axis stalled, which
//! is the building block of homing, fault recovery and autotuning.

pub mod profile;

pub use profile::{MotionController, MotionError, MotionParams, RampPhase};

use crate::stall::StallFlag;
use crate::traits::{Clock, StepOutput};

/// Result of one poll of a multi-tick procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Progress<T> {
    /// Still running, poll again
    Busy,
    /// Finished with an outcome
    Done(T),
}

impl<T> Progress<T> {
    pub fn is_busy(&self) -> bool {
        matches!(self, Progress::Busy)
    }

    pub fn done(self) -> Option<T> {
        match self {
            Progress::Busy => None,
            Progress::Done(value) => Some(value),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Progress<U> {
        match self {
            Progress::Busy => Progress::Busy,
            Progress::Done(value) => Progress::Done(f(value)),
        }
    }
}

/// A relative move whose outcome is "did the axis stall"
///
/// The first poll clears the stall flag and latches the target; the final
/// poll reads and clears it again.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrackedMove {
    active: bool,
}

impl TrackedMove {
    pub const fn new() -> Self {
        Self { active: false }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Forget a move in progress (the axis is left where it is)
    pub fn cancel(&mut self) {
        self.active = false;
    }

    pub fn poll<S: StepOutput>(
        &mut self,
        axis: &mut MotionController<S>,
        stall: &StallFlag,
        steps: i32,
        now_us: u64,
    ) -> Result<Progress<bool>, MotionError> {
        if !self.active {
            axis.set_target_relative(steps)?;
            stall.take();
            self.active = true;
        }

        if axis.tick(now_us) {
            self.active = false;
            Ok(Progress::Done(stall.take()))
        } else {
            Ok(Progress::Busy)
        }
    }
}

/// Run a relative move to completion, busy-polling the clock
///
/// Returns whether the axis stalled during the move. Only for setup and
/// operator-attended paths.
pub fn move_relative<S: StepOutput, C: Clock>(
    axis: &mut MotionController<S>,
    stall: &StallFlag,
    clock: &C,
    steps: i32,
) -> Result<bool, MotionError> {
    let mut tracked = TrackedMove::new();
    loop {
        if let Progress::Done(stalled) = tracked.poll(axis, stall, steps, clock.now_us())? {
            return Ok(stalled);
        }
    }
}
