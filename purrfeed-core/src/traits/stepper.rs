//! Stepper output and driver traits
//!
//! The motion controller only needs two lines: direction and a step pulse.
//! Everything the driver chip can be told at runtime (stall sensitivity,
//! run current) sits behind [`StallDriver`].

/// Axis direction in position coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Position increases
    Positive,
    /// Position decreases
    Negative,
}

impl Direction {
    /// Get the opposite direction
    pub fn opposite(self) -> Self {
        match self {
            Direction::Positive => Direction::Negative,
            Direction::Negative => Direction::Positive,
        }
    }

    /// +1 or -1
    pub fn sign(self) -> i32 {
        match self {
            Direction::Positive => 1,
            Direction::Negative => -1,
        }
    }

    /// Signed step count of `steps` in this direction
    pub fn steps(self, steps: u32) -> i32 {
        (steps.min(i32::MAX as u32) as i32) * self.sign()
    }
}

/// Step/direction pulse output
pub trait StepOutput {
    /// Drive the direction line
    ///
    /// Only called while the axis is at rest.
    fn set_direction(&mut self, direction: Direction);

    /// Emit one step pulse
    fn step(&mut self);
}

/// Errors reported by the stepper driver's configuration link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverError {
    /// Link transfer failed or a reply was corrupted
    Communication,
    /// Driver did not answer
    NoResponse,
    /// Requested value is out of range for the driver
    InvalidConfig,
}

/// Runtime-adjustable driver settings
pub trait StallDriver {
    /// Set the stall sensitivity (higher reports a stall sooner)
    fn set_stall_threshold(&mut self, threshold: u8) -> Result<(), DriverError>;

    /// Set the motor run current in milliamps
    fn set_run_current(&mut self, milliamps: u16) -> Result<(), DriverError>;

    /// Check that the driver answers and accepts writes
    fn test_connection(&mut self) -> Result<(), DriverError>;
}

impl<T: StepOutput + ?Sized> StepOutput for &mut T {
    fn set_direction(&mut self, direction: Direction) {
        (**self).set_direction(direction)
    }

    fn step(&mut self) {
        (**self).step()
    }
}

impl<T: StallDriver + ?Sized> StallDriver for &mut T {
    fn set_stall_threshold(&mut self, threshold: u8) -> Result<(), DriverError> {
        (**self).set_stall_threshold(threshold)
    }

    fn set_run_current(&mut self, milliamps: u16) -> Result<(), DriverError> {
        (**self).set_run_current(milliamps)
    }

    fn test_connection(&mut self) -> Result<(), DriverError> {
        (**self).test_connection()
    }
}
