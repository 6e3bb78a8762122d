//! GPIO pin abstractions
//!
//! Step, direction and clock lines are outputs; endstops, DIAG lines and
//! the HX711 data line are inputs.

/// Digital output pin
pub trait OutputPin {
    /// Set the pin high (logic 1)
    fn set_high(&mut self);

    /// Set the pin low (logic 0)
    fn set_low(&mut self);

    /// Set the pin to a specific state
    fn set_state(&mut self, high: bool) {
        if high {
            self.set_high();
        } else {
            self.set_low();
        }
    }
}

/// Digital input pin
pub trait InputPin {
    /// Check if the pin reads high (logic 1)
    fn is_high(&self) -> bool;

    /// Check if the pin reads low (logic 0)
    fn is_low(&self) -> bool {
        !self.is_high()
    }
}

/// Inverts the logic level of an input
///
/// Optical endstops and open-drain fill sensors pull the line low when
/// they trigger; wrapping them here lets callers always treat "high" as
/// "active".
#[derive(Debug)]
pub struct ActiveLow<P>(pub P);

impl<P: InputPin> InputPin for ActiveLow<P> {
    fn is_high(&self) -> bool {
        self.0.is_low()
    }
}

impl<P: InputPin> InputPin for &P {
    fn is_high(&self) -> bool {
        (**self).is_high()
    }
}
