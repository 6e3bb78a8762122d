//! Home endstop input

use purrfeed_core::traits::HomeSensor;
use purrfeed_hal::gpio::InputPin;

/// Pin level that means "at home"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActiveLevel {
    High,
    /// Optical and open-drain switches pull the line low when triggered
    Low,
}

/// Digital endstop switch
pub struct Endstop<P> {
    pin: P,
    active: ActiveLevel,
}

impl<P: InputPin> Endstop<P> {
    pub fn new(pin: P, active: ActiveLevel) -> Self {
        Self { pin, active }
    }

    pub fn is_triggered(&self) -> bool {
        match self.active {
            ActiveLevel::High => self.pin.is_high(),
            ActiveLevel::Low => self.pin.is_low(),
        }
    }
}

impl<P: InputPin> HomeSensor for Endstop<P> {
    fn is_active(&mut self) -> bool {
        self.is_triggered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct Line<'a>(&'a Cell<bool>);

    impl InputPin for Line<'_> {
        fn is_high(&self) -> bool {
            self.0.get()
        }
    }

    #[test]
    fn test_active_levels() {
        let level = Cell::new(true);
        let mut high = Endstop::new(Line(&level), ActiveLevel::High);
        let mut low = Endstop::new(Line(&level), ActiveLevel::Low);

        assert!(high.is_active());
        assert!(!low.is_active());

        level.set(false);
        assert!(!high.is_active());
        assert!(low.is_active());
    }
}
