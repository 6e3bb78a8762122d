//! HX711 24-bit load cell converter
//!
//! Bit-banged two-wire interface: DOUT goes low when a conversion is ready,
//! then 24 clock pulses shift the result out MSB first. Extra pulses after
//! the data select channel and gain for the next conversion.

use embedded_hal::delay::DelayNs;
use purrfeed_hal::gpio::{InputPin, OutputPin};

/// Longest wait for a conversion (10 SPS mode plus margin)
pub const READY_TIMEOUT_US: u32 = 500_000;

/// Data-ready poll interval
const READY_POLL_US: u32 = 100;

/// Half period of the serial clock (well under the 60 us power-down limit)
const CLOCK_HALF_PERIOD_US: u32 = 1;

/// Channel and gain of the next conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Gain {
    /// Channel A, gain 128
    A128,
    /// Channel A, gain 64
    A64,
    /// Channel B, gain 32
    B32,
}

impl Gain {
    /// Pulses after the 24 data bits
    pub fn extra_pulses(self) -> u8 {
        match self {
            Gain::A128 => 1,
            Gain::A64 => 3,
            Gain::B32 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Hx711Error {
    /// DOUT never went low
    Timeout,
}

/// HX711 on a data input and a clock output
pub struct Hx711<DT, SCK, D> {
    data: DT,
    clock: SCK,
    delay: D,
    gain: Gain,
}

impl<DT: InputPin, SCK: OutputPin, D: DelayNs> Hx711<DT, SCK, D> {
    /// Create the converter with the clock idle low (powered up)
    pub fn new(data: DT, mut clock: SCK, delay: D, gain: Gain) -> Self {
        clock.set_low();
        Self {
            data,
            clock,
            delay,
            gain,
        }
    }

    pub fn gain(&self) -> Gain {
        self.gain
    }

    /// Select the gain; takes effect after the next read
    pub fn set_gain(&mut self, gain: Gain) {
        self.gain = gain;
    }

    pub fn is_ready(&self) -> bool {
        self.data.is_low()
    }

    fn pulse(&mut self) {
        self.clock.set_high();
        self.delay.delay_us(CLOCK_HALF_PERIOD_US);
        self.clock.set_low();
        self.delay.delay_us(CLOCK_HALF_PERIOD_US);
    }

    /// Read one signed conversion
    pub fn read_raw(&mut self) -> Result<i32, Hx711Error> {
        let mut waited = 0;
        while !self.is_ready() {
            if waited >= READY_TIMEOUT_US {
                return Err(Hx711Error::Timeout);
            }
            self.delay.delay_us(READY_POLL_US);
            waited += READY_POLL_US;
        }

        let mut value: u32 = 0;
        for _ in 0..24 {
            self.clock.set_high();
            self.delay.delay_us(CLOCK_HALF_PERIOD_US);
            value = (value << 1) | self.data.is_high() as u32;
            self.clock.set_low();
            self.delay.delay_us(CLOCK_HALF_PERIOD_US);
        }
        for _ in 0..self.gain.extra_pulses() {
            self.pulse();
        }

        // Sign extend 24-bit two's complement
        Ok(((value << 8) as i32) >> 8)
    }

    /// Clock high for more than 60 us powers the converter down
    pub fn power_down(&mut self) {
        self.clock.set_high();
        self.delay.delay_us(100);
    }

    pub fn power_up(&mut self) {
        self.clock.set_low();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    /// Converter side of the two wires
    #[derive(Default)]
    struct Chip {
        ready: Cell<bool>,
        value: Cell<u32>,
        pulses: Cell<u8>,
    }

    struct Dout<'a>(&'a Chip);

    impl InputPin for Dout<'_> {
        fn is_high(&self) -> bool {
            let chip = self.0;
            match chip.pulses.get() {
                0 => !chip.ready.get(),
                n if n <= 24 => (chip.value.get() >> (24 - n)) & 1 == 1,
                _ => true,
            }
        }
    }

    struct Sck<'a>(&'a Chip);

    impl OutputPin for Sck<'_> {
        fn set_high(&mut self) {
            self.0.pulses.set(self.0.pulses.get() + 1);
        }

        fn set_low(&mut self) {}
    }

    #[derive(Default)]
    struct Delay(u64);

    impl DelayNs for Delay {
        fn delay_ns(&mut self, ns: u32) {
            self.0 += ns as u64;
        }
    }

    fn chip(value: u32) -> Chip {
        let chip = Chip::default();
        chip.ready.set(true);
        chip.value.set(value);
        chip
    }

    #[test]
    fn test_gain_pulses() {
        assert_eq!(Gain::A128.extra_pulses(), 1);
        assert_eq!(Gain::A64.extra_pulses(), 3);
        assert_eq!(Gain::B32.extra_pulses(), 2);
    }

    #[test]
    fn test_read_positive() {
        let wire = chip(0x01_2345);
        let mut hx = Hx711::new(Dout(&wire), Sck(&wire), Delay::default(), Gain::A128);
        assert_eq!(hx.read_raw(), Ok(0x01_2345));
        assert_eq!(wire.pulses.get(), 25);
    }

    #[test]
    fn test_read_sign_extends() {
        for (raw, expected) in [(0xFF_FFFF, -1), (0x80_0000, -8_388_608), (0x7F_FFFF, 8_388_607)] {
            let wire = chip(raw);
            let mut hx = Hx711::new(Dout(&wire), Sck(&wire), Delay::default(), Gain::A128);
            assert_eq!(hx.read_raw(), Ok(expected));
        }
    }

    #[test]
    fn test_gain_selects_next_conversion() {
        let wire = chip(10);
        let mut hx = Hx711::new(Dout(&wire), Sck(&wire), Delay::default(), Gain::A128);
        hx.set_gain(Gain::A64);
        assert_eq!(hx.read_raw(), Ok(10));
        assert_eq!(wire.pulses.get(), 27);
    }

    #[test]
    fn test_not_ready_times_out() {
        let wire = Chip::default();
        let mut hx = Hx711::new(Dout(&wire), Sck(&wire), Delay::default(), Gain::A128);
        assert_eq!(hx.read_raw(), Err(Hx711Error::Timeout));
        assert_eq!(wire.pulses.get(), 0);
        assert!(hx.delay.0 >= READY_TIMEOUT_US as u64 * 1000);
    }
}
