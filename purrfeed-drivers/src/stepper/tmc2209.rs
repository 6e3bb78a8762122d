//! TMC2209 stepper driver (UART mode)
//!
//! Motion goes through the step/dir pins; the UART link only configures
//! the chip and adjusts StallGuard sensitivity and run current while the
//! feeder is running. The DIAG pin reports stalls (see [`super::diag`]).
//!
//! # UART Protocol
//!
//! Single-wire UART at 115200 baud (8N1). Every byte sent is echoed on the
//! receive side before any reply.
//! - Sync byte: 0x05
//! - Slave address: 0-3 (set by the MS1/MS2 pins)
//! - Register address + R/W bit
//! - Data (4 bytes, big-endian), writes only
//! - CRC8
//!
//! Replies carry master address 0xFF and the register that was read.

use purrfeed_core::traits::{DriverError, StallDriver};
use purrfeed_hal::uart::{UartRx, UartTx};

/// TMC2209 Register addresses
pub mod reg {
    /// General configuration
    pub const GCONF: u8 = 0x00;
    /// Interface transmission counter, incremented by every valid write
    pub const IFCNT: u8 = 0x02;
    /// Hold/run current settings
    pub const IHOLD_IRUN: u8 = 0x10;
    /// Power down delay
    pub const TPOWERDOWN: u8 = 0x11;
    /// Lower velocity for CoolStep/StallGuard
    pub const TCOOLTHRS: u8 = 0x14;
    /// StallGuard threshold
    pub const SGTHRS: u8 = 0x40;
    /// Chopper configuration
    pub const CHOPCONF: u8 = 0x6C;
    /// StealthChop PWM configuration
    pub const PWMCONF: u8 = 0x70;
}

/// UART sync byte for TMC2209
const SYNC_BYTE: u8 = 0x05;

/// Address the chip uses in its replies
const MASTER_ADDRESS: u8 = 0xFF;

/// Highest run current accepted (2 A RMS part)
pub const MAX_RUN_CURRENT_MA: u16 = 2000;

/// StallGuard active at every velocity (TCOOLTHRS is 20 bits)
const TCOOLTHRS_ALWAYS: u32 = 0x000F_FFFF;

/// TMC2209 driver configuration
#[derive(Debug, Clone)]
pub struct Tmc2209Config {
    /// UART address (0-3, set by MS1/MS2 pins)
    pub uart_address: u8,
    /// Run current in mA
    pub run_current_ma: u16,
    /// Hold current as a percentage of run current
    pub hold_percent: u8,
    /// Enable StealthChop mode (StallGuard4 only works in StealthChop)
    pub stealthchop: bool,
    /// StallGuard threshold (0-255, higher = stalls reported sooner)
    pub stall_threshold: u8,
    /// Microstepping (1, 2, 4, 8, 16, 32, 64, 128, 256)
    pub microsteps: u16,
}

impl Default for Tmc2209Config {
    fn default() -> Self {
        Self {
            uart_address: 0,
            run_current_ma: 600,
            hold_percent: 50,
            stealthchop: true,
            stall_threshold: 30,
            microsteps: 8,
        }
    }
}

impl Tmc2209Config {
    /// Convert microsteps to MRES register value
    pub fn mres(&self) -> u8 {
        match self.microsteps {
            256 => 0,
            128 => 1,
            64 => 2,
            32 => 3,
            16 => 4,
            8 => 5,
            4 => 6,
            2 => 7,
            1 => 8,
            _ => 4, // Default to 16 microsteps
        }
    }

    /// Convert current in mA to IRUN/IHOLD register value (0-31)
    /// Based on Rsense = 0.11 ohm (typical for TMC2209 breakout boards)
    pub fn current_to_cs(current_ma: u16) -> u8 {
        // CS = (I_rms * 32 * 1.41 * Rsense) / Vref - 1
        // With Rsense = 0.11, Vref = 0.325 (internal)
        // CS ≈ I_rms * 15.34 - 1
        let cs = ((current_ma as u32) * 1534 / 100000).saturating_sub(1);
        (cs.min(31)) as u8
    }

    fn hold_current_ma(&self, run_ma: u16) -> u16 {
        ((run_ma as u32) * (self.hold_percent.min(100) as u32) / 100) as u16
    }
}

/// CRC8 calculation for TMC2209 UART
///
/// Polynomial 0x07 (x^8 + x^2 + x + 1), bits of each byte taken LSB first
/// as in the datasheet.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        let mut current = byte;
        for _ in 0..8 {
            if ((crc >> 7) ^ (current & 0x01)) != 0 {
                crc = (crc << 1) ^ 0x07;
            } else {
                crc <<= 1;
            }
            current >>= 1;
        }
    }
    crc
}

/// Build a write datagram for TMC2209
pub fn build_write_datagram(addr: u8, reg: u8, data: u32) -> [u8; 8] {
    let mut datagram = [0u8; 8];
    datagram[0] = SYNC_BYTE;
    datagram[1] = addr;
    datagram[2] = reg | 0x80; // Set write bit
    datagram[3..7].copy_from_slice(&data.to_be_bytes());
    datagram[7] = crc8(&datagram[..7]);
    datagram
}

/// Build a read request datagram for TMC2209
pub fn build_read_request(addr: u8, reg: u8) -> [u8; 4] {
    let mut datagram = [0u8; 4];
    datagram[0] = SYNC_BYTE;
    datagram[1] = addr;
    datagram[2] = reg & 0x7F;
    datagram[3] = crc8(&datagram[..3]);
    datagram
}

/// Parse a read response for register `reg`
pub fn parse_read_response(response: &[u8; 8], reg: u8) -> Result<u32, Tmc2209Error> {
    if response[0] != SYNC_BYTE || response[1] != MASTER_ADDRESS {
        return Err(Tmc2209Error::InvalidSync);
    }
    if response[7] != crc8(&response[..7]) {
        return Err(Tmc2209Error::CrcMismatch);
    }
    if response[2] != reg {
        return Err(Tmc2209Error::UnexpectedRegister);
    }
    Ok(u32::from_be_bytes([
        response[3],
        response[4],
        response[5],
        response[6],
    ]))
}

/// TMC2209 communication errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Tmc2209Error {
    /// Invalid sync byte or master address in response
    InvalidSync,
    /// CRC mismatch
    CrcMismatch,
    /// Reply is for a different register
    UnexpectedRegister,
    /// Reply did not arrive in full
    Timeout,
    /// UART peripheral error
    Uart,
    /// A write was not counted by the chip
    WriteNotCounted,
    /// Requested value is out of range
    InvalidValue,
}

impl From<Tmc2209Error> for DriverError {
    fn from(err: Tmc2209Error) -> Self {
        match err {
            Tmc2209Error::Timeout => DriverError::NoResponse,
            Tmc2209Error::InvalidValue => DriverError::InvalidConfig,
            Tmc2209Error::InvalidSync
            | Tmc2209Error::CrcMismatch
            | Tmc2209Error::UnexpectedRegister
            | Tmc2209Error::Uart
            | Tmc2209Error::WriteNotCounted => DriverError::Communication,
        }
    }
}

/// TMC2209 on a single-wire UART
pub struct Tmc2209Driver<U> {
    uart: U,
    config: Tmc2209Config,
    initialized: bool,
}

impl<U: UartTx + UartRx> Tmc2209Driver<U> {
    /// Create a new TMC2209 driver
    pub fn new(uart: U, config: Tmc2209Config) -> Self {
        Self {
            uart,
            config,
            initialized: false,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Tmc2209Config {
        &self.config
    }

    /// Check if initialized
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Build GCONF register value
    fn build_gconf(&self) -> u32 {
        let mut gconf = 0u32;

        // Bit 2: en_spreadcycle = !stealthchop
        if !self.config.stealthchop {
            gconf |= 1 << 2;
        }
        // Bit 6: pdn_disable = 1 (PDN_UART pin is the UART)
        gconf |= 1 << 6;
        // Bit 7: mstep_reg_select = 1 (microsteps from MRES)
        gconf |= 1 << 7;
        // Bit 8: multistep_filt = 1
        gconf |= 1 << 8;

        gconf
    }

    /// Build CHOPCONF register value
    fn build_chopconf(&self) -> u32 {
        let mut chopconf = 0u32;

        // TOFF = 5 (must be > 0 for the driver to work)
        chopconf |= 5;
        // HSTRT = 4
        chopconf |= 4 << 4;
        // TBL = 2
        chopconf |= 2 << 15;
        chopconf |= (self.config.mres() as u32) << 24;
        // intpol = 1 (interpolate to 256 microsteps)
        chopconf |= 1 << 28;

        chopconf
    }

    fn build_ihold_irun(&self, run_ma: u16) -> u32 {
        let ihold = Tmc2209Config::current_to_cs(self.config.hold_current_ma(run_ma));
        let irun = Tmc2209Config::current_to_cs(run_ma);
        let iholddelay = 6u32;

        ((iholddelay & 0x0F) << 16) | ((irun as u32 & 0x1F) << 8) | (ihold as u32 & 0x1F)
    }

    /// Build PWMCONF register value for StealthChop
    fn build_pwmconf(&self) -> u32 {
        let mut pwmconf = 0u32;

        // PWM_OFS = 36
        pwmconf |= 36;
        // PWM_GRAD = 14
        pwmconf |= 14 << 8;
        // PWM_FREQ = 1 (23.4kHz)
        pwmconf |= 1 << 16;
        // PWM_AUTOSCALE, PWM_AUTOGRAD
        pwmconf |= 1 << 18;
        pwmconf |= 1 << 19;
        // PWM_REG = 4, PWM_LIM = 12
        pwmconf |= 4 << 24;
        pwmconf |= 12 << 28;

        pwmconf
    }

    /// Register write datagrams for initialization
    pub fn init_datagrams(&self) -> [[u8; 8]; 7] {
        let addr = self.config.uart_address;

        [
            build_write_datagram(addr, reg::GCONF, self.build_gconf()),
            build_write_datagram(addr, reg::CHOPCONF, self.build_chopconf()),
            build_write_datagram(
                addr,
                reg::IHOLD_IRUN,
                self.build_ihold_irun(self.config.run_current_ma),
            ),
            build_write_datagram(addr, reg::TPOWERDOWN, 20),
            build_write_datagram(addr, reg::PWMCONF, self.build_pwmconf()),
            // DIAG only reports stalls above TCOOLTHRS velocity
            build_write_datagram(addr, reg::TCOOLTHRS, TCOOLTHRS_ALWAYS),
            build_write_datagram(addr, reg::SGTHRS, self.config.stall_threshold as u32),
        ]
    }

    /// Write the full configuration
    pub fn init(&mut self) -> Result<(), Tmc2209Error> {
        for datagram in self.init_datagrams() {
            self.send(&datagram)?;
        }
        self.initialized = true;
        purrfeed_core::log_info!(
            "tmc2209 {}: configured, sgthrs {}",
            self.config.uart_address,
            self.config.stall_threshold
        );
        Ok(())
    }

    /// Send a datagram and consume its echo
    fn send(&mut self, datagram: &[u8]) -> Result<(), Tmc2209Error> {
        self.uart
            .write_blocking(datagram)
            .map_err(|_| Tmc2209Error::Uart)?;
        self.uart.flush().map_err(|_| Tmc2209Error::Uart)?;
        self.uart
            .discard(datagram.len())
            .map_err(|_| Tmc2209Error::Uart)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Tmc2209Error> {
        let mut filled = 0;
        while filled < buf.len() {
            let read = self
                .uart
                .read_blocking(&mut buf[filled..])
                .map_err(|_| Tmc2209Error::Uart)?;
            if read == 0 {
                return Err(Tmc2209Error::Timeout);
            }
            filled += read;
        }
        Ok(())
    }

    /// Write one register
    pub fn write_register(&mut self, reg: u8, value: u32) -> Result<(), Tmc2209Error> {
        let datagram = build_write_datagram(self.config.uart_address, reg, value);
        self.send(&datagram)
    }

    /// Read one register
    pub fn read_register(&mut self, reg: u8) -> Result<u32, Tmc2209Error> {
        let request = build_read_request(self.config.uart_address, reg);
        self.send(&request)?;

        let mut reply = [0u8; 8];
        self.read_exact(&mut reply)?;
        parse_read_response(&reply, reg)
    }

    /// Release the UART
    pub fn release(self) -> U {
        self.uart
    }
}

impl<U: UartTx + UartRx> StallDriver for Tmc2209Driver<U> {
    fn set_stall_threshold(&mut self, threshold: u8) -> Result<(), DriverError> {
        self.write_register(reg::SGTHRS, threshold as u32)?;
        self.config.stall_threshold = threshold;
        Ok(())
    }

    fn set_run_current(&mut self, milliamps: u16) -> Result<(), DriverError> {
        if milliamps == 0 || milliamps > MAX_RUN_CURRENT_MA {
            return Err(Tmc2209Error::InvalidValue.into());
        }
        let value = self.build_ihold_irun(milliamps);
        self.write_register(reg::IHOLD_IRUN, value)?;
        self.config.run_current_ma = milliamps;
        Ok(())
    }

    fn test_connection(&mut self) -> Result<(), DriverError> {
        let before = self.read_register(reg::IFCNT)? & 0xFF;
        let gconf = self.build_gconf();
        self.write_register(reg::GCONF, gconf)?;
        let after = self.read_register(reg::IFCNT)? & 0xFF;

        if after != (before + 1) & 0xFF {
            purrfeed_core::log_warn!(
                "tmc2209 {}: write not counted ({} -> {})",
                self.config.uart_address,
                before,
                after
            );
            return Err(Tmc2209Error::WriteNotCounted.into());
        }
        Ok(())
    }
}
