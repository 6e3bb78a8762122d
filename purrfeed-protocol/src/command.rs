//! Typed views of the two message directions
//!
//! - Scheduler → Device: [`Command`] (Mode, Feed)
//! - Device → Scheduler: [`Report`] (Status, Amount, Calibration, Warning,
//!   Error, FillLevel)

use crate::codes::{CalibrationStep, ErrorCode, OperatingMode, WarningCode};
use crate::message::{mass_to_payload, payload_to_mass, FillBand, Message, MessageError, Tag, NO_DEVICE};

/// Commands sent from the scheduling context to the device context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Switch the device context's operating mode
    SetMode(OperatingMode),
    /// Dispense food on a feed lane (hundredths of a gram)
    Feed { lane: u8, centigrams: u16 },
}

impl Command {
    /// Build a feed command from grams
    pub fn feed(lane: u8, grams: f32) -> Self {
        Command::Feed {
            lane,
            centigrams: mass_to_payload(grams),
        }
    }

    /// Encode as a message
    pub fn to_message(&self) -> Message {
        match *self {
            Command::SetMode(mode) => Message::new(Tag::Mode, NO_DEVICE, mode.as_u16()),
            Command::Feed { lane, centigrams } => Message::new(Tag::Feed, lane, centigrams),
        }
    }

    /// Parse a command from a message
    pub fn from_message(msg: &Message) -> Result<Self, MessageError> {
        match msg.tag {
            Tag::Mode => OperatingMode::from_u16(msg.payload)
                .map(Command::SetMode)
                .ok_or(MessageError::InvalidCode(msg.payload)),
            Tag::Feed => Ok(Command::Feed {
                lane: msg.device,
                centigrams: msg.payload,
            }),
            other => Err(MessageError::UnexpectedTag(other)),
        }
    }
}

/// Reports sent from the device context to the scheduling context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Report {
    /// Current operating mode
    Status(OperatingMode),
    /// Mass dispensed on a feed lane
    Amount { device: u8, centigrams: u16 },
    /// Scale calibration progress
    Calibration { device: u8, step: CalibrationStep },
    Warning { device: u8, code: WarningCode },
    Error { device: u8, code: ErrorCode },
    /// Container fill level and estimated remaining days
    FillLevel { band: FillBand, days: u16 },
}

impl Report {
    /// Mass dispensed, in grams
    pub fn amount(device: u8, grams: f32) -> Self {
        Report::Amount {
            device,
            centigrams: mass_to_payload(grams),
        }
    }

    /// Encode as a message
    pub fn to_message(&self) -> Message {
        match *self {
            Report::Status(mode) => Message::new(Tag::Status, NO_DEVICE, mode.as_u16()),
            Report::Amount { device, centigrams } => Message::new(Tag::Amount, device, centigrams),
            Report::Calibration { device, step } => {
                Message::new(Tag::Calibration, device, step.as_u16())
            }
            Report::Warning { device, code } => Message::new(Tag::Warning, device, code.as_u16()),
            Report::Error { device, code } => Message::new(Tag::Error, device, code.as_u16()),
            Report::FillLevel { band, days } => Message::new(Tag::FillLevel(band), 0, days),
        }
    }

    /// Parse a report from a message
    pub fn from_message(msg: &Message) -> Result<Self, MessageError> {
        let invalid = MessageError::InvalidCode(msg.payload);
        match msg.tag {
            Tag::Status => OperatingMode::from_u16(msg.payload)
                .map(Report::Status)
                .ok_or(invalid),
            Tag::Amount => Ok(Report::Amount {
                device: msg.device,
                centigrams: msg.payload,
            }),
            Tag::Calibration => CalibrationStep::from_u16(msg.payload)
                .map(|step| Report::Calibration {
                    device: msg.device,
                    step,
                })
                .ok_or(invalid),
            Tag::Warning => WarningCode::from_u16(msg.payload)
                .map(|code| Report::Warning {
                    device: msg.device,
                    code,
                })
                .ok_or(invalid),
            Tag::Error => ErrorCode::from_u16(msg.payload)
                .map(|code| Report::Error {
                    device: msg.device,
                    code,
                })
                .ok_or(invalid),
            Tag::FillLevel(band) => Ok(Report::FillLevel {
                band,
                days: msg.payload,
            }),
            other => Err(MessageError::UnexpectedTag(other)),
        }
    }

    /// Grams carried by an `Amount` report
    pub fn grams(&self) -> Option<f32> {
        match *self {
            Report::Amount { centigrams, .. } => Some(payload_to_mass(centigrams)),
            _ => None,
        }
    }
}
