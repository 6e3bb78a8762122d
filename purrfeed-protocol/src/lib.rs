//! Purrfeed Inter-Context Protocol
//!
//! This crate defines the fire-and-forget message protocol between the
//! scheduling/communication context (A) and the device-coordination
//! context (B). The two contexts share nothing but a pair of bounded
//! FIFOs carrying fixed-width words.
//!
//! # Wire Format
//!
//! Every message is one 32-bit word:
//! ```text
//! ┌───────┬───────────┬──────────────┐
//! │  TAG  │  DEVICE   │   PAYLOAD    │
//! │ 31-24 │  23-16    │    15-0      │
//! └───────┴───────────┴──────────────┘
//! ```
//!
//! Tags are ASCII bytes. Device 99 means "no specific device". Masses
//! travel as hundredths of a gram.

#![no_std]
#![deny(unsafe_code)]

pub mod channel;
pub mod codes;
pub mod command;
pub mod message;

pub use channel::{ChannelError, Endpoint, InterCoreChannel, InterCoreLink, CHANNEL_DEPTH};
pub use codes::{CalibrationStep, ErrorCode, OperatingMode, WarningCode};
pub use command::{Command, Report};
pub use message::{FillBand, Message, MessageError, Tag, NO_DEVICE};
