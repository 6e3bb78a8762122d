//! Hardware driver implementations
//!
//! This crate provides concrete implementations of the traits defined
//! in purrfeed-core for the feeder's hardware:
//!
//! - Stepper drivers (step/dir pins, TMC2209 over single-wire UART)
//! - DIAG stall line monitor
//! - Home endstop input
//! - Load cell (HX711 converter)

#![no_std]
#![deny(unsafe_code)]

#[cfg(test)]
extern crate std;

pub mod sensor;
pub mod stepper;
