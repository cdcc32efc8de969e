#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

// Shared logic for the ventilation controller.
//
// This crate stays portable across MCU firmware and the host emulator by
// avoiding the Rust standard library. Hardware access is reached through the
// traits in `time`, `watchdog` and `crash`.

pub mod components;
pub mod crash;
pub mod diag;
pub mod scheduler;
pub mod time;
pub mod watchdog;
