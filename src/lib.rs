//! # Brewlink
//!
//! Controller side of the espresso machine UART link: a framed,
//! acknowledged command and telemetry protocol, and a serial firmware
//! update mode that takes over the same wire to reprogram the device.
#![cfg_attr(test, allow(unused_imports))]
#![cfg_attr(target_arch = "arm", no_std)]

extern crate static_assertions;

#[macro_use]
pub mod utilities {
    #[macro_use]
    pub mod memory;
    pub mod bitwise;
    pub mod frame;
}

pub mod hal;
pub mod devices;
pub mod drivers;
pub mod error;
