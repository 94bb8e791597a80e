//! Hardware Abstraction Layer, containing interfaces
//! for low level drivers.
#![macro_use]

pub mod rom;
pub mod serial;
pub mod system;
pub mod time;
pub mod watchdog;

#[cfg(not(target_arch = "arm"))]
#[doc(hidden)]
pub mod doubles;
