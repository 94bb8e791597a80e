//! Host-side test doubles for the HAL traits.
pub mod error;
pub mod noise;
pub mod rom;
pub mod serial;
pub mod system;
pub mod time;
