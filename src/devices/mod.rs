//! Complex modules with business logic related to the problem
//! domain, that lay on top of abstract drivers. Devices are
//! generic, while board specifics (register maps, ROM tables) are
//! handled in the `drivers` module.

pub mod bootloader;
pub mod comm_loop;
pub mod handoff;
pub mod link;
pub mod supervision;

/// General purpose traits that summarize requirements on devices.
pub mod traits {
    use crate::{
        error,
        hal::{rom, serial},
    };
    use marker_blanket::marker_blanket;

    /// A supported flash must expose the ROM erase and program routines,
    /// and report errors to the link or bootloader.
    #[marker_blanket]
    pub trait Flash: rom::RomFlash<Error: error::Convertible> {}

    /// A supported serial must be able to read and write without blocking,
    /// and report errors to the link or bootloader.
    #[marker_blanket]
    pub trait Serial:
        serial::Read<Error: error::Convertible> + serial::Write<Error: error::Convertible>
    {
    }
}
