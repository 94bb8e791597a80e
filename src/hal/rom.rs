//! Flash primitives exposed by the boot ROM.
//!
//! On parts that execute in place (XIP) from external QSPI flash,
//! the flash cannot be read as memory while it is being erased or
//! programmed. The ROM provides the routines that switch the QSPI
//! interface between memory-mapped mode and serial command mode, and
//! the erase/program routines themselves. These live in mask ROM and
//! so remain callable while any flash region is being rewritten.
//!
//! Offsets are relative to the start of flash, not to the XIP window.

use core::marker::PhantomData;

/// Raw ROM-resident flash routines.
pub trait RomFlash {
    type Error: Copy + Clone + core::fmt::Debug;

    /// Smallest erasable unit, in bytes.
    const SECTOR_SIZE: usize;
    /// Smallest programmable unit, in bytes.
    const PAGE_SIZE: usize;

    /// Restores the QSPI pads and SSI to a state where commands can be issued.
    fn connect(&mut self);
    /// Leaves memory-mapped (XIP) mode.
    fn exit_xip(&mut self);
    /// Erases `length` bytes starting at `offset`. Both must be sector aligned.
    fn erase(&mut self, offset: u32, length: usize) -> Result<(), Self::Error>;
    /// Programs `bytes` at `offset`. Both must be page aligned.
    fn program(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error>;
    /// Invalidates the XIP cache.
    fn flush_cache(&mut self);
    /// Re-enters memory-mapped mode.
    fn enter_xip(&mut self);
    /// Reads through the memory-mapped window. Only valid while XIP is enabled.
    fn read(&mut self, offset: u32, bytes: &mut [u8]);
}

/// RAII guard that keeps XIP suspended for as long as it lives.
///
/// Constructing it connects the flash and exits XIP. Dropping it
/// flushes the cache and re-enters XIP, no matter the return path.
pub struct XipSuspended<'a, R: RomFlash> {
    rom: &'a mut R,
    _marker: PhantomData<R>,
}

// Inlined so that the guard runs from wherever its caller runs.
impl<'a, R: RomFlash> XipSuspended<'a, R> {
    #[inline(always)]
    pub fn new(rom: &'a mut R) -> Self {
        rom.connect();
        rom.exit_xip();
        Self { rom, _marker: PhantomData }
    }

    #[inline(always)]
    pub fn erase(&mut self, offset: u32, length: usize) -> Result<(), R::Error> {
        self.rom.erase(offset, length)
    }

    #[inline(always)]
    pub fn program(&mut self, offset: u32, bytes: &[u8]) -> Result<(), R::Error> {
        self.rom.program(offset, bytes)
    }
}

impl<'a, R: RomFlash> Drop for XipSuspended<'a, R> {
    #[inline(always)]
    fn drop(&mut self) {
        self.rom.flush_cache();
        self.rom.enter_xip();
    }
}
