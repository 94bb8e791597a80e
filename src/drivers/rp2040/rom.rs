//! Flash routines from the RP2040 boot ROM.
//!
//! Every entry point is resolved once through the ROM function table,
//! and called through pointers kept in RAM. The trait methods are
//! inlined into their (RAM resident) callers, so nothing on the erase
//! and program path executes from flash.
use crate::{
    error::{Convertible, Error as BrewlinkError},
    hal::rom::RomFlash,
};
use core::{mem, ptr};

const ROM_FUNCTION_TABLE: usize = 0x0000_0014;
const ROM_TABLE_LOOKUP: usize = 0x0000_0018;

/// Uncached, non-allocating alias of the flash window.
const XIP_NOCACHE_NOALLOC_BASE: u32 = 0x1300_0000;
pub const FLASH_SIZE: usize = mb!(2);

const SECTOR_ERASE_COMMAND: u8 = 0x20;

const fn rom_code(name: [u8; 2]) -> u32 { name[0] as u32 | (name[1] as u32) << 8 }

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The ROM does not export the requested function.
    MissingFunction([u8; 2]),
    Misaligned,
    OutOfBounds,
}

impl Convertible for Error {
    fn into(self) -> BrewlinkError {
        match self {
            Error::MissingFunction(_) => BrewlinkError::DriverError("[ROM] Missing flash function"),
            Error::Misaligned => BrewlinkError::DriverError("[ROM] Misaligned flash operation"),
            Error::OutOfBounds => BrewlinkError::DriverError("[ROM] Flash operation out of bounds"),
        }
    }
}

type RomTableLookup = unsafe extern "C" fn(table: *const u16, code: u32) -> *const ();
type Procedure = unsafe extern "C" fn();
type RangeErase = unsafe extern "C" fn(offset: u32, count: usize, block_size: u32, block_command: u8);
type RangeProgram = unsafe extern "C" fn(offset: u32, data: *const u8, count: usize);

/// # Safety
///
/// Must run on an RP2040, where the boot ROM table is present.
unsafe fn lookup(name: [u8; 2]) -> Result<*const (), Error> {
    let table = ptr::read_volatile(ROM_FUNCTION_TABLE as *const u16) as usize as *const u16;
    let lookup_address = ptr::read_volatile(ROM_TABLE_LOOKUP as *const u16) as usize;
    let lookup: RomTableLookup = mem::transmute(lookup_address as *const ());
    let function = lookup(table, rom_code(name));
    if function.is_null() {
        Err(Error::MissingFunction(name))
    } else {
        Ok(function)
    }
}

pub struct Rp2040Rom {
    connect_internal_flash: Procedure,
    flash_exit_xip: Procedure,
    flash_range_erase: RangeErase,
    flash_range_program: RangeProgram,
    flash_flush_cache: Procedure,
    flash_enter_cmd_xip: Procedure,
    interrupts_were_enabled: bool,
}

impl Rp2040Rom {
    /// # Safety
    ///
    /// Must run on an RP2040. The caller is responsible for keeping the
    /// other core away from flash while erase or program is in progress.
    pub unsafe fn new() -> Result<Self, Error> {
        Ok(Self {
            connect_internal_flash: mem::transmute(lookup(*b"IF")?),
            flash_exit_xip: mem::transmute(lookup(*b"EX")?),
            flash_range_erase: mem::transmute(lookup(*b"RE")?),
            flash_range_program: mem::transmute(lookup(*b"RP")?),
            flash_flush_cache: mem::transmute(lookup(*b"FC")?),
            flash_enter_cmd_xip: mem::transmute(lookup(*b"CX")?),
            interrupts_were_enabled: false,
        })
    }

    /// Runs with XIP suspended, so it must never be outlined into flash.
    #[inline(always)]
    fn check(offset: u32, length: usize, alignment: usize) -> Result<(), Error> {
        if offset as usize % alignment != 0 || length % alignment != 0 {
            return Err(Error::Misaligned);
        }
        if offset as usize + length > FLASH_SIZE {
            return Err(Error::OutOfBounds);
        }
        Ok(())
    }
}

impl RomFlash for Rp2040Rom {
    type Error = Error;
    const SECTOR_SIZE: usize = 4096;
    const PAGE_SIZE: usize = 256;

    /// Interrupt handlers live in flash, so they are masked from here
    /// until `enter_xip`.
    #[inline(always)]
    fn connect(&mut self) {
        self.interrupts_were_enabled = cortex_m::register::primask::read().is_inactive();
        cortex_m::interrupt::disable();
        // NOTE(Safety) ROM routine with no preconditions beyond masked interrupts.
        unsafe { (self.connect_internal_flash)() }
    }

    #[inline(always)]
    fn exit_xip(&mut self) {
        // NOTE(Safety) Flash has been connected.
        unsafe { (self.flash_exit_xip)() }
    }

    #[inline(always)]
    fn erase(&mut self, offset: u32, length: usize) -> Result<(), Self::Error> {
        Self::check(offset, length, Self::SECTOR_SIZE)?;
        // NOTE(Safety) Bounds checked, XIP suspended by the caller.
        unsafe { (self.flash_range_erase)(offset, length, Self::SECTOR_SIZE as u32, SECTOR_ERASE_COMMAND) };
        Ok(())
    }

    #[inline(always)]
    fn program(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        Self::check(offset, bytes.len(), Self::PAGE_SIZE)?;
        // NOTE(Safety) Bounds checked, `bytes` lives in RAM for the duration.
        unsafe { (self.flash_range_program)(offset, bytes.as_ptr(), bytes.len()) };
        Ok(())
    }

    #[inline(always)]
    fn flush_cache(&mut self) {
        // NOTE(Safety) ROM routine, valid in command mode.
        unsafe { (self.flash_flush_cache)() }
    }

    #[inline(always)]
    fn enter_xip(&mut self) {
        // NOTE(Safety) Slow but universally compatible XIP mode. The
        // second stage loader's faster setup is restored on reboot.
        unsafe { (self.flash_enter_cmd_xip)() };
        if self.interrupts_were_enabled {
            // NOTE(Safety) Restores the state found in `connect`.
            unsafe { cortex_m::interrupt::enable() };
        }
    }

    #[inline(always)]
    fn read(&mut self, offset: u32, bytes: &mut [u8]) {
        let base = (XIP_NOCACHE_NOALLOC_BASE + offset) as usize;
        for (index, byte) in bytes.iter_mut().enumerate() {
            // NOTE(Safety) Inside the memory mapped flash window.
            *byte = unsafe { ptr::read_volatile((base + index) as *const u8) };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rom_codes_are_little_endian_pairs() {
        assert_eq!(0x4649, rom_code(*b"IF"));
        assert_eq!(0x4552, rom_code(*b"RE"));
    }

    #[test]
    fn operations_are_bounds_and_alignment_checked() {
        assert_eq!(Ok(()), Rp2040Rom::check(0x1000, 0x2000, 4096));
        assert_eq!(Err(Error::Misaligned), Rp2040Rom::check(0x1100, 4096, 4096));
        assert_eq!(Err(Error::Misaligned), Rp2040Rom::check(0, 100, 256));
        assert_eq!(Err(Error::OutOfBounds), Rp2040Rom::check(0x1F_F000, 0x2000, 4096));
    }
}
