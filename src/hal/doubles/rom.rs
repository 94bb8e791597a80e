use super::error::FakeError;
use crate::hal::rom::RomFlash;

/// In-memory stand-in for the ROM flash routines of a 2MB QSPI part.
///
/// Programming can only clear bits, like NOR flash. Erase and program
/// calls made while XIP is enabled, and reads made while it is
/// disabled, are counted so tests can assert the sequencing.
#[derive(Debug)]
pub struct FakeRom {
    data: Vec<u8>,
    xip: bool,
    connected: bool,
    cache_flushes: usize,
    operations_with_xip: usize,
    reads_without_xip: usize,
    fail_erase_at: Option<u32>,
    fail_program_at: Option<u32>,
    corrupt_programs: usize,
    pub erased_sectors: Vec<u32>,
    pub programmed_pages: Vec<u32>,
}

impl FakeRom {
    pub const SIZE: usize = 2 * 1024 * 1024;

    pub fn new() -> Self {
        Self {
            data: vec![0xFF; Self::SIZE],
            xip: true,
            connected: false,
            cache_flushes: 0,
            operations_with_xip: 0,
            reads_without_xip: 0,
            fail_erase_at: None,
            fail_program_at: None,
            corrupt_programs: 0,
            erased_sectors: Vec::new(),
            programmed_pages: Vec::new(),
        }
    }

    /// Makes the erase of the sector containing `offset` fail.
    pub fn fail_erase_at(&mut self, offset: Option<u32>) { self.fail_erase_at = offset; }

    /// Makes the program of the page containing `offset` fail.
    pub fn fail_program_at(&mut self, offset: Option<u32>) { self.fail_program_at = offset; }

    /// The next `count` program calls silently store wrong data.
    pub fn corrupt_next_programs(&mut self, count: usize) { self.corrupt_programs = count; }

    pub fn xip_enabled(&self) -> bool { self.xip }

    pub fn cache_flushes(&self) -> usize { self.cache_flushes }

    pub fn operations_with_xip(&self) -> usize { self.operations_with_xip }

    pub fn reads_without_xip(&self) -> usize { self.reads_without_xip }

    /// Direct view of flash contents, bypassing XIP bookkeeping.
    pub fn contents(&self, offset: u32, length: usize) -> &[u8] {
        &self.data[offset as usize..offset as usize + length]
    }

    /// Writes directly into flash, bypassing erase/program rules.
    pub fn preload(&mut self, offset: u32, bytes: &[u8]) {
        self.data[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
    }

    fn check_mode(&mut self) {
        if self.xip || !self.connected {
            self.operations_with_xip += 1;
        }
    }
}

impl Default for FakeRom {
    fn default() -> Self { Self::new() }
}

impl RomFlash for FakeRom {
    type Error = FakeError;
    const SECTOR_SIZE: usize = 4096;
    const PAGE_SIZE: usize = 256;

    fn connect(&mut self) { self.connected = true; }

    fn exit_xip(&mut self) { self.xip = false; }

    fn erase(&mut self, offset: u32, length: usize) -> Result<(), Self::Error> {
        self.check_mode();
        let start = offset as usize;
        if start % Self::SECTOR_SIZE != 0
            || length % Self::SECTOR_SIZE != 0
            || start + length > self.data.len()
        {
            return Err(FakeError);
        }
        if let Some(failing) = self.fail_erase_at {
            if (start..start + length).contains(&(failing as usize)) {
                return Err(FakeError);
            }
        }
        self.data[start..start + length].iter_mut().for_each(|b| *b = 0xFF);
        (0..length / Self::SECTOR_SIZE)
            .for_each(|i| self.erased_sectors.push((start + i * Self::SECTOR_SIZE) as u32));
        Ok(())
    }

    fn program(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.check_mode();
        let start = offset as usize;
        if start % Self::PAGE_SIZE != 0
            || bytes.len() % Self::PAGE_SIZE != 0
            || start + bytes.len() > self.data.len()
        {
            return Err(FakeError);
        }
        if let Some(failing) = self.fail_program_at {
            if (start..start + bytes.len()).contains(&(failing as usize)) {
                return Err(FakeError);
            }
        }
        let corrupt = self.corrupt_programs > 0;
        if corrupt {
            self.corrupt_programs -= 1;
        }
        self.data[start..start + bytes.len()].iter_mut().zip(bytes).for_each(|(cell, byte)| {
            *cell &= if corrupt { byte & 0x0F } else { *byte };
        });
        (0..bytes.len() / Self::PAGE_SIZE)
            .for_each(|i| self.programmed_pages.push((start + i * Self::PAGE_SIZE) as u32));
        Ok(())
    }

    fn flush_cache(&mut self) { self.cache_flushes += 1; }

    fn enter_xip(&mut self) {
        self.connected = false;
        self.xip = true;
    }

    fn read(&mut self, offset: u32, bytes: &mut [u8]) {
        if !self.xip {
            self.reads_without_xip += 1;
        }
        let start = offset as usize;
        bytes.iter_mut().zip(self.data.iter().skip(start)).for_each(|(o, i)| *o = *i);
    }
}
