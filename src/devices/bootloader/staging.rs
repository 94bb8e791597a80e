//! Page buffered writes into the staging region.
use super::{image::{StagedImage, CRC32}, Layout};
use crate::{
    error::Error,
    hal::{
        rom::{RomFlash, XipSuspended},
        watchdog::Watchdog,
    },
};
use crc::Digest;
use defmt::{debug, trace};

/// Largest flash page the stager can buffer.
pub const MAX_PAGE_SIZE: usize = 256;

/// Accumulates the incoming stream into whole pages, erasing each
/// sector the first time a page lands in it.
pub struct Stager<'r, R: RomFlash> {
    rom: &'r mut R,
    base: u32,
    capacity: usize,
    page: [u8; MAX_PAGE_SIZE],
    filled: usize,
    committed: usize,
    erased_until: u32,
    digest: Digest<'static, u32>,
    received: usize,
}

impl<'r, R: RomFlash> Stager<'r, R> {
    pub fn new(rom: &'r mut R, layout: &Layout) -> Result<Self, Error> {
        if R::PAGE_SIZE > MAX_PAGE_SIZE {
            return Err(Error::ConfigurationError("Flash page larger than the staging buffer"));
        }
        if layout.staging_offset as usize % R::SECTOR_SIZE != 0 {
            return Err(Error::ConfigurationError("Staging region is not sector aligned"));
        }
        Ok(Self {
            rom,
            base: layout.staging_offset,
            capacity: layout.max_firmware_size,
            page: [0xFF; MAX_PAGE_SIZE],
            filled: 0,
            committed: 0,
            erased_until: layout.staging_offset,
            digest: CRC32.digest(),
            received: 0,
        })
    }

    pub fn received(&self) -> usize { self.received }

    /// Room left in the staging region.
    pub fn remaining(&self) -> usize { self.capacity - self.received }

    pub fn append<W: Watchdog>(&mut self, bytes: &[u8], watchdog: &mut W) -> Result<(), Error> {
        if bytes.len() > self.remaining() {
            return Err(Error::StagingOverflow);
        }
        self.digest.update(bytes);

        let mut rest = bytes;
        while !rest.is_empty() {
            let room = R::PAGE_SIZE - self.filled;
            let (head, tail) = rest.split_at(room.min(rest.len()));
            self.page[self.filled..self.filled + head.len()].copy_from_slice(head);
            self.filled += head.len();
            if self.filled == R::PAGE_SIZE {
                self.commit_page(watchdog)?;
            }
            rest = tail;
        }
        self.received += bytes.len();
        Ok(())
    }

    /// Pads and writes the trailing partial page.
    pub fn finish<W: Watchdog>(mut self, watchdog: &mut W) -> Result<StagedImage, Error> {
        if self.filled > 0 {
            self.commit_page(watchdog)?;
        }
        if self.received == 0 {
            return Err(Error::EmptyImage);
        }
        debug!("Staged {=usize} bytes in {=usize} pages", self.received, self.committed / R::PAGE_SIZE);
        Ok(StagedImage { offset: self.base, size: self.received, crc32: self.digest.finalize() })
    }

    #[cfg_attr(target_arch = "arm", link_section = ".data.ram_func")]
    fn commit_page<W: Watchdog>(&mut self, watchdog: &mut W) -> Result<(), Error> {
        let offset = self.base + self.committed as u32;

        if offset >= self.erased_until {
            let sector = offset - offset % R::SECTOR_SIZE as u32;
            trace!("Erasing staging sector at {=u32:x}", sector);
            watchdog.feed();
            XipSuspended::new(&mut *self.rom)
                .erase(sector, R::SECTOR_SIZE)
                .map_err(|_| Error::FlashErase)?;
            self.erased_until = sector + R::SECTOR_SIZE as u32;
        }

        watchdog.feed();
        XipSuspended::new(&mut *self.rom)
            .program(offset, &self.page[..R::PAGE_SIZE])
            .map_err(|_| Error::FlashWrite)?;
        watchdog.feed();

        self.committed += R::PAGE_SIZE;
        self.filled = 0;
        self.page = [0xFF; MAX_PAGE_SIZE];
        Ok(())
    }
}
