//! Checks applied to a staged firmware image before it is allowed
//! anywhere near the boot region.
use super::Layout;
use crate::{error::Error, hal::rom::RomFlash, utilities::bitwise::BitFlags};
use core::cmp::min;
use crc::{Crc, CRC_32_ISO_HDLC};
use defmt::{info, warn, Format};

/// CRC-32 as used by zlib and Ethernet.
pub static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const READ_BACK_CHUNK: usize = 256;

/// An image sitting in the staging region.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Format)]
pub struct StagedImage {
    /// Flash offset of the first byte.
    pub offset: u32,
    pub size: usize,
    /// CRC-32 of the bytes as they were received.
    pub crc32: u32,
}

/// The first two words of a Cortex-M vector table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Format)]
pub struct VectorTable {
    pub initial_stack_pointer: u32,
    pub reset_vector: u32,
}

impl VectorTable {
    pub const SIZE: usize = 8;

    pub fn read<R: RomFlash>(rom: &mut R, image: &StagedImage, layout: &Layout) -> Result<Self, Error> {
        if layout.vector_table_offset as usize + Self::SIZE > image.size {
            return Err(Error::InvalidEntryPoint);
        }
        let mut words = [0u8; Self::SIZE];
        rom.read(image.offset + layout.vector_table_offset, &mut words);
        let [a, b, c, d, e, f, g, h] = words;
        Ok(Self {
            initial_stack_pointer: u32::from_le_bytes([a, b, c, d]),
            reset_vector: u32::from_le_bytes([e, f, g, h]),
        })
    }

    /// Stack in RAM, reset handler in flash and in Thumb state.
    pub fn is_plausible(&self, layout: &Layout) -> bool {
        let stack_in_ram =
            (layout.ram_start..=layout.ram_end).contains(&self.initial_stack_pointer);
        let flash = layout.xip_base..layout.xip_base + layout.flash_size as u32;
        let handler_in_flash = flash.contains(&(self.reset_vector & !1));
        stack_in_ram && handler_in_flash && self.reset_vector.is_set(0)
    }
}

/// CRC-32 of `size` bytes of flash, read through the memory-mapped window.
pub fn flash_crc<R: RomFlash>(rom: &mut R, offset: u32, size: usize) -> u32 {
    let mut digest = CRC32.digest();
    let mut buffer = [0u8; READ_BACK_CHUNK];
    let mut position = 0usize;
    while position < size {
        let length = min(READ_BACK_CHUNK, size - position);
        rom.read(offset + position as u32, &mut buffer[..length]);
        digest.update(&buffer[..length]);
        position += length;
    }
    digest.finalize()
}

/// Confirms the staged bytes match what was received, and that they
/// look like something the core can boot.
pub fn validate<R: RomFlash>(rom: &mut R, layout: &Layout, image: StagedImage) -> Result<StagedImage, Error> {
    if image.size == 0 {
        return Err(Error::EmptyImage);
    }

    let staged = flash_crc(rom, image.offset, image.size);
    if staged != image.crc32 {
        warn!("Staged CRC {=u32:x} does not match received {=u32:x}", staged, image.crc32);
        return Err(Error::ImageCrcMismatch);
    }

    let vectors = VectorTable::read(rom, &image, layout)?;
    if !vectors.is_plausible(layout) {
        warn!("Implausible vector table {}", vectors);
        return Err(Error::InvalidEntryPoint);
    }

    info!("Staged image verified ({=usize} bytes, CRC {=u32:x})", image.size, image.crc32);
    Ok(image)
}
