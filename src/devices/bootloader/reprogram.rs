//! Copy of a verified staged image over the boot region.
//!
//! Nothing here may execute from flash on the target: the boot region
//! is being rewritten and XIP is suspended around every operation.
//! Scratch buffers are set up before the first erase so that no
//! memset or memcpy is needed once the old image starts to disappear.
use super::{image::StagedImage, Layout};
use crate::{
    error::Error,
    hal::{
        rom::{RomFlash, XipSuspended},
        system::System,
        watchdog::Watchdog,
    },
    utilities::memory::align_up,
};
use core::cmp::min;
use defmt::{info, Format};

/// Largest sector the reprogrammer can buffer in RAM.
pub const MAX_SECTOR_SIZE: usize = 4096;
const VERIFY_CHUNK: usize = 256;

/// Whether each rewritten sector is read back and compared.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Format)]
pub enum VerifyPolicy {
    /// Compare every sector after programming, rewriting it up to
    /// `attempts` times in total.
    ReadBack { attempts: u8 },
    /// Trust the program operation.
    Unverified,
}

impl VerifyPolicy {
    pub const DEFAULT: Self = VerifyPolicy::ReadBack { attempts: 3 };
}

impl Default for VerifyPolicy {
    fn default() -> Self { Self::DEFAULT }
}

pub struct Reprogrammer {
    layout: Layout,
    policy: VerifyPolicy,
}

impl Reprogrammer {
    pub fn new(layout: Layout, policy: VerifyPolicy) -> Self { Self { layout, policy } }

    pub fn policy(&self) -> VerifyPolicy { self.policy }

    /// Masks interrupts, overwrites the boot region and resets. There is
    /// no meaningful recovery from a failure halfway through, so the
    /// processor is reset either way: through the reset controller on
    /// success, or through the watchdog on failure, which the next boot
    /// sees as its reset reason.
    ///
    /// Nothing may be logged once the copy starts: the logger lives in
    /// the flash being rewritten.
    #[cfg_attr(target_arch = "arm", link_section = ".data.ram_func")]
    pub fn run<R, W, Y>(&self, rom: &mut R, watchdog: &mut W, system: &mut Y, image: &StagedImage) -> !
    where
        R: RomFlash,
        W: Watchdog,
        Y: System,
    {
        info!("Rewriting boot region with {=usize} bytes ({})", image.size, self.policy);
        watchdog.feed();
        system.disable_interrupts();
        match self.copy_staged_image(rom, watchdog, image) {
            Ok(()) => system.reset(),
            Err(_) => watchdog.trigger(),
        }
    }

    #[cfg_attr(target_arch = "arm", link_section = ".data.ram_func")]
    pub fn copy_staged_image<R: RomFlash, W: Watchdog>(
        &self,
        rom: &mut R,
        watchdog: &mut W,
        image: &StagedImage,
    ) -> Result<(), Error> {
        if R::SECTOR_SIZE > MAX_SECTOR_SIZE {
            return Err(Error::ConfigurationError("Flash sector larger than the copy buffer"));
        }
        if image.size > self.layout.max_firmware_size {
            return Err(Error::StagingOverflow);
        }

        let sectors = align_up(image.size, R::SECTOR_SIZE) / R::SECTOR_SIZE;
        let mut buffer = [0u8; MAX_SECTOR_SIZE];
        let mut readback = [0u8; VERIFY_CHUNK];
        for sector in 0..sectors {
            let step = (sector * R::SECTOR_SIZE) as u32;
            copy_sector(
                rom,
                watchdog,
                &mut buffer[..R::SECTOR_SIZE],
                &mut readback,
                image.offset + step,
                self.layout.boot_offset + step,
                self.policy,
            )?;
        }
        Ok(())
    }
}

#[cfg_attr(target_arch = "arm", link_section = ".data.ram_func")]
fn copy_sector<R: RomFlash, W: Watchdog>(
    rom: &mut R,
    watchdog: &mut W,
    buffer: &mut [u8],
    readback: &mut [u8; VERIFY_CHUNK],
    source: u32,
    destination: u32,
    policy: VerifyPolicy,
) -> Result<(), Error> {
    watchdog.feed();
    // The staging region is unreadable once XIP is suspended.
    rom.read(source, buffer);

    let attempts = match policy {
        VerifyPolicy::ReadBack { attempts } => attempts.max(1),
        VerifyPolicy::Unverified => 1,
    };
    for _ in 0..attempts {
        {
            let mut flash = XipSuspended::new(&mut *rom);
            flash.erase(destination, buffer.len()).map_err(|_| Error::FlashErase)?;
            flash.program(destination, buffer).map_err(|_| Error::FlashWrite)?;
        }
        watchdog.feed();

        if matches!(policy, VerifyPolicy::Unverified) || matches_flash(rom, destination, buffer, readback) {
            return Ok(());
        }
    }
    Err(Error::FlashVerify)
}

#[cfg_attr(target_arch = "arm", link_section = ".data.ram_func")]
fn matches_flash<R: RomFlash>(
    rom: &mut R,
    offset: u32,
    expected: &[u8],
    readback: &mut [u8; VERIFY_CHUNK],
) -> bool {
    let mut position = 0usize;
    while position < expected.len() {
        let length = min(VERIFY_CHUNK, expected.len() - position);
        rom.read(offset + position as u32, &mut readback[..length]);
        let same = readback[..length].iter().zip(&expected[position..]).all(|(a, b)| a == b);
        if !same {
            return false;
        }
        position += length;
    }
    true
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hal::doubles::{
        rom::FakeRom,
        system::{FakeSystem, FakeWatchdog},
    };
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn staged(rom: &mut FakeRom, size: usize) -> (StagedImage, Vec<u8>) {
        let bytes: Vec<u8> = (0..size).map(|i| (i * 13 + 1) as u8).collect();
        let offset = Layout::DEFAULT.staging_offset;
        rom.preload(offset, &bytes);
        (StagedImage { offset, size, crc32: 0 }, bytes)
    }

    #[test]
    fn staged_image_lands_in_the_boot_region() {
        // Given
        let mut rom = FakeRom::new();
        let (image, bytes) = staged(&mut rom, 10_000);
        rom.preload(0, &[0u8; 16]);
        let reprogrammer = Reprogrammer::new(Layout::DEFAULT, VerifyPolicy::DEFAULT);

        // When
        reprogrammer.copy_staged_image(&mut rom, &mut FakeWatchdog::default(), &image).unwrap();

        // Then
        assert_eq!(&bytes[..], rom.contents(0, bytes.len()));
        assert_eq!(vec![0, 4096, 8192], rom.erased_sectors);
        assert_eq!(0, rom.operations_with_xip());
        assert_eq!(0, rom.reads_without_xip());
        assert!(rom.xip_enabled());
    }

    #[test]
    fn read_back_rewrites_a_sector_that_came_out_wrong() {
        // Given
        let mut rom = FakeRom::new();
        let (image, bytes) = staged(&mut rom, 4096);
        rom.corrupt_next_programs(1);
        let reprogrammer = Reprogrammer::new(Layout::DEFAULT, VerifyPolicy::ReadBack { attempts: 3 });

        // When
        reprogrammer.copy_staged_image(&mut rom, &mut FakeWatchdog::default(), &image).unwrap();

        // Then
        assert_eq!(&bytes[..], rom.contents(0, bytes.len()));
        assert_eq!(vec![0, 0], rom.erased_sectors);
    }

    #[test]
    fn read_back_gives_up_after_the_configured_attempts() {
        // Given
        let mut rom = FakeRom::new();
        let (image, _) = staged(&mut rom, 4096);
        rom.corrupt_next_programs(usize::MAX);
        let reprogrammer = Reprogrammer::new(Layout::DEFAULT, VerifyPolicy::ReadBack { attempts: 2 });

        // Then
        let result = reprogrammer.copy_staged_image(&mut rom, &mut FakeWatchdog::default(), &image);
        assert_eq!(Err(Error::FlashVerify), result);
        assert_eq!(2, rom.erased_sectors.len());
    }

    #[test]
    fn unverified_copy_trusts_the_flash() {
        // Given
        let mut rom = FakeRom::new();
        let (image, bytes) = staged(&mut rom, 4096);
        rom.corrupt_next_programs(1);
        let reprogrammer = Reprogrammer::new(Layout::DEFAULT, VerifyPolicy::Unverified);

        // When
        let result = reprogrammer.copy_staged_image(&mut rom, &mut FakeWatchdog::default(), &image);

        // Then
        assert!(result.is_ok());
        assert_ne!(&bytes[..], rom.contents(0, bytes.len()));
        assert_eq!(1, rom.erased_sectors.len());
    }

    #[test]
    fn erase_failure_leaves_xip_enabled() {
        // Given
        let mut rom = FakeRom::new();
        let (image, _) = staged(&mut rom, 8192);
        rom.fail_erase_at(Some(4096));
        let reprogrammer = Reprogrammer::new(Layout::DEFAULT, VerifyPolicy::DEFAULT);

        // Then
        let result = reprogrammer.copy_staged_image(&mut rom, &mut FakeWatchdog::default(), &image);
        assert_eq!(Err(Error::FlashErase), result);
        assert!(rom.xip_enabled());
    }

    #[test]
    fn run_masks_interrupts_and_resets() {
        // Given
        let mut rom = FakeRom::new();
        let (image, bytes) = staged(&mut rom, 300);
        let mut watchdog = FakeWatchdog::default();
        let mut system = FakeSystem::default();
        let reprogrammer = Reprogrammer::new(Layout::DEFAULT, VerifyPolicy::DEFAULT);

        // When
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            reprogrammer.run(&mut rom, &mut watchdog, &mut system, &image)
        }));

        // Then
        assert_eq!("system reset", *outcome.unwrap_err().downcast::<&str>().unwrap());
        assert!(system.interrupts_disabled);
        assert!(watchdog.feeds >= 2);
        assert_eq!(&bytes[..], rom.contents(0, bytes.len()));
    }

    #[test]
    fn failed_copy_resets_through_the_watchdog() {
        // Given
        let mut rom = FakeRom::new();
        let (image, _) = staged(&mut rom, 4096);
        rom.corrupt_next_programs(usize::MAX);
        let mut watchdog = FakeWatchdog::default();
        let mut system = FakeSystem::default();
        let reprogrammer = Reprogrammer::new(Layout::DEFAULT, VerifyPolicy::ReadBack { attempts: 2 });

        // When
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            reprogrammer.run(&mut rom, &mut watchdog, &mut system, &image)
        }));

        // Then
        assert_eq!("watchdog reset", *outcome.unwrap_err().downcast::<&str>().unwrap());
        assert!(system.interrupts_disabled);
        assert!(rom.xip_enabled());
    }
}
