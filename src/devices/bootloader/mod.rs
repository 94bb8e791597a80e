//! In-field firmware update.
//!
//! Entered on `CMD_BOOTLOADER`. The command link hands the UART over,
//! an image is streamed into the staging region, verified, and copied
//! over the boot region. Every path out of here ends in a reset.
use super::{
    handoff::{Handoff, HandoffConfig},
    link::{
        message::{AckResult, CMD_BOOTLOADER},
        Link, PacketHandler,
    },
    traits::{Flash, Serial},
};
use crate::{
    hal::{
        system::System,
        time::{self, Milliseconds, Now},
        watchdog::Watchdog,
    },
    utilities::frame::Packet,
};
use defmt::{info, warn, Format};
use static_assertions::const_assert;

pub mod image;
pub mod reprogram;
pub mod staging;
pub mod transfer;

use reprogram::{Reprogrammer, VerifyPolicy};
use transfer::Session;

/// Flash regions as offsets from the start of the flash part.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Format)]
pub struct Layout {
    /// Where the running firmware lives.
    pub boot_offset: u32,
    pub staging_offset: u32,
    pub max_firmware_size: usize,
    pub flash_size: usize,
    /// Address at which flash is mapped for execution.
    pub xip_base: u32,
    pub ram_start: u32,
    /// One past the last RAM address, a valid initial stack pointer.
    pub ram_end: u32,
    /// Position of the vector table inside an image, past the second
    /// stage boot loader.
    pub vector_table_offset: u32,
}

impl Layout {
    pub const DEFAULT: Self = Self {
        boot_offset: 0,
        staging_offset: kb!(1536),
        max_firmware_size: kb!(512),
        flash_size: mb!(2),
        xip_base: 0x1000_0000,
        ram_start: 0x2000_0000,
        ram_end: 0x2004_2000,
        vector_table_offset: 0x100,
    };
}

impl Default for Layout {
    fn default() -> Self { Self::DEFAULT }
}

const_assert!(
    Layout::DEFAULT.staging_offset as usize + Layout::DEFAULT.max_firmware_size
        <= Layout::DEFAULT.flash_size
);
const_assert!(
    Layout::DEFAULT.boot_offset as usize + Layout::DEFAULT.max_firmware_size
        <= Layout::DEFAULT.staging_offset as usize
);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Format)]
pub struct TransferConfig {
    /// Longest silence tolerated inside a chunk or between chunks.
    pub chunk_timeout: Milliseconds,
    /// Bound on the whole session, from the ready marker onwards.
    pub transfer_timeout: Milliseconds,
    /// How long to wait for the status byte after a bare end marker.
    pub end_lookahead: Milliseconds,
    pub write_timeout: Milliseconds,
    /// Pause between reporting success and starting the copy.
    pub completion_delay: Milliseconds,
}

impl TransferConfig {
    pub const DEFAULT: Self = Self {
        chunk_timeout: Milliseconds(5_000),
        transfer_timeout: Milliseconds(30_000),
        end_lookahead: Milliseconds(20),
        write_timeout: Milliseconds(10),
        completion_delay: Milliseconds(100),
    };
}

impl Default for TransferConfig {
    fn default() -> Self { Self::DEFAULT }
}

const_assert!(TransferConfig::DEFAULT.chunk_timeout.0 < TransferConfig::DEFAULT.transfer_timeout.0);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Format)]
pub struct BootloaderConfig {
    pub layout: Layout,
    pub transfer: TransferConfig,
    pub handoff: HandoffConfig,
    pub verify: VerifyPolicy,
}

/// Handles `CMD_BOOTLOADER` on the command link.
pub struct Bootloader<R: Flash, W: Watchdog, Y: System> {
    rom: R,
    watchdog: W,
    system: Y,
    config: BootloaderConfig,
    handoff: Handoff,
    session: Session,
}

impl<R: Flash, W: Watchdog, Y: System> Bootloader<R, W, Y> {
    pub fn new(rom: R, watchdog: W, system: Y, config: BootloaderConfig) -> Self {
        Self { rom, watchdog, system, handoff: Handoff::new(config.handoff), config, session: Session::default() }
    }

    pub fn session(&self) -> &Session { &self.session }

    pub fn handoff(&self) -> &Handoff { &self.handoff }

    /// Acknowledges the command, takes over the UART and runs a
    /// transfer. A staged and verified image is copied into place
    /// before a processor reset; anything else ends in a watchdog reset.
    pub fn enter<S: Serial, C: Now>(&mut self, link: &mut Link<S, C>, sequence: u8) -> ! {
        info!("Entering bootloader (command {=u8})", sequence);
        if let Err(error) = link.send_ack(CMD_BOOTLOADER, sequence, AckResult::Success) {
            warn!("Bootloader command ACK not sent: {}", error);
        }
        let watchdog = &mut self.watchdog;
        time::spin(link.clock(), self.config.handoff.ack_flush_delay, || watchdog.feed());

        self.handoff.prepare(link, &mut self.watchdog);

        let (serial, clock) = link.split();
        let BootloaderConfig { layout, transfer, verify, .. } = self.config;
        match self.session.receive(serial, clock, &mut self.watchdog, &mut self.rom, &layout, &transfer) {
            Ok(image) => {
                let watchdog = &mut self.watchdog;
                time::spin(clock, transfer.completion_delay, || watchdog.feed());
                Reprogrammer::new(layout, verify).run(&mut self.rom, &mut self.watchdog, &mut self.system, &image)
            }
            Err(_) => self.handoff.exit(link, &mut self.watchdog),
        }
    }
}

impl<'a, S, C, R, W, Y> PacketHandler<Link<'a, S, C>> for Bootloader<R, W, Y>
where
    S: Serial,
    C: Now,
    R: Flash,
    W: Watchdog,
    Y: System,
{
    fn on_packet(&mut self, link: &mut Link<'a, S, C>, packet: &Packet) {
        if packet.message_type == CMD_BOOTLOADER {
            self.enter(link, packet.sequence)
        }
    }
}
