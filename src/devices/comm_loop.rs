//! Communication core scheduler.
use super::{
    link::{
        message::{self, BootInfo},
        Link, PacketHandler,
    },
    supervision::{Heartbeat, StatusBuffer},
    traits::Serial,
};
use crate::hal::time::{Instant, Milliseconds, Now};
use defmt::{debug, info, warn, Format};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Format)]
pub struct CommLoopConfig {
    pub status_period: Milliseconds,
    pub boot_info_period: Milliseconds,
    /// Also the period of the statistics summary.
    pub handshake_retry_interval: Milliseconds,
}

impl CommLoopConfig {
    pub const DEFAULT: Self = Self {
        status_period: Milliseconds(250),
        boot_info_period: Milliseconds(5 * 60 * 1000),
        handshake_retry_interval: Milliseconds(60_000),
    };
}

impl Default for CommLoopConfig {
    fn default() -> Self { Self::DEFAULT }
}

/// Drives the link and the periodic traffic on top of it. One `step`
/// per loop iteration.
pub struct CommLoop<'s, T: Copy, I> {
    config: CommLoopConfig,
    status: &'s StatusBuffer<T>,
    heartbeat: &'s Heartbeat,
    boot_info: BootInfo,
    last_status: Option<I>,
    last_boot_info: Option<I>,
    last_health_check: Option<I>,
}

impl<'s, T: Copy + AsRef<[u8]>, I: Instant> CommLoop<'s, T, I> {
    pub fn new(
        status: &'s StatusBuffer<T>,
        heartbeat: &'s Heartbeat,
        boot_info: BootInfo,
        config: CommLoopConfig,
    ) -> Self {
        Self {
            config,
            status,
            heartbeat,
            boot_info,
            last_status: None,
            last_boot_info: None,
            last_health_check: None,
        }
    }

    pub fn step<'a, S, C, H>(&mut self, link: &mut Link<'a, S, C>, handler: &mut H)
    where
        S: Serial,
        C: Now<I = I>,
        H: PacketHandler<Link<'a, S, C>> + ?Sized,
    {
        link.process(handler);
        self.heartbeat.beat();

        // The UART belongs to the bootloader.
        if link.flag().is_active() {
            return;
        }

        let now = link.clock().now();
        if due(self.last_status, now, self.config.status_period) {
            self.last_status = Some(now);
            self.send_status(link);
        }

        if due(self.last_boot_info, now, self.config.boot_info_period) {
            self.last_boot_info = Some(now);
            if let Err(error) = link.send(message::BOOT, &self.boot_info.to_bytes()) {
                warn!("Boot info not sent: {}", error);
            }
        }

        if due(self.last_health_check, now, self.config.handshake_retry_interval) {
            self.last_health_check = Some(now);
            info!("Link health: {}", link.statistics());
            if !link.handshake_complete() {
                if let Err(error) = link.request_handshake() {
                    warn!("Handshake request not sent: {}", error);
                }
            }
        }
    }

    /// Sends the latest snapshot, repeated if unchanged, once the control
    /// core has published one.
    fn send_status<S: Serial, C: Now>(&self, link: &mut Link<S, C>) {
        let snapshot = self.status.read();
        if snapshot.generation == 0 {
            return;
        }
        if let Err(error) = link.send(message::STATUS, snapshot.value.as_ref()) {
            debug!("Status not sent: {}", error);
        }
    }
}

fn due<I: Instant>(last: Option<I>, now: I, period: Milliseconds) -> bool {
    last.map_or(true, |last| now - last >= period)
}
