//! Ownership transfer of the UART from the command link to the
//! firmware transfer channel.
//!
//! The handoff is one way. Once the bootloader flag is raised, the
//! device either reboots into new firmware or is reset by the watchdog.
use crate::{
    devices::{link::Link, traits::Serial},
    hal::{
        serial::{self, Read},
        time::{self, Milliseconds, Now},
        watchdog::Watchdog,
    },
};
use core::sync::atomic::{fence, AtomicBool, Ordering};
use defmt::{info, warn, Format};

/// Cross core signal that the UART belongs to the bootloader.
///
/// Only plain loads and stores are used, so it is valid on cores
/// without compare-and-swap.
#[derive(Debug, Default)]
pub struct BootloaderFlag(AtomicBool);

impl BootloaderFlag {
    pub const fn new() -> Self { Self(AtomicBool::new(false)) }

    /// Publishes every prior write before the flag becomes visible.
    pub fn raise(&self) {
        fence(Ordering::SeqCst);
        self.0.store(true, Ordering::Release);
    }

    /// The flag is never lowered on the device; only a reset clears it.
    #[cfg(test)]
    pub fn lower(&self) { self.0.store(false, Ordering::Release); }

    /// Inlined into the RAM resident update hold loop.
    #[inline(always)]
    pub fn is_active(&self) -> bool { self.0.load(Ordering::Acquire) }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Format)]
pub enum HandoffState {
    Normal,
    Preparing,
    Active,
    Exiting,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Format)]
pub struct HandoffConfig {
    /// Time given to the command ACK to leave the transmit FIFO.
    pub ack_flush_delay: Milliseconds,
    /// Time for the other core to observe the flag.
    pub flag_settle_delay: Milliseconds,
    /// Silence that marks the end of the peer's stream on exit.
    pub quiet_gap: Milliseconds,
    /// Upper bound on the exit drain.
    pub exit_drain_window: Milliseconds,
}

impl HandoffConfig {
    pub const DEFAULT: Self = Self {
        ack_flush_delay: Milliseconds(50),
        flag_settle_delay: Milliseconds(100),
        quiet_gap: Milliseconds(200),
        exit_drain_window: Milliseconds(5000),
    };
}

impl Default for HandoffConfig {
    fn default() -> Self { Self::DEFAULT }
}

pub struct Handoff {
    state: HandoffState,
    config: HandoffConfig,
}

impl Handoff {
    pub fn new(config: HandoffConfig) -> Self { Self { state: HandoffState::Normal, config } }

    pub fn state(&self) -> HandoffState { self.state }

    pub fn config(&self) -> &HandoffConfig { &self.config }

    /// Moves the link out of the way of the bootloader. Any byte that
    /// arrives before the flag is visible is drained twice over: once
    /// before the flip, and once after the other core had time to see it.
    pub fn prepare<S: Serial, C: Now, W: Watchdog>(&mut self, link: &mut Link<S, C>, watchdog: &mut W) {
        self.state = HandoffState::Preparing;

        let early = serial::drain(link.serial_mut());
        link.reset_state();
        fence(Ordering::SeqCst);
        link.flag().raise();

        time::spin(link.clock(), self.config.flag_settle_delay, || watchdog.feed());
        let late = serial::drain(link.serial_mut());

        info!("Bootloader active ({=usize} bytes drained before, {=usize} after)", early, late);
        self.state = HandoffState::Active;
    }

    /// Abandons a failed session. There is no way back to normal
    /// operation: the line is drained and the watchdog resets the device.
    pub fn exit<S: Serial, C: Now, W: Watchdog>(&mut self, link: &mut Link<S, C>, watchdog: &mut W) -> ! {
        self.state = HandoffState::Exiting;
        let HandoffConfig { quiet_gap, exit_drain_window, .. } = self.config;
        let (serial, clock) = link.split();
        let discarded = drain_until_quiet(serial, clock, watchdog, quiet_gap, exit_drain_window);
        warn!("Bootloader exiting, {=usize} trailing bytes discarded", discarded);
        watchdog.trigger()
    }
}

/// Discards incoming bytes until the line has been silent for
/// `quiet_gap`, or until `window` has elapsed, whichever comes first.
pub fn drain_until_quiet<S, C, W>(
    serial: &mut S,
    clock: &C,
    watchdog: &mut W,
    quiet_gap: Milliseconds,
    window: Milliseconds,
) -> usize
where
    S: Read + ?Sized,
    C: Now,
    W: Watchdog,
{
    let start = clock.now();
    let mut last_activity = start;
    let mut discarded = 0usize;
    loop {
        watchdog.feed();
        let now = clock.now();
        match serial.read() {
            Ok(_) | Err(nb::Error::Other(_)) => {
                discarded += 1;
                last_activity = now;
            }
            Err(nb::Error::WouldBlock) if now - last_activity >= quiet_gap => return discarded,
            Err(nb::Error::WouldBlock) => {}
        }
        if now - start >= window {
            return discarded;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        devices::link::LinkConfig,
        hal::doubles::{serial::FakeUart, system::FakeWatchdog, time::MockClock},
    };
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn flag_is_observed_after_raise_and_lower() {
        let flag = BootloaderFlag::new();
        assert!(!flag.is_active());
        flag.raise();
        assert!(flag.is_active());
        flag.lower();
        assert!(!flag.is_active());
    }

    #[test]
    fn preparation_drains_before_and_after_raising_the_flag() {
        // Given
        let flag = BootloaderFlag::new();
        let mut link = Link::new(FakeUart::new(), MockClock::with_step(1), &flag, LinkConfig::DEFAULT);
        let mut watchdog = FakeWatchdog::default();
        let mut handoff = Handoff::new(HandoffConfig::DEFAULT);
        link.serial_mut().queue(&[0xAA, 0x10, 0x02]);
        link.serial_mut().queue_burst(&[0x55, 0xAA, 0x00]);

        // When
        handoff.prepare(&mut link, &mut watchdog);

        // Then
        assert!(flag.is_active());
        assert_eq!(HandoffState::Active, handoff.state());
        assert!(link.serial_mut().to_receive.is_empty());
        assert_eq!(0, link.serial_mut().pending_bursts());
        assert!(watchdog.feeds > 0);
    }

    #[test]
    fn settle_delay_is_honoured() {
        // Given
        let flag = BootloaderFlag::new();
        let clock = MockClock::with_step(1);
        let mut link = Link::new(FakeUart::new(), clock.clone(), &flag, LinkConfig::DEFAULT);
        let mut handoff = Handoff::new(HandoffConfig::DEFAULT);

        // When
        handoff.prepare(&mut link, &mut FakeWatchdog::default());

        // Then
        assert!(clock.elapsed() >= HandoffConfig::DEFAULT.flag_settle_delay);
    }

    #[test]
    fn draining_stops_once_the_line_goes_quiet() {
        // Given
        let mut uart = FakeUart::new();
        uart.queue(&[1, 2, 3]);
        let clock = MockClock::with_step(1);
        let mut watchdog = FakeWatchdog::default();

        // When
        let discarded = drain_until_quiet(&mut uart, &clock, &mut watchdog, Milliseconds(200), Milliseconds(5000));

        // Then
        assert_eq!(3, discarded);
        assert!(clock.elapsed() < Milliseconds(5000));
        assert!(clock.elapsed() >= Milliseconds(200));
    }

    #[test]
    fn draining_is_bounded_by_the_window() {
        // Given
        struct Chatty;
        impl Read for Chatty {
            type Error = crate::hal::doubles::error::FakeError;
            fn read(&mut self) -> nb::Result<u8, Self::Error> { Ok(0x55) }
        }
        let clock = MockClock::with_step(1);

        // When
        drain_until_quiet(&mut Chatty, &clock, &mut FakeWatchdog::default(), Milliseconds(200), Milliseconds(5000));

        // Then
        assert!(clock.elapsed() >= Milliseconds(5000));
        assert!(clock.elapsed() < Milliseconds(5100));
    }

    #[test]
    fn exit_ends_in_a_watchdog_reset() {
        // Given
        let flag = BootloaderFlag::new();
        let mut link = Link::new(FakeUart::new(), MockClock::with_step(1), &flag, LinkConfig::DEFAULT);
        let mut watchdog = FakeWatchdog::default();
        let mut handoff = Handoff::new(HandoffConfig::DEFAULT);
        handoff.prepare(&mut link, &mut watchdog);
        link.serial_mut().queue(&[0x55, 0xAA, 0x01]);

        // When
        let outcome = catch_unwind(AssertUnwindSafe(|| handoff.exit(&mut link, &mut watchdog)));

        // Then
        assert_eq!("watchdog reset", *outcome.unwrap_err().downcast::<&str>().unwrap());
        assert_eq!(HandoffState::Exiting, handoff.state());
        assert!(link.serial_mut().to_receive.is_empty());
    }
}
