//! Signals shared between the control core and the communication core.
//!
//! Every primitive here sticks to plain atomic loads and stores, which
//! are all the Cortex-M0+ offers.
use super::handoff::BootloaderFlag;
use crate::hal::{
    system::System,
    time::{Instant, Milliseconds, Now},
    watchdog::Watchdog,
};
use core::{
    cell::UnsafeCell,
    hint,
    ptr,
    sync::atomic::{fence, AtomicBool, AtomicU32, AtomicUsize, Ordering},
};
use defmt::{warn, Format};

/// How long the control core keeps feeding the watchdog without hearing
/// from the communication core.
pub const PEER_TIMEOUT: Milliseconds = Milliseconds(1000);

/// Raised by the communication core on every loop iteration.
#[derive(Debug, Default)]
pub struct Heartbeat(AtomicBool);

impl Heartbeat {
    pub const fn new() -> Self { Self(AtomicBool::new(false)) }

    pub fn beat(&self) { self.0.store(true, Ordering::Release); }

    /// Observes and clears the heartbeat.
    pub fn take(&self) -> bool {
        let seen = self.0.load(Ordering::Acquire);
        if seen {
            self.0.store(false, Ordering::Relaxed);
        }
        seen
    }
}

/// A published value together with its publication number.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Format)]
pub struct Snapshot<T> {
    /// Zero until the first publication.
    pub generation: u32,
    pub value: T,
}

/// Single writer, single reader double buffer.
///
/// The writer fills the inactive slot and then flips the active index.
/// The sequence counter is odd while a publication is under way, and a
/// reader that sees it move during its copy tries again.
pub struct StatusBuffer<T: Copy> {
    slots: [UnsafeCell<T>; 2],
    active: AtomicUsize,
    sequence: AtomicU32,
}

// Writes only ever touch the slot the reader was not pointed at when the
// sequence was last even, and torn reads are discarded.
unsafe impl<T: Copy + Send> Sync for StatusBuffer<T> {}

impl<T: Copy> StatusBuffer<T> {
    pub const fn new(initial: T) -> Self {
        Self {
            slots: [UnsafeCell::new(initial), UnsafeCell::new(initial)],
            active: AtomicUsize::new(0),
            sequence: AtomicU32::new(0),
        }
    }

    /// Must only be called from one core.
    pub fn publish(&self, value: T) {
        let sequence = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(sequence.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        let next = self.active.load(Ordering::Relaxed) ^ 1;
        // Safety: the reader only copies from `next` if it loaded the
        // active index before the previous flip, in which case the
        // sequence check in `read` makes it retry.
        unsafe { ptr::write_volatile(self.slots[next].get(), value) };
        self.active.store(next, Ordering::Release);
        self.sequence.store(sequence.wrapping_add(2), Ordering::Release);
    }

    pub fn read(&self) -> Snapshot<T> {
        loop {
            let before = self.sequence.load(Ordering::Acquire);
            if before % 2 == 1 {
                hint::spin_loop();
                continue;
            }
            let index = self.active.load(Ordering::Acquire);
            // Safety: see `publish`. A copy raced by the writer is thrown away.
            let value = unsafe { ptr::read_volatile(self.slots[index].get()) };
            fence(Ordering::Acquire);
            if self.sequence.load(Ordering::Relaxed) == before {
                return Snapshot { generation: before / 2, value };
            }
        }
    }

    pub fn generation(&self) -> u32 { self.sequence.load(Ordering::Acquire) / 2 }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Format)]
pub enum Verdict {
    Fed,
    /// The peer core went silent. The watchdog is left to expire.
    Starved,
    /// A firmware update owns the device. The caller must enter
    /// [`hold_during_update`] before the flag settle delay runs out.
    Updating,
}

/// Watchdog policy for the control core.
pub struct Supervisor<I> {
    peer_timeout: Milliseconds,
    last_beat: I,
    starving: bool,
}

impl<I: Instant> Supervisor<I> {
    /// `now` counts as the first heartbeat.
    pub fn new(now: I, peer_timeout: Milliseconds) -> Self {
        Self { peer_timeout, last_beat: now, starving: false }
    }

    /// Called once per control loop iteration.
    pub fn supervise<C, W>(&mut self, clock: &C, flag: &BootloaderFlag, heartbeat: &Heartbeat, watchdog: &mut W) -> Verdict
    where
        C: Now<I = I>,
        W: Watchdog,
    {
        let now = clock.now();
        if flag.is_active() {
            self.last_beat = now;
            watchdog.feed();
            return Verdict::Updating;
        }
        if heartbeat.take() {
            self.last_beat = now;
        }

        if now - self.last_beat <= self.peer_timeout {
            self.starving = false;
            watchdog.feed();
            Verdict::Fed
        } else {
            if !self.starving {
                warn!("Communication core silent for over {=u32} ms", self.peer_timeout.0);
                self.starving = true;
            }
            Verdict::Starved
        }
    }
}

/// Parks the control core for the rest of a firmware update.
///
/// Flash is erased and programmed with XIP suspended, so nothing on this
/// core may fetch from flash until the device resets. Interrupt handlers
/// are masked, and the loop only feeds the watchdog, both of which are
/// inlined into this RAM resident function.
#[cfg_attr(target_arch = "arm", link_section = ".data.ram_func")]
pub fn hold_during_update<W: Watchdog, Y: System>(flag: &BootloaderFlag, watchdog: &mut W, system: &mut Y) {
    system.disable_interrupts();
    while flag.is_active() {
        watchdog.feed();
    }
}
