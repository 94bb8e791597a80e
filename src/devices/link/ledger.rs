//! Commands awaiting acknowledgement.
use crate::{hal::time::Instant, utilities::frame::Packet};
use defmt::Format;

pub const MAX_PENDING_COMMANDS: usize = 8;

/// A transmitted command that the peer has not acknowledged yet.
#[derive(Copy, Clone, Debug)]
pub struct PendingCommand<I: Instant> {
    pub packet: Packet,
    pub retry_count: u8,
    pub sent_at: I,
}

/// Fixed capacity slot table. An empty slot is an inactive entry.
pub struct Ledger<I: Instant> {
    slots: [Option<PendingCommand<I>>; MAX_PENDING_COMMANDS],
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Format)]
pub struct LedgerFull;

impl<I: Instant> Default for Ledger<I> {
    fn default() -> Self { Self::new() }
}

impl<I: Instant> Ledger<I> {
    pub fn new() -> Self { Self { slots: [None; MAX_PENDING_COMMANDS] } }

    /// Tracks `packet`. An active entry with the same sequence number
    /// is replaced, so there is never more than one per sequence.
    pub fn track(&mut self, packet: Packet, sent_at: I) -> Result<(), LedgerFull> {
        let entry = PendingCommand { packet, retry_count: 0, sent_at };
        let slot = match self.position(packet.sequence) {
            Some(index) => &mut self.slots[index],
            None => self.slots.iter_mut().find(|s| s.is_none()).ok_or(LedgerFull)?,
        };
        *slot = Some(entry);
        Ok(())
    }

    /// Frees the entry for `sequence`, returning it if there was one.
    pub fn release(&mut self, sequence: u8) -> Option<PendingCommand<I>> {
        self.position(sequence).and_then(|index| self.slots[index].take())
    }

    pub fn active(&self) -> usize { self.slots.iter().filter(|s| s.is_some()).count() }

    pub fn is_empty(&self) -> bool { self.active() == 0 }

    pub fn get(&self, sequence: u8) -> Option<&PendingCommand<I>> {
        self.slots.iter().flatten().find(|entry| entry.packet.sequence == sequence)
    }

    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut Option<PendingCommand<I>>> {
        self.slots.iter_mut()
    }

    pub fn clear(&mut self) { self.slots = [None; MAX_PENDING_COMMANDS]; }

    fn position(&self, sequence: u8) -> Option<usize> {
        self.slots.iter().position(|slot| matches!(slot, Some(e) if e.packet.sequence == sequence))
    }
}
