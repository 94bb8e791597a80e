use super::error::FakeError;
use crate::hal::serial;
use std::collections::VecDeque;

/// Scripted UART.
///
/// Bytes queued with [`FakeUart::queue`] are readable immediately.
/// Bytes queued with [`FakeUart::queue_burst`] only become readable
/// after the receive queue has been observed empty, simulating data
/// that arrives while the reader is busy elsewhere.
#[derive(Debug, Default)]
pub struct FakeUart {
    /// Mock values to be received
    pub to_receive: VecDeque<u8>,
    /// Mock values sent
    pub sent: Vec<u8>,
    bursts: VecDeque<Vec<u8>>,
    stall_after: Option<usize>,
    read_attempts: usize,
}

impl FakeUart {
    pub fn new() -> Self { Self::default() }

    pub fn queue(&mut self, bytes: &[u8]) { self.to_receive.extend(bytes.iter().copied()); }

    pub fn queue_burst(&mut self, bytes: &[u8]) { self.bursts.push_back(bytes.to_vec()); }

    /// Refuses writes once `count` bytes in total have been sent.
    pub fn stall_after(&mut self, count: usize) { self.stall_after = Some(count); }

    /// Refuses all further writes.
    pub fn stall(&mut self) { self.stall_after = Some(self.sent.len()); }

    pub fn unstall(&mut self) { self.stall_after = None; }

    pub fn take_sent(&mut self) -> Vec<u8> { std::mem::take(&mut self.sent) }

    pub fn pending_bursts(&self) -> usize { self.bursts.len() }

    pub fn read_attempts(&self) -> usize { self.read_attempts }
}

impl serial::Read for FakeUart {
    type Error = FakeError;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        self.read_attempts += 1;
        match self.to_receive.pop_front() {
            Some(byte) => Ok(byte),
            None => {
                if let Some(burst) = self.bursts.pop_front() {
                    self.to_receive.extend(burst);
                }
                Err(nb::Error::WouldBlock)
            }
        }
    }
}

impl serial::Write for FakeUart {
    type Error = FakeError;

    fn write(&mut self, byte: u8) -> nb::Result<(), Self::Error> {
        match self.stall_after {
            Some(limit) if self.sent.len() >= limit => Err(nb::Error::WouldBlock),
            _ => {
                self.sent.push(byte);
                Ok(())
            }
        }
    }
}
