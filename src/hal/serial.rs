//! Non-blocking UART interface.
//!
//! Both halves follow the `nb` convention: `WouldBlock` means the
//! hardware FIFO is empty (read) or full (write), never a failure.
use crate::hal::time::{Milliseconds, Now};
use nb;

/// UART read half
pub trait Read {
    type Error: Copy + Clone + core::fmt::Debug;

    /// Reads a single byte
    fn read(&mut self) -> nb::Result<u8, Self::Error>;
}

/// UART write half
pub trait Write {
    type Error: Copy + Clone + core::fmt::Debug;

    /// Writes a single byte
    fn write(&mut self, byte: u8) -> nb::Result<(), Self::Error>;
}

/// Outcome of a bounded transmission.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transmission<E> {
    Complete,
    TimedOut { written: usize },
    Failed(E),
}

/// Pushes `bytes` while the transmit FIFO has room, giving up once
/// `timeout` has elapsed without the whole slice going out.
pub fn write_with_timeout<S, C>(
    serial: &mut S,
    clock: &C,
    bytes: &[u8],
    timeout: Milliseconds,
) -> Transmission<S::Error>
where
    S: Write + ?Sized,
    C: Now,
{
    let start = clock.now();
    let mut written = 0usize;
    while written < bytes.len() {
        match serial.write(bytes[written]) {
            Ok(()) => written += 1,
            Err(nb::Error::WouldBlock) => {
                if clock.now() - start > timeout {
                    return Transmission::TimedOut { written };
                }
            }
            Err(nb::Error::Other(e)) => return Transmission::Failed(e),
        }
    }
    Transmission::Complete
}

/// Discards every byte currently queued in the receive FIFO,
/// returning how many were thrown away.
pub fn drain<S: Read + ?Sized>(serial: &mut S) -> usize {
    let mut discarded = 0usize;
    loop {
        match serial.read() {
            Ok(_) => discarded += 1,
            Err(nb::Error::WouldBlock) => return discarded,
            // A framing or overrun error still consumes the FIFO entry.
            Err(nb::Error::Other(_)) => discarded += 1,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hal::doubles::{serial::FakeUart, time::MockClock};

    #[test]
    fn bounded_write_sends_everything_to_a_healthy_peer() {
        // Given
        let mut uart = FakeUart::new();
        let clock = MockClock::new();

        // When
        let outcome = write_with_timeout(&mut uart, &clock, &[1, 2, 3], Milliseconds(10));

        // Then
        assert_eq!(Transmission::Complete, outcome);
        assert_eq!(vec![1, 2, 3], uart.sent);
    }

    #[test]
    fn bounded_write_gives_up_on_a_stalled_peer() {
        // Given
        let mut uart = FakeUart::new();
        uart.stall_after(2);
        let clock = MockClock::with_step(1);

        // When
        let outcome = write_with_timeout(&mut uart, &clock, &[1, 2, 3, 4], Milliseconds(10));

        // Then
        assert_eq!(Transmission::TimedOut { written: 2 }, outcome);
        assert_eq!(vec![1, 2], uart.sent);
    }

    #[test]
    fn draining_empties_the_receive_queue() {
        // Given
        let mut uart = FakeUart::new();
        uart.queue(&[0xAA, 0x10, 0x02]);

        // When
        let discarded = drain(&mut uart);

        // Then
        assert_eq!(3, discarded);
        assert!(uart.read().is_err());
    }
}
