//! Byte at a time receive state machine.
use crate::{
    hal::time::{Instant, Milliseconds},
    utilities::frame::{self, FrameError, Packet, CRC_SIZE, HEADER_SIZE, MAX_FRAME_SIZE, MAX_PAYLOAD, SYNC},
};
use defmt::Format;

/// Each state is named after the field it consumes next.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Format)]
pub enum State {
    WaitSync,
    GotType,
    GotLength,
    GotSeq,
    ReadingPayload,
    ReadingCrc,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Format)]
pub enum Discard {
    LengthTooLarge(u8),
    CrcMismatch { received: u16, calculated: u16 },
    /// The assembled frame failed to decode for a reason other than
    /// its length or checksum.
    Malformed(FrameError),
    Overflow,
}

impl From<FrameError> for Discard {
    fn from(error: FrameError) -> Self {
        match error {
            FrameError::LengthTooLarge(length) => Discard::LengthTooLarge(length),
            FrameError::CrcMismatch { received, calculated } => Discard::CrcMismatch { received, calculated },
            FrameError::Incomplete | FrameError::MissingSync => Discard::Malformed(error),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Pending,
    Complete(Packet),
    Discarded(Discard),
}

pub struct Parser<I: Instant> {
    state: State,
    buffer: [u8; MAX_FRAME_SIZE],
    index: usize,
    length: usize,
    last_byte_at: Option<I>,
}

impl<I: Instant> Default for Parser<I> {
    fn default() -> Self { Self::new() }
}

impl<I: Instant> Parser<I> {
    pub fn new() -> Self {
        Self { state: State::WaitSync, buffer: [0u8; MAX_FRAME_SIZE], index: 0, length: 0, last_byte_at: None }
    }

    pub fn state(&self) -> State { self.state }

    pub fn is_idle(&self) -> bool { self.state == State::WaitSync }

    /// Whether a partial frame has been sitting for longer than `timeout`.
    pub fn timed_out(&self, now: I, timeout: Milliseconds) -> bool {
        match self.last_byte_at {
            Some(last) if !self.is_idle() => now - last > timeout,
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.state = State::WaitSync;
        self.buffer = [0u8; MAX_FRAME_SIZE];
        self.index = 0;
        self.length = 0;
        self.last_byte_at = None;
    }

    /// Advances the state machine by exactly one byte.
    pub fn feed(&mut self, byte: u8, now: I) -> Outcome {
        self.last_byte_at = Some(now);

        if self.state == State::WaitSync {
            if byte == SYNC {
                self.buffer[0] = byte;
                self.index = 1;
                self.state = State::GotType;
            }
            return Outcome::Pending;
        }

        if self.index >= MAX_FRAME_SIZE {
            self.reset();
            return Outcome::Discarded(Discard::Overflow);
        }
        self.buffer[self.index] = byte;
        self.index += 1;

        match self.state {
            State::GotType => self.state = State::GotLength,
            State::GotLength => {
                if byte as usize > MAX_PAYLOAD {
                    self.reset();
                    return Outcome::Discarded(Discard::LengthTooLarge(byte));
                }
                self.length = byte as usize;
                self.state = State::GotSeq;
            }
            State::GotSeq => {
                self.state = if self.length > 0 { State::ReadingPayload } else { State::ReadingCrc };
            }
            State::ReadingPayload => {
                if self.index >= HEADER_SIZE + self.length {
                    self.state = State::ReadingCrc;
                }
            }
            State::ReadingCrc => {
                if self.index >= HEADER_SIZE + self.length + CRC_SIZE {
                    let outcome = match frame::decode(&self.buffer[..self.index]) {
                        Ok((packet, _)) => Outcome::Complete(packet),
                        Err(error) => Outcome::Discarded(error.into()),
                    };
                    self.reset();
                    return outcome;
                }
            }
            State::WaitSync => {}
        }
        Outcome::Pending
    }
}
