//! Chunked firmware transfer over the raw UART.
//!
//! ```text
//! peer                                device
//!  |                  <- B0 07 AC 4B     | ready
//!  | 55 AA idx:u32 len:u16 data xor ->   |
//!  |                  <- AA              | chunk accepted
//!  | ...                                 |
//!  | AA 55 [00]  or  55 AA FFFFFFFF ..-> | end of image
//!  |                  <- AA 55 00        | staged and verified
//!  |                  <- FF code         | on any failure
//! ```
use super::{
    image::{self, StagedImage},
    staging::Stager,
    Layout, TransferConfig,
};
use crate::{
    devices::traits::Serial,
    error::{transfer_code, Error},
    hal::{
        rom::RomFlash,
        serial::{self, Read, Transmission},
        time::{Milliseconds, Now},
        watchdog::Watchdog,
    },
};
use defmt::{debug, info, warn, Format};
use nom::{
    number::complete::{le_u16, le_u32},
    IResult,
};

pub const CHUNK_MAGIC: [u8; 2] = [0x55, 0xAA];
pub const END_MAGIC: [u8; 2] = [0xAA, 0x55];
/// Chunk index that marks a framed end of transfer.
pub const END_INDEX: u32 = 0xFFFF_FFFF;
pub const READY: [u8; 4] = [0xB0, 0x07, 0xAC, 0x4B];
pub const CHUNK_ACK: u8 = 0xAA;
pub const ABORT: u8 = 0xFF;
pub const COMPLETE: [u8; 3] = [0xAA, 0x55, transfer_code::SUCCESS];
pub const MAX_CHUNK_SIZE: usize = 256;

/// Progress of the current transfer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Format)]
pub struct Session {
    pub active: bool,
    pub received_size: usize,
    pub chunk_count: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Format)]
pub struct ChunkHeader {
    pub index: u32,
    pub length: u16,
}

impl ChunkHeader {
    pub const SIZE: usize = 6;

    fn parse(input: &[u8]) -> Result<Self, Error> {
        header(input)
            .map(|(_, header)| header)
            .map_err(|_| Error::DeviceError("Truncated chunk header"))
    }
}

fn header(input: &[u8]) -> IResult<&[u8], ChunkHeader> {
    let (input, index) = le_u32(input)?;
    let (input, length) = le_u16(input)?;
    Ok((input, ChunkHeader { index, length }))
}

pub fn xor_checksum(bytes: &[u8]) -> u8 { bytes.iter().fold(0, |sum, byte| sum ^ byte) }

/// Bounded access to the raw UART while the transfer runs.
struct Channel<'c, S: Serial, C: Now, W: Watchdog> {
    serial: &'c mut S,
    clock: &'c C,
    watchdog: &'c mut W,
    config: TransferConfig,
    started: C::I,
}

impl<'c, S: Serial, C: Now, W: Watchdog> Channel<'c, S, C, W> {
    fn session_expired(&self) -> bool { self.clock.now() - self.started > self.config.transfer_timeout }

    /// Fills `buffer`, failing if it takes longer than the chunk timeout
    /// or the session runs out of time.
    fn read_exact(&mut self, buffer: &mut [u8]) -> Result<(), Error> {
        let start = self.clock.now();
        for slot in buffer.iter_mut() {
            *slot = loop {
                self.watchdog.feed();
                match self.serial.read() {
                    Ok(byte) => break byte,
                    Err(nb::Error::Other(e)) => return Err(Error::from(e)),
                    Err(nb::Error::WouldBlock) => {}
                }
                let now = self.clock.now();
                if now - start > self.config.chunk_timeout || self.session_expired() {
                    return Err(Error::TransferTimeout);
                }
            };
        }
        Ok(())
    }

    /// Waits up to `window` for a single byte.
    fn peek(&mut self, window: Milliseconds) -> Option<u8> {
        let start = self.clock.now();
        loop {
            self.watchdog.feed();
            if let Ok(byte) = self.serial.read() {
                return Some(byte);
            }
            if self.clock.now() - start > window {
                return None;
            }
        }
    }

    fn skip(&mut self, count: usize) -> Result<(), Error> {
        let mut sink = [0u8; 1];
        (0..count).try_for_each(|_| self.read_exact(&mut sink))
    }

    fn send(&mut self, bytes: &[u8]) {
        let outcome = serial::write_with_timeout(&mut *self.serial, self.clock, bytes, self.config.write_timeout);
        if !matches!(outcome, Transmission::Complete) {
            warn!("Transfer response not fully sent");
        }
    }
}

enum Marker {
    Chunk(ChunkHeader),
    End,
}

impl Session {
    /// Runs a whole transfer: announces readiness, stages every chunk,
    /// validates the result and reports the outcome to the peer.
    pub fn receive<S, C, W, R>(
        &mut self,
        serial: &mut S,
        clock: &C,
        watchdog: &mut W,
        rom: &mut R,
        layout: &Layout,
        config: &TransferConfig,
    ) -> Result<StagedImage, Error>
    where
        S: Serial,
        C: Now,
        W: Watchdog,
        R: RomFlash,
    {
        *self = Session { active: true, ..Session::default() };
        let mut channel = Channel { serial, clock, watchdog, config: *config, started: clock.now() };
        channel.send(&READY);
        info!("Firmware transfer ready");

        let result = Stager::new(rom, layout)
            .and_then(|mut stager| {
                self.stream(&mut channel, &mut stager)?;
                stager.finish(&mut *channel.watchdog)
            })
            .and_then(|staged| image::validate(rom, layout, staged));
        self.active = false;

        match result {
            Ok(image) => {
                info!("Transfer complete, {=u32} chunks", self.chunk_count);
                channel.send(&COMPLETE);
                Ok(image)
            }
            Err(error) => {
                warn!("Transfer aborted after {=u32} chunks: {}", self.chunk_count, error);
                channel.send(&[ABORT, error.transfer_code()]);
                Err(error)
            }
        }
    }

    fn stream<S: Serial, C: Now, W: Watchdog, R: RomFlash>(
        &mut self,
        channel: &mut Channel<S, C, W>,
        stager: &mut Stager<R>,
    ) -> Result<(), Error> {
        let mut data = [0u8; MAX_CHUNK_SIZE + 1];
        loop {
            if channel.session_expired() {
                return Err(Error::TransferTimeout);
            }

            let header = match Self::next_marker(channel)? {
                Marker::End => return Ok(()),
                Marker::Chunk(header) => header,
            };

            let length = header.length as usize;
            if length == 0 || length > MAX_CHUNK_SIZE {
                return Err(Error::InvalidChunkSize);
            }
            if header.index != self.chunk_count {
                warn!("Expected chunk {=u32}, got {=u32}", self.chunk_count, header.index);
                return Err(Error::ChunkOutOfOrder);
            }
            if length > stager.remaining() {
                return Err(Error::StagingOverflow);
            }

            channel.read_exact(&mut data[..=length])?;
            let (payload, checksum) = data[..=length].split_at(length);
            if xor_checksum(payload) != checksum[0] {
                return Err(Error::ChunkChecksum);
            }

            stager.append(payload, &mut *channel.watchdog)?;
            self.chunk_count += 1;
            self.received_size += length;
            debug!("Chunk {=u32} staged ({=usize} bytes total)", header.index, self.received_size);
            channel.send(&[CHUNK_ACK]);
        }
    }

    fn next_marker<S: Serial, C: Now, W: Watchdog>(channel: &mut Channel<S, C, W>) -> Result<Marker, Error> {
        let mut magic = [0u8; 2];
        channel.read_exact(&mut magic)?;
        match magic {
            CHUNK_MAGIC => {}
            // A bare end marker is only trusted if the line goes quiet or
            // carries the trailing status byte; anything else is noise.
            END_MAGIC => {
                return match channel.peek(channel.config.end_lookahead) {
                    None | Some(transfer_code::SUCCESS) => Ok(Marker::End),
                    Some(_) => Err(Error::InvalidMagic),
                };
            }
            _ => return Err(Error::InvalidMagic),
        }

        let mut bytes = [0u8; ChunkHeader::SIZE];
        channel.read_exact(&mut bytes)?;
        let header = ChunkHeader::parse(&bytes)?;
        if header.index == END_INDEX {
            channel.skip(header.length as usize + 1)?;
            return Ok(Marker::End);
        }
        Ok(Marker::Chunk(header))
    }
}
