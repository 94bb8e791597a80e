//! Normal protocol framing.
//!
//! ```text
//! SYNC | TYPE | LEN | SEQ | PAYLOAD[LEN] | CRC_LO | CRC_HI
//! ```
//!
//! The CRC is CRC-16/CCITT-FALSE (polynomial 0x1021, seed 0xFFFF, no
//! reflection) over every byte after the sync byte, sent little endian.

use crc::{Crc, CRC_16_IBM_3740};
use defmt::Format;
use nom::{
    bytes::streaming::{tag, take},
    number::streaming::{be_u8, le_u16},
    IResult,
};

pub const SYNC: u8 = 0xAA;
pub const MAX_PAYLOAD: usize = 32;
pub const HEADER_SIZE: usize = 4;
pub const CRC_SIZE: usize = 2;
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD + CRC_SIZE;

const SYNC_TAG: &[u8] = &[SYNC];
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// One unit of the normal protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Format)]
pub struct Packet {
    pub message_type: u8,
    pub sequence: u8,
    length: u8,
    payload: [u8; MAX_PAYLOAD],
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Format)]
pub enum FrameError {
    /// Not enough bytes for a whole frame.
    Incomplete,
    MissingSync,
    /// The length field exceeds `MAX_PAYLOAD`.
    LengthTooLarge(u8),
    CrcMismatch { received: u16, calculated: u16 },
}

/// Encoded frame, ready for transmission.
#[derive(Copy, Clone, Debug)]
pub struct Frame {
    bytes: [u8; MAX_FRAME_SIZE],
    length: usize,
}

impl Packet {
    pub fn new(message_type: u8, sequence: u8, payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::LengthTooLarge(payload.len().min(u8::MAX as usize) as u8));
        }
        let mut buffer = [0u8; MAX_PAYLOAD];
        buffer[..payload.len()].copy_from_slice(payload);
        Ok(Self { message_type, sequence, length: payload.len() as u8, payload: buffer })
    }

    pub fn payload(&self) -> &[u8] { &self.payload[..self.length as usize] }

    pub fn len(&self) -> usize { self.length as usize }

    pub fn is_empty(&self) -> bool { self.length == 0 }
}

impl Frame {
    pub fn as_bytes(&self) -> &[u8] { &self.bytes[..self.length] }
}

/// CRC-16/CCITT-FALSE over a byte slice.
pub fn crc16(bytes: &[u8]) -> u16 { CRC16.checksum(bytes) }

pub fn encode(packet: &Packet) -> Frame {
    let mut bytes = [0u8; MAX_FRAME_SIZE];
    let payload = packet.payload();
    bytes[0] = SYNC;
    bytes[1] = packet.message_type;
    bytes[2] = packet.length;
    bytes[3] = packet.sequence;
    bytes[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
    let crc_position = HEADER_SIZE + payload.len();
    let crc = crc16(&bytes[1..crc_position]);
    bytes[crc_position..crc_position + CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
    Frame { bytes, length: crc_position + CRC_SIZE }
}

/// Decodes one frame from the start of `input`, returning
/// the packet and whatever input follows it.
pub fn decode(input: &[u8]) -> Result<(Packet, &[u8]), FrameError> {
    let (rest, (message_type, length, sequence)) = header(input)?;
    if length as usize > MAX_PAYLOAD {
        return Err(FrameError::LengthTooLarge(length));
    }
    let (rest, payload) = payload(rest, length as usize)?;
    let (rest, received) = checksum(rest)?;
    let calculated = crc16(&input[1..HEADER_SIZE + length as usize]);
    if received != calculated {
        return Err(FrameError::CrcMismatch { received, calculated });
    }
    Ok((Packet::new(message_type, sequence, payload)?, rest))
}

fn header(input: &[u8]) -> IResult<&[u8], (u8, u8, u8)> {
    let (input, _) = tag(SYNC_TAG)(input)?;
    let (input, message_type) = be_u8(input)?;
    let (input, length) = be_u8(input)?;
    let (input, sequence) = be_u8(input)?;
    Ok((input, (message_type, length, sequence)))
}

fn payload(input: &[u8], length: usize) -> IResult<&[u8], &[u8]> { take(length)(input) }

fn checksum(input: &[u8]) -> IResult<&[u8], u16> { le_u16(input) }

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for FrameError {
    fn from(error: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        match error {
            nom::Err::Incomplete(_) => FrameError::Incomplete,
            _ => FrameError::MissingSync,
        }
    }
}
