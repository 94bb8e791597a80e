//! Error types and methods for the controller link.

use defmt::Format;
use ufmt::{uWrite, uwrite};

/// Top level error type. Unlike the driver specific errors, this
/// error carries a textual description of the problem, as it is
/// meant to be reported to the companion MCU inside a debug message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Format)]
pub enum Error {
    /// Error caused by a low level peripheral driver
    DriverError(&'static str),
    /// Error caused by a faulty configuration
    ConfigurationError(&'static str),
    /// Error caused by a high level device driver
    DeviceError(&'static str),
    PayloadTooLarge,
    Backpressure,
    LinkStalled,
    TransferTimeout,
    InvalidMagic,
    InvalidChunkSize,
    StagingOverflow,
    ChunkOutOfOrder,
    ChunkChecksum,
    EmptyImage,
    ImageCrcMismatch,
    InvalidEntryPoint,
    FlashWrite,
    FlashErase,
    FlashVerify,
}

/// Driver errors implement this to join the top level error.
pub trait Convertible {
    fn into(self) -> Error;
}

impl<T: Convertible> From<T> for Error {
    fn from(t: T) -> Self { t.into() }
}

/// Single byte codes sent after the `0xFF` abort marker of the
/// firmware transfer channel.
pub mod transfer_code {
    pub const SUCCESS: u8 = 0x00;
    pub const TIMEOUT: u8 = 0x01;
    pub const INVALID_MAGIC: u8 = 0x02;
    pub const INVALID_SIZE: u8 = 0x03;
    pub const INVALID_CHUNK: u8 = 0x04;
    pub const CHECKSUM: u8 = 0x05;
    pub const FLASH_WRITE: u8 = 0x06;
    pub const FLASH_ERASE: u8 = 0x07;
    pub const UNKNOWN: u8 = 0x08;
    pub const INVALID_IMAGE: u8 = 0x09;
}

impl Error {
    /// Code reported to the peer when this error aborts a firmware transfer.
    pub fn transfer_code(&self) -> u8 {
        use transfer_code::*;
        match self {
            Error::TransferTimeout | Error::LinkStalled => TIMEOUT,
            Error::InvalidMagic => INVALID_MAGIC,
            Error::InvalidChunkSize | Error::StagingOverflow | Error::EmptyImage => INVALID_SIZE,
            Error::ChunkOutOfOrder => INVALID_CHUNK,
            Error::ChunkChecksum => CHECKSUM,
            Error::FlashWrite | Error::FlashVerify => FLASH_WRITE,
            Error::FlashErase => FLASH_ERASE,
            Error::ImageCrcMismatch | Error::InvalidEntryPoint => INVALID_IMAGE,
            _ => UNKNOWN,
        }
    }

    /// Writes a human readable description to an abstract sink.
    pub fn report<W: uWrite>(&self, sink: &mut W) -> Result<(), W::Error> {
        match self {
            Error::DriverError(text) => uwrite!(sink, "[Driver Error] -> {}", *text),
            Error::ConfigurationError(text) => uwrite!(sink, "[Configuration Error] -> {}", *text),
            Error::DeviceError(text) => uwrite!(sink, "[Device Error] -> {}", *text),
            Error::PayloadTooLarge => uwrite!(sink, "[Link Error] -> Payload too large"),
            Error::Backpressure => uwrite!(sink, "[Link Error] -> Too many pending commands"),
            Error::LinkStalled => uwrite!(sink, "[Link Error] -> UART transmit stalled"),
            Error::TransferTimeout => uwrite!(sink, "[Transfer Error] -> Timeout"),
            Error::InvalidMagic => uwrite!(sink, "[Transfer Error] -> Invalid magic bytes"),
            Error::InvalidChunkSize => uwrite!(sink, "[Transfer Error] -> Invalid chunk size"),
            Error::StagingOverflow => uwrite!(sink, "[Transfer Error] -> Image too big"),
            Error::ChunkOutOfOrder => uwrite!(sink, "[Transfer Error] -> Out of order chunk"),
            Error::ChunkChecksum => uwrite!(sink, "[Transfer Error] -> Chunk checksum mismatch"),
            Error::EmptyImage => uwrite!(sink, "[Transfer Error] -> No data received"),
            Error::ImageCrcMismatch => uwrite!(sink, "[Transfer Error] -> Staged image CRC mismatch"),
            Error::InvalidEntryPoint => uwrite!(sink, "[Transfer Error] -> Invalid entry point"),
            Error::FlashWrite => uwrite!(sink, "[Flash Error] -> Write failed"),
            Error::FlashErase => uwrite!(sink, "[Flash Error] -> Erase failed"),
            Error::FlashVerify => uwrite!(sink, "[Flash Error] -> Verification failed"),
        }
    }
}
