//! PL011 UART.
//!
//! Pin muxing, the peripheral clock and the peripheral reset are left
//! to the application; this driver only programs the UART itself.
use super::{read_register, write_register};
use crate::{
    error::{Convertible, Error as BrewlinkError},
    hal::serial,
    utilities::bitwise::BitFlags,
};

const DR: usize = 0x000;
const FR: usize = 0x018;
const IBRD: usize = 0x024;
const FBRD: usize = 0x028;
const LCR_H: usize = 0x02C;
const CR: usize = 0x030;

const FR_RXFE: u8 = 4;
const FR_TXFF: u8 = 5;

const DR_FE: u8 = 8;
const DR_PE: u8 = 9;
const DR_BE: u8 = 10;
const DR_OE: u8 = 11;

const LCR_H_FEN: u32 = 1 << 4;
const LCR_H_WLEN_8: u32 = 0b11 << 5;
const CR_UARTEN: u32 = 1 << 0;
const CR_TXE: u32 = 1 << 8;
const CR_RXE: u32 = 1 << 9;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Instance {
    Uart0,
    Uart1,
}

impl Instance {
    fn base(self) -> usize {
        match self {
            Instance::Uart0 => 0x4003_4000,
            Instance::Uart1 => 0x4003_8000,
        }
    }
}

/// Receive errors, reported along with (and instead of) the
/// offending byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    Framing,
    Parity,
    Break,
    Overrun,
}

impl Convertible for Error {
    fn into(self) -> BrewlinkError {
        match self {
            Error::Framing => BrewlinkError::DriverError("[UART] Framing error"),
            Error::Parity => BrewlinkError::DriverError("[UART] Parity error"),
            Error::Break => BrewlinkError::DriverError("[UART] Break condition"),
            Error::Overrun => BrewlinkError::DriverError("[UART] Receive overrun"),
        }
    }
}

pub mod config {
    //! Line settings. Always 8 data bits, no parity, one stop bit.

    pub struct Config {
        pub baudrate: u32,
        /// Frequency of `clk_peri`.
        pub peripheral_clock_hz: u32,
    }

    impl Default for Config {
        fn default() -> Self { Config { baudrate: 921_600, peripheral_clock_hz: 125_000_000 } }
    }

    #[derive(Debug)]
    pub struct InvalidConfig;
}

/// Integer baud rate divisor, and fractional divisor in 1/64ths.
pub fn divisors(baudrate: u32, peripheral_clock_hz: u32) -> Result<(u32, u32), config::InvalidConfig> {
    if baudrate == 0 {
        return Err(config::InvalidConfig);
    }
    let divider = (8 * peripheral_clock_hz as u64 / baudrate as u64) as u32;
    let integer = divider >> 7;
    if integer == 0 || integer > 0xFFFF {
        return Err(config::InvalidConfig);
    }
    Ok((integer, ((divider & 0x7F) + 1) / 2))
}

pub struct Uart {
    base: usize,
}

impl Uart {
    /// # Safety
    ///
    /// The caller hands over exclusive ownership of the UART instance,
    /// which must be out of reset with its clock running.
    pub unsafe fn new(instance: Instance, config: config::Config) -> Result<Self, config::InvalidConfig> {
        let (integer, fraction) = divisors(config.baudrate, config.peripheral_clock_hz)?;
        let base = instance.base();
        write_register(base + CR, 0);
        write_register(base + IBRD, integer);
        write_register(base + FBRD, fraction);
        // A write to LCR_H latches the divisors.
        write_register(base + LCR_H, LCR_H_WLEN_8 | LCR_H_FEN);
        write_register(base + CR, CR_UARTEN | CR_TXE | CR_RXE);
        Ok(Self { base })
    }

    fn flags(&self) -> u32 {
        // NOTE(Safety) Read only status register of an owned instance.
        unsafe { read_register(self.base + FR) }
    }
}

impl serial::Read for Uart {
    type Error = Error;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        if self.flags().is_set(FR_RXFE) {
            return Err(nb::Error::WouldBlock);
        }
        // NOTE(Safety) Popping the receive FIFO of an owned instance.
        let data = unsafe { read_register(self.base + DR) };
        if data.is_set(DR_OE) {
            Err(nb::Error::Other(Error::Overrun))
        } else if data.is_set(DR_BE) {
            Err(nb::Error::Other(Error::Break))
        } else if data.is_set(DR_PE) {
            Err(nb::Error::Other(Error::Parity))
        } else if data.is_set(DR_FE) {
            Err(nb::Error::Other(Error::Framing))
        } else {
            Ok(data as u8)
        }
    }
}

impl serial::Write for Uart {
    type Error = Error;

    fn write(&mut self, byte: u8) -> nb::Result<(), Self::Error> {
        if self.flags().is_clear(FR_TXFF) {
            // NOTE(Safety) Pushing into the transmit FIFO of an owned instance.
            unsafe { write_register(self.base + DR, byte as u32) };
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn divisors_match_the_reference_values() {
        assert_eq!((67, 52), divisors(115_200, 125_000_000).unwrap());
        assert_eq!((8, 31), divisors(921_600, 125_000_000).unwrap());
    }

    #[test]
    fn unreachable_baudrates_are_refused() {
        assert!(divisors(0, 125_000_000).is_err());
        assert!(divisors(50_000_000, 125_000_000).is_err());
        assert!(divisors(100, 125_000_000).is_err());
    }
}
