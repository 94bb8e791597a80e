//! Command and telemetry link with the companion MCU.
//!
//! A single [`Link`] owns the UART, the receive parser, the ledger of
//! commands awaiting acknowledgement and the health statistics. It is
//! driven by calling [`Link::process`] from the communication loop,
//! which sweeps for expired commands, then parses whatever bytes are
//! waiting and hands every valid packet to a [`PacketHandler`].
//!
//! While the bootloader flag is raised the link steps aside: incoming
//! bytes belong to the firmware transfer channel and are discarded.
use crate::{
    devices::{handoff::BootloaderFlag, traits::Serial},
    error::Error,
    hal::{
        serial::{self, Read, Transmission},
        time::{Milliseconds, Now},
    },
    utilities::frame::{self, Packet, MAX_PAYLOAD},
};
use defmt::{debug, info, trace, warn, Format};
use static_assertions::const_assert;
use ufmt::uWrite;

pub mod ledger;
pub mod message;
pub mod parser;
pub mod statistics;

use ledger::{Ledger, MAX_PENDING_COMMANDS};
use message::{AckPayload, AckResult, HandshakePayload};
use parser::{Discard, Outcome, Parser};
pub use statistics::Statistics;

/// Number of unacknowledged commands at which new commands are refused.
pub const BACKPRESSURE_THRESHOLD: usize = 6;
const_assert!(BACKPRESSURE_THRESHOLD <= MAX_PENDING_COMMANDS);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Format)]
pub struct LinkConfig {
    /// Time a command may go unacknowledged before it is retransmitted.
    pub ack_timeout: Milliseconds,
    /// Retransmissions before a command is given up on.
    pub retry_count: u8,
    /// Maximum silence in the middle of a frame.
    pub parser_timeout: Milliseconds,
    /// Bound on a single frame transmission.
    pub write_timeout: Milliseconds,
}

impl LinkConfig {
    pub const DEFAULT: Self = Self {
        ack_timeout: Milliseconds(1000),
        retry_count: 3,
        parser_timeout: Milliseconds(100),
        write_timeout: Milliseconds(10),
    };
}

impl Default for LinkConfig {
    fn default() -> Self { Self::DEFAULT }
}

const_assert!(LinkConfig::DEFAULT.ack_timeout.0 <= u16::MAX as u32);

/// Receives every valid packet, with mutable access to the link
/// so that it can answer.
pub trait PacketHandler<L: ?Sized> {
    fn on_packet(&mut self, link: &mut L, packet: &Packet);
}

/// Discards every packet.
impl<L: ?Sized> PacketHandler<L> for () {
    fn on_packet(&mut self, _: &mut L, _: &Packet) {}
}

pub struct Link<'a, S: Serial, C: Now> {
    serial: S,
    clock: C,
    flag: &'a BootloaderFlag,
    config: LinkConfig,
    parser: Parser<C::I>,
    ledger: Ledger<C::I>,
    statistics: Statistics,
    tx_sequence: u8,
    last_sequence_received: Option<u8>,
    backpressure: bool,
}

impl<'a, S: Serial, C: Now> Link<'a, S, C> {
    pub fn new(serial: S, clock: C, flag: &'a BootloaderFlag, config: LinkConfig) -> Self {
        Self {
            serial,
            clock,
            flag,
            config,
            parser: Parser::new(),
            ledger: Ledger::new(),
            statistics: Statistics::default(),
            tx_sequence: 0,
            last_sequence_received: None,
            backpressure: false,
        }
    }

    /// Frames and transmits a packet, returning the sequence number used.
    ///
    /// Commands are refused without side effects while backpressure is
    /// active. A command that goes out is tracked until acknowledged.
    pub fn send(&mut self, message_type: u8, payload: &[u8]) -> Result<u8, Error> {
        if payload.len() > MAX_PAYLOAD {
            warn!("Refusing oversized packet {=u8:x} ({=usize} bytes)", message_type, payload.len());
            return Err(Error::PayloadTooLarge);
        }

        let needs_ack = message::requires_ack(message_type);
        if needs_ack && self.backpressure {
            warn!("Backpressure active, deferring command {=u8:x}", message_type);
            return Err(Error::Backpressure);
        }

        let sequence = self.tx_sequence;
        self.tx_sequence = self.tx_sequence.wrapping_add(1);
        let packet = Packet::new(message_type, sequence, payload).map_err(|_| Error::PayloadTooLarge)?;

        let frame = frame::encode(&packet);
        Self::transmit(
            &mut self.serial,
            &self.clock,
            &mut self.statistics,
            self.config.write_timeout,
            frame.as_bytes(),
        )?;
        self.statistics.packets_sent += 1;
        self.statistics.last_sequence_sent = sequence;

        if needs_ack {
            if self.ledger.track(packet, self.clock.now()).is_err() {
                warn!("Pending queue full, command {=u8:x} is not tracked", message_type);
            }
            if self.ledger.active() >= BACKPRESSURE_THRESHOLD {
                self.backpressure = true;
            }
        }
        Ok(sequence)
    }

    pub fn send_ack(&mut self, for_type: u8, sequence: u8, result: AckResult) -> Result<u8, Error> {
        let ack = AckPayload { command_type: for_type, command_sequence: sequence, result: result as u8 };
        self.send(message::ACK, &ack.to_bytes())
    }

    /// Tells the peer we are too busy to take the command.
    pub fn send_nack(&mut self, for_type: u8, sequence: u8) -> Result<u8, Error> {
        let nack = AckPayload {
            command_type: for_type,
            command_sequence: sequence,
            result: AckResult::Busy as u8,
        };
        let sent = self.send(message::NACK, &nack.to_bytes())?;
        self.statistics.nacks_sent += 1;
        Ok(sent)
    }

    /// Sends free text, truncated to a single packet.
    pub fn send_debug(&mut self, text: &str) -> Result<u8, Error> {
        let bytes = text.as_bytes();
        self.send(message::DEBUG, &bytes[..bytes.len().min(MAX_PAYLOAD)])
    }

    /// Forwards a log line, prefixed with its level.
    pub fn send_log(&mut self, level: u8, text: &str) -> Result<u8, Error> {
        let mut payload = [0u8; MAX_PAYLOAD];
        let text = &text.as_bytes()[..text.len().min(MAX_PAYLOAD - 1)];
        payload[0] = level;
        payload[1..=text.len()].copy_from_slice(text);
        self.send(message::LOG, &payload[..=text.len()])
    }

    /// Describes `error` to the peer in a debug message.
    pub fn report_error(&mut self, error: &Error) -> Result<u8, Error> {
        let mut text = TextBuffer::default();
        error.report(&mut text).ok();
        self.send(message::DEBUG, text.as_bytes())
    }

    pub fn request_handshake(&mut self) -> Result<u8, Error> {
        let handshake = HandshakePayload {
            version_major: message::PROTOCOL_VERSION_MAJOR,
            version_minor: message::PROTOCOL_VERSION_MINOR,
            capabilities: 0,
            max_retry_count: self.config.retry_count,
            ack_timeout_ms: self.config.ack_timeout.0.min(u16::MAX as u32) as u16,
        };
        debug!("Requesting handshake");
        self.send(message::HANDSHAKE, &handshake.to_bytes())
    }

    pub fn handshake_complete(&self) -> bool { self.statistics.handshake_complete }

    pub fn is_ready(&self) -> bool { self.handshake_complete() }

    pub fn backpressure_active(&self) -> bool { self.backpressure }

    pub fn pending_commands(&self) -> usize { self.ledger.active() }

    /// One step of the link: idle timeout, retry sweep, then every byte
    /// waiting in the receive FIFO.
    pub fn process<H: PacketHandler<Self> + ?Sized>(&mut self, handler: &mut H) {
        if self.flag.is_active() {
            self.step_aside();
            return;
        }

        let now = self.clock.now();
        if self.parser.timed_out(now, self.config.parser_timeout) {
            self.statistics.timeout_errors += 1;
            warn!("Parser timeout in state {}", self.parser.state());
            self.parser.reset();
        }

        self.retry_expired(now);

        loop {
            // The flag may be raised by the handler, or by the other core.
            if self.flag.is_active() {
                self.step_aside();
                return;
            }
            let byte = match self.serial.read() {
                Ok(byte) => byte,
                Err(nb::Error::WouldBlock) => return,
                Err(nb::Error::Other(_)) => {
                    self.statistics.packet_errors += 1;
                    self.parser.reset();
                    continue;
                }
            };
            if let Some(packet) = self.receive(byte) {
                handler.on_packet(self, &packet);
            }
        }
    }

    /// Snapshot of the health counters.
    pub fn statistics(&self) -> Statistics {
        Statistics { pending_commands: self.ledger.active() as u8, ..self.statistics }
    }

    pub fn reset_error_counters(&mut self) { self.statistics.reset_errors(); }

    /// Clears every counter, including the handshake flag.
    pub fn reset_statistics(&mut self) { self.statistics = Statistics::default(); }

    /// Discards any partially received frame. Statistics are untouched.
    pub fn reset_state(&mut self) { self.parser.reset(); }

    pub fn serial_mut(&mut self) -> &mut S { &mut self.serial }

    pub fn clock(&self) -> &C { &self.clock }

    /// Simultaneous access to the UART and the clock, for bounded
    /// reads that bypass the packet parser.
    pub fn split(&mut self) -> (&mut S, &C) { (&mut self.serial, &self.clock) }

    pub fn flag(&self) -> &'a BootloaderFlag { self.flag }

    pub fn config(&self) -> &LinkConfig { &self.config }

    fn step_aside(&mut self) {
        serial::drain(&mut self.serial);
        self.parser.reset();
    }

    fn receive(&mut self, byte: u8) -> Option<Packet> {
        self.statistics.bytes_received = self.statistics.bytes_received.wrapping_add(1);
        match self.parser.feed(byte, self.clock.now()) {
            Outcome::Pending => None,
            Outcome::Discarded(Discard::CrcMismatch { received, calculated }) => {
                self.statistics.crc_errors += 1;
                debug!("CRC error (got {=u16:x}, expected {=u16:x})", received, calculated);
                None
            }
            Outcome::Discarded(reason) => {
                self.statistics.packet_errors += 1;
                debug!("Discarded frame: {}", reason);
                None
            }
            Outcome::Complete(packet) => {
                self.accept(&packet);
                Some(packet)
            }
        }
    }

    fn accept(&mut self, packet: &Packet) {
        self.statistics.packets_received += 1;

        if message::is_sequenced(packet.message_type) {
            if let Some(last) = self.last_sequence_received {
                let expected = last.wrapping_add(1);
                if packet.sequence != expected {
                    self.statistics.sequence_errors += 1;
                    warn!("Sequence error (got {=u8}, expected {=u8})", packet.sequence, expected);
                }
            }
        }
        self.last_sequence_received = Some(packet.sequence);

        match packet.message_type {
            message::HANDSHAKE => {
                self.statistics.handshake_complete = true;
                info!("Handshake complete");
            }
            message::ACK => {
                if let Some(ack) = AckPayload::from_bytes(packet.payload()) {
                    trace!("ACK for sequence {=u8} (result {=u8})", ack.command_sequence, ack.result);
                    self.ledger.release(ack.command_sequence);
                    self.update_backpressure();
                }
            }
            message::NACK => {
                self.statistics.nacks_received += 1;
                warn!("NACK received, peer is busy");
            }
            _ => {}
        }
    }

    fn retry_expired(&mut self, now: C::I) {
        let LinkConfig { ack_timeout, retry_count, write_timeout, .. } = self.config;
        for slot in self.ledger.slots_mut() {
            let Some(entry) = slot.as_mut() else { continue };
            if now - entry.sent_at <= ack_timeout {
                continue;
            }

            if entry.retry_count < retry_count {
                entry.retry_count += 1;
                entry.sent_at = now;
                self.statistics.retries += 1;
                warn!(
                    "Retrying command {=u8:x} seq {=u8} ({=u8} of {=u8})",
                    entry.packet.message_type,
                    entry.packet.sequence,
                    entry.retry_count,
                    retry_count
                );
                let frame = frame::encode(&entry.packet);
                // A failed retransmission only counts a drop. The entry
                // stays active and expires again later.
                Self::transmit(
                    &mut self.serial,
                    &self.clock,
                    &mut self.statistics,
                    write_timeout,
                    frame.as_bytes(),
                )
                .ok();
                continue;
            }

            self.statistics.ack_timeouts += 1;
            warn!(
                "Command {=u8:x} seq {=u8} abandoned after {=u8} retries",
                entry.packet.message_type,
                entry.packet.sequence,
                retry_count
            );
            *slot = None;
        }
        self.update_backpressure();
    }

    fn update_backpressure(&mut self) {
        if self.ledger.active() < BACKPRESSURE_THRESHOLD {
            self.backpressure = false;
        }
    }

    fn transmit(
        serial: &mut S,
        clock: &C,
        statistics: &mut Statistics,
        timeout: Milliseconds,
        bytes: &[u8],
    ) -> Result<(), Error> {
        match serial::write_with_timeout(serial, clock, bytes, timeout) {
            Transmission::Complete => {
                statistics.bytes_sent = statistics.bytes_sent.wrapping_add(bytes.len() as u32);
                Ok(())
            }
            Transmission::TimedOut { written } => {
                statistics.packets_dropped += 1;
                warn!("UART stalled after {=usize} of {=usize} bytes, packet dropped", written, bytes.len());
                Err(Error::LinkStalled)
            }
            Transmission::Failed(e) => {
                statistics.packets_dropped += 1;
                Err(Error::from(e))
            }
        }
    }
}

/// Debug message text, silently truncated to one payload.
#[derive(Default)]
struct TextBuffer {
    bytes: [u8; MAX_PAYLOAD],
    length: usize,
}

impl TextBuffer {
    fn as_bytes(&self) -> &[u8] { &self.bytes[..self.length] }
}

impl uWrite for TextBuffer {
    type Error = core::convert::Infallible;

    fn write_str(&mut self, s: &str) -> Result<(), Self::Error> {
        let count = s.len().min(MAX_PAYLOAD - self.length);
        self.bytes[self.length..self.length + count].copy_from_slice(&s.as_bytes()[..count]);
        self.length += count;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hal::{
        doubles::{noise::Noise, serial::FakeUart, time::MockClock},
        time::U32Ext,
    };
    use super::parser::State;

    type TestLink<'a> = Link<'a, FakeUart, MockClock>;

    #[derive(Default)]
    struct Recorder {
        packets: Vec<Packet>,
    }

    impl<L> PacketHandler<L> for Recorder {
        fn on_packet(&mut self, _: &mut L, packet: &Packet) { self.packets.push(*packet); }
    }

    fn link(flag: &BootloaderFlag) -> (TestLink, MockClock) {
        let clock = MockClock::new();
        (Link::new(FakeUart::new(), clock.clone(), flag, LinkConfig::DEFAULT), clock)
    }

    fn inbound(message_type: u8, sequence: u8, payload: &[u8]) -> Vec<u8> {
        frame::encode(&Packet::new(message_type, sequence, payload).unwrap()).as_bytes().to_vec()
    }

    fn ack_for(sequence: u8) -> Vec<u8> { inbound(message::ACK, 0, &[message::CMD_SET_TEMP, sequence, 0, 0]) }

    #[test]
    fn commands_are_framed_and_tracked() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);

        // When
        let sequence = link.send(message::CMD_SET_TEMP, &[0x01, 0x02]).unwrap();

        // Then
        assert_eq!(0, sequence);
        assert_eq!(inbound(message::CMD_SET_TEMP, 0, &[0x01, 0x02]), link.serial_mut().take_sent());
        let statistics = link.statistics();
        assert_eq!(1, statistics.packets_sent);
        assert_eq!(8, statistics.bytes_sent);
        assert_eq!(1, statistics.pending_commands);
    }

    #[test]
    fn telemetry_and_logs_are_not_tracked() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);

        // When
        link.send(message::STATUS, &[0u8; 16]).unwrap();
        link.send_log(2, "boiler ready").unwrap();

        // Then
        assert_eq!(0, link.pending_commands());
        assert_eq!(1, link.statistics().last_sequence_sent);
    }

    #[test]
    fn oversized_payload_is_refused_without_consuming_a_sequence() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);

        // Then
        assert_eq!(Err(Error::PayloadTooLarge), link.send(message::STATUS, &[0u8; MAX_PAYLOAD + 1]));
        assert_eq!(Ok(0), link.send(message::STATUS, &[]));
    }

    #[test]
    fn backpressure_refuses_commands_until_an_ack_arrives() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);
        for _ in 0..BACKPRESSURE_THRESHOLD {
            link.send(message::CMD_BREW, &[1]).unwrap();
        }
        link.serial_mut().take_sent();

        // When
        let refused = link.send(message::CMD_BREW, &[1]);

        // Then
        assert_eq!(Err(Error::Backpressure), refused);
        assert!(link.serial_mut().sent.is_empty());
        assert_eq!(BACKPRESSURE_THRESHOLD as u32, link.statistics().packets_sent);

        // Telemetry still flows, with the next sequence number.
        assert_eq!(Ok(BACKPRESSURE_THRESHOLD as u8), link.send(message::STATUS, &[]));

        // When
        link.serial_mut().queue(&ack_for(2));
        link.process(&mut ());

        // Then
        assert!(!link.backpressure_active());
        assert_eq!(BACKPRESSURE_THRESHOLD - 1, link.pending_commands());
        assert!(link.send(message::CMD_BREW, &[1]).is_ok());
    }

    #[test]
    fn backpressure_lifts_once_unanswered_commands_are_abandoned() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, clock) = link(&flag);
        for _ in 0..BACKPRESSURE_THRESHOLD {
            link.send(message::CMD_BREW, &[1]).unwrap();
        }

        // When
        for _ in 0..LinkConfig::DEFAULT.retry_count {
            clock.advance(1001.ms());
            link.process(&mut ());
            // Then
            assert!(link.backpressure_active());
            assert_eq!(Err(Error::Backpressure), link.send(message::CMD_BREW, &[1]));
        }
        clock.advance(1001.ms());
        link.process(&mut ());

        // Then
        assert!(!link.backpressure_active());
        assert_eq!(0, link.pending_commands());
        assert_eq!(BACKPRESSURE_THRESHOLD as u32, link.statistics().ack_timeouts);
        assert!(link.send(message::CMD_BREW, &[1]).is_ok());
    }

    #[test]
    fn unacknowledged_command_is_retried_then_abandoned() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, clock) = link(&flag);
        link.send(message::CMD_SET_TEMP, &[0x01, 0x02]).unwrap();
        let original = link.serial_mut().take_sent();

        // When
        for _ in 0..LinkConfig::DEFAULT.retry_count {
            clock.advance(1001.ms());
            link.process(&mut ());
            // Then
            assert_eq!(original, link.serial_mut().take_sent());
        }
        clock.advance(1001.ms());
        link.process(&mut ());

        // Then
        let statistics = link.statistics();
        assert_eq!(3, statistics.retries);
        assert_eq!(1, statistics.ack_timeouts);
        assert_eq!(0, statistics.pending_commands);
        assert!(link.serial_mut().sent.is_empty());
    }

    #[test]
    fn command_within_the_ack_window_is_left_alone() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, clock) = link(&flag);
        link.send(message::CMD_MODE, &[1]).unwrap();
        link.serial_mut().take_sent();

        // When
        clock.advance(1000.ms());
        link.process(&mut ());

        // Then
        assert_eq!(0, link.statistics().retries);
        assert!(link.serial_mut().sent.is_empty());
    }

    #[test]
    fn stalled_uart_drops_the_packet() {
        // Given
        let flag = BootloaderFlag::new();
        let mut link = Link::new(FakeUart::new(), MockClock::with_step(1), &flag, LinkConfig::DEFAULT);
        link.serial_mut().stall();

        // When
        let result = link.send(message::CMD_SET_TEMP, &[1, 2]);

        // Then
        assert_eq!(Err(Error::LinkStalled), result);
        let statistics = link.statistics();
        assert_eq!(1, statistics.packets_dropped);
        assert_eq!(0, statistics.packets_sent);
        assert_eq!(0, statistics.pending_commands);
    }

    #[test]
    fn ack_frees_the_matching_command_and_is_forwarded() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);
        link.send(message::CMD_SET_TEMP, &[1]).unwrap();
        link.send(message::CMD_SET_PID, &[2]).unwrap();
        let mut recorder = Recorder::default();

        // When
        link.serial_mut().queue(&ack_for(1));
        link.process(&mut recorder);

        // Then
        assert_eq!(1, link.pending_commands());
        assert_eq!(message::ACK, recorder.packets[0].message_type);
    }

    #[test]
    fn short_ack_payload_frees_nothing() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);
        link.send(message::CMD_SET_TEMP, &[1]).unwrap();

        // When
        link.serial_mut().queue(&inbound(message::ACK, 0, &[message::CMD_SET_TEMP, 0, 0]));
        link.process(&mut ());

        // Then
        assert_eq!(1, link.pending_commands());
    }

    #[test]
    fn sequence_gaps_are_counted_but_packets_still_delivered() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);
        let mut recorder = Recorder::default();
        for sequence in [7u8, 8, 10] {
            link.serial_mut().queue(&inbound(message::CMD_MODE, sequence, &[0]));
        }

        // When
        link.process(&mut recorder);

        // Then
        assert_eq!(1, link.statistics().sequence_errors);
        assert_eq!(3, recorder.packets.len());
    }

    #[test]
    fn telemetry_sequence_numbers_are_not_checked() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);
        link.serial_mut().queue(&inbound(message::STATUS, 40, &[]));
        link.serial_mut().queue(&inbound(message::CMD_MODE, 41, &[]));
        link.serial_mut().queue(&inbound(message::PING, 90, &[]));

        // When
        link.process(&mut ());

        // Then
        assert_eq!(0, link.statistics().sequence_errors);
    }

    #[test]
    fn corrupted_and_malformed_frames_are_counted_separately() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);
        let mut recorder = Recorder::default();
        let mut corrupted = inbound(message::CMD_BREW, 0, &[1]);
        corrupted[4] ^= 0xFF;
        link.serial_mut().queue(&corrupted);
        link.serial_mut().queue(&[0xAA, 0x10, 0x40]);
        link.serial_mut().queue(&inbound(message::CMD_BREW, 1, &[1]));

        // When
        link.process(&mut recorder);

        // Then
        let statistics = link.statistics();
        assert_eq!(1, statistics.crc_errors);
        assert_eq!(1, statistics.packet_errors);
        assert_eq!(1, statistics.packets_received);
        assert_eq!(7 + 3 + 7, statistics.bytes_received);
        assert_eq!(1, recorder.packets.len());
    }

    #[test]
    fn line_noise_without_sync_only_counts_bytes() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);
        let mut recorder = Recorder::default();
        let noise: Vec<u8> = Noise::new(0x5EED).filter(|byte| *byte != frame::SYNC).take(4096).collect();

        // When
        for chunk in noise.chunks(100) {
            link.serial_mut().queue(chunk);
            link.process(&mut recorder);
            // Then
            assert_eq!(State::WaitSync, link.parser.state());
        }

        // Then
        assert!(recorder.packets.is_empty());
        assert_eq!(Statistics { bytes_received: 4096, ..Statistics::default() }, link.statistics());
    }

    #[test]
    fn random_noise_never_disturbs_the_next_valid_frame() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);
        let mut recorder = Recorder::default();
        let noise: Vec<u8> = Noise::new(42)
            .zip(Noise::new(4242))
            .map(|(byte, dice)| if dice < 64 { frame::SYNC } else { byte })
            .take(20_000)
            .collect();
        link.serial_mut().queue(&noise);
        link.serial_mut().queue(&[0u8; frame::MAX_FRAME_SIZE]);
        link.process(&mut recorder);
        let received = recorder.packets.len();

        // When
        link.serial_mut().queue(&inbound(message::CMD_BREW, 3, &[1]));
        link.process(&mut recorder);

        // Then
        assert_eq!(received + 1, recorder.packets.len());
        assert_eq!(Packet::new(message::CMD_BREW, 3, &[1]).unwrap(), recorder.packets[received]);
        assert_eq!(20_000 + frame::MAX_FRAME_SIZE as u32 + 7, link.statistics().bytes_received);
    }

    #[test]
    fn stale_partial_frame_times_out() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, clock) = link(&flag);
        let frame = inbound(message::CMD_BREW, 0, &[1, 2, 3]);
        link.serial_mut().queue(&frame[..4]);
        link.process(&mut ());

        // When
        clock.advance(101.ms());
        link.process(&mut ());

        // Then
        assert_eq!(1, link.statistics().timeout_errors);

        // The rest of the frame is now noise and never completes a packet.
        let mut recorder = Recorder::default();
        link.serial_mut().queue(&frame[4..]);
        link.process(&mut recorder);
        assert!(recorder.packets.is_empty());
    }

    #[test]
    fn nacks_are_counted_both_ways() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);
        let mut recorder = Recorder::default();

        // When
        link.send_nack(message::CMD_BREW, 4).unwrap();
        link.serial_mut().queue(&inbound(message::NACK, 0, &[message::CMD_BREW, 4, 5, 0]));
        link.process(&mut recorder);

        // Then
        assert_eq!(inbound(message::NACK, 0, &[message::CMD_BREW, 4, 5, 0]), link.serial_mut().take_sent());
        let statistics = link.statistics();
        assert_eq!(1, statistics.nacks_sent);
        assert_eq!(1, statistics.nacks_received);
        assert_eq!(1, recorder.packets.len());
    }

    #[test]
    fn handshake_completes_on_reply_and_clears_on_full_reset() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);

        // When
        link.request_handshake().unwrap();

        // Then
        assert_eq!(inbound(message::HANDSHAKE, 0, &[1, 1, 0, 3, 0xE8, 0x03]), link.serial_mut().take_sent());
        assert!(!link.is_ready());

        // When
        link.serial_mut().queue(&inbound(message::HANDSHAKE, 0, &[1, 1, 0, 3, 0xE8, 0x03]));
        link.process(&mut ());

        // Then
        assert!(link.is_ready());
        link.reset_error_counters();
        assert!(link.handshake_complete());
        link.reset_statistics();
        assert!(!link.handshake_complete());
        assert_eq!(0, link.statistics().packets_received);
    }

    #[test]
    fn error_counter_reset_preserves_traffic_counters() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);
        link.serial_mut().queue(&[0xAA, 0x10, 0x40]);
        link.serial_mut().queue(&inbound(message::PING, 0, &[]));
        link.process(&mut ());

        // When
        link.reset_error_counters();

        // Then
        let statistics = link.statistics();
        assert_eq!(0, statistics.packet_errors);
        assert_eq!(1, statistics.packets_received);
    }

    #[test]
    fn link_steps_aside_while_the_bootloader_is_active() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);
        let mut recorder = Recorder::default();
        flag.raise();
        link.serial_mut().queue(&inbound(message::CMD_BREW, 0, &[1]));

        // When
        link.process(&mut recorder);

        // Then
        assert!(recorder.packets.is_empty());
        assert!(link.serial_mut().to_receive.is_empty());
        assert_eq!(0, link.statistics().bytes_received);
    }

    #[test]
    fn bytes_after_the_flag_is_raised_are_never_parsed() {
        // Given
        struct Raiser<'f>(&'f BootloaderFlag, usize);
        impl<'f, L> PacketHandler<L> for Raiser<'f> {
            fn on_packet(&mut self, _: &mut L, _: &Packet) {
                self.1 += 1;
                self.0.raise();
            }
        }
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);
        link.serial_mut().queue(&inbound(message::CMD_BOOTLOADER, 0, &[]));
        link.serial_mut().queue(&inbound(message::CMD_BREW, 1, &[1]));
        let mut raiser = Raiser(&flag, 0);

        // When
        link.process(&mut raiser);

        // Then
        assert_eq!(1, raiser.1);
        assert!(link.serial_mut().to_receive.is_empty());
        assert_eq!(1, link.statistics().packets_received);
    }

    #[test]
    fn debug_text_is_truncated_to_one_payload() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);

        // When
        link.send_debug("the steam boiler pressure sensor reads out of range").unwrap();

        // Then
        let sent = link.serial_mut().take_sent();
        assert_eq!(MAX_PAYLOAD as u8, sent[2]);
        assert_eq!(b"the steam boiler", &sent[4..20]);
    }

    #[test]
    fn errors_are_reported_as_debug_text() {
        // Given
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);

        // When
        link.report_error(&Error::FlashErase).unwrap();

        // Then
        let sent = link.serial_mut().take_sent();
        let (packet, _) = frame::decode(&sent).unwrap();
        assert_eq!(message::DEBUG, packet.message_type);
        assert_eq!(b"[Flash Error] -> Erase failed", packet.payload());
    }

    #[test]
    fn handler_can_answer_through_the_link() {
        // Given
        struct Acker;
        impl<'a> PacketHandler<TestLink<'a>> for Acker {
            fn on_packet(&mut self, link: &mut TestLink<'a>, packet: &Packet) {
                link.send_ack(packet.message_type, packet.sequence, AckResult::Success).unwrap();
            }
        }
        let flag = BootloaderFlag::new();
        let (mut link, _) = link(&flag);
        link.serial_mut().queue(&inbound(message::CMD_SET_ECO, 9, &[1]));

        // When
        link.process(&mut Acker);

        // Then
        let expected = inbound(message::ACK, 0, &[message::CMD_SET_ECO, 9, 0, 0]);
        assert_eq!(expected, link.serial_mut().take_sent());
        assert_eq!(0, link.pending_commands());
    }
}
