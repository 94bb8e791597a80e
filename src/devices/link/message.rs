//! Message catalogue shared with the companion MCU.

/// Protocol version advertised in the handshake.
pub const PROTOCOL_VERSION_MAJOR: u8 = 1;
pub const PROTOCOL_VERSION_MINOR: u8 = 1;

// Controller to companion: telemetry and events, never acknowledged.
pub const PING: u8 = 0x00;
pub const STATUS: u8 = 0x01;
pub const ALARM: u8 = 0x02;
pub const BOOT: u8 = 0x03;
pub const ACK: u8 = 0x04;
pub const CONFIG: u8 = 0x05;
pub const DEBUG: u8 = 0x06;
pub const DEBUG_RESPONSE: u8 = 0x07;
pub const ENV_CONFIG: u8 = 0x08;
pub const STATISTICS: u8 = 0x09;
pub const DIAGNOSTICS: u8 = 0x0A;
pub const POWER_METER: u8 = 0x0B;
pub const HANDSHAKE: u8 = 0x0C;
pub const NACK: u8 = 0x0D;

// Commands, acknowledged by the receiving side.
pub const CMD_SET_TEMP: u8 = 0x10;
pub const CMD_SET_PID: u8 = 0x11;
pub const CMD_BREW: u8 = 0x13;
pub const CMD_MODE: u8 = 0x14;
pub const CMD_CONFIG: u8 = 0x15;
pub const CMD_GET_CONFIG: u8 = 0x16;
pub const CMD_GET_ENV_CONFIG: u8 = 0x17;
pub const CMD_CLEANING_START: u8 = 0x18;
pub const CMD_CLEANING_STOP: u8 = 0x19;
pub const CMD_CLEANING_RESET: u8 = 0x1A;
pub const CMD_CLEANING_SET_THRESHOLD: u8 = 0x1B;
pub const CMD_GET_STATISTICS: u8 = 0x1C;
pub const CMD_DEBUG: u8 = 0x1D;
pub const CMD_SET_ECO: u8 = 0x1E;
pub const CMD_BOOTLOADER: u8 = 0x1F;
pub const CMD_DIAGNOSTICS: u8 = 0x20;
pub const CMD_POWER_METER_CONFIG: u8 = 0x21;
pub const CMD_POWER_METER_DISCOVER: u8 = 0x22;
pub const CMD_GET_BOOT: u8 = 0x23;
pub const CMD_LOG_CONFIG: u8 = 0x24;

/// Log forwarding. Sits in the command range but is never tracked.
pub const LOG: u8 = 0x25;

/// Types at or above this value are commands, and are subject to
/// sequence continuity checks on reception.
pub const COMMAND_THRESHOLD: u8 = CMD_SET_TEMP;

/// Whether a sent packet of this type waits for an ACK.
pub const fn requires_ack(message_type: u8) -> bool {
    message_type >= COMMAND_THRESHOLD && message_type < LOG
}

/// Whether a received packet of this type takes part in sequence checks.
pub const fn is_sequenced(message_type: u8) -> bool { message_type >= COMMAND_THRESHOLD }

/// Result carried by ACK and NACK payloads.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
pub enum AckResult {
    Success = 0,
    Invalid = 1,
    Rejected = 2,
    Failed = 3,
    Timeout = 4,
    Busy = 5,
    NotReady = 6,
}

impl AckResult {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => AckResult::Success,
            1 => AckResult::Invalid,
            2 => AckResult::Rejected,
            3 => AckResult::Failed,
            4 => AckResult::Timeout,
            5 => AckResult::Busy,
            6 => AckResult::NotReady,
            _ => return None,
        })
    }
}

/// `cmd_type, cmd_seq, result, reserved`
#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
pub struct AckPayload {
    pub command_type: u8,
    pub command_sequence: u8,
    pub result: u8,
}

impl AckPayload {
    pub const SIZE: usize = 4;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        [self.command_type, self.command_sequence, self.result, 0]
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [command_type, command_sequence, result, _, ..] => Some(Self {
                command_type: *command_type,
                command_sequence: *command_sequence,
                result: *result,
            }),
            _ => None,
        }
    }
}

/// Capability negotiation payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, defmt::Format)]
pub struct HandshakePayload {
    pub version_major: u8,
    pub version_minor: u8,
    pub capabilities: u8,
    pub max_retry_count: u8,
    pub ack_timeout_ms: u16,
}

impl HandshakePayload {
    pub const SIZE: usize = 6;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let [timeout_lo, timeout_hi] = self.ack_timeout_ms.to_le_bytes();
        [
            self.version_major,
            self.version_minor,
            self.capabilities,
            self.max_retry_count,
            timeout_lo,
            timeout_hi,
        ]
    }
}

/// Identification sent at start-up and periodically after.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, defmt::Format)]
pub struct BootInfo {
    pub firmware_version: [u8; 3],
    pub machine_type: u8,
    pub pcb_type: u8,
    pub pcb_version: [u8; 2],
    pub reset_reason: u32,
}

impl BootInfo {
    pub const SIZE: usize = 13;

    /// Fields in declaration order, followed by the protocol version.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let [major, minor, patch] = self.firmware_version;
        let [pcb_major, pcb_minor] = self.pcb_version;
        let [r0, r1, r2, r3] = self.reset_reason.to_le_bytes();
        [
            major,
            minor,
            patch,
            self.machine_type,
            self.pcb_type,
            pcb_major,
            pcb_minor,
            r0,
            r1,
            r2,
            r3,
            PROTOCOL_VERSION_MAJOR,
            PROTOCOL_VERSION_MINOR,
        ]
    }
}
