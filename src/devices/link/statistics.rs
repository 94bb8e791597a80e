use defmt::Format;

/// Rolling link health counters.
///
/// Counters only ever grow. They are cleared on explicit request only.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Format)]
pub struct Statistics {
    pub bytes_sent: u32,
    pub bytes_received: u32,
    pub packets_sent: u32,
    pub packets_received: u32,
    pub crc_errors: u32,
    pub packet_errors: u32,
    pub timeout_errors: u32,
    pub sequence_errors: u32,
    pub retries: u32,
    pub ack_timeouts: u32,
    pub nacks_sent: u32,
    pub nacks_received: u32,
    pub packets_dropped: u32,
    pub pending_commands: u8,
    pub last_sequence_sent: u8,
    pub handshake_complete: bool,
}

impl Statistics {
    /// Clears the four framing/link error counters, leaving traffic counters intact.
    pub fn reset_errors(&mut self) {
        self.crc_errors = 0;
        self.packet_errors = 0;
        self.timeout_errors = 0;
        self.sequence_errors = 0;
    }
}
