//! MIDI control-change encoding
//!
//! Only the message type the bridge emits is modelled here.

use std::fmt;

/// Control Change message: channel (0-15), controller (0-127), value (0-127)
///
/// Callers may hand in full bytes; they are masked to the 7-bit MIDI data
/// range when encoded, so the 255 release sentinel goes out as 127.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlChange {
    pub channel: u8,
    pub controller: u8,
    pub value: u8,
}

impl ControlChange {
    pub fn new(channel: u8, controller: u8, value: u8) -> Self {
        Self {
            channel,
            controller,
            value,
        }
    }

    /// Encode the message to MIDI bytes
    pub fn encode(&self) -> [u8; 3] {
        [
            0xB0 | (self.channel & 0x0F),
            self.controller & 0x7F,
            self.value & 0x7F,
        ]
    }
}

impl fmt::Display for ControlChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CC ch:{} cc:{} v:{}",
            self.channel + 1,
            self.controller,
            self.value
        )
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
