//! ShuttleXpress input report layout
//!
//! ```text
//! byte 0   signed jog wheel position (-7..=7, 0 at rest)
//! byte 1   unsigned rotary counter, wraps at 256
//! byte 2   unused
//! byte 3   bits 4-7: buttons 1-4
//! byte 4   bit 0: button 5
//! ```

use super::decoder::ButtonId;

/// Number of meaningful bytes in a report
pub const REPORT_LEN: usize = 5;

/// One decoded input report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Report {
    pub wheel: i8,
    pub dial: u8,
    buttons: [bool; 5],
}

impl Report {
    /// Parse a raw report. Returns None for reports shorter than [`REPORT_LEN`].
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < REPORT_LEN {
            return None;
        }

        Some(Self {
            wheel: data[0] as i8,
            dial: data[1],
            buttons: [
                data[3] & (1 << 4) != 0,
                data[3] & (1 << 5) != 0,
                data[3] & (1 << 6) != 0,
                data[3] & (1 << 7) != 0,
                data[4] & 1 != 0,
            ],
        })
    }

    /// Whether the given button is held in this report
    pub fn button(&self, id: ButtonId) -> bool {
        self.buttons[id.index()]
    }

    /// Build a raw report, the inverse of [`Report::parse`]
    #[cfg(test)]
    pub fn to_bytes(&self) -> [u8; REPORT_LEN] {
        let mut status = 0u8;
        for (bit, pressed) in self.buttons[..4].iter().enumerate() {
            if *pressed {
                status |= 1 << (4 + bit);
            }
        }
        [
            self.wheel as u8,
            self.dial,
            0,
            status,
            self.buttons[4] as u8,
        ]
    }

    #[cfg(test)]
    pub fn with_button(mut self, id: ButtonId, pressed: bool) -> Self {
        self.buttons[id.index()] = pressed;
        self
    }
}
