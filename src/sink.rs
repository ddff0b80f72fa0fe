//! MIDI output sinks
//!
//! A sink is the named output port the dispatcher writes control changes to.
//! Ports are matched by case-insensitive substring, which keeps selections
//! stable across the numeric suffixes Windows appends to port names.

use midir::{MidiOutput, MidiOutputConnection, MidiOutputPort};
use tracing::{debug, info};

use crate::error::{Result, SessionError};
use crate::midi::{format_hex, ControlChange};

/// Client name registered with the MIDI backend
const CLIENT_NAME: &str = "ShuttleMIDI";

/// Destination for outbound control changes
pub trait MessageSink: Send {
    /// Write one control change
    fn send(&mut self, controller: u8, value: u8) -> Result<()>;
}

/// Opens sinks by name
pub trait SinkProvider: Send + Sync {
    fn open(&self, name: &str) -> Result<Box<dyn MessageSink>>;
}

/// Control changes on one channel of a midir output connection
pub struct MidiSink {
    conn: MidiOutputConnection,
    port_name: String,
    channel: u8,
}

impl MessageSink for MidiSink {
    fn send(&mut self, controller: u8, value: u8) -> Result<()> {
        let message = ControlChange::new(self.channel, controller, value);
        let data = message.encode();

        self.conn
            .send(&data)
            .map_err(|e| SessionError::SinkWrite(e.to_string()))?;

        debug!("Sent: {} | {}", format_hex(&data), message);
        Ok(())
    }
}

impl Drop for MidiSink {
    fn drop(&mut self) {
        info!("MIDI output '{}' closed", self.port_name);
    }
}

/// Opens midir output ports
#[derive(Debug, Clone)]
pub struct MidiSinkProvider {
    channel: u8,
}

impl MidiSinkProvider {
    /// `channel` is the MIDI channel (0-15) every message is sent on
    pub fn new(channel: u8) -> Self {
        Self {
            channel: channel & 0x0F,
        }
    }
}

impl SinkProvider for MidiSinkProvider {
    fn open(&self, name: &str) -> Result<Box<dyn MessageSink>> {
        let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| SessionError::SinkOpen {
            port: name.to_string(),
            reason: e.to_string(),
        })?;

        let (port, port_name) = find_output_port(&midi_out, name)
            .ok_or_else(|| SessionError::SinkNotFound(name.to_string()))?;

        info!("Connecting to output port: {}", port_name);

        let conn = midi_out
            .connect(&port, CLIENT_NAME)
            .map_err(|e| SessionError::SinkOpen {
                port: port_name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Box::new(MidiSink {
            conn,
            port_name,
            channel: self.channel,
        }))
    }
}

/// Find an output port by substring match
fn find_output_port(midi_out: &MidiOutput, pattern: &str) -> Option<(MidiOutputPort, String)> {
    for port in midi_out.ports() {
        if let Ok(name) = midi_out.port_name(&port) {
            if port_matches(&name, pattern) {
                debug!("Found port '{}' matching pattern '{}'", name, pattern);
                return Some((port, name));
            }
        }
    }
    None
}

/// Case-insensitive substring match; an empty pattern matches nothing
pub fn port_matches(name: &str, pattern: &str) -> bool {
    !pattern.is_empty() && name.to_lowercase().contains(&pattern.to_lowercase())
}

/// List available MIDI output ports
pub fn list_output_ports() -> Result<Vec<String>> {
    let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| SessionError::SinkOpen {
        port: String::new(),
        reason: e.to_string(),
    })?;

    Ok(midi_out
        .ports()
        .iter()
        .filter_map(|port| midi_out.port_name(port).ok())
        .collect())
}
