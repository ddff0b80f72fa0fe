//! Error types for the device, sink and session layers

use thiserror::Error;

/// Errors surfaced by the translation pipeline and the session controller.
///
/// None of these trigger an automatic retry. Recovery is always user driven
/// (selecting a sink again, restarting the process).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// No ShuttleXpress with the expected vendor/product pair is connected
    #[error("no ShuttleXpress found (vendor 0x{vendor_id:04x}, product 0x{product_id:04x})")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    /// The HID layer could not be initialized or the device could not be opened
    #[error("failed to open ShuttleXpress: {0}")]
    DeviceOpen(String),

    /// A read failed while polling; the reader for that session has stopped
    #[error("ShuttleXpress read failed: {0}")]
    DeviceRead(String),

    /// The device handle was lost by an earlier session
    #[error("ShuttleXpress is no longer available, restart the application")]
    DeviceUnavailable,

    /// No MIDI output port matches the requested name
    #[error("MIDI output port '{0}' not found")]
    SinkNotFound(String),

    /// The MIDI output port exists but could not be connected
    #[error("failed to open MIDI output port '{port}': {reason}")]
    SinkOpen { port: String, reason: String },

    /// Writing to an open MIDI output port failed
    #[error("MIDI send failed: {0}")]
    SinkWrite(String),
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
