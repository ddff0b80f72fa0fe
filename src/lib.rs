//! ShuttleMIDI
//!
//! Turns a Contour ShuttleXpress jog/shuttle controller into a MIDI control
//! change source for any output port.

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod midi;
pub mod router;
pub mod session;
pub mod shuttle;
pub mod sink;

pub use error::{Result, SessionError};
