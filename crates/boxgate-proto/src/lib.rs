//! Box Gateway Protocol Definitions
//!
//! This crate defines the frame types exchanged between the gateway and a
//! connected box over its tunnel channel, plus the codec used to move them
//! across the wire as JSON text messages.

pub mod frames;

pub use frames::{Frame, FrameError, ResponsePayload};

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Close code sent when a box identifies with an id the status store cannot
/// resolve. A box receiving this must not retry with the same id.
pub const CLOSE_INVALID_IDENTITY: u16 = 4001;

/// Close code sent to a channel that was replaced by a newer successful
/// identification under the same box id.
pub const CLOSE_SUPERSEDED: u16 = 4000;
