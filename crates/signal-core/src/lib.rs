//! signal-core: Shared library for the WebRTC signaling relay.
//!
//! Provides the error taxonomy, the message-framed transport traits the relay
//! and client are written against, and the signaling payload model
//! (session descriptions and ICE candidates) used by peers.

pub mod error;
pub mod message;
pub mod transport;

// Re-export commonly used items at crate root.
pub use error::{SignalError, SignalResult};
pub use message::{IceCandidate, SdpType, SessionDescription, SignalMessage};
pub use transport::{
    FrameSink, FrameStream, InboundFrame, CLOSE_SERVICE_RESTART, RESTART_REASON,
};
