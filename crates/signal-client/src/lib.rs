//! signal-client: connect to the signaling relay and exchange offers,
//! answers and ICE candidates with the other peers.

pub mod client;
pub mod listener;

pub use client::SignalingClient;
pub use listener::SignalingListener;
pub use signal_core::{IceCandidate, SdpType, SessionDescription, SignalError, SignalMessage, SignalResult};
