//! signal-server: WebRTC signaling relay.
//!
//! Peers connect over WebSocket on configured endpoint paths and exchange
//! session descriptions and ICE candidates. The relay forwards text frames
//! between them according to a routing policy and never inspects payloads.

pub mod config;
pub mod notify;
pub mod relay;
pub mod server;
pub mod transport;

pub use config::{RoutingMode, ServerConfig};
pub use server::{BoundServer, SignalServer};
