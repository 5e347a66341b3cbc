//! Message-framed transport traits for the relay.
//!
//! A peer connection is split into a read half ([`FrameStream`]) and a write
//! half ([`FrameSink`]) so that receiving and sending can suspend
//! independently. The WebSocket implementation lives in the server crate;
//! tests provide in-memory doubles.

use crate::error::SignalResult;
use std::future::Future;
use std::pin::Pin;

/// Close code sent when the relay ends a session ("service restart").
pub const CLOSE_SERVICE_RESTART: u16 = 1012;

/// Close reason accompanying [`CLOSE_SERVICE_RESTART`].
pub const RESTART_REASON: &str = "Restart Connection";

/// Boxed future returned by the transport traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single inbound frame as seen by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A complete text message.
    Text(String),
    /// Anything else (binary, ping, pong). Counts as liveness, never relayed.
    Control,
}

/// Read half of a peer connection.
pub trait FrameStream: Send {
    /// Wait for the next frame. `Ok(None)` means the peer closed cleanly.
    fn next_frame(&mut self) -> BoxFuture<'_, SignalResult<Option<InboundFrame>>>;
}

/// Write half of a peer connection.
pub trait FrameSink: Send {
    /// Write one text message.
    fn send_text(&mut self, text: String) -> BoxFuture<'_, SignalResult<()>>;

    /// Send a keepalive ping.
    fn ping(&mut self) -> BoxFuture<'_, SignalResult<()>>;

    /// Start the close handshake with the given code and reason.
    fn close<'a>(&'a mut self, code: u16, reason: &'a str) -> BoxFuture<'a, SignalResult<()>>;
}
