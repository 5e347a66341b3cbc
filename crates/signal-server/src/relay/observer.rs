//! Session lifecycle notifications.
//!
//! The engine reports lifecycle events through this capability set instead
//! of writing anything into a peer's payload stream.

use super::engine::SessionEnd;
use super::registry::ConnectionId;
use tracing::{debug, info};

/// Receives lifecycle events from the relay engine.
pub trait SessionObserver: Send + Sync {
    /// The connection is registered and can be routed to.
    fn on_registered(&self, id: ConnectionId, path: &str);

    /// A message from `sender` was handed to `delivered` of `recipients`.
    fn on_forwarded(&self, sender: ConnectionId, recipients: usize, delivered: usize) {
        let _ = (sender, recipients, delivered);
    }

    /// The session has left the registry and closed its connection.
    fn on_closed(&self, id: ConnectionId, end: &SessionEnd);
}

/// Default observer: writes lifecycle events to the log.
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_registered(&self, id: ConnectionId, path: &str) {
        info!(conn_id = %id.short(), path = %path, "connection established");
    }

    fn on_forwarded(&self, sender: ConnectionId, recipients: usize, delivered: usize) {
        debug!(conn_id = %sender.short(), recipients, delivered, "message forwarded");
    }

    fn on_closed(&self, id: ConnectionId, end: &SessionEnd) {
        info!(conn_id = %id.short(), end = ?end, "connection closed");
    }
}
