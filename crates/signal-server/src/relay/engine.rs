//! Relay engine: runs one session per connection.
//!
//! Session states: `Connecting -> Registered -> Relaying -> Closing -> Closed`.
//! The handshake (`Connecting`) belongs to the transport; the engine takes
//! over once it has a framed connection. Unregistration and the restart
//! close run on every exit path, including a panic while relaying.

use super::handle::{receive_loop, ConnectionHandle};
use super::observer::{SessionObserver, TracingObserver};
use super::registry::{ConnectionId, ConnectionRegistry};
use super::routing::{RoutingContext, RoutingPolicy};
use futures_util::FutureExt;
use signal_core::{FrameSink, FrameStream, SignalError, SignalResult};
use signal_core::{CLOSE_SERVICE_RESTART, RESTART_REASON};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, trace, warn};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Registered,
    Relaying,
    Closing,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed the connection.
    PeerClosed,
    /// The peer's transport failed.
    TransportError(String),
    /// Nothing arrived within the keepalive window.
    Timeout,
    /// The relay is shutting down.
    Shutdown,
    /// The relay loop panicked; cleanup still ran.
    Panicked,
}

/// Tunables for sessions.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Frames queued per recipient before sends to it fail.
    pub outbound_buffer: usize,
    /// Keepalive ping period; `None` disables pings.
    pub ping_interval: Option<Duration>,
    /// Receive inactivity limit; `None` waits forever.
    pub idle_timeout: Option<Duration>,
    /// How long a closing session waits for its writer to flush.
    pub close_grace: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
            ping_interval: Some(Duration::from_secs(15)),
            idle_timeout: Some(Duration::from_secs(30)),
            close_grace: Duration::from_secs(5),
        }
    }
}

type IdSource = Arc<dyn Fn() -> ConnectionId + Send + Sync>;

/// Coordinates registry, routing and per-connection sessions.
pub struct RelayEngine {
    registry: Arc<ConnectionRegistry>,
    policy: Arc<dyn RoutingPolicy>,
    observer: Arc<dyn SessionObserver>,
    options: EngineOptions,
    shutdown_tx: watch::Sender<bool>,
    next_id: IdSource,
}

impl RelayEngine {
    /// Create an engine with an empty registry.
    pub fn new(policy: Arc<dyn RoutingPolicy>, options: EngineOptions) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            policy,
            observer: Arc::new(TracingObserver),
            options,
            shutdown_tx: watch::channel(false).0,
            next_id: Arc::new(ConnectionId::generate),
        }
    }

    /// Replace the default logging observer.
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[cfg(test)]
    fn with_id_source(mut self, source: IdSource) -> Self {
        self.next_id = source;
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &Arc<dyn RoutingPolicy> {
        &self.policy
    }

    /// Whether `shutdown` has been called.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Run one session to completion.
    ///
    /// Only fails if the connection could not be registered; every other
    /// outcome is reported as a [`SessionEnd`]. Once shutdown has begun the
    /// connection is closed without ever being registered.
    pub async fn run_session<S, K>(&self, path: &str, mut stream: S, mut sink: K) -> SignalResult<SessionEnd>
    where
        S: FrameStream,
        K: FrameSink + 'static,
    {
        let mut state = SessionState::Connecting;
        if self.is_shutting_down() {
            debug!(path = %path, "relay shutting down, refusing session");
            let _ = sink.close(CLOSE_SERVICE_RESTART, RESTART_REASON).await;
            return Ok(SessionEnd::Shutdown);
        }
        let (handle, queue) = ConnectionHandle::channel(self.options.outbound_buffer);

        let id = match self.register(path, &handle).await {
            Ok(id) => id,
            Err(e) => {
                error!(path = %path, error = %e, "registration failed, aborting session");
                let _ = sink.close(CLOSE_SERVICE_RESTART, RESTART_REASON).await;
                return Err(e);
            }
        };
        transition(id, &mut state, SessionState::Registered);
        let writer = queue.spawn_writer(id, sink, self.options.ping_interval);
        self.observer.on_registered(id, path);

        transition(id, &mut state, SessionState::Relaying);
        let end = match AssertUnwindSafe(self.relay(id, path, &mut stream))
            .catch_unwind()
            .await
        {
            Ok(end) => end,
            Err(_) => {
                error!(conn_id = %id.short(), "relay loop panicked");
                SessionEnd::Panicked
            }
        };

        transition(id, &mut state, SessionState::Closing);
        self.registry.unregister(id).await;
        handle.close(CLOSE_SERVICE_RESTART, RESTART_REASON);
        drop(handle);

        let abort = writer.abort_handle();
        if tokio::time::timeout(self.options.close_grace, writer).await.is_err() {
            warn!(conn_id = %id.short(), "writer did not finish within grace period, aborting");
            abort.abort();
        }
        drop(stream);

        transition(id, &mut state, SessionState::Closed);
        self.observer.on_closed(id, &end);
        Ok(end)
    }

    /// Register under a fresh id, retrying once on collision.
    async fn register(&self, path: &str, handle: &ConnectionHandle) -> SignalResult<ConnectionId> {
        let first = (self.next_id)();
        match self.registry.register(first, path, handle.clone()).await {
            Ok(()) => Ok(first),
            Err(SignalError::DuplicateId(_)) => {
                warn!(conn_id = %first.short(), "connection id collision, retrying");
                let retry = (self.next_id)();
                self.registry.register(retry, path, handle.clone()).await?;
                Ok(retry)
            }
            Err(e) => Err(e),
        }
    }

    async fn relay<S: FrameStream>(&self, id: ConnectionId, path: &str, stream: &mut S) -> SessionEnd {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow_and_update() {
            return SessionEnd::Shutdown;
        }

        let forward = move |text: String| self.forward(id, path, text);
        tokio::select! {
            result = receive_loop(stream, self.options.idle_timeout, forward) => match result {
                Ok(()) => SessionEnd::PeerClosed,
                Err(SignalError::Timeout) => SessionEnd::Timeout,
                Err(e) => {
                    debug!(conn_id = %id.short(), error = %e, "receive loop ended");
                    SessionEnd::TransportError(e.to_string())
                }
            },
            _ = shutdown_requested(&mut shutdown_rx) => SessionEnd::Shutdown,
        }
    }

    /// Deliver one message to the recipients chosen by the policy.
    ///
    /// Failures are per recipient: they are logged and never reach the
    /// sender.
    async fn forward(&self, sender: ConnectionId, path: &str, text: String) {
        let snapshot = self.registry.snapshot().await;
        let ctx = RoutingContext {
            sender,
            path,
            snapshot: &snapshot,
        };
        let recipients = self.policy.route(&ctx, &text);
        trace!(conn_id = %sender.short(), bytes = text.len(), recipients = recipients.len(), "inbound message");
        if recipients.is_empty() {
            debug!(conn_id = %sender.short(), "no recipients, message dropped");
            return;
        }

        let mut delivered = 0;
        for recipient in &recipients {
            let handle = match self.registry.get(*recipient).await {
                Ok(handle) => handle,
                Err(_) => {
                    debug!(conn_id = %recipient.short(), "recipient gone, skipping");
                    continue;
                }
            };
            match handle.send(text.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    from = %sender.short(),
                    to = %recipient.short(),
                    error = %e,
                    "delivery failed"
                ),
            }
        }
        self.observer.on_forwarded(sender, recipients.len(), delivered);
    }

    /// Stop every session.
    ///
    /// Receive loops are cancelled and each session runs its normal closing
    /// step. Sessions still registered after `grace` are removed and their
    /// connections told to close.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown_tx.send_replace(true);
        if self.registry.wait_until_empty(grace).await {
            debug!("all sessions closed");
            return;
        }

        let stragglers = self.registry.drain().await;
        warn!(count = stragglers.len(), "forcing close of sessions past the shutdown grace period");
        for entry in stragglers {
            entry.handle.close(CLOSE_SERVICE_RESTART, RESTART_REASON);
        }
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    // An error means the engine is gone, which also ends the session.
    let _ = rx.wait_for(|stop| *stop).await;
}

fn transition(id: ConnectionId, state: &mut SessionState, next: SessionState) {
    trace!(conn_id = %id.short(), from = ?state, to = ?next, "session state");
    *state = next;
}
