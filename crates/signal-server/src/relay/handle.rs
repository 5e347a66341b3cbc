//! Per-connection send path and receive loop.
//!
//! A [`ConnectionHandle`] is the thread-safe entry point other sessions use
//! to push text to a peer. Sends land in a bounded queue drained by a
//! dedicated writer task, so a slow peer never stalls the session that
//! forwards to it, and the queue order is the wire order.

use super::registry::ConnectionId;
use signal_core::{FrameSink, FrameStream, InboundFrame, SignalError, SignalResult};
use signal_core::{CLOSE_SERVICE_RESTART, RESTART_REASON};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace};

/// Close code and reason requested for a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    pub code: u16,
    pub reason: String,
}

impl CloseRequest {
    /// The "service restart" close the relay uses for every session it ends.
    pub fn restart() -> Self {
        Self {
            code: CLOSE_SERVICE_RESTART,
            reason: RESTART_REASON.to_string(),
        }
    }
}

/// Send capability for one peer connection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<String>,
    close_tx: Arc<watch::Sender<Option<CloseRequest>>>,
    closing: Arc<AtomicBool>,
}

/// Receiving side of a handle's queue; becomes the writer task.
pub struct OutboundQueue {
    rx: mpsc::Receiver<String>,
    close_rx: watch::Receiver<Option<CloseRequest>>,
    closing: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Create a handle with a queue of `buffer` frames.
    pub fn channel(buffer: usize) -> (Self, OutboundQueue) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (close_tx, close_rx) = watch::channel(None);
        let closing = Arc::new(AtomicBool::new(false));
        (
            Self {
                tx,
                close_tx: Arc::new(close_tx),
                closing: closing.clone(),
            },
            OutboundQueue {
                rx,
                close_rx,
                closing,
            },
        )
    }

    /// A handle with nothing draining it, for tests that only need identity.
    #[cfg(test)]
    pub fn detached(buffer: usize) -> Self {
        Self::channel(buffer).0
    }

    /// Queue a text message for this peer without waiting.
    ///
    /// Fails with [`SignalError::Send`] if the connection is closing or its
    /// queue is full.
    pub fn send(&self, text: String) -> SignalResult<()> {
        if self.closing.load(Ordering::Acquire) {
            return Err(SignalError::Send("connection closing".into()));
        }
        self.tx.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => SignalError::Send("outbound queue full".into()),
            TrySendError::Closed(_) => SignalError::Send("connection closed".into()),
        })
    }

    /// Ask the writer to flush what is queued and close with `code`/`reason`.
    /// Only the first call has an effect.
    pub fn close(&self, code: u16, reason: &str) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.close_tx.send_replace(Some(CloseRequest {
            code,
            reason: reason.to_string(),
        }));
    }

    /// Whether `close` was called or the writer stopped.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

impl OutboundQueue {
    /// Spawn the writer task that owns `sink`.
    ///
    /// With `ping_interval` set, a keepalive ping is sent whenever the
    /// interval elapses.
    pub fn spawn_writer<K>(
        self,
        id: ConnectionId,
        sink: K,
        ping_interval: Option<Duration>,
    ) -> JoinHandle<()>
    where
        K: FrameSink + 'static,
    {
        tokio::spawn(self.run(id, sink, ping_interval))
    }

    async fn run<K: FrameSink>(mut self, id: ConnectionId, mut sink: K, ping_interval: Option<Duration>) {
        let mut ticker = ping_interval.map(|period| {
            let mut t = tokio::time::interval_at(Instant::now() + period, period);
            t.set_missed_tick_behavior(MissedTickBehavior::Delay);
            t
        });

        let request = loop {
            tokio::select! {
                biased;

                next = self.rx.recv() => match next {
                    Some(text) => {
                        if let Err(e) = sink.send_text(text).await {
                            debug!(conn_id = %id.short(), error = %e, "write failed, stopping writer");
                            self.closing.store(true, Ordering::Release);
                            return;
                        }
                    }
                    // Every handle is gone.
                    None => break CloseRequest::restart(),
                },

                changed = self.close_rx.changed() => {
                    if changed.is_err() {
                        break CloseRequest::restart();
                    }
                    let requested = self.close_rx.borrow_and_update().clone();
                    if let Some(request) = requested {
                        break request;
                    }
                }

                _ = tick(&mut ticker) => {
                    trace!(conn_id = %id.short(), "keepalive ping");
                    if let Err(e) = sink.ping().await {
                        debug!(conn_id = %id.short(), error = %e, "ping failed, stopping writer");
                        self.closing.store(true, Ordering::Release);
                        return;
                    }
                }
            }
        };

        self.closing.store(true, Ordering::Release);
        self.rx.close();
        while let Ok(text) = self.rx.try_recv() {
            if sink.send_text(text).await.is_err() {
                break;
            }
        }
        if let Err(e) = sink.close(request.code, &request.reason).await {
            debug!(conn_id = %id.short(), error = %e, "close handshake failed");
        }
        debug!(conn_id = %id.short(), code = request.code, "writer finished");
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Feed inbound text messages to `on_message` until the peer goes away.
///
/// Returns `Ok(())` when the peer closes cleanly, `Err(Timeout)` when nothing
/// arrives within `idle_timeout`, and the transport error otherwise.
/// Non-text frames only count as liveness.
pub async fn receive_loop<S, F, Fut>(
    stream: &mut S,
    idle_timeout: Option<Duration>,
    mut on_message: F,
) -> SignalResult<()>
where
    S: FrameStream + ?Sized,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let next = match idle_timeout {
            Some(limit) => tokio::time::timeout(limit, stream.next_frame())
                .await
                .map_err(|_| SignalError::Timeout)?,
            None => stream.next_frame().await,
        };

        match next? {
            Some(InboundFrame::Text(text)) => on_message(text).await,
            Some(InboundFrame::Control) => continue,
            None => return Ok(()),
        }
    }
}
