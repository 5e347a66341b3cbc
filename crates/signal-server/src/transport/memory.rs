//! In-memory transport doubles for exercising the relay without sockets.

use signal_core::transport::BoxFuture;
use signal_core::{FrameSink, FrameStream, InboundFrame, SignalError, SignalResult};
use std::time::Duration;
use tokio::sync::mpsc;

/// What the relay wrote to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Text(String),
    Ping,
    Close(u16, String),
}

type Inbound = SignalResult<Option<InboundFrame>>;

/// Read half handed to the relay.
pub struct MemoryStream {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

/// Write half handed to the relay.
pub struct MemorySink {
    tx: mpsc::UnboundedSender<SinkEvent>,
    fail: bool,
}

impl MemorySink {
    /// Make every subsequent write fail with a transport error.
    pub fn fail_writes(&mut self) {
        self.fail = true;
    }
}

/// The test's side of the connection.
pub struct RemotePeer {
    inbound_tx: Option<mpsc::UnboundedSender<Inbound>>,
    events_rx: mpsc::UnboundedReceiver<SinkEvent>,
}

/// Create a connected (remote, stream, sink) triple.
pub fn memory_pair() -> (RemotePeer, MemoryStream, MemorySink) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    (
        RemotePeer {
            inbound_tx: Some(inbound_tx),
            events_rx,
        },
        MemoryStream { rx: inbound_rx },
        MemorySink {
            tx: events_tx,
            fail: false,
        },
    )
}

impl RemotePeer {
    fn push(&self, item: Inbound) {
        if let Some(tx) = &self.inbound_tx {
            let _ = tx.send(item);
        }
    }

    pub fn push_text(&self, text: &str) {
        self.push(Ok(Some(InboundFrame::Text(text.to_string()))));
    }

    pub fn push_control(&self) {
        self.push(Ok(Some(InboundFrame::Control)));
    }

    pub fn push_error(&self, reason: &str) {
        self.push(Err(SignalError::Transport(reason.to_string())));
    }

    /// Peer sends a close frame.
    pub fn close_clean(&self) {
        self.push(Ok(None));
    }

    /// Peer vanishes without a close frame.
    pub fn hang_up(&mut self) {
        self.inbound_tx = None;
    }

    /// Next thing the relay wrote, or `None` after a second of silence or
    /// once the sink is gone.
    pub async fn next_event(&mut self) -> Option<SinkEvent> {
        tokio::time::timeout(Duration::from_secs(1), self.events_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next text message, skipping pings.
    pub async fn next_text(&mut self) -> Option<String> {
        loop {
            match self.next_event().await? {
                SinkEvent::Text(text) => return Some(text),
                SinkEvent::Ping => continue,
                SinkEvent::Close(..) => return None,
            }
        }
    }

    /// True if nothing is written within `window`.
    pub async fn stays_silent(&mut self, window: Duration) -> bool {
        tokio::time::timeout(window, self.events_rx.recv())
            .await
            .is_err()
    }
}

impl FrameStream for MemoryStream {
    fn next_frame(&mut self) -> BoxFuture<'_, SignalResult<Option<InboundFrame>>> {
        Box::pin(async move {
            match self.rx.recv().await {
                Some(item) => item,
                None => Ok(None),
            }
        })
    }
}

impl MemorySink {
    fn emit(&self, event: SinkEvent) -> SignalResult<()> {
        if self.fail {
            return Err(SignalError::Transport("injected write failure".into()));
        }
        self.tx
            .send(event)
            .map_err(|_| SignalError::Transport("remote dropped".into()))
    }
}

impl FrameSink for MemorySink {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, SignalResult<()>> {
        let result = self.emit(SinkEvent::Text(text));
        Box::pin(async move { result })
    }

    fn ping(&mut self) -> BoxFuture<'_, SignalResult<()>> {
        let result = self.emit(SinkEvent::Ping);
        Box::pin(async move { result })
    }

    fn close<'a>(&'a mut self, code: u16, reason: &'a str) -> BoxFuture<'a, SignalResult<()>> {
        let result = self.emit(SinkEvent::Close(code, reason.to_string()));
        Box::pin(async move { result })
    }
}
