//! WebSocket signaling client.

use crate::listener::{dispatch_text, SignalingListener};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use signal_core::{SignalError, SignalMessage, SignalResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A connection to the signaling relay.
///
/// Inbound messages are decoded on a background task and delivered to the
/// [`SignalingListener`] given to [`SignalingClient::connect`].
pub struct SignalingClient {
    ws_sink: Arc<Mutex<SplitSink<WsStream, Message>>>,
    connected: Arc<AtomicBool>,
    dispatch_handle: JoinHandle<()>,
}

impl SignalingClient {
    /// Connect to a relay endpoint, e.g. `ws://host:8080/connect`.
    pub async fn connect(url: &str, listener: Arc<dyn SignalingListener>) -> SignalResult<Self> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| SignalError::Transport(format!("WebSocket connect error: {e}")))?;

        info!(url = %url, "connected to signaling relay");

        let (ws_sink, ws_read) = ws_stream.split();
        let connected = Arc::new(AtomicBool::new(true));
        listener.on_connection_established();

        let dispatch_handle = {
            let connected = connected.clone();
            tokio::spawn(async move {
                Self::dispatch_loop(ws_read, listener, connected).await;
            })
        };

        Ok(Self {
            ws_sink: Arc::new(Mutex::new(ws_sink)),
            connected,
            dispatch_handle,
        })
    }

    async fn dispatch_loop(
        mut ws_read: SplitStream<WsStream>,
        listener: Arc<dyn SignalingListener>,
        connected: Arc<AtomicBool>,
    ) {
        while let Some(msg) = ws_read.next().await {
            match msg {
                Ok(Message::Text(text)) => dispatch_text(listener.as_ref(), &text),
                Ok(Message::Close(frame)) => {
                    debug!(frame = ?frame, "close frame received");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "signaling connection failed");
                    break;
                }
            }
        }
        connected.store(false, Ordering::SeqCst);
        listener.on_closed();
    }

    /// Send a signaling message in its tagged JSON form.
    pub async fn send(&self, message: &SignalMessage) -> SignalResult<()> {
        let text = message.to_json()?;
        self.send_text(&text).await
    }

    /// Send a raw text payload.
    pub async fn send_text(&self, text: &str) -> SignalResult<()> {
        if !self.is_connected() {
            return Err(SignalError::Closed);
        }
        self.ws_sink
            .lock()
            .await
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| SignalError::Transport(format!("WS send failed: {e}")))
    }

    /// Close the connection. Calling it again is a no-op.
    pub async fn close(&self) -> SignalResult<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut sink = self.ws_sink.lock().await;
        // The relay may already be gone; a failed close frame changes nothing.
        let _ = sink.send(Message::Close(None)).await;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.dispatch_handle.abort();
    }
}
