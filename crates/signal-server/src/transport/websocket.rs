//! WebSocket listener built on axum.
//!
//! Every relay path the routing policy serves is a `GET` route that upgrades
//! to a WebSocket; the ring path is a `POST` route on the same port. Any
//! other path is answered 404. Each TCP connection is served by its own task
//! owned by the accept loop, so stopping the loop also cancels handshakes in
//! progress.

use crate::notify::{spawn_ring, RingNotifier};
use crate::relay::RoutingPolicy;
use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{StatusCode, Uri};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use signal_core::transport::BoxFuture;
use signal_core::{FrameSink, FrameStream, InboundFrame, SignalError, SignalResult};
use signal_core::{CLOSE_SERVICE_RESTART, RESTART_REASON};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

/// Listener tunables.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Limit on the HTTP phase of a connection, up to the upgrade.
    pub handshake_timeout: Duration,
    /// `None` means unbounded.
    pub max_message_size: Option<usize>,
    /// Path answering `POST` ring requests; `None` disables them.
    pub ring_path: Option<String>,
}

/// An accepted WebSocket connection.
pub struct WebSocketConnection {
    pub socket: WebSocket,
    /// Endpoint path the peer upgraded on.
    pub path: String,
    pub remote_addr: SocketAddr,
}

impl WebSocketConnection {
    /// Split into the read and write halves the relay engine consumes.
    pub fn into_frames(self) -> (WsFrameStream, WsFrameSink) {
        let (sink, stream) = self.socket.split();
        (WsFrameStream { inner: stream }, WsFrameSink { inner: sink })
    }

    /// Close with the restart code without running a session.
    pub async fn reject(self) {
        let remote = self.remote_addr;
        let (_stream, mut sink) = self.into_frames();
        if let Err(e) = sink.close(CLOSE_SERVICE_RESTART, RESTART_REASON).await {
            debug!(remote = %remote, error = %e, "close on rejected connection failed");
        }
    }
}

#[derive(Clone)]
struct ListenerState {
    tx: mpsc::Sender<WebSocketConnection>,
    max_message_size: Option<usize>,
    notifier: Arc<dyn RingNotifier>,
}

/// Start the WebSocket listener.
///
/// Returns the bound address, a receiver yielding upgraded connections and
/// the accept loop's task handle. Aborting that task cancels every
/// connection still in its HTTP phase.
pub async fn start_listener(
    bind_addr: SocketAddr,
    policy: Arc<dyn RoutingPolicy>,
    options: ListenerOptions,
    notifier: Arc<dyn RingNotifier>,
) -> SignalResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>, JoinHandle<()>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| SignalError::Transport(format!("WS bind failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;

    info!(addr = %local_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);
    let state = ListenerState {
        tx,
        max_message_size: options.max_message_size,
        notifier,
    };
    let router = build_router(policy.as_ref(), options.ring_path.as_deref(), state);
    let handshake_timeout = options.handshake_timeout;

    let accept_task = tokio::spawn(async move {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = tcp_listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        connections.spawn(serve_http(stream, addr, router.clone(), handshake_timeout));
                    }
                    Err(e) => {
                        error!(error = %e, "TCP accept failed");
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
    });

    Ok((local_addr, rx, accept_task))
}

fn build_router(policy: &dyn RoutingPolicy, ring_path: Option<&str>, state: ListenerState) -> Router {
    let mut router: Router<ListenerState> = Router::new();
    for path in policy.paths() {
        router = router.route(&path, get(upgrade));
    }
    if let Some(path) = ring_path {
        router = router.route(path, post(ring));
    }
    router.with_state(state)
}

/// Serve one TCP connection until it upgrades, closes or runs out of time.
async fn serve_http(stream: TcpStream, remote_addr: SocketAddr, router: Router, limit: Duration) {
    let service = service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(remote_addr));
        router.clone().oneshot(request)
    });
    let conn = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();

    match tokio::time::timeout(limit, conn).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(remote = %remote_addr, error = %e, "HTTP connection failed"),
        Err(_) => debug!(remote = %remote_addr, "HTTP connection timed out"),
    }
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<ListenerState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    uri: Uri,
) -> Response {
    let path = uri.path().to_string();
    let limit = state.max_message_size.unwrap_or(usize::MAX);
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_failed_upgrade(move |e| {
            warn!(remote = %remote_addr, error = %e, "WebSocket handshake failed");
        })
        .on_upgrade(move |socket| async move {
            debug!(remote = %remote_addr, path = %path, "WebSocket connection accepted");
            let conn = WebSocketConnection {
                socket,
                path,
                remote_addr,
            };
            if let Err(mpsc::error::SendError(conn)) = state.tx.send(conn).await {
                debug!(remote = %remote_addr, "server stopped, closing upgraded connection");
                conn.reject().await;
            }
        })
}

async fn ring(
    State(state): State<ListenerState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> StatusCode {
    info!(remote = %remote_addr, bytes = body.len(), "ring request");
    spawn_ring(state.notifier.clone());
    StatusCode::ACCEPTED
}

/// Read half of an upgraded connection.
pub struct WsFrameStream {
    inner: SplitStream<WebSocket>,
}

impl FrameStream for WsFrameStream {
    fn next_frame(&mut self) -> BoxFuture<'_, SignalResult<Option<InboundFrame>>> {
        Box::pin(async move {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => Ok(Some(InboundFrame::Text(text.as_str().to_owned()))),
                Some(Ok(Message::Close(_))) | None => Ok(None),
                // Binary, ping and pong frames only prove the peer is alive.
                Some(Ok(_)) => Ok(Some(InboundFrame::Control)),
                Some(Err(e)) => Err(SignalError::Transport(format!("WS recv failed: {e}"))),
            }
        })
    }
}

/// Write half of an upgraded connection.
pub struct WsFrameSink {
    inner: SplitSink<WebSocket, Message>,
}

impl WsFrameSink {
    async fn send(&mut self, message: Message) -> SignalResult<()> {
        self.inner
            .send(message)
            .await
            .map_err(|e| SignalError::Transport(format!("WS send failed: {e}")))
    }
}

impl FrameSink for WsFrameSink {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, SignalResult<()>> {
        Box::pin(self.send(Message::Text(text.into())))
    }

    fn ping(&mut self) -> BoxFuture<'_, SignalResult<()>> {
        Box::pin(self.send(Message::Ping(Bytes::new())))
    }

    fn close<'a>(&'a mut self, code: u16, reason: &'a str) -> BoxFuture<'a, SignalResult<()>> {
        Box::pin(async move {
            let frame = CloseFrame {
                code,
                reason: reason.to_owned().into(),
            };
            self.send(Message::Close(Some(frame))).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RingNotification;
    use crate::relay::BroadcastOthers;
    use axum::body::Body;

    struct ChannelNotifier(mpsc::UnboundedSender<RingNotification>);

    impl RingNotifier for ChannelNotifier {
        fn ring(&self, notification: RingNotification) -> BoxFuture<'_, SignalResult<()>> {
            let _ = self.0.send(notification);
            Box::pin(async { Ok(()) })
        }
    }

    fn test_router() -> (
        Router,
        mpsc::Receiver<WebSocketConnection>,
        mpsc::UnboundedReceiver<RingNotification>,
    ) {
        let (tx, rx) = mpsc::channel(4);
        let (ring_tx, ring_rx) = mpsc::unbounded_channel();
        let state = ListenerState {
            tx,
            max_message_size: None,
            notifier: Arc::new(ChannelNotifier(ring_tx)),
        };
        let policy = BroadcastOthers::new("/connect").unwrap();
        (build_router(&policy, Some("/door/ring"), state), rx, ring_rx)
    }

    fn request(method: &str, path: &str, body: &'static str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method(method)
            .uri(path)
            .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn ring_post_is_accepted_and_notifies() {
        let (router, _rx, mut rings) = test_router();
        let response = router
            .oneshot(request("POST", "/door/ring", r#"{"who":"visitor"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let notification = tokio::time::timeout(Duration::from_secs(1), rings.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notification, RingNotification::default());
    }

    #[tokio::test]
    async fn unknown_paths_are_not_found() {
        let (router, _rx, _rings) = test_router();
        let response = router.oneshot(request("GET", "/nowhere", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn wrong_method_or_missing_upgrade_is_refused() {
        let (router, _rx, mut rings) = test_router();
        let response = router
            .clone()
            .oneshot(request("GET", "/door/ring", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = router
            .clone()
            .oneshot(request("POST", "/connect", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        // A plain GET on a relay path lacks the upgrade headers.
        let response = router.oneshot(request("GET", "/connect", "")).await.unwrap();
        assert!(response.status().is_client_error());
        assert!(rings.try_recv().is_err());
    }
}
