//! Server lifecycle: bind the listener, run one relay session per upgraded
//! connection, and shut everything down when asked.

use crate::config::ServerConfig;
use crate::notify::{notifier_from_config, RingNotifier};
use crate::relay::{RelayEngine, SessionObserver};
use crate::transport::websocket::{self, ListenerOptions, WebSocketConnection};
use signal_core::SignalResult;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// A configured, not yet listening signaling server.
pub struct SignalServer {
    config: ServerConfig,
    engine: RelayEngine,
    notifier: Arc<dyn RingNotifier>,
}

impl SignalServer {
    /// Create a server from a resolved configuration.
    pub fn new(config: ServerConfig) -> SignalResult<Self> {
        let policy = config.routing.build_policy()?;
        let engine = RelayEngine::new(policy, config.engine_options());
        let notifier = notifier_from_config(&config.ring);
        Ok(Self {
            config,
            engine,
            notifier,
        })
    }

    /// Replace the notifier chosen from the ring configuration.
    pub fn with_notifier(mut self, notifier: Arc<dyn RingNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the engine's lifecycle observer.
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.engine = self.engine.with_observer(observer);
        self
    }

    /// Bind the listener. Port 0 picks a free port; see [`BoundServer::local_addr`].
    pub async fn bind(self) -> SignalResult<BoundServer> {
        let engine = Arc::new(self.engine);
        let options = ListenerOptions {
            handshake_timeout: self.config.handshake_timeout,
            max_message_size: self.config.max_message_size,
            ring_path: self.config.ring.path.clone(),
        };
        let (local_addr, connections, accept_task) = websocket::start_listener(
            self.config.bind_addr,
            engine.policy().clone(),
            options,
            self.notifier,
        )
        .await?;

        info!(
            addr = %local_addr,
            mode = engine.policy().name(),
            paths = ?engine.policy().paths(),
            ring = ?self.config.ring.path,
            "signal-server ready"
        );

        Ok(BoundServer {
            local_addr,
            engine,
            connections,
            accept_task,
            shutdown_grace: self.config.shutdown_grace,
        })
    }
}

/// A listening server.
pub struct BoundServer {
    local_addr: SocketAddr,
    engine: Arc<RelayEngine>,
    connections: mpsc::Receiver<WebSocketConnection>,
    accept_task: JoinHandle<()>,
    shutdown_grace: Duration,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn engine(&self) -> &Arc<RelayEngine> {
        &self.engine
    }

    /// Relay until `shutdown` resolves, then close every session with the
    /// restart code and wait up to the grace period for them to finish.
    ///
    /// Connections still in their HTTP handshake are dropped without an
    /// upgrade; upgraded connections waiting in the queue get the restart
    /// close as well.
    pub async fn run<F>(mut self, shutdown: F) -> SignalResult<()>
    where
        F: Future<Output = ()>,
    {
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                conn = self.connections.recv() => match conn {
                    Some(conn) => {
                        let engine = self.engine.clone();
                        sessions.spawn(run_connection(engine, conn));
                    }
                    None => {
                        info!("listener closed, shutting down");
                        break;
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "session task failed");
                    }
                }
            }
        }

        // Cancels the accept loop together with every handshake in flight.
        self.accept_task.abort();
        let _ = (&mut self.accept_task).await;

        // Upgraded but not yet picked up: close them the same way as sessions.
        self.connections.close();
        let mut rejected = 0usize;
        while let Some(conn) = self.connections.recv().await {
            conn.reject().await;
            rejected += 1;
        }
        if rejected > 0 {
            debug!(rejected, "closed queued connections");
        }

        self.engine.shutdown(self.shutdown_grace).await;

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = sessions.len(), "sessions still running after grace period, aborting");
            sessions.abort_all();
        }

        info!("signal-server stopped");
        Ok(())
    }
}

async fn run_connection(engine: Arc<RelayEngine>, conn: WebSocketConnection) {
    let path = conn.path.clone();
    let remote = conn.remote_addr;
    let (stream, sink) = conn.into_frames();
    match engine.run_session(&path, stream, sink).await {
        Ok(end) => debug!(remote = %remote, path = %path, end = ?end, "session finished"),
        Err(e) => warn!(remote = %remote, path = %path, error = %e, "session aborted"),
    }
}
