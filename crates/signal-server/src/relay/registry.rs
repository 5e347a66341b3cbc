//! Registry of active peer connections.
//!
//! An id is present exactly while its session is live: inserted once the
//! transport handshake completes, removed once when the session ends.
//! Routing works on [`RegistrySnapshot`]s, which are detached copies and stay
//! stable while the live map keeps changing.

use super::handle::ConnectionHandle;
use signal_core::{SignalError, SignalResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Opaque identifier for one peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// A fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 hex digits, for log lines.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// A registered connection.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub id: ConnectionId,
    /// Endpoint path the peer connected to (e.g. `/connect`, `/door/out`).
    pub path: Arc<str>,
    /// Send capability for the peer. The session owns the connection; this
    /// is only a way to reach it.
    pub handle: ConnectionHandle,
    pub registered_at: Instant,
}

/// Point-in-time copy of the registry.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    entries: Vec<PeerEntry>,
}

impl RegistrySnapshot {
    pub fn iter(&self) -> impl Iterator<Item = &PeerEntry> {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&PeerEntry> {
        self.entries.iter().find(|e| e.id == *id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared map of live connections.
pub struct ConnectionRegistry {
    peers: RwLock<HashMap<ConnectionId, PeerEntry>>,
    /// Current number of entries, published after every mutation.
    count_tx: watch::Sender<usize>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            count_tx: watch::channel(0).0,
        }
    }

    /// Insert a connection. Fails if the id is already present.
    pub async fn register(
        &self,
        id: ConnectionId,
        path: &str,
        handle: ConnectionHandle,
    ) -> SignalResult<()> {
        let mut peers = self.peers.write().await;
        if peers.contains_key(&id) {
            return Err(SignalError::DuplicateId(id.to_string()));
        }
        peers.insert(
            id,
            PeerEntry {
                id,
                path: Arc::from(path),
                handle,
                registered_at: Instant::now(),
            },
        );
        self.count_tx.send_replace(peers.len());

        info!(conn_id = %id.short(), path = %path, peers = peers.len(), "peer registered");
        Ok(())
    }

    /// Remove a connection. Returns whether it was present; removing an
    /// absent id is not an error.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut peers = self.peers.write().await;
        let removed = peers.remove(&id).is_some();
        if removed {
            self.count_tx.send_replace(peers.len());
            info!(conn_id = %id.short(), peers = peers.len(), "peer unregistered");
        } else {
            debug!(conn_id = %id.short(), "unregister of absent peer ignored");
        }
        removed
    }

    /// Look up the send capability for a connection.
    pub async fn get(&self, id: ConnectionId) -> SignalResult<ConnectionHandle> {
        let peers = self.peers.read().await;
        peers
            .get(&id)
            .map(|e| e.handle.clone())
            .ok_or_else(|| SignalError::NotFound(id.to_string()))
    }

    /// Copy the current contents, oldest registration first.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let peers = self.peers.read().await;
        let mut entries: Vec<PeerEntry> = peers.values().cloned().collect();
        entries.sort_by_key(|e| e.registered_at);
        RegistrySnapshot { entries }
    }

    /// Remove every entry, returning what was removed.
    pub async fn drain(&self) -> Vec<PeerEntry> {
        let mut peers = self.peers.write().await;
        let drained: Vec<PeerEntry> = peers.drain().map(|(_, e)| e).collect();
        self.count_tx.send_replace(0);
        drained
    }

    /// Number of registered connections.
    pub async fn count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Wait until the number of entries satisfies `pred`, up to `limit`.
    /// Returns `false` on timeout.
    pub async fn wait_for_count(&self, limit: Duration, pred: impl FnMut(&usize) -> bool) -> bool {
        let mut rx = self.count_tx.subscribe();
        tokio::time::timeout(limit, async move {
            // The sender lives in `self`, so the channel cannot close here.
            let _ = rx.wait_for(pred).await;
        })
        .await
        .is_ok()
    }

    /// Wait until no connections remain, up to `limit`.
    pub async fn wait_until_empty(&self, limit: Duration) -> bool {
        self.wait_for_count(limit, |n| *n == 0).await
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn handle() -> ConnectionHandle {
        ConnectionHandle::detached(8)
    }

    #[tokio::test]
    async fn register_then_get() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::generate();
        registry.register(id, "/connect", handle()).await.unwrap();
        assert!(registry.get(id).await.is_ok());
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_id_rejected() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::generate();
        registry.register(id, "/connect", handle()).await.unwrap();
        let err = registry.register(id, "/connect", handle()).await.unwrap_err();
        assert!(matches!(err, SignalError::DuplicateId(_)));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::generate();
        registry.register(id, "/connect", handle()).await.unwrap();
        assert!(registry.unregister(id).await);
        assert!(!registry.unregister(id).await);
        assert!(matches!(
            registry.get(id).await,
            Err(SignalError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn snapshot_is_detached_from_later_changes() {
        let registry = ConnectionRegistry::new();
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        registry.register(a, "/connect", handle()).await.unwrap();
        registry.register(b, "/connect", handle()).await.unwrap();

        let snap = registry.snapshot().await;
        registry.unregister(a).await;
        registry.register(ConnectionId::generate(), "/connect", handle()).await.unwrap();

        assert_eq!(snap.len(), 2);
        assert!(snap.contains(&a));
        assert!(snap.contains(&b));
        assert_eq!(snap.get(&a).map(|e| &*e.path), Some("/connect"));
    }

    #[tokio::test]
    async fn wait_for_count_observes_changes() {
        let registry = Arc::new(ConnectionRegistry::new());
        let id = ConnectionId::generate();
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .wait_for_count(Duration::from_secs(2), |n| *n == 1)
                    .await
            })
        };
        registry.register(id, "/connect", handle()).await.unwrap();
        assert!(waiter.await.unwrap());

        registry.unregister(id).await;
        assert!(registry.wait_until_empty(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn wait_for_count_times_out() {
        let registry = ConnectionRegistry::new();
        assert!(
            !registry
                .wait_for_count(Duration::from_millis(20), |n| *n == 3)
                .await
        );
    }

    #[tokio::test]
    async fn drain_empties_registry() {
        let registry = ConnectionRegistry::new();
        for _ in 0..3 {
            registry
                .register(ConnectionId::generate(), "/connect", handle())
                .await
                .unwrap();
        }
        assert_eq!(registry.drain().await.len(), 3);
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_register_unregister_keeps_exact_set() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut tasks = Vec::new();

        for worker in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let mut kept = Vec::new();
                for i in 0..100 {
                    let id = ConnectionId::generate();
                    registry.register(id, "/connect", handle()).await.unwrap();
                    // Readers interleave with writers.
                    let _ = registry.snapshot().await;
                    if (i + worker) % 3 == 0 {
                        kept.push(id);
                    } else {
                        assert!(registry.unregister(id).await);
                    }
                }
                kept
            }));
        }

        let mut expected = HashSet::new();
        for task in tasks {
            expected.extend(task.await.unwrap());
        }

        let actual: HashSet<ConnectionId> = registry.snapshot().await.ids().into_iter().collect();
        assert_eq!(actual, expected);
        assert_eq!(registry.count().await, expected.len());
    }
}
