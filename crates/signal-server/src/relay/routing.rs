//! Routing policies: who receives a message sent by a given connection.
//!
//! The policy also decides which endpoint paths the relay serves, so the
//! listener can reject upgrades to paths no policy route covers.

use super::registry::{ConnectionId, RegistrySnapshot};
use serde::Deserialize;
use signal_core::{SignalError, SignalResult};
use std::collections::{HashMap, HashSet};

/// Per-message input to a routing decision.
pub struct RoutingContext<'a> {
    /// Connection the message arrived on.
    pub sender: ConnectionId,
    /// Endpoint path of the sender.
    pub path: &'a str,
    /// Registry contents at the time of the decision.
    pub snapshot: &'a RegistrySnapshot,
}

/// A rule mapping an inbound message to its recipients.
pub trait RoutingPolicy: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Every endpoint path this policy accepts connections on.
    fn paths(&self) -> Vec<String>;

    /// Whether peers may connect on `path`.
    fn serves(&self, path: &str) -> bool;

    /// Recipients for `message`. An empty result means the message is dropped.
    fn route(&self, ctx: &RoutingContext<'_>, message: &str) -> Vec<ConnectionId>;
}

/// Mesh mode: every registered peer except the sender receives the message.
pub struct BroadcastOthers {
    path: String,
}

impl BroadcastOthers {
    pub fn new(path: impl Into<String>) -> SignalResult<Self> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Self { path })
    }
}

impl RoutingPolicy for BroadcastOthers {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn paths(&self) -> Vec<String> {
        vec![self.path.clone()]
    }

    fn serves(&self, path: &str) -> bool {
        path == self.path
    }

    fn route(&self, ctx: &RoutingContext<'_>, _message: &str) -> Vec<ConnectionId> {
        ctx.snapshot
            .iter()
            .filter(|e| e.id != ctx.sender)
            .map(|e| e.id)
            .collect()
    }
}

/// One directed route: text received on `inbound` goes to every peer
/// connected on `outbound`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelRoute {
    pub inbound: String,
    pub outbound: String,
}

impl ChannelRoute {
    pub fn new(inbound: impl Into<String>, outbound: impl Into<String>) -> Self {
        Self {
            inbound: inbound.into(),
            outbound: outbound.into(),
        }
    }

    /// The two routes joining channels `a` and `b`:
    /// `/a/in -> /b/out` and `/b/in -> /a/out`.
    pub fn pair(a: &str, b: &str) -> [ChannelRoute; 2] {
        [
            ChannelRoute::new(format!("/{a}/in"), format!("/{b}/out")),
            ChannelRoute::new(format!("/{b}/in"), format!("/{a}/out")),
        ]
    }
}

/// Topic fan-out between fixed inbound and outbound paths.
///
/// Text arriving on an outbound path is not routed anywhere.
#[derive(Debug)]
pub struct PairedChannel {
    /// Inbound path to the outbound paths it feeds.
    routes: HashMap<String, Vec<String>>,
    outbound: HashSet<String>,
}

impl PairedChannel {
    pub fn new(routes: impl IntoIterator<Item = ChannelRoute>) -> SignalResult<Self> {
        let mut table: HashMap<String, Vec<String>> = HashMap::new();
        let mut outbound = HashSet::new();

        for route in routes {
            validate_path(&route.inbound)?;
            validate_path(&route.outbound)?;
            if route.inbound == route.outbound {
                return Err(SignalError::Config(format!(
                    "route {} cannot feed itself",
                    route.inbound
                )));
            }
            let targets = table.entry(route.inbound.clone()).or_default();
            if targets.contains(&route.outbound) {
                return Err(SignalError::Config(format!(
                    "duplicate route {} -> {}",
                    route.inbound, route.outbound
                )));
            }
            targets.push(route.outbound.clone());
            outbound.insert(route.outbound);
        }

        if table.is_empty() {
            return Err(SignalError::Config("paired mode needs at least one route".into()));
        }
        if let Some(shared) = table.keys().find(|p| outbound.contains(*p)) {
            return Err(SignalError::Config(format!(
                "path {shared} is used as both inbound and outbound"
            )));
        }

        Ok(Self {
            routes: table,
            outbound,
        })
    }

    /// Build from named channel pairs, e.g. `("door", "client")`.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> SignalResult<Self> {
        Self::new(pairs.into_iter().flat_map(|(a, b)| ChannelRoute::pair(a, b)))
    }
}

impl RoutingPolicy for PairedChannel {
    fn name(&self) -> &'static str {
        "paired"
    }

    fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .routes
            .keys()
            .chain(self.outbound.iter())
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    fn serves(&self, path: &str) -> bool {
        self.routes.contains_key(path) || self.outbound.contains(path)
    }

    fn route(&self, ctx: &RoutingContext<'_>, _message: &str) -> Vec<ConnectionId> {
        let Some(targets) = self.routes.get(ctx.path) else {
            return Vec::new();
        };
        ctx.snapshot
            .iter()
            .filter(|e| e.id != ctx.sender && targets.iter().any(|t| t.as_str() == &*e.path))
            .map(|e| e.id)
            .collect()
    }
}

/// Endpoint paths are literal: `/` followed by `[A-Za-z0-9._~/-]`, with no
/// route capture syntax.
pub(crate) fn validate_path(path: &str) -> SignalResult<()> {
    let literal = path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '~'));
    if !path.starts_with('/') || path.len() < 2 || !literal {
        return Err(SignalError::Config(format!("invalid endpoint path: {path:?}")));
    }
    Ok(())
}
