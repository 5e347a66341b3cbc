//! Signaling relay core: connection registry, routing and session engine.

pub mod engine;
pub mod handle;
pub mod observer;
pub mod registry;
pub mod routing;

pub use engine::{EngineOptions, RelayEngine, SessionEnd, SessionState};
pub use handle::ConnectionHandle;
pub use observer::{SessionObserver, TracingObserver};
pub use registry::{ConnectionId, ConnectionRegistry, PeerEntry, RegistrySnapshot};
pub use routing::{BroadcastOthers, ChannelRoute, PairedChannel, RoutingContext, RoutingPolicy};
