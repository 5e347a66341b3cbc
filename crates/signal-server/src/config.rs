//! Server configuration: TOML file + CLI overrides.

use crate::relay::routing::{validate_path, ChannelRoute};
use crate::relay::{BroadcastOthers, EngineOptions, PairedChannel, RoutingPolicy};
use serde::Deserialize;
use signal_core::{SignalError, SignalResult};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub routing: RoutingSection,
    #[serde(default)]
    pub ring: RingSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds allowed for the WebSocket upgrade.
    #[serde(default = "default_fifteen")]
    pub handshake_timeout: u64,
    /// Seconds between keepalive pings; 0 disables them.
    #[serde(default = "default_fifteen")]
    pub ping_interval: u64,
    /// Seconds of silence tolerated after a ping period.
    #[serde(default = "default_fifteen")]
    pub timeout: u64,
    /// Bytes; 0 means unbounded.
    #[serde(default)]
    pub max_message_size: usize,
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            handshake_timeout: default_fifteen(),
            ping_interval: default_fifteen(),
            timeout: default_fifteen(),
            max_message_size: 0,
            outbound_buffer: default_outbound_buffer(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

/// Routing strategy, fixed per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// One shared path; every message goes to all other peers.
    Broadcast,
    /// Fixed inbound/outbound path routes.
    Paired,
}

/// `[routing]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingSection {
    #[serde(default = "default_mode")]
    pub mode: RoutingMode,
    /// Endpoint for broadcast mode.
    #[serde(default = "default_connect_path")]
    pub path: String,
    /// Named channel pairs for paired mode.
    #[serde(default = "default_pairs")]
    pub pairs: Vec<(String, String)>,
    /// Extra explicit routes for paired mode.
    #[serde(default)]
    pub routes: Vec<ChannelRoute>,
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            path: default_connect_path(),
            pairs: default_pairs(),
            routes: Vec::new(),
        }
    }
}

/// `[ring]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct RingSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ring_path")]
    pub path: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Default for RingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_ring_path(),
            webhook_url: None,
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_fifteen() -> u64 {
    15
}
fn default_outbound_buffer() -> usize {
    256
}
fn default_shutdown_grace() -> u64 {
    5
}
fn default_mode() -> RoutingMode {
    RoutingMode::Broadcast
}
fn default_connect_path() -> String {
    "/connect".to_string()
}
fn default_pairs() -> Vec<(String, String)> {
    vec![("door".to_string(), "client".to_string())]
}
fn default_ring_path() -> String {
    "/door/ring".to_string()
}
fn default_true() -> bool {
    true
}

/// Resolved routing setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingConfig {
    Broadcast { path: String },
    Paired { routes: Vec<ChannelRoute> },
}

impl RoutingConfig {
    /// Build the routing policy this configuration describes.
    pub fn build_policy(&self) -> SignalResult<Arc<dyn RoutingPolicy>> {
        Ok(match self {
            RoutingConfig::Broadcast { path } => Arc::new(BroadcastOthers::new(path.clone())?),
            RoutingConfig::Paired { routes } => Arc::new(PairedChannel::new(routes.clone())?),
        })
    }
}

/// Resolved ring endpoint setup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RingConfig {
    /// `None` when the endpoint is disabled.
    pub path: Option<String>,
    pub webhook_url: Option<String>,
}

/// Resolved server configuration (durations typed, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub handshake_timeout: Duration,
    pub ping_interval: Option<Duration>,
    pub keepalive_timeout: Duration,
    pub max_message_size: Option<usize>,
    pub outbound_buffer: usize,
    pub shutdown_grace: Duration,
    pub routing: RoutingConfig,
    pub ring: RingConfig,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_port: Option<u16>,
        cli_bind: Option<&str>,
        cli_mode: Option<RoutingMode>,
    ) -> SignalResult<Self> {
        // Load base config from file
        let mut file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    Self::parse_file(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        // Merge CLI overrides
        if let Some(port) = cli_port {
            file_config.server.port = port;
        }
        if let Some(bind) = cli_bind {
            file_config.server.bind = bind.to_string();
        }
        if let Some(mode) = cli_mode {
            file_config.routing.mode = mode;
        }

        Self::resolve(file_config)
    }

    /// Parse the TOML text of a config file.
    pub fn parse_file(content: &str) -> SignalResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| SignalError::Config(format!("config parse error: {e}")))
    }

    /// Validate a parsed config file and turn it into a server config.
    pub fn resolve(file: ConfigFile) -> SignalResult<Self> {
        let ip: IpAddr = file
            .server
            .bind
            .parse()
            .map_err(|e| SignalError::Config(format!("invalid bind address {:?}: {e}", file.server.bind)))?;

        let routing = match file.routing.mode {
            RoutingMode::Broadcast => RoutingConfig::Broadcast {
                path: file.routing.path,
            },
            RoutingMode::Paired => {
                let mut routes: Vec<ChannelRoute> = file
                    .routing
                    .pairs
                    .iter()
                    .flat_map(|(a, b)| ChannelRoute::pair(a, b))
                    .collect();
                routes.extend(file.routing.routes);
                RoutingConfig::Paired { routes }
            }
        };
        let policy = routing.build_policy()?;

        let ring = if file.ring.enabled {
            validate_path(&file.ring.path)?;
            if policy.serves(&file.ring.path) {
                return Err(SignalError::Config(format!(
                    "ring path {} collides with a relay endpoint",
                    file.ring.path
                )));
            }
            RingConfig {
                path: Some(file.ring.path),
                webhook_url: file.ring.webhook_url,
            }
        } else {
            RingConfig::default()
        };

        Ok(Self {
            bind_addr: SocketAddr::new(ip, file.server.port),
            handshake_timeout: Duration::from_secs(file.server.handshake_timeout.max(1)),
            ping_interval: non_zero_secs(file.server.ping_interval),
            keepalive_timeout: Duration::from_secs(file.server.timeout),
            max_message_size: (file.server.max_message_size > 0)
                .then_some(file.server.max_message_size),
            outbound_buffer: file.server.outbound_buffer.max(1),
            shutdown_grace: Duration::from_secs(file.server.shutdown_grace),
            routing,
            ring,
        })
    }

    /// Session tunables derived from this config.
    ///
    /// A peer is considered gone when nothing arrives for one ping period
    /// plus the keepalive timeout. Without pings there is no idle limit.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            outbound_buffer: self.outbound_buffer,
            ping_interval: self.ping_interval,
            idle_timeout: self.ping_interval.map(|p| p + self.keepalive_timeout),
            close_grace: self.shutdown_grace,
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
