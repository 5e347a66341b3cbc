//! "Ring" side channel: push a notification to the paired app.
//!
//! Triggered by an HTTP `POST` on the ring path, independently of the relay.
//! Delivery is fire-and-forget; failures are only logged.

use crate::config::RingConfig;
use serde::Serialize;
use signal_core::transport::BoxFuture;
use signal_core::{SignalError, SignalResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Notification body sent when someone rings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RingNotification {
    pub title: String,
    pub body: String,
}

impl Default for RingNotification {
    fn default() -> Self {
        Self {
            title: "Someone is at the door".to_string(),
            body: "Check the camera stream".to_string(),
        }
    }
}

/// Delivers ring notifications.
pub trait RingNotifier: Send + Sync {
    fn ring(&self, notification: RingNotification) -> BoxFuture<'_, SignalResult<()>>;
}

/// Notifier that only logs; used when no webhook is configured.
pub struct LogNotifier;

impl RingNotifier for LogNotifier {
    fn ring(&self, notification: RingNotification) -> BoxFuture<'_, SignalResult<()>> {
        Box::pin(async move {
            info!(title = %notification.title, "ring received (no push target configured)");
            Ok(())
        })
    }
}

/// Posts the notification as JSON to a push gateway URL.
pub struct WebhookNotifier {
    url: String,
    http_client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl RingNotifier for WebhookNotifier {
    fn ring(&self, notification: RingNotification) -> BoxFuture<'_, SignalResult<()>> {
        Box::pin(async move {
            let response = self
                .http_client
                .post(&self.url)
                .json(&notification)
                .send()
                .await
                .map_err(|e| SignalError::Transport(format!("push request failed: {e}")))?;

            if !response.status().is_success() {
                return Err(SignalError::Other(format!(
                    "push gateway returned {}",
                    response.status()
                )));
            }
            info!(url = %self.url, "ring notification pushed");
            Ok(())
        })
    }
}

/// Pick the notifier for a ring configuration.
pub fn notifier_from_config(config: &RingConfig) -> Arc<dyn RingNotifier> {
    match &config.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    }
}

/// Send a ring notification in the background.
pub fn spawn_ring(notifier: Arc<dyn RingNotifier>) {
    tokio::spawn(async move {
        if let Err(e) = notifier.ring(RingNotification::default()).await {
            warn!(error = %e, "ring notification failed");
        }
    });
}
