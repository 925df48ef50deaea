//! Host-side delivery collaborators.
//!
//! The engine only knows the `AlarmSink` and `ExactAlarmGate` traits; this
//! module provides the implementations the gateway ships: webhook POST
//! delivery for real installations, log-only delivery when no webhook is
//! configured, and a config-backed permission gate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use chime_core::{AlarmNotice, AlarmSink, ChimeConfig, ExactAlarmGate, OrderId, SinkError};

/// POSTs one JSON [`AlarmNotice`] per delivered alarm to the configured URL.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl AlarmSink for WebhookSink {
    async fn deliver(&self, order_id: OrderId, label: &str) -> Result<(), SinkError> {
        let notice = AlarmNotice::now(order_id, label);
        let response = self
            .client
            .post(&self.url)
            .json(&notice)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| SinkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SinkError(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        info!(order_id = order_id.0, "completion notice posted");
        Ok(())
    }
}

/// Fallback sink used when no webhook is configured; deliveries only show up
/// in the gateway log.
pub struct LogSink;

#[async_trait]
impl AlarmSink for LogSink {
    async fn deliver(&self, order_id: OrderId, label: &str) -> Result<(), SinkError> {
        info!(order_id = order_id.0, %label, "service window closed");
        Ok(())
    }
}

/// Permission gate backed by static config. Hosts flip
/// `alarms.exact_enabled` in chime.toml when the platform revokes precise
/// wakeups.
pub struct ConfigGate {
    exact: bool,
}

impl ConfigGate {
    pub fn new(exact: bool) -> Self {
        Self { exact }
    }
}

impl ExactAlarmGate for ConfigGate {
    fn can_schedule_exact(&self) -> bool {
        self.exact
    }
}

/// Choose the sink for this deployment.
pub fn build_sink(config: &ChimeConfig) -> Arc<dyn AlarmSink> {
    match config.delivery.webhook_url.as_deref() {
        Some(url) if !url.is_empty() => {
            info!(%url, "webhook delivery enabled");
            Arc::new(WebhookSink::new(url.to_string()))
        }
        _ => {
            info!("no webhook configured, deliveries are logged only");
            Arc::new(LogSink)
        }
    }
}
