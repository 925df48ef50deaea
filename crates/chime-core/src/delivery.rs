//! Delivery-side collaborator traits, implemented by the host and consumed
//! by the alarm engine.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::OrderId;

/// Failure reported by a sink when the user-visible side effect did not land.
#[derive(Debug, thiserror::Error)]
#[error("delivery sink failed: {0}")]
pub struct SinkError(pub String);

/// The user-visible alarm side effect.
///
/// The engine calls this at most once per claimed epoch. Implementations do
/// not need to be idempotent, but they should return promptly: on the exact
/// path a delivery that overruns the wake window is abandoned.
#[async_trait]
pub trait AlarmSink: Send + Sync {
    async fn deliver(&self, order_id: OrderId, label: &str) -> Result<(), SinkError>;
}

/// Whether the host currently permits precise wall-clock wakeups.
///
/// Consulted at every arm (schedule and boot recovery), not cached, since the
/// host can revoke the permission while alarms are outstanding.
pub trait ExactAlarmGate: Send + Sync {
    fn can_schedule_exact(&self) -> bool;
}

/// Wire payload for one delivered alarm; POSTed by the webhook sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmNotice {
    /// Constant `"service.window_closed"`, so receivers can route on it.
    pub event: String,
    pub order_id: OrderId,
    pub label: String,
    /// RFC 3339 delivery timestamp (when the flag was claimed, not the target).
    pub delivered_at: String,
}

impl AlarmNotice {
    pub fn now(order_id: OrderId, label: &str) -> Self {
        Self {
            event: "service.window_closed".to_string(),
            order_id,
            label: label.to_string(),
            delivered_at: Utc::now().to_rfc3339(),
        }
    }
}
