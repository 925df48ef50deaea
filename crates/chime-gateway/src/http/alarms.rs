//! Alarm management endpoints.
//!
//! The care-coordination backend schedules and cancels completion alarms
//! here; delivery itself happens out-of-band through the configured sink.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use chime_core::{Alarm, OrderId};

use crate::app::AppState;

#[derive(Deserialize)]
pub struct ScheduleRequest {
    pub order_id: i64,
    /// Shown verbatim in the notification, e.g. "Bath service".
    pub label: String,
    /// Absolute epoch milliseconds when the service window closes.
    pub target_ms: i64,
}

#[derive(Serialize)]
pub struct AlarmError {
    pub error: String,
}

fn bad_request(msg: &str) -> (StatusCode, Json<AlarmError>) {
    (
        StatusCode::BAD_REQUEST,
        Json(AlarmError {
            error: msg.to_string(),
        }),
    )
}

fn internal(e: impl std::fmt::Display) -> (StatusCode, Json<AlarmError>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(AlarmError {
            error: e.to_string(),
        }),
    )
}

/// POST /alarms — register (or replace) the completion alarm for an order.
pub async fn schedule_alarm(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<Alarm>), (StatusCode, Json<AlarmError>)> {
    if req.label.trim().is_empty() {
        return Err(bad_request("label must not be empty"));
    }
    if req.target_ms <= 0 {
        return Err(bad_request(
            "target_ms must be a positive epoch-millisecond timestamp",
        ));
    }

    match state
        .engine
        .schedule(OrderId(req.order_id), &req.label, req.target_ms)
    {
        Ok(alarm) => Ok((StatusCode::CREATED, Json(alarm))),
        Err(e) => {
            error!(order_id = req.order_id, error = %e, "schedule failed");
            Err(internal(e))
        }
    }
}

/// GET /alarms — all pending alarms, soonest target first.
pub async fn list_alarms(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Alarm>>, (StatusCode, Json<AlarmError>)> {
    state.engine.pending().map(Json).map_err(|e| {
        error!(error = %e, "listing alarms failed");
        internal(e)
    })
}

/// DELETE /alarms/{order_id} — cancel; idempotent, 204 even for unknown orders.
pub async fn cancel_alarm(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<i64>,
) -> Result<StatusCode, (StatusCode, Json<AlarmError>)> {
    match state.engine.cancel(OrderId(order_id)) {
        Ok(_) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            error!(order_id, error = %e, "cancel failed");
            Err(internal(e))
        }
    }
}
