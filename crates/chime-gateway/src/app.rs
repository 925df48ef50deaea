use axum::{
    routing::{delete, get},
    Router,
};
use std::sync::Arc;

use chime_core::ChimeConfig;
use chime_engine::AlarmEngine;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ChimeConfig,
    pub engine: AlarmEngine,
}

impl AppState {
    pub fn new(config: ChimeConfig, engine: AlarmEngine) -> Self {
        Self { config, engine }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/alarms",
            get(crate::http::alarms::list_alarms).post(crate::http::alarms::schedule_alarm),
        )
        .route(
            "/alarms/{order_id}",
            delete(crate::http::alarms::cancel_alarm),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
