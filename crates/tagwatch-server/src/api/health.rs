//! Health check API endpoint.
//!
//! Provides a simple health check endpoint for monitoring and load balancers.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tagwatch_core::MonitorState;
use utoipa::ToSchema;

use crate::state::SharedState;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "readers": 2,
    "readers_polling": 1,
    "uptime_secs": 3600
}))]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version from Cargo.toml.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Number of configured readers.
    #[schema(example = 2)]
    pub readers: usize,

    /// Readers currently open and polling.
    #[schema(example = 1)]
    pub readers_polling: usize,

    /// Seconds since the daemon started.
    #[schema(example = 3600)]
    pub uptime_secs: i64,
}

/// Creates the health router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/health", get(health_check))
}

/// Health check endpoint.
///
/// The service reports `ok` even while readers are unavailable: reopening
/// them is the monitors' job.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    description = "Returns basic service status and how many readers are polling. \
        Use this endpoint for health checks and monitoring.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let state_guard = state.read().await;
    let statuses = state_guard.reader_statuses();
    let readers_polling = statuses
        .iter()
        .filter(|s| s.state == MonitorState::Polling)
        .count();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        readers: statuses.len(),
        readers_polling,
        uptime_secs: (Utc::now() - state_guard.started_at()).num_seconds(),
    })
}
