//! Reader status API endpoints.
//!
//! Each configured reader is watched by its own monitor. These endpoints
//! expose what each monitor is doing and which tags it currently sees.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tagwatch_core::{PresentTag, ReaderStatus, TagwatchError};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the readers router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_readers))
        .route("/{name}", get(get_reader))
}

// ============================================================================
// Response Types
// ============================================================================

/// A tag a reader currently sees.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "uid": "04A1B2C3",
    "type": "ISO14443A",
    "modulation": "ISO14443A@106kbps"
}))]
pub struct PresentTagResponse {
    /// Tag identity as uppercase hex.
    #[schema(example = "04A1B2C3")]
    pub uid: String,

    /// Protocol family name.
    #[serde(rename = "type")]
    #[schema(example = "ISO14443A")]
    pub tag_type: String,

    /// Modulation the tag was last seen at.
    #[schema(example = "ISO14443A@106kbps")]
    pub modulation: String,
}

impl From<&PresentTag> for PresentTagResponse {
    fn from(tag: &PresentTag) -> Self {
        Self {
            uid: tag.identity.to_hex(),
            tag_type: tag.modulation.family.type_name().to_string(),
            modulation: tag.modulation.to_string(),
        }
    }
}

/// Status of one reader's monitor.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "name": "Reader 1",
    "address": "pcsc:ACS ACR122U",
    "state": "polling",
    "device_name": "ACS ACR122U PICC Interface 00 00",
    "session": "01920b6e-7a3c-7d2e-9f00-3c5a1b2d4e6f",
    "cycles": 1200,
    "sessions": 1,
    "open_failures": 0,
    "init_failures": 0,
    "transport_errors": 3,
    "device_errors": 0,
    "malformed_targets": 0,
    "last_error": null,
    "last_cycle_at": "2025-01-15T03:30:00Z",
    "present": [
        { "uid": "04A1B2C3", "type": "ISO14443A", "modulation": "ISO14443A@106kbps" }
    ]
}))]
pub struct ReaderStatusResponse {
    /// Configured reader name.
    #[schema(example = "Reader 1")]
    pub name: String,

    /// Configured `driver:port` address.
    #[schema(example = "pcsc:ACS ACR122U")]
    pub address: String,

    /// Monitor state: closed, opening, initializing, polling or stopped.
    #[schema(example = "polling")]
    pub state: String,

    /// Name reported by the open device.
    #[schema(nullable)]
    pub device_name: Option<String>,

    /// Current device session.
    #[schema(nullable)]
    pub session: Option<Uuid>,

    /// Sweeps reconciled since start.
    pub cycles: u64,

    /// Device sessions opened since start.
    pub sessions: u64,

    /// Failed open attempts.
    pub open_failures: u64,

    /// Failed initiator initializations.
    pub init_failures: u64,

    /// Modulation polls skipped for transport errors.
    pub transport_errors: u64,

    /// Sessions ended by a device error.
    pub device_errors: u64,

    /// Targets excluded for lacking an identity.
    pub malformed_targets: u64,

    /// Most recent error.
    #[schema(nullable)]
    pub last_error: Option<String>,

    /// When the last sweep was reconciled.
    #[schema(nullable)]
    pub last_cycle_at: Option<DateTime<Utc>>,

    /// Tags currently present.
    pub present: Vec<PresentTagResponse>,
}

impl From<ReaderStatus> for ReaderStatusResponse {
    fn from(status: ReaderStatus) -> Self {
        Self {
            present: status.present.iter().map(PresentTagResponse::from).collect(),
            name: status.name,
            address: status.address,
            state: status.state.to_string(),
            device_name: status.device_name,
            session: status.session,
            cycles: status.cycles,
            sessions: status.sessions,
            open_failures: status.open_failures,
            init_failures: status.init_failures,
            transport_errors: status.transport_errors,
            device_errors: status.device_errors,
            malformed_targets: status.malformed_targets,
            last_error: status.last_error,
            last_cycle_at: status.last_cycle_at,
        }
    }
}

/// All readers.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReadersResponse {
    /// Readers in configuration order.
    pub readers: Vec<ReaderStatusResponse>,
}

// ============================================================================
// Handlers
// ============================================================================

/// List every reader with its current status.
#[utoipa::path(
    get,
    path = "/api/readers",
    tag = "readers",
    operation_id = "listReaders",
    summary = "List readers",
    description = "Returns every configured reader with its monitor state, \
        counters and the tags it currently sees.",
    responses(
        (status = 200, description = "Reader statuses", body = ReadersResponse)
    )
)]
pub async fn list_readers(State(state): State<SharedState>) -> Json<ReadersResponse> {
    let state_guard = state.read().await;
    let readers = state_guard
        .reader_statuses()
        .into_iter()
        .map(ReaderStatusResponse::from)
        .collect();
    Json(ReadersResponse { readers })
}

/// Get one reader's status.
#[utoipa::path(
    get,
    path = "/api/readers/{name}",
    tag = "readers",
    operation_id = "getReader",
    summary = "Get reader status",
    params(
        ("name" = String, Path, description = "Configured reader name", example = "Reader 1")
    ),
    responses(
        (status = 200, description = "Reader status", body = ReaderStatusResponse),
        (status = 404, description = "No reader with that name", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn get_reader(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ReaderStatusResponse>> {
    let state_guard = state.read().await;
    let status = state_guard
        .reader_status(&name)
        .ok_or_else(|| ApiError::from(TagwatchError::ReaderNotFound(name)))?;
    Ok(Json(status.into()))
}
