//! Recent presence events.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tagwatch_core::{ReaderEvent, TagEvent};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::state::{SharedState, RECENT_EVENTS};

/// Creates the events router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_events))
}

/// Query parameters for the events endpoint.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// Only events from this reader.
    #[param(example = "Reader 1")]
    pub reader: Option<String>,

    /// Maximum number of events to return (at most 100).
    #[param(example = 20, minimum = 1, maximum = 100)]
    pub limit: Option<usize>,
}

/// One arrival or departure.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "reader": "Reader 1",
    "session": "01920b6e-7a3c-7d2e-9f00-3c5a1b2d4e6f",
    "observed_at": "2025-01-15T03:30:00Z",
    "kind": "arrived",
    "uid": "04A1B2C3",
    "type": "ISO14443A",
    "target": { "family": "type_a", "atqa": "0044", "sak": 8, "uid": "04A1B2C3", "ats": "" }
}))]
pub struct EventResponse {
    /// Reader that observed the event.
    pub reader: String,

    /// Device session the event belongs to.
    pub session: Uuid,

    /// When the sweep that produced it completed.
    pub observed_at: DateTime<Utc>,

    /// `arrived` or `departed`.
    #[schema(example = "arrived")]
    pub kind: String,

    /// Tag identity as uppercase hex.
    #[schema(example = "04A1B2C3")]
    pub uid: String,

    /// Protocol family name, arrivals only.
    #[serde(rename = "type")]
    #[schema(nullable)]
    pub tag_type: Option<String>,

    /// Family-specific metadata, arrivals only.
    #[schema(value_type = Option<Object>, nullable)]
    pub target: Option<serde_json::Value>,
}

impl From<&ReaderEvent> for EventResponse {
    fn from(event: &ReaderEvent) -> Self {
        let (kind, tag_type, target) = match &event.event {
            TagEvent::Arrived { target, .. } => (
                "arrived",
                Some(target.type_name().to_string()),
                serde_json::to_value(target).ok(),
            ),
            TagEvent::Departed { .. } => ("departed", None, None),
        };

        Self {
            reader: event.reader.clone(),
            session: event.session,
            observed_at: event.observed_at,
            kind: kind.to_string(),
            uid: event.event.identity().to_hex(),
            tag_type,
            target,
        }
    }
}

/// Recent events, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventsResponse {
    /// Events, newest first.
    pub events: Vec<EventResponse>,

    /// Number of events returned.
    pub count: usize,
}

/// Get recent arrivals and departures.
#[utoipa::path(
    get,
    path = "/api/events",
    tag = "events",
    operation_id = "getEvents",
    summary = "Get recent events",
    description = "Returns the most recent arrivals and departures across all \
        readers, newest first. Only the last 100 events are kept.",
    params(EventsQuery),
    responses(
        (status = 200, description = "Recent events", body = EventsResponse)
    )
)]
pub async fn get_events(
    State(state): State<SharedState>,
    Query(query): Query<EventsQuery>,
) -> Json<EventsResponse> {
    let limit = query.limit.unwrap_or(RECENT_EVENTS).clamp(1, RECENT_EVENTS);
    let state_guard = state.read().await;
    let events: Vec<EventResponse> = state_guard
        .recent_events()
        .filter(|e| query.reader.as_ref().map_or(true, |r| &e.reader == r))
        .take(limit)
        .map(EventResponse::from)
        .collect();

    Json(EventsResponse {
        count: events.len(),
        events,
    })
}
