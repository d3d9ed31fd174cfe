//! HTTP API routes and handlers.
//!
//! The API is read-only and organized by domain:
//! - `health` - Service health checks
//! - `readers` - Per-reader monitor status and present tags
//! - `events` - Recent arrivals and departures
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod error;
pub mod events;
pub mod health;
pub mod openapi;
pub mod readers;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /readers           - All readers
/// ├── /readers/{name}    - One reader
/// ├── /events            - Recent events
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .merge(health::router())
        .nest(
            "/api",
            Router::new()
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/readers", readers::router())
                .nest("/events", events::router()),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
