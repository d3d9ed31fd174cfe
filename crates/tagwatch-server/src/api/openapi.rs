//! OpenAPI specification generation for the tagwatch status API.

use axum::Json;
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::events::{EventResponse, EventsResponse};
use super::health::HealthResponse;
use super::readers::{PresentTagResponse, ReaderStatusResponse, ReadersResponse};

/// Serve the OpenAPI specification as JSON.
///
/// This endpoint is available at `/api/openapi.json`.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty JSON (for writing to file).
/// Used by the gen-openapi binary.
///
/// # Errors
///
/// Returns an error if the specification cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for tagwatch.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "tagwatch API",
        version = "0.1.0",
        description = r#"
# tagwatch API

tagwatch watches contactless (NFC) readers and reports when tags arrive in or
leave a reader's field.

## Overview

This API is read-only:

1. **Readers**: each configured reader's monitor state, counters and the tags it sees right now
2. **Events**: the most recent arrivals and departures across all readers
3. **Health**: service liveness

Readers that are unplugged or failing are retried in the background; their
status shows the last error and how often opening has failed.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local tagwatch daemon")
    ),
    tags(
        (
            name = "system",
            description = "Health checks"
        ),
        (
            name = "readers",
            description = "Reader monitor status and currently present tags"
        ),
        (
            name = "events",
            description = "Recent tag arrivals and departures"
        )
    ),
    paths(
        super::health::health_check,
        super::readers::list_readers,
        super::readers::get_reader,
        super::events::get_events,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            PresentTagResponse,
            ReaderStatusResponse,
            ReadersResponse,
            EventResponse,
            EventsResponse,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "tagwatch API");
        assert!(spec.paths.paths.contains_key("/api/readers/{name}"));
        assert!(spec.paths.paths.contains_key("/api/events"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"tagwatch API\""));
    }
}
