use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Relay diagnostics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Rooms, connections and host usage", body = DiagnosticsResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

/// Live presence of a document
#[utoipa::path(
    get,
    path = "/api/v1/documents/{doc_id}/presence",
    params(
        ("doc_id" = String, Path, description = "Document id")
    ),
    responses(
        (status = 200, description = "Awareness records of the document", body = PresenceResponse),
        (status = 404, description = "No room for this document", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn doc_presence_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        diagnostics_doc,
        doc_presence_doc,
    ),
    components(
        schemas(HealthResponse, DiagnosticsResponse, PresenceResponse, SlotState, ErrorResponse)
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;
