//! OpenAPI documentation.

use utoipa::OpenApi;

use crate::error;
use crate::handlers;
use ingestgate_core::models;

/// Returns the OpenAPI document served at `/api/openapi.json`.
pub fn get_openapi_spec() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Ingestgate API",
        version = "0.1.0",
        description = "Resumable, integrity-checked ingestion of delimited text files. Uploads are split into SHA-256 verified chunks, reassembled, validated and scanned for injection payloads and malware before being certified. All upload endpoints are versioned under /api/v0/."
    ),
    paths(
        handlers::uploads::initialize_upload,
        handlers::uploads::upload_chunk,
        handlers::uploads::finalize_upload,
        handlers::uploads::cancel_upload,
        handlers::uploads::get_upload_progress,
        handlers::uploads::get_upload_info,
        handlers::health::health_check,
    ),
    components(schemas(
        handlers::uploads::InitializeUploadRequest,
        handlers::uploads::ChunkUploadForm,
        handlers::uploads::UploadIdRequest,
        handlers::uploads::FinalizeUploadResponse,
        handlers::uploads::VerdictSummary,
        handlers::uploads::CancelUploadResponse,
        handlers::uploads::UploadProgressResponse,
        handlers::health::HealthCheckResponse,
        models::UploadTicket,
        models::ChunkReceipt,
        models::SessionInfo,
        models::Threat,
        models::ThreatCategory,
        models::Severity,
        models::Confidence,
        models::ScanLevel,
        models::ScannerKind,
        error::ErrorResponse,
    )),
    tags(
        (name = "uploads", description = "Resumable upload protocol"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_lists_upload_paths() {
        let spec = get_openapi_spec();
        for path in [
            "/api/v0/uploads/initialize",
            "/api/v0/uploads/chunk",
            "/api/v0/uploads/finalize",
            "/api/v0/uploads/cancel",
            "/api/v0/uploads/{upload_id}/progress",
            "/api/v0/uploads/{upload_id}",
            "/health",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
