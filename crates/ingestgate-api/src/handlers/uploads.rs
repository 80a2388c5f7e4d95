//! Resumable upload handlers.
//!
//! Thin HTTP layer over [`UploadSessionManager`](ingestgate_services::UploadSessionManager):
//! initialize a session, stream verified chunks, finalize into a scanned and
//! certified file, or cancel.

use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::state::AppState;
use crate::utils::upload::extract_chunk_form;
use axum::{
    extract::{Multipart, Path, State},
    response::IntoResponse,
    Json,
};
use ingestgate_core::models::{
    ChunkReceipt, Confidence, FinalizedUpload, ScanLevel, SessionInfo, Threat, UploadTicket,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

/// Request to start an upload session
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitializeUploadRequest {
    /// Original filename; only the final path component is kept
    pub file_name: String,
    /// Total file size in bytes
    pub file_size: u64,
    /// Declared content type (MIME type)
    pub mime_type: String,
}

/// Multipart body of a chunk upload (documentation only)
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
pub struct ChunkUploadForm {
    pub upload_id: Uuid,
    /// 0-based chunk index
    pub chunk_index: u32,
    /// Hex SHA-256 of the chunk bytes
    pub checksum: String,
    #[schema(format = Binary, value_type = String)]
    pub chunk: Vec<u8>,
}

/// Request identifying an upload session
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadIdRequest {
    pub upload_id: Uuid,
}

/// Scan verdict summary returned by finalize
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerdictSummary {
    pub safe: bool,
    pub confidence: Confidence,
    pub level: ScanLevel,
    pub warnings: Vec<String>,
    pub threats: Vec<Threat>,
}

/// Response for a finalized upload
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeUploadResponse {
    pub upload_id: Uuid,
    /// Location of the certified file
    pub file_path: String,
    /// Declared file name after sanitization
    pub file_name: String,
    pub verdict: VerdictSummary,
}

impl From<FinalizedUpload> for FinalizeUploadResponse {
    fn from(upload: FinalizedUpload) -> Self {
        Self {
            upload_id: upload.upload_id,
            file_path: upload.file_path.display().to_string(),
            file_name: upload.file_name,
            verdict: VerdictSummary {
                safe: upload.verdict.safe,
                confidence: upload.verdict.confidence,
                level: upload.verdict.level,
                warnings: upload.verdict.warnings,
                threats: upload.verdict.threats,
            },
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CancelUploadResponse {
    /// Whether a live session was cancelled
    pub success: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgressResponse {
    pub upload_id: Uuid,
    /// Percentage of accepted chunks; 0 for unknown sessions
    pub progress: f64,
}

/// Start a resumable upload session
#[utoipa::path(
    post,
    path = "/api/v0/uploads/initialize",
    tag = "uploads",
    request_body = InitializeUploadRequest,
    responses(
        (status = 200, description = "Upload session created", body = UploadTicket),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 413, description = "Declared size exceeds the ceiling", body = ErrorResponse),
        (status = 415, description = "Unsupported file type", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn initialize_upload(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<InitializeUploadRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    let ticket = state
        .uploads
        .initialize(&request.file_name, request.file_size, &request.mime_type)
        .await?;

    Ok(Json(ticket))
}

/// Upload one chunk of a session
#[utoipa::path(
    post,
    path = "/api/v0/uploads/chunk",
    tag = "uploads",
    request_body(content = ChunkUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Chunk accepted", body = ChunkReceipt),
        (status = 400, description = "Malformed form or chunk out of range", body = ErrorResponse),
        (status = 404, description = "Session not found or expired", body = ErrorResponse),
        (status = 422, description = "Checksum mismatch", body = ErrorResponse)
    )
)]
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, HttpAppError> {
    let form = extract_chunk_form(multipart).await?;

    let receipt = state
        .uploads
        .upload_chunk(form.upload_id, form.chunk_index, &form.data, &form.checksum)
        .await?;

    Ok(Json(receipt))
}

/// Reassemble, validate and scan a completed upload
#[utoipa::path(
    post,
    path = "/api/v0/uploads/finalize",
    tag = "uploads",
    request_body = UploadIdRequest,
    responses(
        (status = 200, description = "File certified", body = FinalizeUploadResponse),
        (status = 404, description = "Session not found or expired", body = ErrorResponse),
        (status = 409, description = "Chunks missing; see missingChunks", body = ErrorResponse),
        (status = 422, description = "Invalid format or malicious content", body = ErrorResponse),
        (status = 503, description = "Scanners could not certify the file; retry later", body = ErrorResponse)
    )
)]
pub async fn finalize_upload(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<UploadIdRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    let finalized = state.uploads.finalize(request.upload_id).await?;
    Ok(Json(FinalizeUploadResponse::from(finalized)))
}

/// Cancel an upload and discard its chunks
#[utoipa::path(
    post,
    path = "/api/v0/uploads/cancel",
    tag = "uploads",
    request_body = UploadIdRequest,
    responses(
        (status = 200, description = "Cancellation result", body = CancelUploadResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn cancel_upload(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<UploadIdRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    let success = state.uploads.cancel(request.upload_id).await?;
    Ok(Json(CancelUploadResponse { success }))
}

/// Percentage of chunks accepted so far
#[utoipa::path(
    get,
    path = "/api/v0/uploads/{upload_id}/progress",
    tag = "uploads",
    params(("upload_id" = Uuid, Path, description = "Upload session ID")),
    responses(
        (status = 200, description = "Upload progress", body = UploadProgressResponse)
    )
)]
pub async fn get_upload_progress(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<Uuid>,
) -> impl IntoResponse {
    let progress = state.uploads.get_progress(upload_id).await;
    Json(UploadProgressResponse {
        upload_id,
        progress,
    })
}

/// Session details, or `null` for unknown or expired sessions
#[utoipa::path(
    get,
    path = "/api/v0/uploads/{upload_id}",
    tag = "uploads",
    params(("upload_id" = Uuid, Path, description = "Upload session ID")),
    responses(
        (status = 200, description = "Session details or null", body = Option<SessionInfo>)
    )
)]
pub async fn get_upload_info(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<Uuid>,
) -> impl IntoResponse {
    Json(state.uploads.get_session_info(upload_id).await)
}
