//! HTTP error response conversion
//!
//! This module provides HTTP-specific error response conversion for AppError.
//!
//! **Preferred handler pattern:** Return `Result<impl IntoResponse, HttpAppError>`. Use
//! `AppError` (or types that implement `Into<AppError>`) for errors and `?` so they
//! become `HttpAppError` and render consistently (status, body, logging).

use axum::{
    extract::rejection::JsonRejection,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ingestgate_core::models::Threat;
use ingestgate_core::{AppError, ErrorMetadata, LogLevel};
use serde::{de::DeserializeOwned, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Machine-readable error code for programmatic handling
    pub code: String,
    /// Whether this error is recoverable (can be retried)
    pub recoverable: bool,
    /// Suggested action for the client (e.g., "Re-send the same chunk")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
    /// Chunk indices still needed before finalize can succeed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_chunks: Option<Vec<u32>>,
    /// Detections that caused a security rejection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threats: Option<Vec<Threat>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
}

impl ErrorResponse {
    /// Build the body for `error`. `expose_details` adds the error chain and
    /// type name; protocol data (missing chunks, threats) is always included.
    pub fn from_app_error(error: &AppError, expose_details: bool) -> Self {
        let (threats, warnings) = match error {
            AppError::MaliciousContent { threats, warnings } => {
                (Some(threats.clone()), Some(warnings.clone()))
            }
            _ => (None, None),
        };

        Self {
            error: error.client_message(),
            details: expose_details.then(|| error.detailed_message()),
            error_type: expose_details.then(|| error.error_type().to_string()),
            code: error.error_code().to_string(),
            recoverable: error.is_recoverable(),
            suggested_action: error.suggested_action().map(String::from),
            missing_chunks: error.missing_chunks().map(<[u32]>::to_vec),
            threats,
            warnings,
        }
    }
}

/// Wrapper type for AppError to implement IntoResponse
/// This is necessary because of Rust's orphan rules - we can't implement
/// IntoResponse (external trait) for AppError (external type from ingestgate-core)
#[derive(Debug)]
pub struct HttpAppError(pub AppError);

impl From<AppError> for HttpAppError {
    fn from(err: AppError) -> Self {
        HttpAppError(err)
    }
}

impl From<anyhow::Error> for HttpAppError {
    fn from(err: anyhow::Error) -> Self {
        HttpAppError(AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        })
    }
}

/// Convert JSON body deserialization failures into a 400 with our ErrorResponse format.
impl From<JsonRejection> for HttpAppError {
    fn from(rejection: JsonRejection) -> Self {
        let body_text = rejection.body_text();
        let message = if body_text.contains("UUID") {
            "Invalid request body: uploadId must be a UUID string".to_string()
        } else {
            format!("Invalid request body: {}", body_text)
        };
        HttpAppError(AppError::InvalidInput(message))
    }
}

/// JSON body extractor that returns our ErrorResponse format (400 + JSON) on deserialization failure.
/// Use this instead of `Json<T>` when you want a consistent API error shape for invalid bodies.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = HttpAppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(inner) = Json::<T>::from_request(req, state)
            .await
            .map_err(HttpAppError::from)?;
        Ok(ValidatedJson(inner))
    }
}

fn log_error(error: &AppError) {
    let error_type = error.error_type();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, error_type = error_type, "Error occurred");
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, error_type = error_type, "Error occurred");
        }
        LogLevel::Error => {
            tracing::error!(error = %error, error_type = error_type, "Error occurred");
        }
    }
}

fn is_production_env() -> bool {
    std::env::var("ENVIRONMENT")
        .or_else(|_| std::env::var("APP_ENV"))
        .map(|env| env.to_lowercase() == "production" || env.to_lowercase() == "prod")
        .unwrap_or(false)
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let app_error = &self.0;

        let status = StatusCode::from_u16(app_error.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        log_error(app_error);

        // Always hide details in production; elsewhere only for non-sensitive errors.
        let expose_details = !is_production_env() && !app_error.is_sensitive();
        let body = ErrorResponse::from_app_error(app_error, expose_details);

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingestgate_core::models::{ScannerKind, Severity, ThreatCategory};

    fn status_of(error: AppError) -> StatusCode {
        HttpAppError(error).into_response().status()
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            status_of(AppError::SessionNotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(AppError::IntegrityMismatch { chunk_index: 1 }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(AppError::IncompleteUpload { missing: vec![2] }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(AppError::ScannerDegraded("down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(AppError::UnsupportedMediaType("exe".into())),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            status_of(AppError::PayloadTooLarge("big".into())),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn test_from_anyhow_is_internal() {
        let HttpAppError(app_err) = anyhow::anyhow!("disk on fire").into();
        assert!(matches!(app_err, AppError::InternalWithSource { .. }));
        assert_eq!(app_err.error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_incomplete_upload_carries_missing_chunks() {
        let error = AppError::IncompleteUpload {
            missing: vec![2, 5],
        };
        let json = serde_json::to_value(ErrorResponse::from_app_error(&error, false)).unwrap();
        assert_eq!(json["code"], "INCOMPLETE_UPLOAD");
        assert_eq!(json["missingChunks"], serde_json::json!([2, 5]));
        assert_eq!(json["recoverable"], true);
        assert!(json.get("details").is_none());
        assert!(json.get("threats").is_none());
    }

    #[test]
    fn test_malicious_content_carries_threats_and_warnings() {
        let error = AppError::MaliciousContent {
            threats: vec![Threat::new(
                ThreatCategory::FormulaInjection,
                "formula-dde",
                Severity::High,
                ScannerKind::Pattern,
            )],
            warnings: vec!["Scan confidence is medium".to_string()],
        };
        let json = serde_json::to_value(ErrorResponse::from_app_error(&error, true)).unwrap();
        assert_eq!(json["code"], "MALICIOUS_CONTENT");
        assert_eq!(json["threats"][0]["signature"], "formula-dde");
        assert_eq!(json["warnings"][0], "Scan confidence is medium");
        assert_eq!(json["errorType"], "MaliciousContent");
        assert!(json["details"].is_string());
    }

    #[test]
    fn test_internal_message_is_generic() {
        let error = AppError::Internal("/var/lib/ingestgate/temp/abc: permission denied".into());
        let body = ErrorResponse::from_app_error(&error, false);
        assert_eq!(body.error, "Internal server error");
        assert!(body.details.is_none());
        assert!(body.suggested_action.is_some());
    }

    /// The serialized body always has "error", "code" and "recoverable".
    #[test]
    fn test_error_response_shape() {
        let body = ErrorResponse::from_app_error(&AppError::InvalidInput("bad".into()), false);
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json.get("error").and_then(|v| v.as_str()), Some("bad"));
        assert_eq!(
            json.get("code").and_then(|v| v.as_str()),
            Some("INVALID_INPUT")
        );
        assert_eq!(json.get("recoverable").and_then(|v| v.as_bool()), Some(false));
        assert!(json.get("suggestedAction").is_some());
    }
}
