//! Error types module
//!
//! This module provides the error taxonomy shared by every ingestgate crate.
//! Component errors (storage, validation, scanner adapters) are converted into
//! `AppError` at the service boundary, and `AppError` describes its own HTTP
//! presentation through [`ErrorMetadata`].

use std::io;

use crate::models::Threat;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues and security rejections
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
/// This trait allows errors to self-describe their HTTP response characteristics
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "SESSION_NOT_FOUND")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Upload session not found: {0}")]
    SessionNotFound(String),

    #[error("Checksum mismatch for chunk {chunk_index}")]
    IntegrityMismatch { chunk_index: u32 },

    #[error("Upload incomplete: {} chunk(s) missing", missing.len())]
    IncompleteUpload { missing: Vec<u32> },

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Malicious content detected: {} threat(s)", threats.len())]
    MaliciousContent {
        threats: Vec<Threat>,
        warnings: Vec<String>,
    },

    #[error("Scan confidence too low: {0}")]
    ScannerDegraded(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File too large: {0}")]
    PayloadTooLarge(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
/// client_message stays per-variant for dynamic content.
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::SessionNotFound(_) => (
            404,
            "SESSION_NOT_FOUND",
            false,
            Some("Start a new upload; the session expired or never existed"),
            false,
            LogLevel::Debug,
        ),
        AppError::IntegrityMismatch { .. } => (
            422,
            "INTEGRITY_MISMATCH",
            true,
            Some("Re-send the same chunk"),
            false,
            LogLevel::Warn,
        ),
        AppError::IncompleteUpload { .. } => (
            409,
            "INCOMPLETE_UPLOAD",
            true,
            Some("Upload the missing chunks and finalize again"),
            false,
            LogLevel::Debug,
        ),
        AppError::InvalidFormat(_) => (
            422,
            "INVALID_FORMAT",
            false,
            Some("Upload a well-formed delimited text file"),
            false,
            LogLevel::Warn,
        ),
        AppError::MaliciousContent { .. } => (
            422,
            "MALICIOUS_CONTENT",
            false,
            Some("Remove the flagged content and upload the file again"),
            false,
            LogLevel::Warn,
        ),
        AppError::ScannerDegraded(_) => (
            503,
            "SCANNER_DEGRADED",
            true,
            Some("Retry once the scanning services are available"),
            false,
            LogLevel::Warn,
        ),
        AppError::InvalidInput(_) => (
            400,
            "INVALID_INPUT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::PayloadTooLarge(_) => (
            413,
            "PAYLOAD_TOO_LARGE",
            false,
            Some("Reduce file size"),
            false,
            LogLevel::Debug,
        ),
        AppError::UnsupportedMediaType(_) => (
            415,
            "UNSUPPORTED_MEDIA_TYPE",
            false,
            Some("Upload a CSV file"),
            false,
            LogLevel::Debug,
        ),
        AppError::Internal(_) => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::SessionNotFound(_) => "SessionNotFound",
            AppError::IntegrityMismatch { .. } => "IntegrityMismatch",
            AppError::IncompleteUpload { .. } => "IncompleteUpload",
            AppError::InvalidFormat(_) => "InvalidFormat",
            AppError::MaliciousContent { .. } => "MaliciousContent",
            AppError::ScannerDegraded(_) => "ScannerDegraded",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::PayloadTooLarge(_) => "PayloadTooLarge",
            AppError::UnsupportedMediaType(_) => "UnsupportedMediaType",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }

    /// Missing chunk indices carried by `IncompleteUpload`
    pub fn missing_chunks(&self) -> Option<&[u32]> {
        match self {
            AppError::IncompleteUpload { missing } => Some(missing),
            _ => None,
        }
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::SessionNotFound(_) => "Upload session not found or expired".to_string(),
            AppError::IntegrityMismatch { chunk_index } => {
                format!("Checksum mismatch for chunk {}", chunk_index)
            }
            AppError::IncompleteUpload { missing } => {
                let listed: Vec<String> = missing.iter().take(20).map(|i| i.to_string()).collect();
                let suffix = if missing.len() > 20 { ", ..." } else { "" };
                format!(
                    "Upload incomplete: missing chunks [{}{}]",
                    listed.join(", "),
                    suffix
                )
            }
            AppError::InvalidFormat(ref msg) => format!("File validation failed: {}", msg),
            AppError::MaliciousContent { threats, .. } => format!(
                "Security scan rejected the file: {} threat(s) detected",
                threats.len()
            ),
            AppError::ScannerDegraded(ref msg) => msg.clone(),
            AppError::InvalidInput(ref msg) => msg.clone(),
            AppError::PayloadTooLarge(ref msg) => msg.clone(),
            AppError::UnsupportedMediaType(ref msg) => msg.clone(),
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::InternalWithSource { .. } => "Internal server error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ScannerKind, Severity, ThreatCategory};

    #[test]
    fn test_error_metadata_session_not_found() {
        let err = AppError::SessionNotFound("abc".to_string());
        assert_eq!(err.http_status_code(), 404);
        assert_eq!(err.error_code(), "SESSION_NOT_FOUND");
        assert!(!err.is_recoverable());
        assert!(!err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_error_metadata_integrity_mismatch_is_recoverable() {
        let err = AppError::IntegrityMismatch { chunk_index: 3 };
        assert_eq!(err.http_status_code(), 422);
        assert_eq!(err.error_code(), "INTEGRITY_MISMATCH");
        assert!(err.is_recoverable());
        assert!(err.client_message().contains('3'));
    }

    #[test]
    fn test_error_metadata_incomplete_upload_lists_missing() {
        let err = AppError::IncompleteUpload {
            missing: vec![2, 5],
        };
        assert_eq!(err.http_status_code(), 409);
        assert!(err.is_recoverable());
        assert_eq!(err.missing_chunks(), Some(&[2u32, 5][..]));
        assert_eq!(err.client_message(), "Upload incomplete: missing chunks [2, 5]");
    }

    #[test]
    fn test_error_metadata_malicious_content() {
        let err = AppError::MaliciousContent {
            threats: vec![Threat::new(
                ThreatCategory::FormulaInjection,
                "dde-command",
                Severity::High,
                ScannerKind::Pattern,
            )],
            warnings: vec![],
        };
        assert_eq!(err.http_status_code(), 422);
        assert_eq!(err.error_code(), "MALICIOUS_CONTENT");
        assert!(!err.is_recoverable());
        assert_eq!(err.log_level(), LogLevel::Warn);
        assert!(err.client_message().contains("1 threat"));
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let err = AppError::Internal("failed to open /var/uploads/temp/x".to_string());
        assert_eq!(err.http_status_code(), 500);
        assert!(err.is_sensitive());
        assert_eq!(err.client_message(), "Internal server error");
        assert!(!err.client_message().contains("/var"));

        let err = AppError::from(anyhow::anyhow!("disk on fire"));
        assert_eq!(err.error_type(), "Internal");
        assert_eq!(err.client_message(), "Internal server error");
    }

    #[test]
    fn test_error_metadata_suggested_actions() {
        let err = AppError::InvalidInput("test".to_string());
        assert_eq!(
            err.suggested_action(),
            Some("Check request parameters and try again")
        );

        let err = AppError::IncompleteUpload { missing: vec![0] };
        assert_eq!(
            err.suggested_action(),
            Some("Upload the missing chunks and finalize again")
        );
    }

    #[test]
    fn test_io_error_converts_to_internal() {
        let err: AppError = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
    }
}
