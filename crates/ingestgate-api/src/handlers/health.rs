//! Health check handler and response type.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use ingestgate_core::models::ScanLevel;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub scan_level: ScanLevel,
    pub active_sessions: usize,
    pub storage: String,
    /// "enabled", "disabled", or omitted when the scan level never uses it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clamav: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reputation: Option<String>,
}

/// Check that a storage directory exists and is a directory.
async fn check_dir(path: &Path) -> String {
    match tokio::time::timeout(CHECK_TIMEOUT, tokio::fs::metadata(path)).await {
        Ok(Ok(meta)) if meta.is_dir() => "healthy".to_string(),
        Ok(Ok(_)) => "unhealthy: not a directory".to_string(),
        Ok(Err(e)) => format!("unhealthy: {}", e.kind()),
        Err(_) => "timeout".to_string(),
    }
}

/// Service health, storage reachability and active scanner set
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service healthy", body = HealthCheckResponse),
        (status = 503, description = "Storage unavailable", body = HealthCheckResponse)
    )
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = &state.config;
    let scan_level = config.scan_level();

    let mut storage = "healthy".to_string();
    for dir in [config.upload_dir(), config.session_dir(), config.processed_dir()] {
        let result = check_dir(dir).await;
        if result != "healthy" {
            tracing::error!(dir = %dir.display(), status = %result, "Storage health check failed");
            storage = result;
            break;
        }
    }

    let (clamav, reputation) = if scan_level == ScanLevel::Comprehensive {
        let clamav = if config.clamav_enabled() {
            "enabled"
        } else {
            "disabled"
        };
        let reputation = match (config.reputation_enabled(), config.virustotal_api_key()) {
            (false, _) => "disabled",
            (true, None) => "not_configured",
            (true, Some(_)) => "enabled",
        };
        (Some(clamav.to_string()), Some(reputation.to_string()))
    } else {
        (None, None)
    };

    let healthy = storage == "healthy";
    let response = HealthCheckResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        scan_level,
        active_sessions: state.uploads.active_sessions().await,
        storage,
        clamav,
        reputation,
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}
