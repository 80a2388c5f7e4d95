//! Route configuration and setup

use crate::constants::{API_PREFIX, OPENAPI_PATH};
use crate::handlers;
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
    Json, Router,
};
use ingestgate_core::Config;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Headroom for multipart boundaries and the small text fields of a chunk form
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;
/// Upper bound for JSON request bodies
const JSON_BODY_LIMIT_BYTES: usize = 64 * 1024;

/// Setup all application routes
pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Result<Router<()>, anyhow::Error> {
    let cors = setup_cors(config)?;

    // Server-level concurrency limit to protect against resource exhaustion under extreme load
    let http_concurrency_limit = config.http_concurrency_limit();
    tracing::info!(
        http_concurrency_limit = http_concurrency_limit,
        "HTTP concurrency limit layer enabled"
    );

    let app = public_routes()
        .nest(API_PREFIX, upload_routes(config))
        .merge(utoipa_rapidoc::RapiDoc::new(OPENAPI_PATH).path("/docs"))
        .layer(ConcurrencyLimitLayer::new(http_concurrency_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(app)
}

/// Setup CORS configuration
fn setup_cors(config: &Config) -> Result<CorsLayer, anyhow::Error> {
    let cors = if config.cors_origins().iter().any(|o| o == "*") {
        tracing::warn!("CORS configured to allow all origins - not recommended for production");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    } else {
        let origins = config
            .cors_origins()
            .iter()
            .map(|o| {
                o.parse::<HeaderValue>()
                    .map_err(|e| anyhow::anyhow!("Invalid CORS origin '{}': {}", o, e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    };
    Ok(cors)
}

/// Health and documentation routes (unversioned)
fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            OPENAPI_PATH,
            get(|| async { Json(crate::api_doc::get_openapi_spec()) }),
        )
}

/// Resumable upload protocol
fn upload_routes(config: &Config) -> Router<Arc<AppState>> {
    let chunk_body_limit = usize::try_from(config.chunk_size_bytes() + MULTIPART_OVERHEAD_BYTES)
        .unwrap_or(usize::MAX);

    let chunk_route = Router::new()
        .route("/uploads/chunk", post(handlers::uploads::upload_chunk))
        // Chunks are bounded by the configured chunk size rather than axum's 2 MB default
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(chunk_body_limit));

    Router::new()
        .route(
            "/uploads/initialize",
            post(handlers::uploads::initialize_upload),
        )
        .route("/uploads/finalize", post(handlers::uploads::finalize_upload))
        .route("/uploads/cancel", post(handlers::uploads::cancel_upload))
        .route(
            "/uploads/{upload_id}/progress",
            get(handlers::uploads::get_upload_progress),
        )
        .route("/uploads/{upload_id}", get(handlers::uploads::get_upload_info))
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT_BYTES))
        .merge(chunk_route)
}
