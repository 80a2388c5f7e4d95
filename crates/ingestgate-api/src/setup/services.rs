//! Service initialization and application state setup

use crate::state::AppState;
use anyhow::{Context, Result};
use ingestgate_core::models::ScanLevel;
use ingestgate_core::{Clock, Config, EngineMode, SystemClock};
use ingestgate_services::{
    EngineScanner, FileScanner, FileSessionStore, LocalChunkStorage, PatternScanner,
    ScanAggregator, SessionStore, SessionSweeper, TabularValidator, UploadSessionManager,
    UploadSettings,
};
use std::sync::Arc;

/// Initialize storage, scanners and the session manager, recover persisted
/// sessions, and return the application state
pub async fn initialize_services(config: &Config) -> Result<Arc<AppState>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let uploads = build_upload_manager(config, clock).await?;

    let stats = uploads
        .recover()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to recover upload sessions: {}", e))?;
    tracing::info!(
        restored = stats.restored,
        purged = stats.purged,
        "Upload sessions recovered"
    );

    let mut state = AppState::new(config.clone(), uploads.clone());

    match config.session_sweep_interval() {
        Some(interval) => {
            let sweeper = Arc::new(SessionSweeper::new(uploads, interval));
            state = state.with_sweeper(sweeper.start());
            tracing::info!(
                interval_secs = interval.as_secs(),
                "Session sweeper started"
            );
        }
        None => tracing::info!("Session sweeper disabled"),
    }

    Ok(Arc::new(state))
}

/// Build the session manager and its collaborators from configuration.
pub async fn build_upload_manager(
    config: &Config,
    clock: Arc<dyn Clock>,
) -> Result<UploadSessionManager> {
    let store: Arc<dyn SessionStore> = Arc::new(
        FileSessionStore::new(config.session_dir())
            .await
            .context("Failed to open session store")?,
    );
    let chunks = LocalChunkStorage::new(config.upload_dir(), config.processed_dir())
        .await
        .context("Failed to create chunk storage")?;

    let validator = TabularValidator::new(
        config.max_upload_size_bytes(),
        config.allowed_extensions().to_vec(),
        config.allowed_content_types().to_vec(),
    );

    let aggregator = build_aggregator(config, clock.clone())?;

    tracing::info!(
        upload_dir = %config.upload_dir().display(),
        processed_dir = %config.processed_dir().display(),
        session_dir = %config.session_dir().display(),
        chunk_size = config.chunk_size_bytes(),
        max_upload_mb = config.max_upload_size_bytes() / 1024 / 1024,
        session_timeout_secs = config.session_timeout().as_secs(),
        "Upload storage initialized"
    );

    Ok(UploadSessionManager::new(
        store,
        chunks,
        validator,
        Arc::new(aggregator),
        clock,
        UploadSettings::from_config(config),
    ))
}

/// Assemble the scanner set for the configured level.
fn build_aggregator(config: &Config, clock: Arc<dyn Clock>) -> Result<ScanAggregator> {
    let pattern = PatternScanner::new(config.pattern_scan_max_bytes())
        .context("Failed to compile pattern signatures")?;
    let mut aggregator = ScanAggregator::new(Arc::new(pattern), config.scan_level(), clock);

    if config.scan_level() != ScanLevel::Comprehensive {
        tracing::info!("Lightweight scanning: pattern scanner only");
        return Ok(aggregator);
    }

    if config.clamav_enabled() {
        let engine = match config.clamav_mode() {
            EngineMode::Subprocess => {
                EngineScanner::subprocess(config.clamav_binary(), config.clamav_timeout())
            }
            EngineMode::Daemon => EngineScanner::daemon(
                config.clamav_host(),
                config.clamav_port(),
                config.clamav_timeout(),
            ),
        };
        tracing::info!(transport = ?engine.transport(), "Antivirus engine enabled");
        let engine: Arc<dyn FileScanner> = Arc::new(engine);
        aggregator = aggregator.with_engine(engine);
    }

    if config.reputation_enabled() {
        aggregator = with_reputation(aggregator, config)?;
    }

    Ok(aggregator)
}

#[cfg(feature = "reputation")]
fn with_reputation(aggregator: ScanAggregator, config: &Config) -> Result<ScanAggregator> {
    let scanner = ingestgate_services::ReputationScanner::new(
        config.reputation_base_url(),
        config.virustotal_api_key().map(str::to_string),
        config.reputation_timeout(),
        config.reputation_high_threshold(),
    )
    .context("Failed to build reputation client")?;
    tracing::info!(
        configured = scanner.is_configured(),
        "Hash reputation lookup enabled"
    );
    let scanner: Arc<dyn FileScanner> = Arc::new(scanner);
    Ok(aggregator.with_reputation(scanner))
}

#[cfg(not(feature = "reputation"))]
fn with_reputation(aggregator: ScanAggregator, _config: &Config) -> Result<ScanAggregator> {
    tracing::warn!("REPUTATION_ENABLED is set but the reputation feature is not compiled in");
    Ok(aggregator)
}
