//! Ingestgate Services Layer
//!
//! This crate is the **business service layer**: it hosts the upload session
//! manager and the layered scanning pipeline (pattern scanner, antivirus
//! engine, hash reputation, aggregator), and re-exports a unified API from
//! processing and storage so that the API crate depends on a single service
//! facade. Keep protocol logic and coordination here; keep thin HTTP handling
//! in ingestgate-api.

pub mod cleanup;
pub mod services;
pub mod upload;

pub use cleanup::SessionSweeper;
pub use ingestgate_processing::{sanitize_filename, TabularProfile, TabularValidator, ValidationError};
pub use ingestgate_storage::{
    FileSessionStore, LocalChunkStorage, MemorySessionStore, SessionStore, StorageError,
    StorageResult,
};
pub use services::aggregator::{aggregate, ScanAggregator};
pub use services::clamav::{EngineError, EngineResult, EngineScanner, EngineTransport};
pub use services::pattern_scan::{PatternFindings, PatternScanner};
#[cfg(feature = "reputation")]
pub use services::reputation::{ReputationError, ReputationReport, ReputationScanner};
pub use services::FileScanner;
pub use upload::{RecoveryStats, UploadSessionManager, UploadSettings};
