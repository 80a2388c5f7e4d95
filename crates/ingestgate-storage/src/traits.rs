//! Storage abstraction trait
//!
//! This module defines the durable session mirror contract. The upload
//! manager treats it as a write-through store: every session mutation is
//! upserted here before it is applied in memory.

use async_trait::async_trait;
use ingestgate_core::models::SessionRecord;
use ingestgate_core::AppError;
use thiserror::Error;
use uuid::Uuid;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable mirror of upload sessions, keyed by upload id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace the record for `record.upload_id`
    async fn save(&self, record: &SessionRecord) -> StorageResult<()>;

    /// Load a record, `None` if it does not exist
    async fn load(&self, upload_id: Uuid) -> StorageResult<Option<SessionRecord>>;

    /// Remove a record. Returns whether one existed.
    async fn remove(&self, upload_id: Uuid) -> StorageResult<bool>;

    /// All readable records. Unreadable entries are skipped and logged.
    async fn list(&self) -> StorageResult<Vec<SessionRecord>>;
}
