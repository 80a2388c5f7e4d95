use chrono::{DateTime, Utc};
use ingestgate_core::checksum;
use ingestgate_core::models::{
    total_chunks_for, ChunkReceipt, Confidence, FinalizedUpload, SessionInfo, SessionRecord,
    UploadSession, UploadTicket,
};
use ingestgate_core::{AppError, Clock, Config};
use ingestgate_processing::{sanitize_filename, TabularProfile, TabularValidator, ValidationError};
use ingestgate_storage::{LocalChunkStorage, SessionStore, StorageError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::expiry::ExpiryScheduler;
use super::locks::SessionLocks;
use crate::services::aggregator::ScanAggregator;

/// Slack added to a re-armed timer so it fires strictly after the deadline.
const REARM_SLACK: Duration = Duration::from_millis(1);

/// Protocol settings for the session manager.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSettings {
    pub chunk_size: u64,
    pub max_chunk_count: u32,
    pub session_timeout: Duration,
    /// Reject certified-safe files whose confidence is below this level
    pub required_confidence: Option<Confidence>,
}

impl UploadSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunk_size_bytes(),
            max_chunk_count: config.max_chunk_count(),
            session_timeout: config.session_timeout(),
            required_confidence: config.required_confidence(),
        }
    }
}

/// Outcome of walking the durable mirror.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub restored: usize,
    pub purged: usize,
}

enum Lookup {
    Live(UploadSession),
    /// Existed but was past its deadline; already purged
    Expired,
    Missing,
}

struct Inner {
    sessions: Mutex<HashMap<Uuid, UploadSession>>,
    locks: SessionLocks,
    expiry: ExpiryScheduler,
    store: Arc<dyn SessionStore>,
    chunks: LocalChunkStorage,
    validator: TabularValidator,
    aggregator: Arc<ScanAggregator>,
    clock: Arc<dyn Clock>,
    settings: UploadSettings,
    timeout: chrono::Duration,
}

/// Owns the resumable upload protocol.
///
/// Sessions live in an in-memory map backed by a write-through
/// [`SessionStore`] mirror: every mutation is persisted before it becomes
/// visible in memory, and a cache miss falls back to the mirror. Mutating
/// operations on one session are serialized by a per-session lock; different
/// sessions never block each other.
///
/// Expiry is enforced twice: lazily (every lookup checks the deadline) and by
/// a per-session timer that purges idle sessions in the background.
#[derive(Clone)]
pub struct UploadSessionManager {
    inner: Arc<Inner>,
}

impl UploadSessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        chunks: LocalChunkStorage,
        validator: TabularValidator,
        aggregator: Arc<ScanAggregator>,
        clock: Arc<dyn Clock>,
        settings: UploadSettings,
    ) -> Self {
        let timeout = chrono::Duration::from_std(settings.session_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365));

        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                locks: SessionLocks::new(),
                expiry: ExpiryScheduler::new(),
                store,
                chunks,
                validator,
                aggregator,
                clock,
                settings,
                timeout,
            }),
        }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.inner.settings
    }

    pub fn aggregator(&self) -> &ScanAggregator {
        &self.inner.aggregator
    }

    /// Start a session with the configured chunk size.
    pub async fn initialize(
        &self,
        file_name: &str,
        file_size: u64,
        mime_type: &str,
    ) -> Result<UploadTicket, AppError> {
        self.initialize_with_chunk_size(file_name, file_size, mime_type, self.inner.settings.chunk_size)
            .await
    }

    /// Start a session with an explicit chunk size.
    ///
    /// The declared name, type and size are checked before anything is
    /// created.
    pub async fn initialize_with_chunk_size(
        &self,
        file_name: &str,
        file_size: u64,
        mime_type: &str,
        chunk_size: u64,
    ) -> Result<UploadTicket, AppError> {
        if chunk_size == 0 {
            return Err(AppError::InvalidInput(
                "Chunk size must be greater than zero".to_string(),
            ));
        }

        let file_name = sanitize_filename(file_name)?;
        self.inner
            .validator
            .validate_declared(&file_name, mime_type, file_size)?;

        let total = total_chunks_for(file_size, chunk_size)
            .ok_or_else(|| AppError::InvalidInput("File size must be greater than zero".to_string()))?;
        if total > u64::from(self.inner.settings.max_chunk_count) {
            return Err(AppError::InvalidInput(format!(
                "File requires {} chunks (max: {})",
                total, self.inner.settings.max_chunk_count
            )));
        }

        let upload_id = Uuid::new_v4();
        let session = UploadSession::new(
            upload_id,
            file_name,
            file_size,
            chunk_size,
            total as u32,
            self.inner.chunks.temp_path(upload_id),
            self.inner.clock.now(),
        );

        self.inner.store.save(&SessionRecord::from(&session)).await?;
        self.inner
            .sessions
            .lock()
            .await
            .insert(upload_id, session.clone());
        self.arm_expiry(upload_id, self.inner.settings.session_timeout);

        tracing::info!(
            upload_id = %upload_id,
            file_name = %session.file_name,
            file_size = file_size,
            chunk_size = chunk_size,
            total_chunks = session.total_chunks,
            "Upload session initialized"
        );

        Ok(UploadTicket {
            upload_id,
            chunk_size,
            total_chunks: session.total_chunks,
        })
    }

    /// Accept one chunk.
    ///
    /// The chunk must carry the SHA-256 of its bytes and have exactly its
    /// expected length. Re-sending an accepted index overwrites it without
    /// changing progress.
    #[tracing::instrument(skip_all, fields(upload_id = %upload_id, chunk_index = chunk_index))]
    pub async fn upload_chunk(
        &self,
        upload_id: Uuid,
        chunk_index: u32,
        data: &[u8],
        expected_checksum: &str,
    ) -> Result<ChunkReceipt, AppError> {
        if !checksum::is_valid_digest(expected_checksum) {
            return Err(AppError::InvalidInput(
                "Checksum must be a hex-encoded SHA-256 digest".to_string(),
            ));
        }

        let _guard = self.inner.locks.acquire(upload_id).await;
        let session = self.load_live(upload_id).await?;

        let expected_len = session.expected_chunk_len(chunk_index).ok_or_else(|| {
            AppError::InvalidInput(format!(
                "Chunk index {} out of range (total chunks: {})",
                chunk_index, session.total_chunks
            ))
        })?;
        if data.len() as u64 != expected_len {
            return Err(AppError::InvalidInput(format!(
                "Chunk {} must be {} bytes, got {}",
                chunk_index,
                expected_len,
                data.len()
            )));
        }

        if !checksum::matches(data, expected_checksum) {
            tracing::warn!("Chunk checksum mismatch, chunk rejected");
            return Err(AppError::IntegrityMismatch { chunk_index });
        }

        self.inner
            .chunks
            .write_chunk(upload_id, chunk_index, data)
            .await?;

        let mut updated = session;
        let newly_accepted = updated.accept_chunk(chunk_index, self.inner.clock.now());
        self.inner.store.save(&SessionRecord::from(&updated)).await?;
        let progress = updated.progress();
        self.inner.sessions.lock().await.insert(upload_id, updated);
        self.arm_expiry(upload_id, self.inner.settings.session_timeout);

        tracing::debug!(
            progress = progress,
            duplicate = !newly_accepted,
            "Chunk accepted"
        );

        Ok(ChunkReceipt {
            accepted: true,
            chunk_index,
            progress,
            duplicate: !newly_accepted,
        })
    }

    /// Reassemble, validate and scan a completed upload.
    ///
    /// Recoverable failures (missing chunks, I/O, degraded scanning) leave
    /// the session resumable with its accepted chunks intact. Format and
    /// malware rejections purge every artifact before returning.
    #[tracing::instrument(skip_all, fields(upload_id = %upload_id))]
    pub async fn finalize(&self, upload_id: Uuid) -> Result<FinalizedUpload, AppError> {
        let _guard = self.inner.locks.acquire(upload_id).await;
        let session = self.load_live(upload_id).await?;
        self.inner.expiry.cancel(upload_id);

        if !session.is_complete() {
            let missing = session.missing_chunks();
            tracing::info!(missing = missing.len(), "Finalize attempted on incomplete upload");
            self.revert(session).await;
            return Err(AppError::IncompleteUpload { missing });
        }

        let start = Instant::now();
        let temp_path = session.temp_path.clone();

        let assembled = match self
            .inner
            .chunks
            .assemble(upload_id, session.total_chunks, &temp_path)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Reassembly failed");
                self.discard_temp(&temp_path).await;
                self.revert(session).await;
                return Err(e.into());
            }
        };
        if assembled != session.file_size {
            tracing::error!(
                assembled = assembled,
                declared = session.file_size,
                "Reassembled size does not match declared size"
            );
            self.discard_temp(&temp_path).await;
            self.revert(session).await;
            return Err(AppError::Internal(
                "Reassembled size does not match declared size".to_string(),
            ));
        }

        match self.pre_validate(&session.file_name, &temp_path).await {
            Ok(profile) => {
                tracing::debug!(
                    delimiter = %(profile.delimiter as char).escape_default(),
                    columns = profile.columns,
                    "Structural validation passed"
                );
            }
            Err(ValidationError::Unreadable(msg)) => {
                self.discard_temp(&temp_path).await;
                self.revert(session).await;
                return Err(AppError::Internal(msg));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Structural validation failed, purging upload");
                self.purge(&session).await;
                return Err(e.into());
            }
        }

        let verdict = self.inner.aggregator.scan(&temp_path).await;

        if !verdict.safe {
            if verdict.threats.is_empty() {
                // nothing was detected, the scanners just could not vouch for the file
                self.discard_temp(&temp_path).await;
                self.revert(session).await;
                return Err(AppError::ScannerDegraded(verdict.warnings.join("; ")));
            }

            tracing::warn!(
                threats = verdict.threats.len(),
                highest_severity = ?verdict.highest_severity(),
                "Malicious content detected, purging upload"
            );
            self.purge(&session).await;
            return Err(AppError::MaliciousContent {
                threats: verdict.threats,
                warnings: verdict.warnings,
            });
        }

        if let Some(required) = self.inner.settings.required_confidence {
            if verdict.confidence < required {
                self.discard_temp(&temp_path).await;
                let message = format!(
                    "Scan confidence {} is below the required {}",
                    verdict.confidence, required
                );
                self.revert(session).await;
                return Err(AppError::ScannerDegraded(message));
            }
        }

        let stored_name = processed_file_name(upload_id, &session.file_name, self.inner.clock.now());
        let file_path = match self.inner.chunks.promote(&temp_path, &stored_name).await {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(error = %e, "Failed to move certified file");
                self.discard_temp(&temp_path).await;
                self.revert(session).await;
                return Err(e.into());
            }
        };

        // Commit point: the certified file is in place.
        if let Err(e) = self
            .inner
            .chunks
            .remove_chunks(upload_id, session.total_chunks)
            .await
        {
            tracing::warn!(error = %e, "Failed to delete chunk fragments");
        }
        if let Err(e) = self.inner.store.remove(upload_id).await {
            tracing::warn!(error = %e, "Failed to delete session record");
        }
        self.inner.sessions.lock().await.remove(&upload_id);
        self.inner.expiry.cancel(upload_id);
        self.inner.locks.forget(upload_id).await;

        tracing::info!(
            file_name = %session.file_name,
            file_size = session.file_size,
            confidence = %verdict.confidence,
            warnings = verdict.warnings.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Upload finalized"
        );

        Ok(FinalizedUpload {
            upload_id,
            file_path,
            file_name: session.file_name,
            verdict,
        })
    }

    /// Purge a session and its artifacts. Returns whether a live session existed.
    pub async fn cancel(&self, upload_id: Uuid) -> Result<bool, AppError> {
        let _guard = self.inner.locks.acquire(upload_id).await;
        match self.lookup_locked(upload_id).await? {
            Lookup::Live(session) => {
                self.purge(&session).await;
                tracing::info!(upload_id = %upload_id, "Upload cancelled");
                Ok(true)
            }
            Lookup::Expired | Lookup::Missing => Ok(false),
        }
    }

    /// Progress percentage, 0.0 when the session does not exist.
    pub async fn get_progress(&self, upload_id: Uuid) -> f64 {
        self.observe(upload_id)
            .await
            .map(|s| s.progress())
            .unwrap_or(0.0)
    }

    /// Snapshot of a live session, `None` when it does not exist.
    pub async fn get_session_info(&self, upload_id: Uuid) -> Option<SessionInfo> {
        let session = self.observe(upload_id).await?;
        Some(SessionInfo::from_session(
            &session,
            self.inner.clock.now(),
            self.inner.timeout,
        ))
    }

    /// Walk the durable mirror after a restart: expired or unreadable
    /// records are purged with their artifacts, live ones are cached and
    /// get their expiry timers re-armed.
    pub async fn recover(&self) -> Result<RecoveryStats, AppError> {
        let records = self.inner.store.list().await?;
        let mut stats = RecoveryStats::default();

        for record in records {
            let upload_id = record.upload_id;
            let _guard = self.inner.locks.acquire(upload_id).await;
            if self.inner.sessions.lock().await.contains_key(&upload_id) {
                continue;
            }

            let total_chunks = record.total_chunks.min(self.inner.settings.max_chunk_count);
            match UploadSession::try_from(record) {
                Ok(mut session) => {
                    session.temp_path = self.inner.chunks.temp_path(upload_id);
                    if session.is_expired(self.inner.clock.now(), self.inner.timeout) {
                        self.purge(&session).await;
                        stats.purged += 1;
                    } else {
                        let delay = self.remaining(&session);
                        self.inner.sessions.lock().await.insert(upload_id, session);
                        self.arm_expiry(upload_id, delay);
                        stats.restored += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(upload_id = %upload_id, error = %e, "Discarding unusable session record");
                    self.purge_artifacts(upload_id, Some(total_chunks)).await;
                    stats.purged += 1;
                }
            }
        }

        tracing::info!(
            restored = stats.restored,
            purged = stats.purged,
            "Session recovery completed"
        );
        Ok(stats)
    }

    /// Purge every session past its deadline. Returns how many were purged.
    pub async fn sweep_expired(&self) -> Result<usize, AppError> {
        let now = self.inner.clock.now();
        let timeout = self.inner.timeout;

        let mut candidates: Vec<Uuid> = self
            .inner
            .store
            .list()
            .await?
            .into_iter()
            .filter(|r| now - r.last_activity > timeout)
            .map(|r| r.upload_id)
            .collect();
        candidates.extend(
            self.inner
                .sessions
                .lock()
                .await
                .values()
                .filter(|s| s.is_expired(now, timeout))
                .map(|s| s.id),
        );
        candidates.sort_unstable();
        candidates.dedup();

        let mut purged = 0;
        for upload_id in candidates {
            if self.expire_if_idle(upload_id).await? {
                purged += 1;
            }
        }
        Ok(purged)
    }

    /// Number of sessions currently cached in memory.
    pub async fn active_sessions(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    async fn pre_validate(
        &self,
        file_name: &str,
        path: &Path,
    ) -> Result<TabularProfile, ValidationError> {
        self.inner.validator.validate_extension(file_name)?;
        self.inner.validator.inspect_file(path).await
    }

    /// Read-only lookup that swallows errors.
    ///
    /// A cached, unexpired session is answered from the map without the
    /// session lock, so queries do not wait behind a running finalize.
    /// The map only ever holds committed state.
    async fn observe(&self, upload_id: Uuid) -> Option<UploadSession> {
        let cached = self.inner.sessions.lock().await.get(&upload_id).cloned();
        if let Some(session) = cached {
            if !session.is_expired(self.inner.clock.now(), self.inner.timeout) {
                return Some(session);
            }
        }

        let _guard = self.inner.locks.acquire(upload_id).await;
        match self.lookup_locked(upload_id).await {
            Ok(Lookup::Live(session)) => Some(session),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(upload_id = %upload_id, error = %e, "Session lookup failed");
                None
            }
        }
    }

    /// Live session or `SessionNotFound`. Caller holds the session lock.
    async fn load_live(&self, upload_id: Uuid) -> Result<UploadSession, AppError> {
        match self.lookup_locked(upload_id).await? {
            Lookup::Live(session) => Ok(session),
            Lookup::Expired | Lookup::Missing => Err(AppError::SessionNotFound(upload_id.to_string())),
        }
    }

    /// [`lookup`](Self::lookup) that also drops the lock entry when no
    /// live session exists, so requests for unknown ids leave nothing
    /// behind. Caller holds the session lock.
    async fn lookup_locked(&self, upload_id: Uuid) -> Result<Lookup, AppError> {
        let found = self.lookup(upload_id).await?;
        if matches!(found, Lookup::Missing) {
            self.inner.locks.forget(upload_id).await;
        }
        Ok(found)
    }

    /// Find a session in memory or the mirror, enforcing expiry.
    /// Caller holds the session lock.
    async fn lookup(&self, upload_id: Uuid) -> Result<Lookup, AppError> {
        let cached = self.inner.sessions.lock().await.get(&upload_id).cloned();
        let (session, restored) = match cached {
            Some(session) => (session, false),
            None => match self.restore(upload_id).await? {
                Some(session) => (session, true),
                None => return Ok(Lookup::Missing),
            },
        };

        if session.is_expired(self.inner.clock.now(), self.inner.timeout) {
            tracing::info!(upload_id = %upload_id, "Upload session expired");
            self.purge(&session).await;
            return Ok(Lookup::Expired);
        }

        if restored {
            tracing::info!(upload_id = %upload_id, "Upload session restored from mirror");
            let delay = self.remaining(&session);
            self.inner
                .sessions
                .lock()
                .await
                .insert(upload_id, session.clone());
            self.arm_expiry(upload_id, delay);
        }

        Ok(Lookup::Live(session))
    }

    async fn restore(&self, upload_id: Uuid) -> Result<Option<UploadSession>, AppError> {
        let record = match self.inner.store.load(upload_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(StorageError::Corrupt(msg)) => {
                tracing::warn!(upload_id = %upload_id, error = %msg, "Discarding corrupt session record");
                self.purge_artifacts(upload_id, None).await;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let total_chunks = record.total_chunks.min(self.inner.settings.max_chunk_count);
        match UploadSession::try_from(record) {
            Ok(mut session) => {
                // the record's path is informational; artifacts always live in our upload dir
                session.temp_path = self.inner.chunks.temp_path(upload_id);
                Ok(Some(session))
            }
            Err(e) => {
                tracing::warn!(upload_id = %upload_id, error = %e, "Discarding unusable session record");
                self.purge_artifacts(upload_id, Some(total_chunks)).await;
                Ok(None)
            }
        }
    }

    /// Persist a failed finalize attempt and keep the session resumable.
    async fn revert(&self, mut session: UploadSession) {
        let upload_id = session.id;
        session.touch(self.inner.clock.now());
        if let Err(e) = self.inner.store.save(&SessionRecord::from(&session)).await {
            tracing::error!(upload_id = %upload_id, error = %e, "Failed to persist session");
        }
        self.inner.sessions.lock().await.insert(upload_id, session);
        self.arm_expiry(upload_id, self.inner.settings.session_timeout);
    }

    /// Remove a session from memory, the mirror and disk.
    async fn purge(&self, session: &UploadSession) {
        self.purge_artifacts(session.id, Some(session.total_chunks)).await;
    }

    /// `total_chunks` of `None` means the record was unreadable; fragments
    /// are then found by listing the upload directory.
    async fn purge_artifacts(&self, upload_id: Uuid, total_chunks: Option<u32>) {
        self.inner.expiry.cancel(upload_id);
        self.inner.sessions.lock().await.remove(&upload_id);

        if let Err(e) = self.inner.store.remove(upload_id).await {
            tracing::warn!(upload_id = %upload_id, error = %e, "Failed to delete session record");
        }
        self.discard_temp(&self.inner.chunks.temp_path(upload_id)).await;
        let removed = match total_chunks {
            Some(total) => self.inner.chunks.remove_chunks(upload_id, total).await,
            None => self.inner.chunks.remove_all_chunks(upload_id).await.map(|_| ()),
        };
        if let Err(e) = removed {
            tracing::warn!(upload_id = %upload_id, error = %e, "Failed to delete chunk fragments");
        }

        self.inner.locks.forget(upload_id).await;
        tracing::debug!(upload_id = %upload_id, "Upload session purged");
    }

    async fn discard_temp(&self, path: &Path) {
        if let Err(e) = self.inner.chunks.remove_file(path).await {
            tracing::warn!(error = %e, "Failed to delete reassembly file");
        }
    }

    fn remaining(&self, session: &UploadSession) -> Duration {
        let left = session.expires_at(self.inner.timeout) - self.inner.clock.now();
        left.to_std().unwrap_or(Duration::ZERO) + REARM_SLACK
    }

    fn arm_expiry(&self, upload_id: Uuid, delay: Duration) {
        let inner = Arc::downgrade(&self.inner);
        self.inner.expiry.arm(upload_id, delay, move |generation| async move {
            if let Some(inner) = inner.upgrade() {
                let manager = UploadSessionManager { inner };
                manager.on_timer(upload_id, generation).await;
            }
        });
    }

    async fn on_timer(&self, upload_id: Uuid, generation: u64) {
        if !self.inner.expiry.take_if_current(upload_id, generation) {
            return;
        }
        if let Err(e) = self.expire_if_idle(upload_id).await {
            tracing::warn!(upload_id = %upload_id, error = %e, "Expiry check failed");
        }
    }

    /// Purge the session if it is past its deadline, otherwise re-arm its
    /// timer for the time left. Returns whether it was purged.
    async fn expire_if_idle(&self, upload_id: Uuid) -> Result<bool, AppError> {
        let _guard = self.inner.locks.acquire(upload_id).await;
        match self.lookup_locked(upload_id).await? {
            Lookup::Live(session) => {
                let delay = self.remaining(&session);
                self.arm_expiry(upload_id, delay);
                Ok(false)
            }
            Lookup::Expired => Ok(true),
            Lookup::Missing => Ok(false),
        }
    }
}

/// Collision-resistant name for a certified file.
fn processed_file_name(upload_id: Uuid, file_name: &str, now: DateTime<Utc>) -> String {
    let id = upload_id.simple().to_string();
    format!("{}_{}_{}", now.timestamp_millis(), &id[..8], file_name)
}
