//! Upload session models

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use utoipa::ToSchema;
use uuid::Uuid;

use super::scan::ScanVerdict;

/// Version written into every durable session record.
pub const SESSION_RECORD_VERSION: u32 = 1;

/// Number of chunks needed for `file_size` bytes, or `None` if either input is zero.
pub fn total_chunks_for(file_size: u64, chunk_size: u64) -> Option<u64> {
    if file_size == 0 || chunk_size == 0 {
        return None;
    }
    Some(file_size.div_ceil(chunk_size))
}

/// One in-flight resumable transfer.
///
/// Owned by the session manager; every mutation is mirrored to a
/// [`SessionRecord`] before it becomes visible in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSession {
    pub id: Uuid,
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub accepted_chunks: BTreeSet<u32>,
    /// Reassembly target
    pub temp_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl UploadSession {
    /// Build a fresh session. Callers validate the sizes first; `total_chunks`
    /// must already fit in `u32`.
    pub fn new(
        id: Uuid,
        file_name: String,
        file_size: u64,
        chunk_size: u64,
        total_chunks: u32,
        temp_path: PathBuf,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            file_name,
            file_size,
            chunk_size,
            total_chunks,
            accepted_chunks: BTreeSet::new(),
            temp_path,
            created_at: now,
            last_activity: now,
        }
    }

    /// Percentage of accepted chunks, 0.0..=100.0
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        self.accepted_chunks.len() as f64 / self.total_chunks as f64 * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.accepted_chunks.len() as u64 == self.total_chunks as u64
    }

    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.accepted_chunks.contains(i))
            .collect()
    }

    /// Exact byte length chunk `index` must have, or `None` when out of range.
    pub fn expected_chunk_len(&self, index: u32) -> Option<u64> {
        if index >= self.total_chunks {
            return None;
        }
        let start = index as u64 * self.chunk_size;
        Some((self.file_size - start).min(self.chunk_size))
    }

    /// Mark a chunk accepted. Returns `false` when it was already accepted.
    pub fn accept_chunk(&mut self, index: u32, now: DateTime<Utc>) -> bool {
        self.touch(now);
        self.accepted_chunks.insert(index)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    pub fn expires_at(&self, timeout: Duration) -> DateTime<Utc> {
        self.last_activity + timeout
    }

    /// Inactive for strictly longer than `timeout`
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.last_activity > timeout
    }
}

/// Error converting a durable record back into a live session.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("unsupported session record version {0}")]
    UnsupportedVersion(u32),

    #[error("inconsistent session record: {0}")]
    Inconsistent(String),
}

/// Durable, versioned mirror of an [`UploadSession`].
///
/// The field names are part of the on-disk format and must stay stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub version: u32,
    pub upload_id: Uuid,
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub uploaded_chunks: Vec<u32>,
    pub file_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl From<&UploadSession> for SessionRecord {
    fn from(session: &UploadSession) -> Self {
        Self {
            version: SESSION_RECORD_VERSION,
            upload_id: session.id,
            file_name: session.file_name.clone(),
            file_size: session.file_size,
            chunk_size: session.chunk_size,
            total_chunks: session.total_chunks,
            uploaded_chunks: session.accepted_chunks.iter().copied().collect(),
            file_path: session.temp_path.clone(),
            created_at: session.created_at,
            last_activity: session.last_activity,
        }
    }
}

impl TryFrom<SessionRecord> for UploadSession {
    type Error = RecordError;

    fn try_from(record: SessionRecord) -> Result<Self, Self::Error> {
        if record.version != SESSION_RECORD_VERSION {
            return Err(RecordError::UnsupportedVersion(record.version));
        }

        let expected = total_chunks_for(record.file_size, record.chunk_size)
            .ok_or_else(|| RecordError::Inconsistent("zero file or chunk size".to_string()))?;
        if expected != record.total_chunks as u64 {
            return Err(RecordError::Inconsistent(format!(
                "total chunks {} does not match size {} / chunk {}",
                record.total_chunks, record.file_size, record.chunk_size
            )));
        }

        if let Some(bad) = record
            .uploaded_chunks
            .iter()
            .find(|i| **i >= record.total_chunks)
        {
            return Err(RecordError::Inconsistent(format!(
                "chunk index {} out of range",
                bad
            )));
        }

        Ok(Self {
            id: record.upload_id,
            file_name: record.file_name,
            file_size: record.file_size,
            chunk_size: record.chunk_size,
            total_chunks: record.total_chunks,
            accepted_chunks: record.uploaded_chunks.into_iter().collect(),
            temp_path: record.file_path,
            created_at: record.created_at,
            last_activity: record.last_activity,
        })
    }
}

/// Returned by initialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    pub upload_id: Uuid,
    pub chunk_size: u64,
    pub total_chunks: u32,
}

/// Returned for every accepted chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceipt {
    pub accepted: bool,
    pub chunk_index: u32,
    pub progress: f64,
    /// The index had already been accepted; the bytes were overwritten
    pub duplicate: bool,
}

/// Read-only view of a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub upload_id: Uuid,
    pub file_name: String,
    pub file_size: u64,
    pub progress: f64,
    pub total_chunks: u32,
    pub uploaded_chunks: u32,
    pub missing_chunks: Vec<u32>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Milliseconds until the session expires if no further activity occurs
    pub time_remaining_ms: i64,
}

impl SessionInfo {
    pub fn from_session(session: &UploadSession, now: DateTime<Utc>, timeout: Duration) -> Self {
        let expires_at = session.expires_at(timeout);
        Self {
            upload_id: session.id,
            file_name: session.file_name.clone(),
            file_size: session.file_size,
            progress: session.progress(),
            total_chunks: session.total_chunks,
            uploaded_chunks: session.accepted_chunks.len() as u32,
            missing_chunks: session.missing_chunks(),
            created_at: session.created_at,
            last_activity: session.last_activity,
            expires_at,
            time_remaining_ms: (expires_at - now).num_milliseconds().max(0),
        }
    }
}

/// A reassembled, certified file.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedUpload {
    pub upload_id: Uuid,
    pub file_path: PathBuf,
    pub file_name: String,
    pub verdict: ScanVerdict,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session(file_size: u64, chunk_size: u64) -> UploadSession {
        let total = total_chunks_for(file_size, chunk_size).unwrap() as u32;
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        UploadSession::new(
            Uuid::new_v4(),
            "data.csv".to_string(),
            file_size,
            chunk_size,
            total,
            PathBuf::from("/tmp/x"),
            now,
        )
    }

    #[test]
    fn test_total_chunks_is_ceiling() {
        assert_eq!(total_chunks_for(10, 3), Some(4));
        assert_eq!(total_chunks_for(9, 3), Some(3));
        assert_eq!(total_chunks_for(1, 1024), Some(1));
        assert_eq!(total_chunks_for(0, 3), None);
        assert_eq!(total_chunks_for(3, 0), None);
    }

    #[test]
    fn test_expected_chunk_len_handles_remainder() {
        let s = session(10, 4);
        assert_eq!(s.expected_chunk_len(0), Some(4));
        assert_eq!(s.expected_chunk_len(1), Some(4));
        assert_eq!(s.expected_chunk_len(2), Some(2));
        assert_eq!(s.expected_chunk_len(3), None);
    }

    #[test]
    fn test_accept_is_idempotent() {
        let mut s = session(6, 1);
        let now = s.created_at;
        assert!(s.accept_chunk(1, now));
        let progress = s.progress();
        assert!(!s.accept_chunk(1, now));
        assert_eq!(s.progress(), progress);
        assert_eq!(s.accepted_chunks.len(), 1);
    }

    #[test]
    fn test_missing_chunks() {
        let mut s = session(6, 1);
        let now = s.created_at;
        for i in [0, 1, 3, 4] {
            s.accept_chunk(i, now);
        }
        assert_eq!(s.missing_chunks(), vec![2, 5]);
        assert!(!s.is_complete());
    }

    #[test]
    fn test_expiry_is_strict() {
        let s = session(6, 1);
        let timeout = Duration::seconds(30);
        assert!(!s.is_expired(s.last_activity + timeout, timeout));
        assert!(s.is_expired(s.last_activity + timeout + Duration::milliseconds(1), timeout));
    }

    #[test]
    fn test_record_round_trip_preserves_session() {
        let mut s = session(10, 4);
        s.accept_chunk(2, s.created_at);
        let record = SessionRecord::from(&s);
        assert_eq!(record.uploaded_chunks, vec![2]);

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"uploadId\""));
        let parsed: SessionRecord = serde_json::from_str(&json).unwrap();
        let restored = UploadSession::try_from(parsed).unwrap();
        assert_eq!(restored, s);
    }

    #[test]
    fn test_record_rejects_inconsistent_state() {
        let s = session(10, 4);
        let mut record = SessionRecord::from(&s);
        record.uploaded_chunks.push(7);
        assert!(matches!(
            UploadSession::try_from(record),
            Err(RecordError::Inconsistent(_))
        ));

        let mut record = SessionRecord::from(&s);
        record.version = 99;
        assert_eq!(
            UploadSession::try_from(record),
            Err(RecordError::UnsupportedVersion(99))
        );
    }

    #[test]
    fn test_info_reports_time_remaining() {
        let s = session(10, 4);
        let timeout = Duration::minutes(30);
        let info = SessionInfo::from_session(&s, s.created_at + Duration::minutes(10), timeout);
        assert_eq!(info.time_remaining_ms, Duration::minutes(20).num_milliseconds());
        assert_eq!(info.missing_chunks, vec![0, 1, 2]);

        let late = SessionInfo::from_session(&s, s.created_at + Duration::hours(1), timeout);
        assert_eq!(late.time_remaining_ms, 0);
    }
}
