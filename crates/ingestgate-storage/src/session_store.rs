use crate::traits::{SessionStore, StorageError, StorageResult};
use async_trait::async_trait;
use ingestgate_core::models::SessionRecord;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const RECORD_EXTENSION: &str = "json";

/// Session mirror backed by one JSON file per upload in a directory
#[derive(Clone, Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Create the store, creating `dir` if needed
    pub async fn new(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();

        fs::create_dir_all(&dir).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create session directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // Ids are uuids, so the file name can never escape the directory.
    fn record_path(&self, upload_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.{}", upload_id, RECORD_EXTENSION))
    }

    async fn read_record(path: &Path) -> StorageResult<Option<SessionRecord>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::ReadFailed(format!(
                    "Failed to read session record {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::Corrupt(format!("{}: {}", path.display(), e)))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, record: &SessionRecord) -> StorageResult<()> {
        let path = self.record_path(record.upload_id);
        let tmp = path.with_extension("json.tmp");

        let data = serde_json::to_vec_pretty(record)
            .map_err(|e| StorageError::WriteFailed(format!("Failed to encode record: {}", e)))?;

        let mut file = fs::File::create(&tmp).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to create file {}: {}", tmp.display(), e))
        })?;
        file.write_all(&data).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to write file {}: {}", tmp.display(), e))
        })?;
        file.sync_all().await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to sync file {}: {}", tmp.display(), e))
        })?;
        drop(file);

        fs::rename(&tmp, &path).await.map_err(|e| {
            StorageError::WriteFailed(format!(
                "Failed to move record into place {}: {}",
                path.display(),
                e
            ))
        })?;

        tracing::trace!(
            upload_id = %record.upload_id,
            chunks = record.uploaded_chunks.len(),
            "Session record persisted"
        );

        Ok(())
    }

    async fn load(&self, upload_id: Uuid) -> StorageResult<Option<SessionRecord>> {
        Self::read_record(&self.record_path(upload_id)).await
    }

    async fn remove(&self, upload_id: Uuid) -> StorageResult<bool> {
        let path = self.record_path(upload_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn list(&self) -> StorageResult<Vec<SessionRecord>> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }

            match Self::read_record(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable session record");
                }
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn record() -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            version: 1,
            upload_id: Uuid::new_v4(),
            file_name: "data.csv".to_string(),
            file_size: 10,
            chunk_size: 4,
            total_chunks: 3,
            uploaded_chunks: vec![0, 2],
            file_path: PathBuf::from("/tmp/upload"),
            created_at: now,
            last_activity: now,
        }
    }

    #[tokio::test]
    async fn test_save_load_remove() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions")).await.unwrap();
        let rec = record();

        store.save(&rec).await.unwrap();
        assert_eq!(store.load(rec.upload_id).await.unwrap(), Some(rec.clone()));

        assert!(store.remove(rec.upload_id).await.unwrap());
        assert!(!store.remove(rec.upload_id).await.unwrap());
        assert_eq!(store.load(rec.upload_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_overwrites_and_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).await.unwrap();
        let mut rec = record();

        store.save(&rec).await.unwrap();
        rec.uploaded_chunks.push(1);
        store.save(&rec).await.unwrap();

        let loaded = store.load(rec.upload_id).await.unwrap().unwrap();
        assert_eq!(loaded.uploaded_chunks, vec![0, 2, 1]);

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_records() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).await.unwrap();
        let rec = record();
        store.save(&rec).await.unwrap();

        std::fs::write(dir.path().join(format!("{}.json", Uuid::new_v4())), b"{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed, vec![rec]);
    }

    #[tokio::test]
    async fn test_load_corrupt_record_is_an_error() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).await.unwrap();
        let id = Uuid::new_v4();
        std::fs::write(dir.path().join(format!("{}.json", id)), b"[]").unwrap();

        assert!(matches!(store.load(id).await, Err(StorageError::Corrupt(_))));
    }
}
