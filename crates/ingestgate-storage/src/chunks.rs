use crate::traits::{StorageError, StorageResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Local filesystem storage for chunk fragments, reassembly files and
/// certified output.
///
/// Temporary artifacts are named after the upload id only, so the declared
/// file name never reaches the temp directory.
#[derive(Clone, Debug)]
pub struct LocalChunkStorage {
    upload_dir: PathBuf,
    processed_dir: PathBuf,
}

impl LocalChunkStorage {
    /// Create a new LocalChunkStorage, creating both directories if needed
    pub async fn new(
        upload_dir: impl Into<PathBuf>,
        processed_dir: impl Into<PathBuf>,
    ) -> StorageResult<Self> {
        let upload_dir = upload_dir.into();
        let processed_dir = processed_dir.into();

        for dir in [&upload_dir, &processed_dir] {
            fs::create_dir_all(dir).await.map_err(|e| {
                StorageError::ConfigError(format!(
                    "Failed to create storage directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        Ok(Self {
            upload_dir,
            processed_dir,
        })
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    /// Reassembly target for an upload
    pub fn temp_path(&self, upload_id: Uuid) -> PathBuf {
        self.upload_dir.join(upload_id.to_string())
    }

    pub fn chunk_path(&self, upload_id: Uuid, index: u32) -> PathBuf {
        self.upload_dir.join(format!("{}.chunk.{}", upload_id, index))
    }

    /// Validate a file name for the processed directory.
    ///
    /// Rejects anything that could resolve outside of it.
    fn processed_path(&self, file_name: &str) -> StorageResult<PathBuf> {
        if file_name.is_empty()
            || file_name.contains("..")
            || file_name.contains('/')
            || file_name.contains('\\')
            || file_name.contains('\0')
        {
            return Err(StorageError::InvalidKey(
                "File name contains invalid characters".to_string(),
            ));
        }
        Ok(self.processed_dir.join(file_name))
    }

    /// Write one chunk atomically. An existing fragment for the same index is replaced.
    pub async fn write_chunk(&self, upload_id: Uuid, index: u32, data: &[u8]) -> StorageResult<()> {
        let path = self.chunk_path(upload_id, index);
        let tmp = self
            .upload_dir
            .join(format!("{}.chunk.{}.part", upload_id, index));

        let mut file = fs::File::create(&tmp).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to create file {}: {}", tmp.display(), e))
        })?;
        file.write_all(data).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to write file {}: {}", tmp.display(), e))
        })?;
        file.sync_all().await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to sync file {}: {}", tmp.display(), e))
        })?;
        drop(file);

        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StorageError::WriteFailed(format!(
                "Failed to move chunk into place {}: {}",
                path.display(),
                e
            )));
        }

        Ok(())
    }

    /// Concatenate chunks `0..total_chunks` in index order into `target`.
    /// Returns the number of bytes written.
    pub async fn assemble(
        &self,
        upload_id: Uuid,
        total_chunks: u32,
        target: &Path,
    ) -> StorageResult<u64> {
        let start = std::time::Instant::now();

        let mut out = fs::File::create(target).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to create file {}: {}", target.display(), e))
        })?;

        let mut written = 0u64;
        for index in 0..total_chunks {
            let path = self.chunk_path(upload_id, index);
            let mut chunk = match fs::File::open(&path).await {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(StorageError::NotFound(format!("chunk {}", index)));
                }
                Err(e) => {
                    return Err(StorageError::ReadFailed(format!(
                        "Failed to open chunk {}: {}",
                        path.display(),
                        e
                    )))
                }
            };
            written += tokio::io::copy(&mut chunk, &mut out).await.map_err(|e| {
                StorageError::WriteFailed(format!("Failed to append chunk {}: {}", index, e))
            })?;
        }

        out.sync_all().await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to sync file {}: {}", target.display(), e))
        })?;

        tracing::debug!(
            upload_id = %upload_id,
            chunks = total_chunks,
            size_bytes = written,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Chunks reassembled"
        );

        Ok(written)
    }

    /// Delete every fragment of an upload. Missing fragments are ignored.
    pub async fn remove_chunks(&self, upload_id: Uuid, total_chunks: u32) -> StorageResult<()> {
        for index in 0..total_chunks {
            self.remove_file(&self.chunk_path(upload_id, index)).await?;
        }
        Ok(())
    }

    /// Delete every fragment of an upload whose chunk count is unknown.
    ///
    /// Lists the upload directory for `{upload_id}.chunk.` entries, which
    /// also catches half-written `.part` files. Returns how many were removed.
    pub async fn remove_all_chunks(&self, upload_id: Uuid) -> StorageResult<usize> {
        let prefix = format!("{}.chunk.", upload_id);
        let mut entries = fs::read_dir(&self.upload_dir).await.map_err(|e| {
            StorageError::ReadFailed(format!(
                "Failed to list {}: {}",
                self.upload_dir.display(),
                e
            ))
        })?;

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            StorageError::ReadFailed(format!(
                "Failed to list {}: {}",
                self.upload_dir.display(),
                e
            ))
        })? {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                self.remove_file(&entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete a file, treating "already gone" as success
    pub async fn remove_file(&self, path: &Path) -> StorageResult<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Move a certified file into the processed directory under `file_name`.
    ///
    /// Falls back to copy + delete when a rename is impossible (for example
    /// across filesystems).
    pub async fn promote(&self, source: &Path, file_name: &str) -> StorageResult<PathBuf> {
        let dest = self.processed_path(file_name)?;

        if fs::rename(source, &dest).await.is_err() {
            fs::copy(source, &dest).await.map_err(|e| {
                StorageError::WriteFailed(format!(
                    "Failed to copy into processed directory {}: {}",
                    dest.display(),
                    e
                ))
            })?;
            if let Err(e) = self.remove_file(source).await {
                tracing::warn!(error = %e, "Failed to remove source after copy");
            }
        }

        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn storage(root: &Path) -> LocalChunkStorage {
        LocalChunkStorage::new(root.join("temp"), root.join("processed"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_write_and_assemble_in_index_order() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let id = Uuid::new_v4();

        // out of order on purpose
        storage.write_chunk(id, 2, b"ghi").await.unwrap();
        storage.write_chunk(id, 0, b"abc").await.unwrap();
        storage.write_chunk(id, 1, b"def").await.unwrap();

        let target = storage.temp_path(id);
        let written = storage.assemble(id, 3, &target).await.unwrap();
        assert_eq!(written, 9);
        assert_eq!(std::fs::read(&target).unwrap(), b"abcdefghi");
    }

    #[tokio::test]
    async fn test_write_chunk_overwrites() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let id = Uuid::new_v4();

        storage.write_chunk(id, 0, b"old").await.unwrap();
        storage.write_chunk(id, 0, b"new").await.unwrap();
        assert_eq!(std::fs::read(storage.chunk_path(id, 0)).unwrap(), b"new");
        assert!(!storage.upload_dir().join(format!("{}.chunk.0.part", id)).exists());
    }

    #[tokio::test]
    async fn test_assemble_reports_missing_chunk() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let id = Uuid::new_v4();
        storage.write_chunk(id, 0, b"abc").await.unwrap();

        let result = storage.assemble(id, 2, &storage.temp_path(id)).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_chunks_is_idempotent() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let id = Uuid::new_v4();
        storage.write_chunk(id, 0, b"abc").await.unwrap();

        storage.remove_chunks(id, 3).await.unwrap();
        storage.remove_chunks(id, 3).await.unwrap();
        assert!(!storage.chunk_path(id, 0).exists());
    }

    #[tokio::test]
    async fn test_remove_all_chunks_without_count() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        storage.write_chunk(id, 0, b"abc").await.unwrap();
        storage.write_chunk(id, 7, b"def").await.unwrap();
        std::fs::write(storage.upload_dir().join(format!("{}.chunk.9.part", id)), b"x").unwrap();
        storage.write_chunk(other, 0, b"keep").await.unwrap();

        assert_eq!(storage.remove_all_chunks(id).await.unwrap(), 3);
        assert!(!storage.chunk_path(id, 7).exists());
        assert!(storage.chunk_path(other, 0).exists());
        assert_eq!(storage.remove_all_chunks(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_promote_moves_file() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let id = Uuid::new_v4();
        let source = storage.temp_path(id);
        std::fs::write(&source, b"a,b\n1,2\n").unwrap();

        let dest = storage.promote(&source, "123_abc_data.csv").await.unwrap();
        assert!(dest.starts_with(storage.processed_dir()));
        assert!(!source.exists());
        assert_eq!(std::fs::read(dest).unwrap(), b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_promote_rejects_traversal() {
        let dir = tempdir().unwrap();
        let storage = storage(dir.path()).await;
        let source = storage.temp_path(Uuid::new_v4());
        std::fs::write(&source, b"x").unwrap();

        for name in ["../escape.csv", "a/b.csv", ""] {
            let result = storage.promote(&source, name).await;
            assert!(matches!(result, Err(StorageError::InvalidKey(_))));
        }
        assert!(source.exists());
    }
}
