use crate::traits::{SessionStore, StorageResult};
use async_trait::async_trait;
use ingestgate_core::models::SessionRecord;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Non-durable session store for tests and single-shot tools
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    records: Mutex<HashMap<Uuid, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, record: &SessionRecord) -> StorageResult<()> {
        self.records
            .lock()
            .await
            .insert(record.upload_id, record.clone());
        Ok(())
    }

    async fn load(&self, upload_id: Uuid) -> StorageResult<Option<SessionRecord>> {
        Ok(self.records.lock().await.get(&upload_id).cloned())
    }

    async fn remove(&self, upload_id: Uuid) -> StorageResult<bool> {
        Ok(self.records.lock().await.remove(&upload_id).is_some())
    }

    async fn list(&self) -> StorageResult<Vec<SessionRecord>> {
        Ok(self.records.lock().await.values().cloned().collect())
    }
}
