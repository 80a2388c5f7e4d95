use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per upload id.
///
/// Mutating operations on the same session are serialized; operations on
/// different sessions never contend beyond the short map lookup.
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `upload_id`.
    pub async fn acquire(&self, upload_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(upload_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop the entry for a session that no longer exists.
    ///
    /// A caller still waiting on the old mutex proceeds normally and finds
    /// the session gone.
    pub async fn forget(&self, upload_id: Uuid) {
        self.locks.lock().await.remove(&upload_id);
    }

    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_id_is_serialized() {
        let locks = Arc::new(SessionLocks::new());
        let id = Uuid::new_v4();

        let guard = locks.acquire(id).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_ids_do_not_block() {
        let locks = SessionLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.acquire(Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(locks.len().await, 2);
    }

    #[tokio::test]
    async fn test_forget_removes_entry() {
        let locks = SessionLocks::new();
        let id = Uuid::new_v4();
        drop(locks.acquire(id).await);
        locks.forget(id).await;
        assert_eq!(locks.len().await, 0);
    }
}
