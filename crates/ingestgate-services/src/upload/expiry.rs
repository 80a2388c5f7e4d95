use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Per-session expiry timers.
///
/// Each session has at most one pending timer. Re-arming aborts the previous
/// one, so activity never leaks timers. Every timer carries a generation
/// number; a firing timer must claim its slot with [`take_if_current`]
/// before acting, which makes a stale timer that lost a race with
/// re-arming a no-op.
///
/// [`take_if_current`]: ExpiryScheduler::take_if_current
#[derive(Debug, Default)]
pub struct ExpiryScheduler {
    timers: Mutex<HashMap<Uuid, (u64, JoinHandle<()>)>>,
    next_generation: AtomicU64,
}

impl ExpiryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn timers(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, (u64, JoinHandle<()>)>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Schedule `on_fire(generation)` after `delay`, replacing any pending
    /// timer for `upload_id`.
    pub fn arm<F, Fut>(&self, upload_id: Uuid, delay: Duration, on_fire: F)
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        // Held across spawn so the timer cannot fire before it is registered.
        let mut timers = self.timers();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(generation).await;
        });
        if let Some((_, previous)) = timers.insert(upload_id, (generation, handle)) {
            previous.abort();
        }
    }

    /// Abort the pending timer, if any. Returns whether one was pending.
    pub fn cancel(&self, upload_id: Uuid) -> bool {
        match self.timers().remove(&upload_id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Claim the slot for a firing timer. Returns `false` when the timer
    /// was superseded or cancelled in the meantime.
    pub fn take_if_current(&self, upload_id: Uuid, generation: u64) -> bool {
        let mut timers = self.timers();
        match timers.get(&upload_id) {
            Some((current, _)) if *current == generation => {
                timers.remove(&upload_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, upload_id: Uuid) -> bool {
        self.timers().contains_key(&upload_id)
    }

    pub fn len(&self) -> usize {
        self.timers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ExpiryScheduler {
    fn drop(&mut self) {
        let timers = self.timers.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, (_, handle)) in timers.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_timer_fires() {
        let scheduler = Arc::new(ExpiryScheduler::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        let s = scheduler.clone();
        scheduler.arm(id, Duration::from_millis(20), move |generation| async move {
            if s.take_if_current(id, generation) {
                let _ = tx.send(id);
            }
        });

        let fired = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(fired, Some(id));
        assert!(!scheduler.is_armed(id));
    }

    #[tokio::test]
    async fn test_rearm_replaces_previous_timer() {
        let scheduler = Arc::new(ExpiryScheduler::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        for label in ["first", "second"] {
            let tx = tx.clone();
            let s = scheduler.clone();
            scheduler.arm(id, Duration::from_millis(30), move |generation| async move {
                if s.take_if_current(id, generation) {
                    let _ = tx.send(label);
                }
            });
        }
        assert_eq!(scheduler.len(), 1);

        let fired = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(fired, Some("second"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let scheduler = ExpiryScheduler::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let id = Uuid::new_v4();

        scheduler.arm(id, Duration::from_millis(20), move |_| async move {
            let _ = tx.send(());
        });
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_stale_generation_is_rejected() {
        let scheduler = ExpiryScheduler::new();
        assert!(!scheduler.take_if_current(Uuid::new_v4(), 0));
    }
}
