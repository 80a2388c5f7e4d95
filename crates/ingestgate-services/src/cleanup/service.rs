use crate::upload::UploadSessionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Periodic safety net that purges expired sessions from the durable mirror.
///
/// Per-session timers handle the common case; the sweep catches records
/// whose timers were lost, for example across a crash.
#[derive(Clone)]
pub struct SessionSweeper {
    manager: UploadSessionManager,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(manager: UploadSessionManager, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Start the background sweep.
    /// Returns a JoinHandle for graceful shutdown
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep_interval = interval(self.interval);
            // the first tick completes immediately; recovery already ran at startup
            sweep_interval.tick().await;

            loop {
                sweep_interval.tick().await;
                self.run_once().await;
            }
        })
    }

    /// Run one sweep. Returns the number of purged sessions.
    #[tracing::instrument(skip(self), fields(cleanup.operation = "expire_sessions"))]
    pub async fn run_once(&self) -> usize {
        match self.manager.sweep_expired().await {
            Ok(purged) => {
                if purged > 0 {
                    tracing::info!(purged, "Expired upload sessions purged");
                } else {
                    tracing::debug!("No expired upload sessions");
                }
                purged
            }
            Err(e) => {
                tracing::error!(error = %e, "Session sweep failed");
                0
            }
        }
    }
}
