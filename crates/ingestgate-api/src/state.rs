//! Application state shared by every handler.

use ingestgate_core::Config;
use ingestgate_services::UploadSessionManager;
use std::sync::Mutex;
use tokio::task::JoinHandle;

pub struct AppState {
    pub config: Config,
    pub uploads: UploadSessionManager,
    /// Periodic expired-session sweep, when enabled
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl AppState {
    pub fn new(config: Config, uploads: UploadSessionManager) -> Self {
        Self {
            config,
            uploads,
            sweeper: Mutex::new(None),
        }
    }

    pub fn with_sweeper(mut self, handle: JoinHandle<()>) -> Self {
        *self.sweeper.get_mut().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        self
    }

    /// Stop background work owned by the state.
    pub fn shutdown(&self) {
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::info!("Session sweeper stopped");
        }
    }
}
