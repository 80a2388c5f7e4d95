//! Resumable chunked upload protocol

pub mod expiry;
pub mod locks;
pub mod manager;

pub use manager::{RecoveryStats, UploadSessionManager, UploadSettings};
