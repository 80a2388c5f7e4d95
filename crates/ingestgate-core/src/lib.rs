//! Ingestgate Core Library
//!
//! This crate provides the domain models, error types, configuration, clock and
//! checksum helpers shared across all ingestgate components.

pub mod checksum;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BaseConfig, Config, EngineMode, GatewayConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
