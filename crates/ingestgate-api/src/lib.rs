//! Ingestgate API Library
//!
//! This crate provides the HTTP handlers for the resumable upload protocol and
//! the application setup (state, routes, telemetry, server).

mod api_doc;
pub mod constants;
mod handlers;
pub mod setup;
mod telemetry;
mod utils;

// Public modules
pub mod error;
pub mod state;

// Re-exports
pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
