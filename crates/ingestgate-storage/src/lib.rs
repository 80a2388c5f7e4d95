//! Ingestgate Storage Library
//!
//! This crate provides the durable session mirror ([`SessionStore`] with a
//! file-backed and an in-memory implementation) and local filesystem storage
//! for chunk fragments, reassembled files and certified output.
//!
//! # On-disk layout
//!
//! - `{session_dir}/{upload_id}.json`: session record
//! - `{upload_dir}/{upload_id}.chunk.{index}`: accepted chunk
//! - `{upload_dir}/{upload_id}`: reassembly target
//! - `{processed_dir}/{name}`: certified file

pub mod chunks;
pub mod memory;
pub mod session_store;
pub mod traits;

// Re-export commonly used types
pub use chunks::LocalChunkStorage;
pub use memory::MemorySessionStore;
pub use session_store::FileSessionStore;
pub use traits::{SessionStore, StorageError, StorageResult};
