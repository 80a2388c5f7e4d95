//! SHA-256 checksum helpers
//!
//! Digests are lowercase hex. Comparison against a client-supplied digest
//! ignores case and surrounding whitespace.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Block size used when digesting files.
pub const FILE_DIGEST_BLOCK: usize = 64 * 1024;

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Whether `data` hashes to `expected` (hex, case-insensitive).
pub fn matches(data: &[u8], expected: &str) -> bool {
    let expected = expected.trim();
    if expected.len() != 64 {
        return false;
    }
    sha256_hex(data).eq_ignore_ascii_case(expected)
}

/// Whether `value` looks like a hex SHA-256 digest.
pub fn is_valid_digest(value: &str) -> bool {
    let value = value.trim();
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Digest a file without loading it into memory.
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; FILE_DIGEST_BLOCK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
