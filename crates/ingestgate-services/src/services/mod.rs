pub mod aggregator;
pub mod clamav;
pub mod pattern_scan;
#[cfg(feature = "reputation")]
pub mod reputation;

use async_trait::async_trait;
use ingestgate_core::models::{ScannerKind, ScannerReport};
use std::path::Path;

/// One layer of the security scan.
///
/// Implementations never fail: problems are reported as a degraded
/// `ScanOutcome::Unknown` inside the report.
#[async_trait]
pub trait FileScanner: Send + Sync {
    fn kind(&self) -> ScannerKind;

    async fn scan(&self, path: &Path) -> ScannerReport;
}

/// Escape and shorten matched bytes for display.
pub(crate) fn evidence_snippet(bytes: &[u8], max_chars: usize) -> String {
    let mut escaped = String::with_capacity(bytes.len());
    for &b in bytes {
        if b == b' ' || b.is_ascii_graphic() {
            escaped.push(b as char);
        } else {
            escaped.push_str(&format!("\\x{:02x}", b));
        }
    }
    if escaped.chars().count() <= max_chars {
        return escaped;
    }
    let mut cut: String = escaped.chars().take(max_chars.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}
