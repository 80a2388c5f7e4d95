use chrono::{DateTime, Utc};
use futures::future::join_all;
use ingestgate_core::models::{
    Confidence, ScanLevel, ScanOutcome, ScanVerdict, ScannerKind, ScannerReport,
};
use ingestgate_core::Clock;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::FileScanner;

/// Runs the configured scanners over one completed file and folds their
/// reports into a [`ScanVerdict`].
pub struct ScanAggregator {
    pattern: Arc<dyn FileScanner>,
    engine: Option<Arc<dyn FileScanner>>,
    reputation: Option<Arc<dyn FileScanner>>,
    level: ScanLevel,
    clock: Arc<dyn Clock>,
}

impl ScanAggregator {
    pub fn new(pattern: Arc<dyn FileScanner>, level: ScanLevel, clock: Arc<dyn Clock>) -> Self {
        Self {
            pattern,
            engine: None,
            reputation: None,
            level,
            clock,
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn FileScanner>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_reputation(mut self, reputation: Arc<dyn FileScanner>) -> Self {
        self.reputation = Some(reputation);
        self
    }

    pub fn level(&self) -> ScanLevel {
        self.level
    }

    /// Scan `path` with every scanner the level enables.
    ///
    /// The pattern scanner always runs. External scanners run concurrently
    /// in comprehensive mode, even when the pattern scan already found
    /// something, so the verdict carries every detection.
    pub async fn scan(&self, path: &Path) -> ScanVerdict {
        let start = Instant::now();

        let mut scanners: Vec<&Arc<dyn FileScanner>> = vec![&self.pattern];
        if self.level == ScanLevel::Comprehensive {
            scanners.extend(self.engine.iter());
            scanners.extend(self.reputation.iter());
        }

        let reports = join_all(scanners.into_iter().map(|s| s.scan(path))).await;
        let verdict = aggregate(self.level, reports, self.clock.now());

        tracing::info!(
            level = %self.level,
            safe = verdict.safe,
            confidence = %verdict.confidence,
            threats = verdict.threats.len(),
            warnings = verdict.warnings.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "File scan completed"
        );

        verdict
    }
}

/// Fold scanner reports into a verdict.
///
/// `safe` is the AND of every definitive outcome; degraded outcomes neither
/// clear nor flag the file. With no definitive outcome at all the verdict
/// fails closed.
pub fn aggregate(
    level: ScanLevel,
    reports: Vec<ScannerReport>,
    scanned_at: DateTime<Utc>,
) -> ScanVerdict {
    let definitive: Vec<&ScannerReport> = reports
        .iter()
        .filter(|r| r.outcome.is_definitive())
        .collect();

    let external_definitive = definitive.iter().any(|r| r.scanner != ScannerKind::Pattern);
    let pattern_positive = reports
        .iter()
        .any(|r| r.scanner == ScannerKind::Pattern && r.outcome.safe() == Some(false));

    let confidence = if external_definitive || pattern_positive {
        Confidence::High
    } else if definitive.len() == 1 {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    let mut warnings = Vec::new();
    let safe = if definitive.is_empty() {
        warnings.push("No scanner produced a definitive result; file rejected".to_string());
        false
    } else {
        definitive.iter().all(|r| r.outcome.safe() == Some(true))
    };

    if confidence < Confidence::High {
        warnings.push(format!("Scan confidence is {}", confidence));
    }

    for report in &reports {
        if let ScanOutcome::Unknown { reason } = &report.outcome {
            warnings.push(format!("{} scanner unavailable: {}", report.scanner, reason));
        }
        if report.truncated {
            warnings.push(format!(
                "{} scan stopped at the byte cap after {} bytes",
                report.scanner,
                report.bytes_scanned.unwrap_or(0)
            ));
        }
    }

    let threats = reports
        .iter()
        .flat_map(|r| r.outcome.threats().iter().cloned())
        .collect();

    ScanVerdict {
        safe,
        confidence,
        level,
        threats,
        warnings,
        reports,
        scanned_at,
    }
}
