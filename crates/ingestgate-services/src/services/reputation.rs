//! Hash reputation lookup
//!
//! Only the SHA-256 digest of a file leaves the host. The lookup uses the
//! VirusTotal v3 `files/{sha256}` resource and reads the last analysis
//! statistics.

use async_trait::async_trait;
use ingestgate_core::checksum;
use ingestgate_core::models::{
    ScanOutcome, ScannerKind, ScannerReport, Severity, Threat, ThreatCategory,
};
use serde_json::Value;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::FileScanner;

pub const DEFAULT_BASE_URL: &str = "https://www.virustotal.com/api/v3";
const PERMALINK_BASE: &str = "https://www.virustotal.com/gui/file";

#[derive(Error, Debug)]
pub enum ReputationError {
    #[error("No reputation API key configured")]
    MissingApiKey,

    #[error("Failed to hash file: {0}")]
    Digest(#[from] std::io::Error),

    #[error("Reputation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Hash not known to the reputation service")]
    UnknownHash,

    #[error("Reputation service returned HTTP {0}")]
    Status(u16),

    #[error("Unexpected reputation response: {0}")]
    Decode(String),
}

/// Detection counts for one digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReputationReport {
    pub malicious: u64,
    pub total: u64,
    pub permalink: String,
}

/// Read `data.attributes.last_analysis_stats` from a file report.
pub fn parse_file_report(sha256: &str, body: &Value) -> Result<ReputationReport, ReputationError> {
    let stats = body
        .pointer("/data/attributes/last_analysis_stats")
        .and_then(Value::as_object)
        .ok_or_else(|| ReputationError::Decode("missing last_analysis_stats".to_string()))?;

    let malicious = stats.get("malicious").and_then(Value::as_u64).unwrap_or(0);
    let total = stats.values().filter_map(Value::as_u64).sum();

    Ok(ReputationReport {
        malicious,
        total,
        permalink: format!("{}/{}", PERMALINK_BASE, sha256),
    })
}

/// Map detection counts to an outcome. More than `high_threshold` detections
/// is high severity.
pub fn classify(report: &ReputationReport, high_threshold: u32) -> ScanOutcome {
    if report.malicious == 0 {
        return ScanOutcome::Safe;
    }

    let severity = if report.malicious > u64::from(high_threshold) {
        Severity::High
    } else {
        Severity::Medium
    };

    ScanOutcome::Unsafe {
        threats: vec![Threat::new(
            ThreatCategory::ReputationDetection,
            "hash-reputation",
            severity,
            ScannerKind::Reputation,
        )
        .with_evidence(format!(
            "{}/{} engines flagged this file",
            report.malicious, report.total
        ))
        .with_evidence(report.permalink.clone())],
    }
}

/// Reputation scanner backed by an HTTP lookup service.
#[derive(Debug, Clone)]
pub struct ReputationScanner {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    high_threshold: u32,
}

impl ReputationScanner {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        high_threshold: u32,
    ) -> Result<Self, ReputationError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            high_threshold,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Look up a precomputed digest.
    pub async fn lookup(&self, sha256: &str) -> Result<ReputationReport, ReputationError> {
        let api_key = self.api_key.as_ref().ok_or(ReputationError::MissingApiKey)?;

        let response = self
            .client
            .get(format!("{}/files/{}", self.base_url, sha256))
            .header("x-apikey", api_key)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ReputationError::UnknownHash);
        }
        if !status.is_success() {
            return Err(ReputationError::Status(status.as_u16()));
        }

        let body: Value = response.json().await?;
        parse_file_report(sha256, &body)
    }
}

#[async_trait]
impl FileScanner for ReputationScanner {
    fn kind(&self) -> ScannerKind {
        ScannerKind::Reputation
    }

    async fn scan(&self, path: &Path) -> ScannerReport {
        let start = Instant::now();

        let result = match self.api_key {
            None => Err(ReputationError::MissingApiKey),
            Some(_) => match checksum::sha256_file(path).await {
                Ok(digest) => self.lookup(&digest).await,
                Err(e) => Err(e.into()),
            },
        };

        let outcome = match result {
            Ok(report) => {
                tracing::info!(
                    malicious = report.malicious,
                    total = report.total,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Reputation lookup completed"
                );
                classify(&report, self.high_threshold)
            }
            Err(ReputationError::MissingApiKey) => {
                tracing::debug!("Reputation lookup skipped: no API key");
                ScanOutcome::unknown(ReputationError::MissingApiKey.to_string())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reputation lookup failed");
                ScanOutcome::unknown(e.to_string())
            }
        };

        ScannerReport::new(ScannerKind::Reputation, outcome)
            .with_elapsed_ms(start.elapsed().as_millis() as u64)
    }
}
