//! Scan verdict models
//!
//! Every scanner reports a [`ScanOutcome`]: a definitive pass, a definitive
//! detection carrying its threats, or a degraded `Unknown` result. The
//! aggregator folds the per-scanner [`ScannerReport`]s into one [`ScanVerdict`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Severity of a detected threat.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// How much the verdict can be trusted, based on which scanners answered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Low => write!(f, "low"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::High => write!(f, "high"),
        }
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Confidence::Low),
            "medium" => Ok(Confidence::Medium),
            "high" => Ok(Confidence::High),
            other => Err(format!("unknown confidence level: {}", other)),
        }
    }
}

/// Which scanners run at finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScanLevel {
    /// Pattern scan only.
    Lightweight,
    /// Pattern scan plus the external engine and reputation lookup (when enabled).
    Comprehensive,
}

impl fmt::Display for ScanLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanLevel::Lightweight => write!(f, "lightweight"),
            ScanLevel::Comprehensive => write!(f, "comprehensive"),
        }
    }
}

impl FromStr for ScanLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lightweight" | "light" => Ok(ScanLevel::Lightweight),
            "comprehensive" | "full" => Ok(ScanLevel::Comprehensive),
            other => Err(format!("unknown scan level: {}", other)),
        }
    }
}

/// Scanner that produced a report or threat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScannerKind {
    Pattern,
    Engine,
    Reputation,
}

impl fmt::Display for ScannerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScannerKind::Pattern => write!(f, "pattern"),
            ScannerKind::Engine => write!(f, "engine"),
            ScannerKind::Reputation => write!(f, "reputation"),
        }
    }
}

/// Human-readable threat category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ThreatCategory {
    FormulaInjection,
    ScriptInjection,
    CommandInjection,
    PathTraversal,
    ControlCharacter,
    SuspiciousUrl,
    Malware,
    ReputationDetection,
}

impl fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreatCategory::FormulaInjection => "formula-injection",
            ThreatCategory::ScriptInjection => "script-injection",
            ThreatCategory::CommandInjection => "command-injection",
            ThreatCategory::PathTraversal => "path-traversal",
            ThreatCategory::ControlCharacter => "control-character",
            ThreatCategory::SuspiciousUrl => "suspicious-url",
            ThreatCategory::Malware => "malware",
            ThreatCategory::ReputationDetection => "reputation-detection",
        };
        f.write_str(name)
    }
}

/// One detected threat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Threat {
    pub category: ThreatCategory,
    /// Identifier of the rule or engine signature that fired
    pub signature: String,
    pub severity: Severity,
    /// Matched evidence (escaped, truncated samples)
    pub evidence: Vec<String>,
    pub scanner: ScannerKind,
}

impl Threat {
    pub fn new(
        category: ThreatCategory,
        signature: impl Into<String>,
        severity: Severity,
        scanner: ScannerKind,
    ) -> Self {
        Self {
            category,
            signature: signature.into(),
            severity,
            evidence: Vec::new(),
            scanner,
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence.push(evidence.into());
        self
    }
}

impl fmt::Display for Threat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} severity, {})",
            self.category, self.severity, self.signature
        )
    }
}

/// Tagged result of a single scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// Definitive pass.
    Safe,
    /// Definitive detection.
    Unsafe { threats: Vec<Threat> },
    /// Degraded: the scanner could not produce a verdict.
    Unknown { reason: String },
}

impl ScanOutcome {
    pub fn unknown(reason: impl Into<String>) -> Self {
        ScanOutcome::Unknown {
            reason: reason.into(),
        }
    }

    /// `Some(true)` for a pass, `Some(false)` for a detection, `None` when degraded.
    pub fn safe(&self) -> Option<bool> {
        match self {
            ScanOutcome::Safe => Some(true),
            ScanOutcome::Unsafe { .. } => Some(false),
            ScanOutcome::Unknown { .. } => None,
        }
    }

    pub fn is_definitive(&self) -> bool {
        !self.is_degraded()
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ScanOutcome::Unknown { .. })
    }

    pub fn threats(&self) -> &[Threat] {
        match self {
            ScanOutcome::Unsafe { threats } => threats,
            _ => &[],
        }
    }
}

/// Report from one scanner run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScannerReport {
    pub scanner: ScannerKind,
    pub outcome: ScanOutcome,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_scanned: Option<u64>,
    /// A high-severity hit ended the scan before the end of input
    #[serde(default)]
    pub stopped_early: bool,
    /// The byte cap was reached before the end of input
    #[serde(default)]
    pub truncated: bool,
}

impl ScannerReport {
    pub fn new(scanner: ScannerKind, outcome: ScanOutcome) -> Self {
        Self {
            scanner,
            outcome,
            elapsed_ms: 0,
            bytes_scanned: None,
            stopped_early: false,
            truncated: false,
        }
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }
}

/// Aggregated, immutable result of scanning one completed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanVerdict {
    pub safe: bool,
    pub confidence: Confidence,
    pub level: ScanLevel,
    pub threats: Vec<Threat>,
    pub warnings: Vec<String>,
    pub reports: Vec<ScannerReport>,
    pub scanned_at: DateTime<Utc>,
}

impl ScanVerdict {
    pub fn highest_severity(&self) -> Option<Severity> {
        self.threats.iter().map(|t| t.severity).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_safety_flags() {
        assert_eq!(ScanOutcome::Safe.safe(), Some(true));
        assert_eq!(ScanOutcome::unknown("engine missing").safe(), None);
        assert!(ScanOutcome::unknown("timeout").is_degraded());

        let unsafe_outcome = ScanOutcome::Unsafe {
            threats: vec![Threat::new(
                ThreatCategory::Malware,
                "Eicar-Signature",
                Severity::High,
                ScannerKind::Engine,
            )],
        };
        assert_eq!(unsafe_outcome.safe(), Some(false));
        assert_eq!(unsafe_outcome.threats().len(), 1);
        assert!(unsafe_outcome.is_definitive());
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(ScanOutcome::unknown("no key")).unwrap();
        assert_eq!(json["status"], "unknown");
        assert_eq!(json["reason"], "no key");
    }

    #[test]
    fn category_uses_kebab_case() {
        let json = serde_json::to_value(ThreatCategory::FormulaInjection).unwrap();
        assert_eq!(json, "formula-injection");
        assert_eq!(ThreatCategory::ScriptInjection.to_string(), "script-injection");
    }

    #[test]
    fn parse_levels() {
        assert_eq!("Comprehensive".parse::<ScanLevel>(), Ok(ScanLevel::Comprehensive));
        assert_eq!("light".parse::<ScanLevel>(), Ok(ScanLevel::Lightweight));
        assert!("paranoid".parse::<ScanLevel>().is_err());
        assert_eq!(" HIGH ".parse::<Confidence>(), Ok(Confidence::High));
        assert!(Confidence::Low < Confidence::Medium);
    }
}
