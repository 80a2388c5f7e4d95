//! Pattern threat scanner for delimited text
//!
//! Content is streamed through a fixed signature table in 64 KiB reads. The
//! last 4 KiB of every window is carried into the next one, and every
//! signature's match length is bounded well below that overlap, so a match
//! straddling a read boundary is found exactly once. A match touching the
//! end of a non-final window is deferred to the next window, where its full
//! right-hand context is visible.

use async_trait::async_trait;
use ingestgate_core::models::{
    ScanOutcome, ScannerKind, ScannerReport, Severity, Threat, ThreatCategory,
};
use regex::bytes::{Regex, RegexBuilder};
use std::path::Path;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{evidence_snippet, FileScanner};

pub const READ_BLOCK: usize = 64 * 1024;
pub const WINDOW_OVERLAP: usize = 4 * 1024;
const MAX_EVIDENCE_SAMPLES: usize = 3;
const EVIDENCE_MAX_CHARS: usize = 80;

/// A cell boundary (newline or delimiter), optional padding and opening quote.
const CELL_START: &str = r#"[\r\n,;\t|][ \t]{0,8}"?"#;

/// Immutable detection rule.
#[derive(Debug)]
pub struct Signature {
    pub id: &'static str,
    pub category: ThreatCategory,
    pub severity: Severity,
    regex: Regex,
}

fn signature_table() -> Vec<(&'static str, ThreatCategory, Severity, String)> {
    use Severity::{High, Medium};
    use ThreatCategory::*;

    vec![
        (
            "formula-dde",
            FormulaInjection,
            High,
            format!(
                r"{CELL_START}[=+\-@][ \t]{{0,4}}[a-z][a-z0-9_.]{{0,32}}[ \t]{{0,4}}\|[^\r\n]{{0,128}}?!"
            ),
        ),
        (
            "formula-shell-call",
            FormulaInjection,
            High,
            format!(
                r"{CELL_START}[=+\-@][ \t]{{0,4}}(?:cmd|powershell|pwsh|mshta|rundll32|regsvr32|msiexec|certutil|wscript|cscript)\b"
            ),
        ),
        (
            "script-tag",
            ScriptInjection,
            High,
            r"<script\b[^>]{0,256}>".to_string(),
        ),
        (
            "script-uri",
            ScriptInjection,
            High,
            r"\b(?:javascript|vbscript)[ \t]{0,4}:".to_string(),
        ),
        (
            "command-shell",
            CommandInjection,
            High,
            r"\b(?:cmd(?:\.exe)?[ \t]{1,8}/c|powershell(?:\.exe)?[ \t]{1,8}-[a-z]|(?:ba)?sh[ \t]{1,8}-c)\b"
                .to_string(),
        ),
        (
            "command-eval",
            CommandInjection,
            High,
            r"\b(?:eval|exec)[ \t]{0,4}\(".to_string(),
        ),
        (
            "command-macro",
            CommandInjection,
            High,
            r"\b(?:shell|createobject)[ \t]{0,4}\(|\bwscript\.shell\b".to_string(),
        ),
        (
            "formula-dangerous-function",
            FormulaInjection,
            Medium,
            format!(
                r"{CELL_START}[=+\-@][ \t]{{0,4}}(?:hyperlink|webservice|importxml|importdata|importhtml|importfeed|importrange|filterxml|call|register)[ \t]{{0,4}}\("
            ),
        ),
        (
            "formula-function-call",
            FormulaInjection,
            Medium,
            format!(r"{CELL_START}[=@][ \t]{{0,4}}[a-z][a-z0-9_.]{{0,32}}[ \t]{{0,4}}\("),
        ),
        (
            "script-data-html",
            ScriptInjection,
            Medium,
            r"\bdata:text/html".to_string(),
        ),
        (
            "script-event-handler",
            ScriptInjection,
            Medium,
            r"<[a-z][a-z0-9]{0,16}\b[^>]{0,256}\bon[a-z]{3,24}[ \t]{0,4}=".to_string(),
        ),
        (
            "command-substitution",
            CommandInjection,
            Medium,
            r"\$\([^)\r\n]{1,128}\)".to_string(),
        ),
        (
            "url-executable",
            SuspiciousUrl,
            Medium,
            r#"\bhttps?://[^\s,"'/]{1,253}/[^\s,"']{0,512}?\.(?:exe|bat|cmd|scr|com|pif|ps1|vbs|msi)\b"#
                .to_string(),
        ),
        (
            "path-traversal",
            PathTraversal,
            Medium,
            r"\.\.[/\\]".to_string(),
        ),
        ("nul-byte", ControlCharacter, Medium, r"\x00".to_string()),
        (
            "control-character",
            ControlCharacter,
            Medium,
            r"[\x01-\x08\x0B\x0C\x0E-\x1F\x7F]".to_string(),
        ),
    ]
}

/// Result of streaming one input through the signature table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternFindings {
    pub threats: Vec<Threat>,
    pub bytes_scanned: u64,
    pub stopped_early: bool,
    pub truncated: bool,
}

impl PatternFindings {
    fn record(&mut self, signature: &Signature, evidence: &[u8]) {
        let trimmed = trim_cell_start(evidence);
        let snippet = evidence_snippet(trimmed, EVIDENCE_MAX_CHARS);

        match self
            .threats
            .iter_mut()
            .find(|t| t.signature == signature.id)
        {
            Some(threat) => {
                if threat.evidence.len() < MAX_EVIDENCE_SAMPLES {
                    threat.evidence.push(snippet);
                }
            }
            None => self.threats.push(
                Threat::new(
                    signature.category,
                    signature.id,
                    signature.severity,
                    ScannerKind::Pattern,
                )
                .with_evidence(snippet),
            ),
        }
    }
}

fn trim_cell_start(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !matches!(b, b'\r' | b'\n' | b',' | b';' | b'\t' | b'|' | b' '))
        .unwrap_or(bytes.len());
    &bytes[start..]
}

/// Fast, format-specific scanner that always runs.
#[derive(Debug)]
pub struct PatternScanner {
    signatures: Vec<Signature>,
    max_bytes: u64,
}

impl PatternScanner {
    /// Compile the built-in signature table. `max_bytes` caps how much of a
    /// file is scanned.
    pub fn new(max_bytes: u64) -> Result<Self, regex::Error> {
        let signatures = signature_table()
            .into_iter()
            .map(|(id, category, severity, pattern)| {
                let regex = RegexBuilder::new(&pattern)
                    .case_insensitive(true)
                    .unicode(false)
                    .build()?;
                Ok(Signature {
                    id,
                    category,
                    severity,
                    regex,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            signatures,
            max_bytes,
        })
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Scan an in-memory buffer
    pub async fn scan_bytes(&self, data: &[u8]) -> PatternFindings {
        // reading from a slice cannot fail
        self.scan_reader(data).await.unwrap_or_default()
    }

    /// Stream `reader` through the signature table.
    pub async fn scan_reader<R>(&self, mut reader: R) -> std::io::Result<PatternFindings>
    where
        R: AsyncRead + Unpin,
    {
        let mut findings = PatternFindings::default();
        let mut block = vec![0u8; READ_BLOCK];

        // Stream positions count the sentinel as position 0, so file byte k
        // sits at k + 1.
        let mut window: Vec<u8> = Vec::with_capacity(WINDOW_OVERLAP + READ_BLOCK + 1);
        window.push(b'\n');
        let mut window_base: u64 = 0;
        let mut seen_upto: u64 = 0;
        let mut consumed: u64 = 0;

        loop {
            let budget = self
                .max_bytes
                .saturating_sub(consumed)
                .min(READ_BLOCK as u64) as usize;
            let n = if budget > 0 {
                read_full(&mut reader, &mut block[..budget]).await?
            } else {
                0
            };
            consumed += n as u64;
            window.extend_from_slice(&block[..n]);

            let eof = n < budget;
            let at_cap = consumed >= self.max_bytes;
            let is_final = eof || at_cap;
            let considered_end = if is_final {
                window.len()
            } else {
                window.len() - 1
            };

            if self.match_window(&window, window_base, seen_upto, considered_end, &mut findings) {
                findings.stopped_early = true;
                break;
            }
            seen_upto = window_base + considered_end as u64;

            if is_final {
                if at_cap && !eof {
                    findings.truncated = has_more(&mut reader).await?;
                }
                break;
            }

            let keep = window.len().min(WINDOW_OVERLAP);
            let dropped = window.len() - keep;
            window.drain(..dropped);
            window_base += dropped as u64;
        }

        findings.bytes_scanned = consumed;
        Ok(findings)
    }

    /// Returns true when a high-severity signature matched.
    fn match_window(
        &self,
        window: &[u8],
        window_base: u64,
        seen_upto: u64,
        considered_end: usize,
        findings: &mut PatternFindings,
    ) -> bool {
        for signature in &self.signatures {
            for m in signature.regex.find_iter(window) {
                if m.end() > considered_end {
                    break;
                }
                if window_base + m.end() as u64 <= seen_upto {
                    continue;
                }
                findings.record(signature, m.as_bytes());
                if signature.severity == Severity::High {
                    return true;
                }
            }
        }
        false
    }
}

async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn has_more<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<bool> {
    let mut probe = [0u8; 1];
    Ok(reader.read(&mut probe).await? > 0)
}

#[async_trait]
impl FileScanner for PatternScanner {
    fn kind(&self) -> ScannerKind {
        ScannerKind::Pattern
    }

    async fn scan(&self, path: &Path) -> ScannerReport {
        let start = Instant::now();

        let result = match tokio::fs::File::open(path).await {
            Ok(file) => self.scan_reader(file).await,
            Err(e) => Err(e),
        };

        let findings = match result {
            Ok(findings) => findings,
            Err(e) => {
                tracing::error!(error = %e, "Pattern scan could not read file");
                return ScannerReport::new(
                    ScannerKind::Pattern,
                    ScanOutcome::unknown(format!("failed to read file: {}", e)),
                )
                .with_elapsed_ms(start.elapsed().as_millis() as u64);
            }
        };

        tracing::debug!(
            threats = findings.threats.len(),
            bytes_scanned = findings.bytes_scanned,
            stopped_early = findings.stopped_early,
            truncated = findings.truncated,
            duration_ms = start.elapsed().as_millis() as u64,
            "Pattern scan completed"
        );

        let outcome = if findings.threats.is_empty() {
            ScanOutcome::Safe
        } else {
            ScanOutcome::Unsafe {
                threats: findings.threats,
            }
        };

        ScannerReport {
            scanner: ScannerKind::Pattern,
            outcome,
            elapsed_ms: start.elapsed().as_millis() as u64,
            bytes_scanned: Some(findings.bytes_scanned),
            stopped_early: findings.stopped_early,
            truncated: findings.truncated,
        }
    }
}
