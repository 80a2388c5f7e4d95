use async_trait::async_trait;
use ingestgate_core::models::{
    ScanOutcome, ScannerKind, ScannerReport, Severity, Threat, ThreatCategory,
};
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;

use super::FileScanner;

/// How the antivirus engine is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineTransport {
    /// Run a `clamscan`-compatible binary per file.
    Subprocess { binary: String },
    /// Stream the file to a `clamd` daemon over TCP.
    Daemon { host: String, port: u16 },
}

/// Raw engine answer before it is turned into a scanner report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineResult {
    Clean,
    Infected { signature: String, output: String },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Antivirus engine unavailable: {0}")]
    Unavailable(String),

    #[error("Antivirus scan timed out after {0} seconds")]
    Timeout(u64),

    #[error("Antivirus engine failed (exit code {code:?}): {output}")]
    Failed { code: Option<i32>, output: String },

    #[error("Antivirus scan task failed: {0}")]
    Join(String),

    #[error("Unexpected antivirus response: {0}")]
    Protocol(String),
}

/// External antivirus engine adapter.
#[derive(Debug, Clone)]
pub struct EngineScanner {
    transport: EngineTransport,
    timeout: Duration,
}

impl EngineScanner {
    pub fn new(transport: EngineTransport, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn subprocess(binary: impl Into<String>, timeout: Duration) -> Self {
        Self::new(
            EngineTransport::Subprocess {
                binary: binary.into(),
            },
            timeout,
        )
    }

    pub fn daemon(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self::new(
            EngineTransport::Daemon {
                host: host.into(),
                port,
            },
            timeout,
        )
    }

    pub fn transport(&self) -> &EngineTransport {
        &self.transport
    }

    /// Scan `path` with the configured transport, bounded by the timeout.
    pub async fn scan_file(&self, path: &Path) -> Result<EngineResult, EngineError> {
        match &self.transport {
            EngineTransport::Subprocess { binary } => self.scan_subprocess(binary, path).await,
            EngineTransport::Daemon { host, port } => self.scan_daemon(host, *port, path).await,
        }
    }

    async fn scan_subprocess(&self, binary: &str, path: &Path) -> Result<EngineResult, EngineError> {
        let mut command = Command::new(binary);
        command
            .arg("--no-summary")
            .arg("--infected")
            .arg(path)
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::Unavailable(format!("{} not found", binary)));
            }
            Ok(Err(e)) => return Err(EngineError::Unavailable(e.to_string())),
            // dropping the future kills the child
            Err(_) => return Err(EngineError::Timeout(self.timeout.as_secs())),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        match output.status.code() {
            Some(0) => Ok(EngineResult::Clean),
            Some(1) => Ok(EngineResult::Infected {
                signature: parse_signature(&stdout),
                output: stdout,
            }),
            code => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                Err(EngineError::Failed {
                    code,
                    output: if stderr.is_empty() { stdout } else { stderr },
                })
            }
        }
    }

    #[cfg(feature = "clamav")]
    async fn scan_daemon(&self, host: &str, port: u16, path: &Path) -> Result<EngineResult, EngineError> {
        use clamav_client::{clean, Tcp};

        let address = format!("{}:{}", host, port);
        let path = path.to_path_buf();

        // The client API is blocking, so it runs off the async workers.
        let result = tokio::time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || {
                let connection = Tcp {
                    host_address: address.as_str(),
                };
                let response = clamav_client::scan_file(&path, connection, None)
                    .map_err(|e| EngineError::Unavailable(e.to_string()))?;
                let is_clean =
                    clean(&response).map_err(|e| EngineError::Protocol(e.to_string()))?;
                let text = String::from_utf8_lossy(&response)
                    .trim_end_matches('\0')
                    .trim()
                    .to_string();
                if is_clean {
                    Ok(EngineResult::Clean)
                } else if text.contains("FOUND") {
                    Ok(EngineResult::Infected {
                        signature: parse_signature(&text),
                        output: text,
                    })
                } else {
                    Err(EngineError::Protocol(text))
                }
            }),
        )
        .await;

        match result {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(EngineError::Join(e.to_string())),
            Err(_) => Err(EngineError::Timeout(self.timeout.as_secs())),
        }
    }

    #[cfg(not(feature = "clamav"))]
    async fn scan_daemon(&self, _host: &str, _port: u16, _path: &Path) -> Result<EngineResult, EngineError> {
        Err(EngineError::Unavailable(
            "daemon transport not compiled in".to_string(),
        ))
    }
}

/// Extract the signature name from a `<name>: <signature> FOUND` line.
fn parse_signature(output: &str) -> String {
    output
        .lines()
        .find(|line| line.trim_end().ends_with("FOUND"))
        .and_then(|line| line.rsplit_once(": "))
        .map(|(_, rest)| rest.trim_end().trim_end_matches("FOUND").trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[async_trait]
impl FileScanner for EngineScanner {
    fn kind(&self) -> ScannerKind {
        ScannerKind::Engine
    }

    async fn scan(&self, path: &Path) -> ScannerReport {
        let start = Instant::now();
        tracing::debug!(transport = ?self.transport, "Starting antivirus scan");

        let outcome = match self.scan_file(path).await {
            Ok(EngineResult::Clean) => {
                tracing::info!(
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Antivirus scan completed: clean"
                );
                ScanOutcome::Safe
            }
            Ok(EngineResult::Infected { signature, output }) => {
                tracing::warn!(
                    duration_ms = start.elapsed().as_millis() as u64,
                    virus = %signature,
                    "Antivirus scan detected malware"
                );
                ScanOutcome::Unsafe {
                    threats: vec![Threat::new(
                        ThreatCategory::Malware,
                        signature,
                        Severity::High,
                        ScannerKind::Engine,
                    )
                    .with_evidence(output)],
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Antivirus scan failed");
                ScanOutcome::unknown(e.to_string())
            }
        };

        ScannerReport::new(ScannerKind::Engine, outcome)
            .with_elapsed_ms(start.elapsed().as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signature() {
        assert_eq!(
            parse_signature("/tmp/up/abc: Eicar-Test-Signature FOUND"),
            "Eicar-Test-Signature"
        );
        assert_eq!(
            parse_signature("stream: Win.Test.EICAR_HDB-1 FOUND"),
            "Win.Test.EICAR_HDB-1"
        );
        assert_eq!(parse_signature(""), "unknown");
    }

    #[tokio::test]
    async fn test_missing_binary_is_degraded() {
        let scanner = EngineScanner::subprocess(
            "/nonexistent/ingestgate-clamscan",
            Duration::from_secs(5),
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, b"a,b\n").unwrap();

        let report = scanner.scan(&path).await;
        assert_eq!(report.scanner, ScannerKind::Engine);
        assert!(report.outcome.is_degraded());
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;

        fn fake_engine(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-clamscan");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn input(dir: &Path) -> PathBuf {
            let path = dir.join("data.csv");
            std::fs::write(&path, b"a,b\n1,2\n").unwrap();
            path
        }

        #[tokio::test]
        async fn test_exit_zero_is_clean() {
            let dir = tempfile::tempdir().unwrap();
            let engine = fake_engine(dir.path(), "exit 0");
            let scanner =
                EngineScanner::subprocess(engine.to_string_lossy(), Duration::from_secs(5));

            let report = scanner.scan(&input(dir.path())).await;
            assert_eq!(report.outcome, ScanOutcome::Safe);
        }

        #[tokio::test]
        async fn test_exit_one_is_infected() {
            let dir = tempfile::tempdir().unwrap();
            let engine = fake_engine(
                dir.path(),
                "echo \"$3: Eicar-Test-Signature FOUND\"\nexit 1",
            );
            let scanner =
                EngineScanner::subprocess(engine.to_string_lossy(), Duration::from_secs(5));

            let report = scanner.scan(&input(dir.path())).await;
            let threats = report.outcome.threats();
            assert_eq!(threats.len(), 1);
            assert_eq!(threats[0].signature, "Eicar-Test-Signature");
            assert_eq!(threats[0].category, ThreatCategory::Malware);
            assert_eq!(threats[0].severity, Severity::High);
        }

        #[tokio::test]
        async fn test_other_exit_code_is_degraded() {
            let dir = tempfile::tempdir().unwrap();
            let engine = fake_engine(dir.path(), "echo 'database missing' >&2\nexit 2");
            let scanner =
                EngineScanner::subprocess(engine.to_string_lossy(), Duration::from_secs(5));

            let err = scanner.scan_file(&input(dir.path())).await.unwrap_err();
            match err {
                EngineError::Failed { code, output } => {
                    assert_eq!(code, Some(2));
                    assert_eq!(output, "database missing");
                }
                other => panic!("unexpected error: {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_timeout_is_degraded() {
            let dir = tempfile::tempdir().unwrap();
            let engine = fake_engine(dir.path(), "sleep 5\nexit 0");
            let scanner =
                EngineScanner::subprocess(engine.to_string_lossy(), Duration::from_millis(200));

            let start = Instant::now();
            let report = scanner.scan(&input(dir.path())).await;
            assert!(report.outcome.is_degraded());
            assert!(start.elapsed() < Duration::from_secs(4));
        }
    }

    #[cfg(feature = "clamav")]
    #[tokio::test]
    async fn test_unreachable_daemon_is_degraded() {
        let scanner = EngineScanner::daemon("127.0.0.1", 1, Duration::from_secs(5));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, b"a,b\n").unwrap();

        let report = scanner.scan(&path).await;
        assert!(report.outcome.is_degraded());
    }
}
