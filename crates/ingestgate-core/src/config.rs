//! Configuration module
//!
//! Settings are read from the environment (a `.env` file is honoured) into
//! [`Config`]. Unparseable optional values fall back to their defaults; values
//! the server cannot run without (such as `PORT`) are reported as errors.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::{Confidence, ScanLevel};

const DEFAULT_PORT: &str = "4000";
const HTTP_CONCURRENCY_LIMIT: usize = 10_000;
const MAX_UPLOAD_SIZE_MB: u64 = 100;
const CHUNK_SIZE_BYTES: u64 = 1024 * 1024;
const MAX_CHUNK_COUNT: u32 = 10_000;
const SESSION_TIMEOUT_SECS: u64 = 30 * 60;
const SESSION_SWEEP_INTERVAL_SECS: u64 = 300;
const PATTERN_SCAN_MAX_BYTES: u64 = 10 * 1024 * 1024;
const CLAMAV_PORT: u16 = 3310;
const CLAMAV_TIMEOUT_SECS: u64 = 30;
const REPUTATION_TIMEOUT_SECS: u64 = 15;
const REPUTATION_HIGH_THRESHOLD: u32 = 5;
const REPUTATION_BASE_URL: &str = "https://www.virustotal.com/api/v3";

/// How the external engine is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Spawn `clamscan` per file
    Subprocess,
    /// Stream the file to a clamd daemon over TCP
    Daemon,
}

impl EngineMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "subprocess" | "clamscan" => Some(EngineMode::Subprocess),
            "daemon" | "clamd" | "tcp" => Some(EngineMode::Daemon),
            _ => None,
        }
    }
}

/// Process-level settings
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub environment: String,
    pub log_format: String,
    /// Maximum in-flight HTTP requests
    pub http_concurrency_limit: usize,
}

/// Full gateway configuration
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub base: BaseConfig,
    // Storage locations
    pub upload_dir: PathBuf,
    pub session_dir: PathBuf,
    pub processed_dir: PathBuf,
    // Upload protocol
    pub max_upload_size_bytes: u64,
    pub chunk_size_bytes: u64,
    pub max_chunk_count: u32,
    pub session_timeout_secs: u64,
    /// 0 disables the periodic sweep
    pub session_sweep_interval_secs: u64,
    pub allowed_extensions: Vec<String>,
    pub allowed_content_types: Vec<String>,
    // Scanning
    pub scan_level: ScanLevel,
    pub pattern_scan_max_bytes: u64,
    pub required_confidence: Option<Confidence>,
    pub clamav_enabled: bool,
    pub clamav_mode: EngineMode,
    pub clamav_binary: String,
    pub clamav_host: String,
    pub clamav_port: u16,
    pub clamav_timeout_secs: u64,
    pub reputation_enabled: bool,
    pub virustotal_api_key: Option<String>,
    pub reputation_base_url: String,
    pub reputation_timeout_secs: u64,
    pub reputation_high_threshold: u32,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<GatewayConfig>);

impl Config {
    fn as_gateway(&self) -> &GatewayConfig {
        &self.0
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        is_production_env(&self.as_gateway().base.environment)
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_source(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production, a map in tests).
    pub fn from_source<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = GatewayConfig::from_source(lookup)?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.as_gateway().validate()
    }

    pub fn server_port(&self) -> u16 {
        self.as_gateway().base.server_port
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.as_gateway().base.cors_origins
    }

    pub fn environment(&self) -> &str {
        &self.as_gateway().base.environment
    }

    pub fn log_format(&self) -> &str {
        &self.as_gateway().base.log_format
    }

    pub fn http_concurrency_limit(&self) -> usize {
        self.as_gateway().base.http_concurrency_limit
    }

    pub fn upload_dir(&self) -> &PathBuf {
        &self.as_gateway().upload_dir
    }

    pub fn session_dir(&self) -> &PathBuf {
        &self.as_gateway().session_dir
    }

    pub fn processed_dir(&self) -> &PathBuf {
        &self.as_gateway().processed_dir
    }

    pub fn max_upload_size_bytes(&self) -> u64 {
        self.as_gateway().max_upload_size_bytes
    }

    pub fn chunk_size_bytes(&self) -> u64 {
        self.as_gateway().chunk_size_bytes
    }

    pub fn max_chunk_count(&self) -> u32 {
        self.as_gateway().max_chunk_count
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.as_gateway().session_timeout_secs)
    }

    /// `None` when the periodic sweep is disabled
    pub fn session_sweep_interval(&self) -> Option<Duration> {
        match self.as_gateway().session_sweep_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.as_gateway().allowed_extensions
    }

    pub fn allowed_content_types(&self) -> &[String] {
        &self.as_gateway().allowed_content_types
    }

    pub fn scan_level(&self) -> ScanLevel {
        self.as_gateway().scan_level
    }

    pub fn pattern_scan_max_bytes(&self) -> u64 {
        self.as_gateway().pattern_scan_max_bytes
    }

    pub fn required_confidence(&self) -> Option<Confidence> {
        self.as_gateway().required_confidence
    }

    pub fn clamav_enabled(&self) -> bool {
        self.as_gateway().clamav_enabled
    }

    pub fn clamav_mode(&self) -> EngineMode {
        self.as_gateway().clamav_mode
    }

    pub fn clamav_binary(&self) -> &str {
        &self.as_gateway().clamav_binary
    }

    pub fn clamav_host(&self) -> &str {
        &self.as_gateway().clamav_host
    }

    pub fn clamav_port(&self) -> u16 {
        self.as_gateway().clamav_port
    }

    pub fn clamav_timeout(&self) -> Duration {
        Duration::from_secs(self.as_gateway().clamav_timeout_secs)
    }

    pub fn reputation_enabled(&self) -> bool {
        self.as_gateway().reputation_enabled
    }

    pub fn virustotal_api_key(&self) -> Option<&str> {
        self.as_gateway().virustotal_api_key.as_deref()
    }

    pub fn reputation_base_url(&self) -> &str {
        &self.as_gateway().reputation_base_url
    }

    pub fn reputation_timeout(&self) -> Duration {
        Duration::from_secs(self.as_gateway().reputation_timeout_secs)
    }

    pub fn reputation_high_threshold(&self) -> u32 {
        self.as_gateway().reputation_high_threshold
    }
}

fn is_production_env(environment: &str) -> bool {
    let env = environment.to_lowercase();
    env == "production" || env == "prod"
}

fn parse_list(value: String) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value.map(|v| v.trim().to_lowercase()) {
        Some(v) if v == "true" || v == "1" || v == "yes" => true,
        Some(v) if v == "false" || v == "0" || v == "no" => false,
        _ => default,
    }
}

impl GatewayConfig {
    pub fn from_source<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());
        let is_production = is_production_env(&environment);

        let cors_origins: Vec<String> = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let base = BaseConfig {
            server_port: lookup("PORT")
                .unwrap_or_else(|| DEFAULT_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            cors_origins,
            environment,
            log_format: lookup("LOG_FORMAT")
                .map(|s| s.trim().to_lowercase())
                .unwrap_or_else(|| "compact".to_string()),
            http_concurrency_limit: lookup("HTTP_CONCURRENCY_LIMIT")
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(HTTP_CONCURRENCY_LIMIT)
                .max(1),
        };

        let max_upload_size_mb = lookup("MAX_UPLOAD_SIZE_MB")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(MAX_UPLOAD_SIZE_MB);

        let default_level = if is_production {
            ScanLevel::Comprehensive
        } else {
            ScanLevel::Lightweight
        };
        let scan_level = lookup("SCAN_LEVEL")
            .and_then(|s| s.parse().ok())
            .unwrap_or(default_level);

        let required_confidence = lookup("SCAN_REQUIRED_CONFIDENCE").and_then(|s| {
            match s.trim().to_lowercase().as_str() {
                "" | "none" | "off" => None,
                other => other.parse().ok(),
            }
        });

        let virustotal_api_key = lookup("VIRUSTOTAL_API_KEY")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Self {
            base,
            upload_dir: lookup("UPLOAD_DIR")
                .unwrap_or_else(|| "./uploads/temp".to_string())
                .into(),
            session_dir: lookup("SESSION_DIR")
                .unwrap_or_else(|| "./uploads/sessions".to_string())
                .into(),
            processed_dir: lookup("PROCESSED_DIR")
                .unwrap_or_else(|| "./uploads/processed".to_string())
                .into(),
            max_upload_size_bytes: max_upload_size_mb * 1024 * 1024,
            chunk_size_bytes: lookup("CHUNK_SIZE_BYTES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(CHUNK_SIZE_BYTES),
            max_chunk_count: lookup("MAX_CHUNK_COUNT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(MAX_CHUNK_COUNT),
            session_timeout_secs: lookup("SESSION_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(SESSION_TIMEOUT_SECS),
            session_sweep_interval_secs: lookup("SESSION_SWEEP_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(SESSION_SWEEP_INTERVAL_SECS),
            allowed_extensions: parse_list(
                lookup("ALLOWED_EXTENSIONS").unwrap_or_else(|| "csv".to_string()),
            ),
            allowed_content_types: parse_list(
                lookup("ALLOWED_CONTENT_TYPES")
                    .unwrap_or_else(|| "text/csv,application/csv,text/plain".to_string()),
            ),
            scan_level,
            pattern_scan_max_bytes: lookup("PATTERN_SCAN_MAX_BYTES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(PATTERN_SCAN_MAX_BYTES),
            required_confidence,
            clamav_enabled: parse_bool(lookup("CLAMAV_ENABLED"), is_production),
            clamav_mode: lookup("CLAMAV_MODE")
                .and_then(|s| EngineMode::parse(&s))
                .unwrap_or(EngineMode::Subprocess),
            clamav_binary: lookup("CLAMAV_BINARY").unwrap_or_else(|| "clamscan".to_string()),
            clamav_host: lookup("CLAMAV_HOST").unwrap_or_else(|| "localhost".to_string()),
            clamav_port: lookup("CLAMAV_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(CLAMAV_PORT),
            clamav_timeout_secs: lookup("CLAMAV_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(CLAMAV_TIMEOUT_SECS),
            reputation_enabled: parse_bool(lookup("REPUTATION_ENABLED"), is_production),
            virustotal_api_key,
            reputation_base_url: lookup("REPUTATION_BASE_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|| REPUTATION_BASE_URL.to_string()),
            reputation_timeout_secs: lookup("REPUTATION_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(REPUTATION_TIMEOUT_SECS),
            reputation_high_threshold: lookup("REPUTATION_HIGH_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(REPUTATION_HIGH_THRESHOLD),
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.chunk_size_bytes == 0 {
            return Err(anyhow::anyhow!("CHUNK_SIZE_BYTES must be greater than 0"));
        }

        if self.max_upload_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_UPLOAD_SIZE_MB must be greater than 0"));
        }

        if self.chunk_size_bytes > self.max_upload_size_bytes {
            return Err(anyhow::anyhow!(
                "CHUNK_SIZE_BYTES ({}) cannot exceed the upload size ceiling ({})",
                self.chunk_size_bytes,
                self.max_upload_size_bytes
            ));
        }

        if self.session_timeout_secs == 0 {
            return Err(anyhow::anyhow!("SESSION_TIMEOUT_SECS must be greater than 0"));
        }

        if self.upload_dir == self.processed_dir {
            return Err(anyhow::anyhow!(
                "UPLOAD_DIR and PROCESSED_DIR must be different directories"
            ));
        }

        if is_production_env(&self.base.environment)
            && self.base.cors_origins.iter().any(|o| o == "*")
        {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        if self.allowed_extensions.is_empty() || self.allowed_content_types.is_empty() {
            return Err(anyhow::anyhow!(
                "ALLOWED_EXTENSIONS and ALLOWED_CONTENT_TYPES must not be empty"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, anyhow::Error> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_source(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.server_port(), 4000);
        assert_eq!(config.max_upload_size_bytes(), 100 * 1024 * 1024);
        assert_eq!(config.chunk_size_bytes(), 1024 * 1024);
        assert_eq!(config.session_timeout(), Duration::from_secs(1800));
        assert_eq!(config.scan_level(), ScanLevel::Lightweight);
        assert!(!config.clamav_enabled());
        assert!(!config.reputation_enabled());
        assert_eq!(config.clamav_mode(), EngineMode::Subprocess);
        assert_eq!(config.allowed_extensions(), &["csv".to_string()]);
        assert_eq!(config.required_confidence(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_production_switches_scan_defaults() {
        let config = config_from(&[
            ("ENVIRONMENT", "production"),
            ("CORS_ORIGINS", "https://app.example.com"),
        ])
        .unwrap();
        assert!(config.is_production());
        assert_eq!(config.scan_level(), ScanLevel::Comprehensive);
        assert!(config.clamav_enabled());
        assert!(config.reputation_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_production_rejects_wildcard_cors() {
        let config = config_from(&[("APP_ENV", "prod")]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_port_is_an_error() {
        assert!(config_from(&[("PORT", "not-a-port")]).is_err());
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = config_from(&[
            ("CHUNK_SIZE_BYTES", "lots"),
            ("SCAN_LEVEL", "paranoid"),
            ("CLAMAV_ENABLED", "maybe"),
        ])
        .unwrap();
        assert_eq!(config.chunk_size_bytes(), 1024 * 1024);
        assert_eq!(config.scan_level(), ScanLevel::Lightweight);
        assert!(!config.clamav_enabled());
    }

    #[test]
    fn test_validate_rejects_bad_sizes() {
        let config = config_from(&[("CHUNK_SIZE_BYTES", "0")]).unwrap();
        assert!(config.validate().is_err());

        let config = config_from(&[
            ("MAX_UPLOAD_SIZE_MB", "1"),
            ("CHUNK_SIZE_BYTES", "2097152"),
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shared_directories() {
        let config = config_from(&[("UPLOAD_DIR", "/data"), ("PROCESSED_DIR", "/data")]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_optional_settings() {
        let config = config_from(&[
            ("SCAN_REQUIRED_CONFIDENCE", "medium"),
            ("SESSION_SWEEP_INTERVAL_SECS", "0"),
            ("VIRUSTOTAL_API_KEY", "  "),
            ("CLAMAV_MODE", "daemon"),
            ("ALLOWED_CONTENT_TYPES", "Text/CSV, text/plain"),
        ])
        .unwrap();
        assert_eq!(config.required_confidence(), Some(Confidence::Medium));
        assert_eq!(config.session_sweep_interval(), None);
        assert_eq!(config.virustotal_api_key(), None);
        assert_eq!(config.http_concurrency_limit(), 10_000);
        assert_eq!(config.clamav_mode(), EngineMode::Daemon);
        assert_eq!(
            config.allowed_content_types(),
            &["text/csv".to_string(), "text/plain".to_string()]
        );
    }

    #[test]
    fn test_http_concurrency_limit() {
        let config = config_from(&[("HTTP_CONCURRENCY_LIMIT", "250")]).unwrap();
        assert_eq!(config.http_concurrency_limit(), 250);

        let config = config_from(&[("HTTP_CONCURRENCY_LIMIT", "0")]).unwrap();
        assert_eq!(config.http_concurrency_limit(), 1);
    }
}
