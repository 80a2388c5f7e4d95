//! Configuration validation
//!
//! Validates critical configuration values at startup to catch misconfigurations early.

use anyhow::Result;
use ingestgate_core::models::ScanLevel;
use ingestgate_core::Config;

/// Validate critical configuration values
///
/// Hard errors come from [`Config::validate`]. Settings that are legal but
/// weaken the scan (a comprehensive level with no external scanner, a
/// reputation lookup with no key) are logged as warnings.
pub fn validate_config(config: &Config) -> Result<()> {
    config.validate()?;

    if config.scan_level() == ScanLevel::Comprehensive {
        if !config.clamav_enabled() && !config.reputation_enabled() {
            tracing::warn!(
                "SCAN_LEVEL=comprehensive but neither CLAMAV_ENABLED nor REPUTATION_ENABLED is set; \
                only the pattern scanner will run"
            );
        }
        if config.reputation_enabled() && config.virustotal_api_key().is_none() {
            tracing::warn!(
                "REPUTATION_ENABLED is set but VIRUSTOTAL_API_KEY is missing; reputation lookups will be skipped"
            );
        }
    }

    if config.is_production() && config.scan_level() == ScanLevel::Lightweight {
        tracing::warn!("Running in production with SCAN_LEVEL=lightweight");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_source(|key| map.get(key).cloned()).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&config(&[])).is_ok());
    }

    #[test]
    fn test_wildcard_cors_rejected_in_production() {
        let cfg = config(&[("ENVIRONMENT", "production")]);
        assert!(validate_config(&cfg).is_err());

        let cfg = config(&[
            ("ENVIRONMENT", "production"),
            ("CORS_ORIGINS", "https://app.example.com"),
        ]);
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(validate_config(&config(&[("CHUNK_SIZE_BYTES", "0")])).is_err());
    }
}
