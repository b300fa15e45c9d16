//! Runtime configuration from environment variables
//!
//! Only the binary reads the environment. The projection engine receives an
//! explicit `ProjectorConfig` and never sees paths or connection details.

use crate::projection_core::{ProjectorConfig, SkipPolicy};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Path to the SQLite event log
    pub db_path: PathBuf,

    /// Snapshot cache file; caching is disabled when unset
    pub snapshot_path: Option<PathBuf>,

    /// Per-read timeout in milliseconds (0 disables the bound)
    pub read_timeout_ms: u64,

    /// Parallel raffle resolutions for user history queries
    pub max_concurrent_resolutions: usize,

    pub skip_policy: SkipPolicy,

    pub rust_log: String,
}

impl RuntimeConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `RAFFLE_DB_PATH` (default: data/raffles.db)
    /// - `RAFFLE_SNAPSHOT_PATH` (optional)
    /// - `SOURCE_READ_TIMEOUT_MS` (default: 10000)
    /// - `MAX_CONCURRENT_RESOLUTIONS` (default: 8)
    /// - `SKIPPED_RAFFLES` (report | omit, default: report)
    /// - `RUST_LOG` (default: info)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path: PathBuf = lookup("RAFFLE_DB_PATH")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "data/raffles.db".to_string())
            .into();

        let snapshot_path = lookup("RAFFLE_SNAPSHOT_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let read_timeout_ms = match lookup("SOURCE_READ_TIMEOUT_MS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                ConfigError::InvalidValue(format!("SOURCE_READ_TIMEOUT_MS must be an integer, got '{}'", raw))
            })?,
            None => 10_000,
        };

        let max_concurrent_resolutions = match lookup("MAX_CONCURRENT_RESOLUTIONS") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                ConfigError::InvalidValue(format!(
                    "MAX_CONCURRENT_RESOLUTIONS must be an integer, got '{}'",
                    raw
                ))
            })?,
            None => 8,
        };

        if max_concurrent_resolutions == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_CONCURRENT_RESOLUTIONS must be greater than 0".to_string(),
            ));
        }

        let skip_policy = match lookup("SKIPPED_RAFFLES") {
            Some(raw) => SkipPolicy::from_str(raw.trim()).ok_or_else(|| {
                ConfigError::InvalidValue(format!("SKIPPED_RAFFLES must be 'report' or 'omit', got '{}'", raw))
            })?,
            None => SkipPolicy::Report,
        };

        let rust_log = lookup("RUST_LOG").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            db_path,
            snapshot_path,
            read_timeout_ms,
            max_concurrent_resolutions,
            skip_policy,
            rust_log,
        })
    }

    pub fn projector_config(&self) -> ProjectorConfig {
        ProjectorConfig {
            read_timeout: match self.read_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            max_concurrent_resolutions: self.max_concurrent_resolutions,
            skip_policy: self.skip_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.db_path, PathBuf::from("data/raffles.db"));
        assert_eq!(config.snapshot_path, None);
        assert_eq!(config.read_timeout_ms, 10_000);
        assert_eq!(config.max_concurrent_resolutions, 8);
        assert_eq!(config.skip_policy, SkipPolicy::Report);
        assert_eq!(config.rust_log, "info");

        let projector = config.projector_config();
        assert_eq!(projector.read_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_custom_config() {
        let config = RuntimeConfig::from_lookup(lookup_from(&[
            ("RAFFLE_DB_PATH", "/tmp/raffles.db"),
            ("RAFFLE_SNAPSHOT_PATH", "/tmp/snapshots.json"),
            ("SOURCE_READ_TIMEOUT_MS", "0"),
            ("MAX_CONCURRENT_RESOLUTIONS", "2"),
            ("SKIPPED_RAFFLES", "omit"),
        ]))
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/raffles.db"));
        assert_eq!(config.snapshot_path, Some(PathBuf::from("/tmp/snapshots.json")));
        assert_eq!(config.skip_policy, SkipPolicy::Omit);

        let projector = config.projector_config();
        assert_eq!(projector.read_timeout, None);
        assert_eq!(projector.max_concurrent_resolutions, 2);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = RuntimeConfig::from_lookup(lookup_from(&[("MAX_CONCURRENT_RESOLUTIONS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));

        let err = RuntimeConfig::from_lookup(lookup_from(&[("SOURCE_READ_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));

        let err = RuntimeConfig::from_lookup(lookup_from(&[("SKIPPED_RAFFLES", "silent")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }
}
