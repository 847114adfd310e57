//! Configuration types.

use std::path::PathBuf;

use crate::error::ConfigError;

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Path of the libSQL database holding the registry and job rows.
    /// `None` keeps everything in memory (tests, throwaway runs).
    pub db_path: Option<PathBuf>,
    /// Maximum number of jobs the local scheduler runs at once.
    pub max_parallel_jobs: usize,
    /// Capacity of each progress/result broadcast channel.
    pub event_capacity: usize,
    /// Drop a registry record once its terminal event has been emitted.
    pub evict_on_terminal: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            max_parallel_jobs: 4,
            event_capacity: 256,
            evict_on_terminal: false,
        }
    }
}

impl BridgeConfig {
    /// In-memory configuration with defaults.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Read configuration from `TASK_BRIDGE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let db_path = std::env::var("TASK_BRIDGE_DB_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty() && s != ":memory:")
            .map(PathBuf::from);

        let max_parallel_jobs =
            parse_var("TASK_BRIDGE_MAX_PARALLEL_JOBS")?.unwrap_or(defaults.max_parallel_jobs);
        if max_parallel_jobs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TASK_BRIDGE_MAX_PARALLEL_JOBS".into(),
                message: "must be at least 1".into(),
            });
        }

        let event_capacity =
            parse_var("TASK_BRIDGE_EVENT_CAPACITY")?.unwrap_or(defaults.event_capacity);
        if event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TASK_BRIDGE_EVENT_CAPACITY".into(),
                message: "must be at least 1".into(),
            });
        }

        let evict_on_terminal =
            parse_var("TASK_BRIDGE_EVICT_ON_TERMINAL")?.unwrap_or(defaults.evict_on_terminal);

        Ok(Self {
            db_path,
            max_parallel_jobs,
            event_capacity,
            evict_on_terminal,
        })
    }
}

fn parse_var<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BridgeConfig::default();
        assert!(config.db_path.is_none());
        assert_eq!(config.max_parallel_jobs, 4);
        assert_eq!(config.event_capacity, 256);
        assert!(!config.evict_on_terminal);
    }

    #[test]
    fn parse_var_missing_is_none() {
        let v: Option<usize> = parse_var("TASK_BRIDGE_TEST_UNSET_VARIABLE").unwrap();
        assert!(v.is_none());
    }
}
