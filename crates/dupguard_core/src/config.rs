//! Creation service configuration.
//!
//! # Responsibility
//! - Hold the tunables shared by single and batch creation.
//! - Map the chosen locking strategy to a serializer and a lock mode.
//!
//! # Invariants
//! - `max_concurrency >= 1`.
//! - `lock_wait_timeout_ms > 0`; the same bound applies to the process
//!   mutex and to SQLite's busy handler.

use crate::db::transaction::LockMode;
use crate::sync::serializer::{NoopSerializer, ProcessMutex, Serializer};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;
pub const DEFAULT_LOCK_WAIT_TIMEOUT_MS: u64 = 5_000;

/// Which lock keeps concurrent creators of one name apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStrategy {
    /// Store write lock taken at transaction start (`BEGIN IMMEDIATE`).
    #[default]
    StoreLock,
    /// One process-wide mutex around check-then-insert, deferred transaction.
    ProcessMutex,
}

impl LockStrategy {
    pub fn lock_mode(self) -> LockMode {
        match self {
            Self::StoreLock => LockMode::Exclusive,
            Self::ProcessMutex => LockMode::Deferred,
        }
    }

    pub fn serializer(self, wait_timeout: Duration) -> Arc<dyn Serializer> {
        match self {
            Self::StoreLock => Arc::new(NoopSerializer),
            Self::ProcessMutex => Arc::new(ProcessMutex::new(wait_timeout)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::StoreLock => "store_lock",
            Self::ProcessMutex => "process_mutex",
        }
    }

    /// Parses the snake_case or kebab-case name of a strategy.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "store_lock" => Ok(Self::StoreLock),
            "process_mutex" => Ok(Self::ProcessMutex),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Invalid configuration value.
#[derive(Debug)]
pub enum ConfigError {
    ZeroConcurrency,
    ZeroLockWaitTimeout,
    UnknownStrategy(String),
    Parse(serde_json::Error),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroConcurrency => write!(f, "max_concurrency must be at least 1"),
            Self::ZeroLockWaitTimeout => write!(f, "lock_wait_timeout_ms must be positive"),
            Self::UnknownStrategy(value) => write!(
                f,
                "unknown lock strategy `{value}`; expected store_lock|process_mutex"
            ),
            Self::Parse(err) => write!(f, "invalid configuration: {err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

/// Tunables for creation services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CreationConfig {
    pub strategy: LockStrategy,
    /// Ceiling on concurrently running batch units.
    pub max_concurrency: usize,
    /// Bound on any single lock wait before the unit fails.
    pub lock_wait_timeout_ms: u64,
}

impl Default for CreationConfig {
    fn default() -> Self {
        Self {
            strategy: LockStrategy::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            lock_wait_timeout_ms: DEFAULT_LOCK_WAIT_TIMEOUT_MS,
        }
    }
}

impl CreationConfig {
    /// Parses and validates a JSON document; missing fields take defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.lock_wait_timeout_ms == 0 {
            return Err(ConfigError::ZeroLockWaitTimeout);
        }
        Ok(())
    }

    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CreationConfig, LockStrategy};
    use crate::db::transaction::LockMode;

    #[test]
    fn defaults_use_store_lock() {
        let config = CreationConfig::default();
        assert_eq!(config.strategy, LockStrategy::StoreLock);
        assert_eq!(config.strategy.lock_mode(), LockMode::Exclusive);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config =
            CreationConfig::from_json_str(r#"{ "strategy": "process_mutex" }"#).unwrap();
        assert_eq!(config.strategy, LockStrategy::ProcessMutex);
        assert_eq!(config.max_concurrency, super::DEFAULT_MAX_CONCURRENCY);
        assert!(config.strategy.serializer(config.lock_wait_timeout()).is_global());
    }

    #[test]
    fn zero_values_are_rejected() {
        let err = CreationConfig::from_json_str(r#"{ "max_concurrency": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroConcurrency));

        let err = CreationConfig::from_json_str(r#"{ "lock_wait_timeout_ms": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroLockWaitTimeout));

        let err = CreationConfig::from_json_str(r#"{ "retries": 3 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn strategy_names_parse_in_both_spellings() {
        assert_eq!(
            LockStrategy::parse("process-mutex").unwrap(),
            LockStrategy::ProcessMutex
        );
        assert_eq!(
            LockStrategy::parse(" STORE_LOCK ").unwrap(),
            LockStrategy::StoreLock
        );
        assert!(LockStrategy::parse("optimistic").is_err());
    }
}
