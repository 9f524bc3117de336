//! Engine configuration: TOML file first, then `SHOPKEEP_*` environment
//! overrides.
//!
//! ```toml
//! database_url = "postgres://shop@localhost/shop"
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 10
//! max_delay_ms = 200
//! strategy = "exponential"
//!
//! [accounts]
//! cash = "Cash"
//! receivables = "Accounts Receivable"
//!
//! [alerts]
//! low_stock_enabled = true
//! due_soon_days = 3
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use shopkeep_accounting::ChartOfAccounts;
use shopkeep_observability::{LogFormat, LogSettings};

use crate::alerts::AlertSettings;
use crate::retry::{BackoffStrategy, RetryPolicy};

pub const ENV_PREFIX: &str = "SHOPKEEP_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidEnv {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryPolicy,
    pub accounts: ChartOfAccounts,
    pub alerts: AlertSettings,
    pub logging: LogSettings,
    /// Postgres connection string; the in-memory store is used when unset.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            accounts: ChartOfAccounts::default(),
            alerts: AlertSettings::default(),
            logging: LogSettings::default(),
            database_url: None,
            database_max_connections: 5,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Optional file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        base.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `SHOPKEEP_*` overrides read through `lookup`.
    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some((_, url)) = get("DATABASE_URL") {
            self.database_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Some((key, value)) = get("DATABASE_MAX_CONNECTIONS") {
            self.database_max_connections = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = get("RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = get("RETRY_BASE_DELAY_MS") {
            self.retry.base_delay_ms = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = get("RETRY_MAX_DELAY_MS") {
            self.retry.max_delay_ms = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = get("RETRY_STRATEGY") {
            self.retry.strategy = match value.trim().to_ascii_lowercase().as_str() {
                "fixed" => BackoffStrategy::Fixed,
                "linear" => BackoffStrategy::Linear,
                "exponential" => BackoffStrategy::Exponential,
                _ => return Err(invalid_env(&key, &value, "expected fixed, linear or exponential")),
            };
        }
        if let Some((key, value)) = get("ALERTS_LOW_STOCK_ENABLED") {
            self.alerts.low_stock_enabled = parse_bool(&key, &value)?;
        }
        if let Some((key, value)) = get("ALERTS_DUE_SOON_DAYS") {
            self.alerts.due_soon_days = parse_env(&key, &value)?;
        }
        if let Some((_, filter)) = get("LOG_FILTER") {
            self.logging.default_filter = filter;
        }
        if let Some((key, value)) = get("LOG_FORMAT") {
            self.logging.format = match value.trim().to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => return Err(invalid_env(&key, &value, "expected json or compact")),
            };
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate().map_err(ConfigError::Invalid)?;
        if self.alerts.due_soon_days < 0 {
            return Err(ConfigError::Invalid(
                "alerts.due_soon_days cannot be negative".to_string(),
            ));
        }
        if self.database_max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database_max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn invalid_env(key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid_env(key, value, e.to_string()))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid_env(key, value, "expected a boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.accounts.cash.as_str(), "Cash");
    }

    #[test]
    fn file_overrides_only_what_it_names() {
        let config = EngineConfig::from_toml_str(
            r#"
            database_url = "postgres://localhost/shop"

            [retry]
            max_attempts = 3
            strategy = "linear"

            [accounts]
            cash = "  Petty   Cash "

            [alerts]
            due_soon_days = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.strategy, BackoffStrategy::Linear);
        assert_eq!(config.retry.base_delay_ms, RetryPolicy::default().base_delay_ms);
        assert_eq!(config.accounts.cash.as_str(), "Petty Cash");
        assert_eq!(config.accounts.bank.as_str(), "Bank");
        assert_eq!(config.alerts.due_soon_days, 7);
        assert!(config.alerts.low_stock_enabled);
    }

    #[test]
    fn empty_account_name_is_rejected() {
        let err = EngineConfig::from_toml_str("[accounts]\ncash = \"   \"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn env_overrides_win() {
        let config = EngineConfig::default()
            .with_env_overrides(env(&[
                ("SHOPKEEP_RETRY_MAX_ATTEMPTS", "2"),
                ("SHOPKEEP_RETRY_STRATEGY", "Fixed"),
                ("SHOPKEEP_ALERTS_LOW_STOCK_ENABLED", "off"),
                ("SHOPKEEP_DATABASE_URL", "postgres://db/shop"),
            ]))
            .unwrap();

        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.strategy, BackoffStrategy::Fixed);
        assert!(!config.alerts.low_stock_enabled);
        assert_eq!(config.database_url.as_deref(), Some("postgres://db/shop"));
    }

    #[test]
    fn bad_env_values_name_the_variable() {
        let err = EngineConfig::default()
            .with_env_overrides(env(&[("SHOPKEEP_RETRY_MAX_ATTEMPTS", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "SHOPKEEP_RETRY_MAX_ATTEMPTS"));

        let err = EngineConfig::default()
            .with_env_overrides(env(&[("SHOPKEEP_RETRY_MAX_ATTEMPTS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
