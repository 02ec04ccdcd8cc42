//! Configuration loading from TOML with environment variable overrides.
//!
//! Reads `wager.toml` and deserializes into strongly-typed structs. Every
//! section has defaults, so a partial file (or no file at all) still yields
//! a usable configuration.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::limits::BettingLimits;
use crate::lifecycle::DEFAULT_CANCEL_BUFFER_MINS;
use crate::odds::DEFAULT_MAX_ABS_ODDS;

/// Overrides `storage.database_url` when set.
pub const DATABASE_URL_ENV: &str = "WAGER_DATABASE_URL";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    /// Limits applied to newly opened accounts.
    pub limits: BettingLimits,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Widest accepted American price, either sign.
    pub max_abs_odds: i32,
    pub min_stake: Decimal,
    pub max_stake: Decimal,
    /// Minutes before the first event start at which betting and cancellation close.
    pub cancel_buffer_mins: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_abs_odds: DEFAULT_MAX_ABS_ODDS,
            min_stake: dec!(1),
            max_stake: dec!(10000),
            cancel_buffer_mins: DEFAULT_CANCEL_BUFFER_MINS,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://wager.db".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        if config.engine.min_stake > config.engine.max_stake {
            anyhow::bail!(
                "engine.min_stake ({}) exceeds engine.max_stake ({})",
                config.engine.min_stake,
                config.engine.max_stake
            );
        }
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            info!(path, "No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Database URL after applying the environment override.
    pub fn database_url(&self) -> String {
        std::env::var(DATABASE_URL_ENV).unwrap_or_else(|_| self.storage.database_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.max_abs_odds, 100_000);
        assert_eq!(cfg.engine.min_stake, dec!(1));
        assert_eq!(cfg.engine.max_stake, dec!(10000));
        assert_eq!(cfg.engine.cancel_buffer_mins, 5);
        assert_eq!(cfg.limits, BettingLimits::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let cfg = AppConfig::parse(
            r#"
            [engine]
            max_stake = "500"

            [limits]
            daily_limit = "1000"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.engine.max_stake, dec!(500));
        assert_eq!(cfg.engine.min_stake, dec!(1));
        assert_eq!(cfg.limits.daily_limit, Some(dec!(1000)));
        assert_eq!(cfg.storage.database_url, "sqlite://wager.db");
    }

    #[test]
    fn test_inverted_stake_bounds_rejected() {
        let result = AppConfig::parse("[engine]\nmin_stake = \"50\"\nmax_stake = \"10\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_sample_config() {
        // Requires wager.toml in the working directory.
        if let Ok(cfg) = AppConfig::load("wager.toml") {
            assert!(cfg.engine.max_stake >= cfg.engine.min_stake);
            assert!(cfg.engine.cancel_buffer_mins >= 0);
        }
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = AppConfig::load_or_default("definitely-not-here.toml").unwrap();
        assert_eq!(cfg.engine.cancel_buffer_mins, 5);
    }
}
