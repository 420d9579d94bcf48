//! # Configuration
//!
//! Chillbot reads a single TOML file. Every section has defaults, so a minimal file
//! only needs the administrator list:
//!
//! ```toml
//! [bot]
//! name = "Chill"
//! admin_ids = [1]
//! starting_balance = 100
//! dialogue_timeout_minutes = 5
//! utc_offset_minutes = 180
//!
//! [storage]
//! data_dir = "./data"
//!
//! [scheduler]
//! enabled = true
//! tick_seconds = 60
//!
//! [limits]
//! command_cooldown_seconds = 2
//! max_purchase_requests_per_hour = 10
//!
//! [logging]
//! level = "info"
//! file = "chillbot.log"
//! ```
//!
//! Precedence: environment (`CHILLBOT_ADMIN_IDS`, `CHILLBOT_DATA_DIR`,
//! `CHILLBOT_STARTING_BALANCE`) > config file > defaults.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

use crate::types::UserId;

pub const ENV_ADMIN_IDS: &str = "CHILLBOT_ADMIN_IDS";
pub const ENV_DATA_DIR: &str = "CHILLBOT_DATA_DIR";
pub const ENV_STARTING_BALANCE: &str = "CHILLBOT_STARTING_BALANCE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one administrator id must be configured")]
    NoAdmins,

    #[error("scheduler tick period must be positive")]
    ZeroTick,

    #[error("dialogue timeout must be positive")]
    ZeroDialogueTimeout,

    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub name: String,
    pub admin_ids: Vec<UserId>,
    #[serde(default = "default_starting_balance")]
    pub starting_balance: u64,
    #[serde(default = "default_dialogue_timeout")]
    pub dialogue_timeout_minutes: u32,
    /// Offset of the wall clock administrators type schedule times in.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_minutes: i32,
}

fn default_starting_balance() -> u64 {
    100
}

fn default_dialogue_timeout() -> u32 {
    5
}

fn default_utc_offset() -> i32 {
    180 // Europe/Moscow
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_tick_seconds() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_seconds: default_tick_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_cooldown")]
    pub command_cooldown_seconds: u64,
    #[serde(default = "default_hourly_requests")]
    pub max_purchase_requests_per_hour: usize,
}

fn default_cooldown() -> u64 {
    2
}

fn default_hourly_requests() -> usize {
    10
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            command_cooldown_seconds: default_cooldown(),
            max_purchase_requests_per_hour: default_hourly_requests(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("chillbot.log".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bot: BotConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file, apply environment overrides and validate.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Apply overrides looked up through `lookup` (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_ADMIN_IDS) {
            let mut ids = Vec::new();
            for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let id = part.parse::<UserId>().map_err(|_| ConfigError::InvalidEnv {
                    var: ENV_ADMIN_IDS,
                    value: raw.clone(),
                })?;
                ids.push(id);
            }
            self.bot.admin_ids = ids;
        }
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.storage.data_dir = dir;
        }
        if let Some(raw) = lookup(ENV_STARTING_BALANCE) {
            self.bot.starting_balance =
                raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    var: ENV_STARTING_BALANCE,
                    value: raw.clone(),
                })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.admin_ids.is_empty() {
            return Err(ConfigError::NoAdmins);
        }
        if self.scheduler.tick_seconds == 0 {
            return Err(ConfigError::ZeroTick);
        }
        if self.bot.dialogue_timeout_minutes == 0 {
            return Err(ConfigError::ZeroDialogueTimeout);
        }
        Ok(())
    }

    pub fn admin_set(&self) -> HashSet<UserId> {
        self.bot.admin_ids.iter().copied().collect()
    }

    /// Location of the sled database inside the data directory.
    pub fn store_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir).join("ledger.sled")
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bot: BotConfig {
                name: "Chill".to_string(),
                admin_ids: vec![1],
                starting_balance: default_starting_balance(),
                dialogue_timeout_minutes: default_dialogue_timeout(),
                utc_offset_minutes: default_utc_offset(),
            },
            storage: StorageConfig {
                data_dir: "./data".to_string(),
            },
            scheduler: SchedulerConfig::default(),
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn minimal_file_gets_defaults() {
        let config: Config = toml::from_str(
            r#"
            [bot]
            name = "Test"
            admin_ids = [42]

            [storage]
            data_dir = "/tmp/chill"
            "#,
        )
        .expect("parse");
        assert_eq!(config.bot.starting_balance, 100);
        assert_eq!(config.bot.dialogue_timeout_minutes, 5);
        assert_eq!(config.bot.utc_offset_minutes, 180);
        assert_eq!(config.scheduler.tick_seconds, 60);
        assert_eq!(config.limits.max_purchase_requests_per_hour, 10);
        assert!(config.validate().is_ok());
        assert_eq!(config.store_path(), PathBuf::from("/tmp/chill/ledger.sled"));
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            (ENV_ADMIN_IDS, "5, 6"),
            (ENV_DATA_DIR, "/var/lib/chill"),
            (ENV_STARTING_BALANCE, "250"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_env(|var| env.get(var).map(|v| v.to_string()))
            .expect("overrides");
        assert_eq!(config.bot.admin_ids, vec![5, 6]);
        assert_eq!(config.storage.data_dir, "/var/lib/chill");
        assert_eq!(config.bot.starting_balance, 250);
    }

    #[test]
    fn invalid_env_is_reported() {
        let mut config = Config::default();
        let err = config
            .apply_env(|var| (var == ENV_STARTING_BALANCE).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn validation_rejects_degenerate_values() {
        let mut config = Config::default();
        config.bot.admin_ids.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoAdmins));
        let mut config = Config::default();
        config.scheduler.tick_seconds = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroTick));
        let mut config = Config::default();
        config.bot.dialogue_timeout_minutes = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroDialogueTimeout));
    }

    #[tokio::test]
    async fn default_file_round_trips_through_load() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("config.toml");
        let path = path.to_str().expect("utf8 path");
        Config::create_default(path).await.expect("write");
        let loaded = Config::load(path).await.expect("load");
        assert!(!loaded.bot.admin_ids.is_empty());
    }
}
