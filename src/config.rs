//! Application configuration
//!
//! Loaded from `config/<env>.yaml`. Every section is optional and falls back
//! to its defaults. `DATABASE_URL` overrides `storage.postgres_url`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::ConnectOptions;
use crate::outbox::RelayConfig;
use crate::transfer::{Account, EngineConfig, IsolationLevel};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub log: LogConfig,
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
    pub relay: RelaySettings,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub dir: String,
    pub file: String,
    pub use_json: bool,
    /// `hourly`, `daily` or `never`
    pub rotation: String,
    pub to_file: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "./logs".to_string(),
            file: "money_transfer.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            to_file: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub postgres_url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    pub connect_retries: u32,
    pub connect_retry_interval_ms: u64,
    pub run_migrations: bool,
    /// Accounts provisioned into the in-memory backend
    pub seed_accounts: Vec<Account>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            postgres_url: None,
            max_connections: 20,
            acquire_timeout_ms: 5_000,
            connect_retries: 5,
            connect_retry_interval_ms: 3_000,
            run_migrations: true,
            seed_accounts: vec![
                Account::new("1", "Mark", 10_000),
                Account::new("2", "Jane", 5_000),
                Account::new("3", "Adam", 0),
            ],
        }
    }
}

impl StorageConfig {
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            max_connections: self.max_connections,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            retries: self.connect_retries,
            retry_interval: Duration::from_millis(self.connect_retry_interval_ms),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TransferConfig {
    pub deadline_ms: u64,
    pub isolation: IsolationLevel,
    pub lock_timeout_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 10_000,
            isolation: IsolationLevel::RepeatableRead,
            lock_timeout_ms: 5_000,
        }
    }
}

impl TransferConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            isolation: self.isolation,
            deadline: Duration::from_millis(self.deadline_ms),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RelaySettings {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub cycle_timeout_ms: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 5_000,
            batch_size: 100,
            cycle_timeout_ms: 30_000,
        }
    }
}

impl RelaySettings {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            batch_size: self.batch_size,
            cycle_timeout: Duration::from_millis(self.cycle_timeout_ms),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_ms: 15_000,
        }
    }
}

impl GatewayConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl AppConfig {
    /// Load `config/<env>.yaml`, apply environment overrides and validate
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(format!("config/{}.yaml", env))?;
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.storage.postgres_url = Some(url);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.backend == StorageBackend::Postgres && self.storage.postgres_url.is_none()
        {
            return Err(ConfigError::Invalid(
                "storage.postgres_url (or DATABASE_URL) is required for the postgres backend"
                    .to_string(),
            ));
        }
        if self.transfer.deadline_ms == 0 {
            return Err(ConfigError::Invalid(
                "transfer.deadline_ms must be positive".to_string(),
            ));
        }
        if !self.transfer.isolation.is_repeatable_read_or_stronger() {
            return Err(ConfigError::Invalid(format!(
                "transfer.isolation must be repeatable_read or serializable, got {}",
                self.transfer.isolation.as_sql()
            )));
        }
        if self.relay.batch_size == 0 || self.relay.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "relay.batch_size and relay.poll_interval_ms must be positive".to_string(),
            ));
        }
        if let Some(bad) = self.storage.seed_accounts.iter().find(|a| a.balance < 0) {
            return Err(ConfigError::Invalid(format!(
                "seed account {} has a negative balance",
                bad.id
            )));
        }
        Ok(())
    }
}
