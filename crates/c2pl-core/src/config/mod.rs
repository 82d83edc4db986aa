//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "C2PL_CONFIG_DIR";

/// C2PL configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub coordinator: CoordinatorConfig,
    pub site: SiteConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,
    pub deadlock_check_interval_ms: u64,
    /// Bound on every remote call, in both directions
    pub rpc_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub database_path: PathBuf,
    /// Host the site listens on for coordinator notifications
    pub listen_host: String,
    pub operation_delay_ms: u64,
    pub blocked_log_interval_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub verbose: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1099,
            deadlock_check_interval_ms: 5000,
            rpc_timeout_ms: 5000,
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("c2pl.db"),
            listen_host: "127.0.0.1".to_string(),
            operation_delay_ms: 100,
            blocked_log_interval_ms: 1000,
        }
    }
}

impl CoordinatorConfig {
    /// `host:port` of the coordinator
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn deadlock_check_interval(&self) -> Duration {
        Duration::from_millis(self.deadlock_check_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("c2pl")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or use defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, or use defaults if it doesn't exist
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.coordinator.host.trim().is_empty() {
            return Err(anyhow!("coordinator.host must not be empty"));
        }
        if self.coordinator.deadlock_check_interval_ms == 0 {
            return Err(anyhow!("coordinator.deadlock_check_interval_ms must be greater than 0"));
        }
        if self.coordinator.rpc_timeout_ms == 0 {
            return Err(anyhow!("coordinator.rpc_timeout_ms must be greater than 0"));
        }
        if self.site.blocked_log_interval_ms == 0 {
            return Err(anyhow!("site.blocked_log_interval_ms must be greater than 0"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "coordinator.host" => Ok(self.coordinator.host.clone()),
            "coordinator.port" => Ok(self.coordinator.port.to_string()),
            "coordinator.deadlock_check_interval_ms" => {
                Ok(self.coordinator.deadlock_check_interval_ms.to_string())
            }
            "coordinator.rpc_timeout_ms" => Ok(self.coordinator.rpc_timeout_ms.to_string()),

            "site.database_path" => Ok(self.site.database_path.display().to_string()),
            "site.listen_host" => Ok(self.site.listen_host.clone()),
            "site.operation_delay_ms" => Ok(self.site.operation_delay_ms.to_string()),
            "site.blocked_log_interval_ms" => Ok(self.site.blocked_log_interval_ms.to_string()),

            "logging.verbose" => Ok(self.logging.verbose.to_string()),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `c2pl config show` to see available keys.",
                key
            )),
        }
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "coordinator.host",
            "coordinator.port",
            "coordinator.deadlock_check_interval_ms",
            "coordinator.rpc_timeout_ms",
            "site.database_path",
            "site.listen_host",
            "site.operation_delay_ms",
            "site.blocked_log_interval_ms",
            "logging.verbose",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }
}
