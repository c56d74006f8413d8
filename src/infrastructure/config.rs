//! Engine configuration.
//!
//! One JSON file holds everything tunable: API hosts, rate limits, retry
//! policy, fan-out budgets, and logging. [`ConfigManager`] owns the file
//! location and load/save; defaults are safe to run against a real account.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use crate::infrastructure::api_client::ApiClientConfig;
use crate::infrastructure::retry::RetryPolicy;

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Store location for the bundled SQLite implementation.
    pub database_url: String,

    pub api: ApiClientConfig,

    pub rate_limit: RateLimitConfig,

    pub retry: RetryPolicy,

    pub sync: SyncConfig,

    pub extraction: ExtractionConfig,

    pub logging: LoggingConfig,
}

/// Shared limiter settings; one limiter instance serves the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum in-flight external calls.
    pub max_concurrent: u32,

    /// Maximum external call starts per second.
    pub max_requests_per_second: u32,
}

/// Hierarchical sync fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Branch concurrency baseline; the tables level runs at
    /// `min(worker_budget, base count)`.
    pub worker_budget: usize,

    /// Hard ceiling for the records level, which otherwise runs at
    /// `2 * worker_budget`.
    pub records_fanout_ceiling: usize,
}

/// Extraction worker-pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Maximum shard/worker count; actual count shrinks when tasks are few.
    pub worker_budget: usize,

    /// Flush accumulated change records every N tasks instead of once at
    /// shard completion. `None` keeps the single terminal flush.
    pub flush_every: Option<usize>,
}

/// Logging output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: String,

    /// Emit JSON-formatted logs instead of human-readable ones.
    pub json_format: bool,

    /// Write to stderr.
    pub console_output: bool,

    /// Also write daily-rolled files under the data directory.
    pub file_output: bool,

    /// File name prefix for rolled log files.
    pub file_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://fieldtrace.db".to_string(),
            api: ApiClientConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            sync: SyncConfig::default(),
            extraction: ExtractionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_requests_per_second: 5,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            worker_budget: 4,
            records_fanout_ceiling: 16,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            worker_budget: 4,
            flush_every: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            file_prefix: "fieldtrace".to_string(),
        }
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_concurrent == 0 {
            anyhow::bail!("rate_limit.max_concurrent must be at least 1");
        }
        if self.rate_limit.max_requests_per_second == 0 {
            anyhow::bail!("rate_limit.max_requests_per_second must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.sync.worker_budget == 0 {
            anyhow::bail!("sync.worker_budget must be at least 1");
        }
        if self.sync.records_fanout_ceiling == 0 {
            anyhow::bail!("sync.records_fanout_ceiling must be at least 1");
        }
        if self.extraction.worker_budget == 0 {
            anyhow::bail!("extraction.worker_budget must be at least 1");
        }
        if self.extraction.flush_every == Some(0) {
            anyhow::bail!("extraction.flush_every must be at least 1 when set");
        }
        if self.api.page_size == 0 || self.api.page_size > 100 {
            anyhow::bail!("api.page_size must be between 1 and 100");
        }
        if self.api.base_url.is_empty() || self.api.activity_base_url.is_empty() {
            anyhow::bail!("api hosts must not be empty");
        }
        if self.database_url.is_empty() {
            anyhow::bail!("database_url must not be empty");
        }
        Ok(())
    }
}

/// Loads and saves the configuration file.
pub struct ConfigManager {
    pub config_path: PathBuf,
}

impl ConfigManager {
    /// Per-user configuration directory.
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join("fieldtrace");
        Ok(config_dir)
    }

    /// Per-user data directory (database, logs).
    pub fn get_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to get user data directory")?
            .join("fieldtrace");
        Ok(data_dir)
    }

    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_dir()?.join("fieldtrace_config.json");
        Ok(Self { config_path })
    }

    /// Load the configuration, writing defaults on first run.
    pub async fn load_config(&self) -> Result<EngineConfig> {
        if !self.config_path.exists() {
            info!(
                "Configuration file not found, creating default: {:?}",
                self.config_path
            );
            let default_config = EngineConfig::default();
            self.save_config(&default_config).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .context("Failed to read configuration file")?;
        let config: EngineConfig =
            serde_json::from_str(&content).context("Failed to parse configuration file")?;
        config.validate()?;
        info!("Loaded configuration from: {:?}", self.config_path);
        Ok(config)
    }

    pub async fn save_config(&self, config: &EngineConfig) -> Result<()> {
        config.validate()?;
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }
        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;
        Ok(())
    }
}
