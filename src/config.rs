// Configuration File Support
//
// TOML configuration for the taskgate service with environment variable overrides.
// Configuration files are loaded from the XDG config directory: ~/.config/taskgate/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rate_limit::RateLimitConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Per-identity admission windows
    pub rate_limit: RateLimitConfig,

    /// Worker pool configuration
    pub workers: WorkersConfig,

    /// Durable queue configuration
    pub queue: QueueConfig,

    /// Completion record configuration
    pub audit: AuditConfig,

    /// HTTP front end configuration
    pub server: ServerConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkersConfig {
    /// Number of concurrent execution units
    pub worker_count: usize,

    /// How long a claimed task may stay unacknowledged before redelivery
    pub lease_timeout_ms: u64,

    /// How often expired leases are swept back into the queue
    pub lease_sweep_interval_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            lease_timeout_ms: 30_000,
            lease_sweep_interval_ms: 1_000,
        }
    }
}

impl WorkersConfig {
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    pub fn lease_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.lease_sweep_interval_ms)
    }
}

/// Durable queue configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Directory holding the queue journal
    pub endpoint: String,

    /// Terminal records written before the journal is compacted
    pub compact_after: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            endpoint: "./data/queue".to_string(),
            compact_after: crate::queue::local::DEFAULT_COMPACT_AFTER,
        }
    }
}

/// Completion record configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    /// Append-only file receiving one line per executed task
    pub log_file: String,

    /// Also print each record to stdout
    pub echo_stdout: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_file: "task_logs.log".to_string(),
            echo_stdout: true,
        }
    }
}

/// HTTP front end configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub bind_address: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to expose `/metrics` on the HTTP router
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// Environment overrides are applied and the result validated, whether
    /// or not the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if the resulting configuration is invalid.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/taskgate/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "taskgate", "Taskgate") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("taskgate")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - TASKGATE_LOG_LEVEL
    /// - TASKGATE_LOG_FORMAT
    /// - TASKGATE_SHORT_WINDOW_LIMIT, TASKGATE_SHORT_WINDOW_MS
    /// - TASKGATE_LONG_WINDOW_LIMIT, TASKGATE_LONG_WINDOW_MS
    /// - TASKGATE_WORKER_COUNT
    /// - TASKGATE_QUEUE_ENDPOINT
    /// - TASKGATE_AUDIT_LOG
    /// - TASKGATE_PORT
    fn apply_env_overrides(self) -> Self {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `lookup` instead of the process environment
    pub fn apply_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("TASKGATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("TASKGATE_LOG_FORMAT") {
            self.logging.format = format;
        }

        self.rate_limit = self.rate_limit.apply_overrides_from(&lookup);

        if let Some(count) = lookup("TASKGATE_WORKER_COUNT") {
            if let Ok(count) = count.parse::<usize>() {
                if count > 0 && count <= 64 {
                    self.workers.worker_count = count;
                }
            }
        }

        if let Some(endpoint) = lookup("TASKGATE_QUEUE_ENDPOINT") {
            if !endpoint.is_empty() {
                self.queue.endpoint = endpoint;
            }
        }
        if let Some(log_file) = lookup("TASKGATE_AUDIT_LOG") {
            if !log_file.is_empty() {
                self.audit.log_file = log_file;
            }
        }

        if let Some(port) = lookup("TASKGATE_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                if port > 0 {
                    self.server.port = port;
                }
            }
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        self.rate_limit.validate()?;

        if self.workers.worker_count == 0 {
            anyhow::bail!("Worker count must be > 0");
        }
        if self.workers.worker_count > 64 {
            anyhow::bail!("Worker count must be <= 64");
        }
        if self.workers.lease_timeout_ms == 0 {
            anyhow::bail!("Lease timeout must be > 0 ms");
        }
        if self.workers.lease_sweep_interval_ms == 0 {
            anyhow::bail!("Lease sweep interval must be > 0 ms");
        }

        if self.queue.endpoint.trim().is_empty() {
            anyhow::bail!("Queue endpoint must not be empty");
        }
        if self.queue.compact_after == 0 {
            anyhow::bail!("Queue compact_after must be > 0");
        }

        if self.audit.log_file.trim().is_empty() {
            anyhow::bail!("Audit log file must not be empty");
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port must be > 0");
        }
        self.socket_addr()?;

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }

    /// Address the HTTP front end listens on
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.bind_address, self.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "Invalid bind address: {}:{}",
                    self.server.bind_address, self.server.port
                )
            })
    }
}
