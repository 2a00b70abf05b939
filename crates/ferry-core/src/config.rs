//! Configuration system for Ferry.
//!
//! Required values (broker address, endpoint URL, listen address, database
//! path) come from environment variables and must be present and non-blank.
//! Tunables come from an optional TOML file and fall back to defaults.
//!
//! Config file location:
//!   1. $FERRY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/ferry/config.toml
//!   3. ~/.config/ferry/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ── Recognized environment variables ──────────────────────────────────────────

pub const MQTT_BROKER_ADDR: &str = "MQTT_BROKER_ADDR";
pub const CLIENT_ID: &str = "CLIENT_ID";
pub const TOPIC: &str = "TOPIC";
pub const BATCHMESSAGE_API_URL: &str = "BATCHMESSAGE_API_URL";
pub const SERVER_ADDR: &str = "SERVER_ADDR";
pub const DB_PATH: &str = "DB_PATH";

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Error: {0} environment variable is not set")]
    NotSet(String),
    #[error("Error: {0} is empty or contains only spaces")]
    Blank(String),
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Fetch a required value through `lookup`, trimmed.
///
/// Absent and blank are reported separately so the operator knows which
/// one to fix.
pub fn required_var<F>(key: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or_else(|| ConfigError::NotSet(key.to_string()))?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Blank(key.to_string()));
    }
    Ok(trimmed.to_string())
}

fn process_env(key: &str) -> Option<String> {
    std::env::var_os(key).map(|v| v.to_string_lossy().into_owned())
}

// ── Tunables ──────────────────────────────────────────────────────────────────

/// Top-level file configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    pub edge: EdgeSettings,
    pub ingest: IngestSettings,
}

/// What the edge buffer does when it is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest buffered message to make room.
    #[default]
    DropOldest,
    /// Reject the incoming message.
    DropNewest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeSettings {
    pub flush_interval_secs: u64,
    /// Max buffered messages between flushes.
    pub buffer_capacity: usize,
    pub overflow: OverflowPolicy,
    pub request_timeout_secs: u64,
    /// Upper bound on the final drain-and-send at shutdown.
    pub shutdown_flush_timeout_secs: u64,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Keep failed batches and resend them on later ticks. When false a
    /// failed batch is logged and dropped.
    pub enabled: bool,
    pub max_pending_batches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Messages per insert transaction.
    pub batch_size: usize,
    /// Concurrent insert workers. Clamped to `pool.max_open`.
    pub workers: usize,
    /// Max chunks queued or running in the worker pool.
    pub queue_capacity: usize,
    pub shutdown_timeout_secs: u64,
    pub pool: PoolSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub max_open: u32,
    pub max_idle: u32,
    pub max_lifetime_secs: u64,
    pub connection_timeout_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for EdgeSettings {
    fn default() -> Self {
        Self {
            flush_interval_secs: 15,
            buffer_capacity: 100_000,
            overflow: OverflowPolicy::DropOldest,
            request_timeout_secs: 30,
            shutdown_flush_timeout_secs: 10,
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pending_batches: 16,
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            workers: 10,
            queue_capacity: 1024,
            shutdown_timeout_secs: 30,
            pool: PoolSettings::default(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_open: 25,
            max_idle: 10,
            max_lifetime_secs: 300,
            connection_timeout_secs: 30,
        }
    }
}

impl EdgeSettings {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_flush_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_flush_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "edge.flush_interval_secs must be > 0".into(),
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "edge.buffer_capacity must be > 0".into(),
            ));
        }
        // A zero timeout fails every send and every final flush outright.
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "edge.request_timeout_secs must be > 0".into(),
            ));
        }
        if self.shutdown_flush_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "edge.shutdown_flush_timeout_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl IngestSettings {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Worker count never exceeds the pool size, so a worker is never left
    /// waiting for a connection another worker holds.
    pub fn effective_workers(&self) -> usize {
        self.workers.min(self.pool.max_open as usize).max(1)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("ingest.batch_size must be > 0".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("ingest.workers must be > 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "ingest.queue_capacity must be > 0".into(),
            ));
        }
        if self.pool.max_open == 0 {
            return Err(ConfigError::Invalid(
                "ingest.pool.max_open must be > 0".into(),
            ));
        }
        if self.pool.max_idle > self.pool.max_open {
            return Err(ConfigError::Invalid(
                "ingest.pool.max_idle must not exceed max_open".into(),
            ));
        }
        Ok(())
    }
}

impl PoolSettings {
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("ferry")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl FerryConfig {
    /// Load tunables: file → FERRY_* env overrides → validation.
    /// A missing file means defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::parse(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            FerryConfig::default()
        };
        config.apply_env_overrides(process_env);
        config.edge.validate()?;
        config.ingest.validate()?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("FERRY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply FERRY_* overrides. Unparseable values are ignored.
    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FERRY_EDGE__FLUSH_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.edge.flush_interval_secs = v;
        }
        if let Some(v) = lookup("FERRY_EDGE__BUFFER_CAPACITY").and_then(|v| v.parse().ok()) {
            self.edge.buffer_capacity = v;
        }
        if let Some(v) = lookup("FERRY_EDGE__RETRY__ENABLED") {
            self.edge.retry.enabled = v == "true" || v == "1";
        }
        if let Some(v) = lookup("FERRY_INGEST__BATCH_SIZE").and_then(|v| v.parse().ok()) {
            self.ingest.batch_size = v;
        }
        if let Some(v) = lookup("FERRY_INGEST__WORKERS").and_then(|v| v.parse().ok()) {
            self.ingest.workers = v;
        }
    }
}

// ── Per-binary configuration ──────────────────────────────────────────────────

/// Everything the edge relay needs to start.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub broker_addr: String,
    pub client_id: String,
    pub topic: String,
    pub batch_api_url: String,
    pub settings: EdgeSettings,
}

impl EdgeConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let file = FerryConfig::load()?;
        Self::from_lookup(process_env, file.edge)
    }

    /// Resolve required values in a fixed order; the first failure wins.
    pub fn from_lookup<F>(lookup: F, settings: EdgeSettings) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            broker_addr: required_var(MQTT_BROKER_ADDR, &lookup)?,
            client_id: required_var(CLIENT_ID, &lookup)?,
            topic: required_var(TOPIC, &lookup)?,
            batch_api_url: required_var(BATCHMESSAGE_API_URL, &lookup)?,
            settings,
        })
    }
}

/// Everything the ingestion service needs to start.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub server_addr: String,
    pub db_path: PathBuf,
    pub settings: IngestSettings,
}

impl IngestConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let file = FerryConfig::load()?;
        Self::from_lookup(process_env, file.ingest)
    }

    pub fn from_lookup<F>(lookup: F, settings: IngestSettings) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            server_addr: required_var(SERVER_ADDR, &lookup)?,
            db_path: PathBuf::from(required_var(DB_PATH, &lookup)?),
            settings,
        })
    }
}
