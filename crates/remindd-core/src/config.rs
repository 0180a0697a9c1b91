//! TOML-based engine configuration.
//!
//! Stores operational settings:
//! - Scheduler cadence, batching, concurrency, and retry policy
//! - Escalation check cadence
//! - Health thresholds
//! - Default timezone and the optional webhook endpoint
//!
//! Configuration is stored at `~/.config/remindd/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::store::data_dir;

/// Scheduler loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between cycles when self-timed.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Reminders due within this many seconds of "now" count as due.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: i64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum concurrent in-flight delivery attempts within a batch.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Retries per reminder within one cycle, after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Failed cycles before a reminder is promoted to terminal `failed`.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

/// Escalation engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Seconds between escalation checks when self-timed.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

/// Health classification thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// A last cycle older than this is stale (degraded).
    #[serde(default = "default_max_cycle_age_secs")]
    pub max_cycle_age_secs: i64,
    /// Failure rate above this is degraded.
    #[serde(default = "default_degraded_failure_rate")]
    pub degraded_failure_rate: f64,
    /// Failure rate above this is unhealthy.
    #[serde(default = "default_unhealthy_failure_rate")]
    pub unhealthy_failure_rate: f64,
}

/// Engine configuration.
///
/// Serialized to/from TOML at `~/.config/remindd/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub health: HealthConfig,
    /// IANA timezone applied to reminders created without one.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    /// Webhook endpoint for the reference notifier. When absent the CLI
    /// falls back to the log notifier.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

// Default functions
fn default_poll_interval_secs() -> u64 {
    60
}
fn default_grace_secs() -> i64 {
    30
}
fn default_batch_size() -> usize {
    50
}
fn default_max_concurrency() -> usize {
    8
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    2_000
}
fn default_max_consecutive_failures() -> u32 {
    5
}
fn default_check_interval_secs() -> u64 {
    60
}
fn default_max_cycle_age_secs() -> i64 {
    180
}
fn default_degraded_failure_rate() -> f64 {
    0.2
}
fn default_unhealthy_failure_rate() -> f64 {
    0.5
}
fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            grace_secs: default_grace_secs(),
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_cycle_age_secs: default_max_cycle_age_secs(),
            degraded_failure_rate: default_degraded_failure_rate(),
            unhealthy_failure_rate: default_unhealthy_failure_rate(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            escalation: EscalationConfig::default(),
            health: HealthConfig::default(),
            default_timezone: default_timezone(),
            webhook_url: None,
        }
    }
}

impl EngineConfig {
    fn path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load the configuration, falling back to defaults if the file is
    /// missing.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Persist the configuration.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::path()?;
        std::fs::write(&path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}
