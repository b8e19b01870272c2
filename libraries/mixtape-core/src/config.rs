//! Engine configuration
//!
//! Every field has a default, so an empty config file (or none at all) yields
//! a working engine. The binary layers a TOML file and environment variables
//! on top of these defaults.

use crate::error::{MixtapeError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest batch the export target accepts per add-tracks request
pub const MAX_EXPORT_BATCH: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub hub: HubSettings,

    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub ordering: OrderingSettings,

    #[serde(default)]
    pub export: ExportSettings,
}

/// Subscription hub reconnect policy
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HubSettings {
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PollingSettings {
    /// Interval while the consuming view is visible
    #[serde(default = "default_visible_interval_ms")]
    pub visible_interval_ms: u64,

    /// Interval while the consuming view is hidden
    #[serde(default = "default_hidden_interval_ms")]
    pub hidden_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheSettings {
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    #[serde(default = "default_dedupe_window_ms")]
    pub dedupe_window_ms: u64,

    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OrderingSettings {
    #[serde(default = "default_resort_debounce_ms")]
    pub resort_debounce_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExportSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            visible_interval_ms: default_visible_interval_ms(),
            hidden_interval_ms: default_hidden_interval_ms(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            dedupe_window_ms: default_dedupe_window_ms(),
            retry_count: default_retry_count(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

impl Default for OrderingSettings {
    fn default() -> Self {
        Self {
            resort_debounce_ms: default_resort_debounce_ms(),
        }
    }
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

impl HubSettings {
    /// Delay before reconnect attempt `attempt` (1-based): base doubled per
    /// attempt, capped at the maximum
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }
}

impl PollingSettings {
    pub fn visible_interval(&self) -> Duration {
        Duration::from_millis(self.visible_interval_ms)
    }

    pub fn hidden_interval(&self) -> Duration {
        Duration::from_millis(self.hidden_interval_ms)
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn dedupe_window(&self) -> Duration {
        Duration::from_millis(self.dedupe_window_ms)
    }

    /// Delay before retry `attempt` (1-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_base_ms.saturating_mul(1u64 << exponent))
    }
}

impl OrderingSettings {
    pub fn resort_debounce(&self) -> Duration {
        Duration::from_millis(self.resort_debounce_ms)
    }
}

impl EngineConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.hub.base_backoff_ms == 0 {
            return Err(MixtapeError::validation("hub.base_backoff_ms must be positive"));
        }
        if self.hub.max_backoff_ms < self.hub.base_backoff_ms {
            return Err(MixtapeError::validation(
                "hub.max_backoff_ms must be at least hub.base_backoff_ms",
            ));
        }
        if self.polling.visible_interval_ms == 0 || self.polling.hidden_interval_ms == 0 {
            return Err(MixtapeError::validation("polling intervals must be positive"));
        }
        if self.export.batch_size == 0 || self.export.batch_size > MAX_EXPORT_BATCH {
            return Err(MixtapeError::validation(format!(
                "export.batch_size must be between 1 and {MAX_EXPORT_BATCH}"
            )));
        }
        Ok(())
    }
}

// Default value functions
fn default_base_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_visible_interval_ms() -> u64 {
    5_000
}

fn default_hidden_interval_ms() -> u64 {
    30_000
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_dedupe_window_ms() -> u64 {
    2_000
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    1_000
}

fn default_resort_debounce_ms() -> u64 {
    100
}

fn default_batch_size() -> usize {
    MAX_EXPORT_BATCH
}
