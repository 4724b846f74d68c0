// Configuration structs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::fixloop::FixLoopConfig;

/// Daemon configuration, loaded once at startup and passed to each
/// component at construction. There is no process-wide mutable settings
/// state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateway listen address.
    pub bind_address: String,

    /// Generative backend settings.
    pub backend: BackendConfig,

    /// Fix loop tuning.
    pub fixloop: FixLoopSettings,

    /// Pattern cache settings.
    pub cache: CacheConfig,

    /// Metrics settings.
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7171".to_string(),
            backend: BackendConfig::default(),
            fixloop: FixLoopSettings::default(),
            cache: CacheConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Assemble the fix loop's runtime config from its section plus the
    /// backend call bound.
    pub fn fixloop_config(&self) -> FixLoopConfig {
        FixLoopConfig {
            max_attempts: self.fixloop.max_attempts,
            backoff_base_ms: self.fixloop.backoff_base_ms,
            backoff_cap_ms: self.fixloop.backoff_cap_ms,
            verify_timeout_ms: self.fixloop.verify_timeout_ms,
            backend_timeout_secs: self.backend.timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// API key; falls back to the ANTHROPIC_API_KEY environment variable.
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "claude-sonnet-4-20250514".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixLoopSettings {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub verify_timeout_ms: u64,
}

impl Default for FixLoopSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 8_000,
            verify_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    /// Where the cache persists between runs. `None` disables persistence.
    pub persist_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            persist_path: wren_dir().map(|d| d.join("cache.json")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: wren_dir().map(|d| d.join("metrics")),
        }
    }
}

/// `~/.wren`, when a home directory can be determined.
pub fn wren_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".wren"))
}
