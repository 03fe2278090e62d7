//! Cache configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (CACHET_*)
//! 2. TOML config file (if CACHET_CONFIG_FILE set)
//! 3. Built-in defaults

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Response cache configuration.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (CACHET_*)
/// 2. TOML config file (if CACHET_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of live entries before LRU eviction.
    ///
    /// Set via CACHET_MAX_ENTRIES environment variable.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Maximum estimated bytes held by the store.
    ///
    /// Set via CACHET_MAX_MEMORY_BYTES environment variable.
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: u64,

    /// TTL applied when `set` is called without one, in seconds.
    ///
    /// Set via CACHET_DEFAULT_TTL_SECS environment variable.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Upper bound on generated key length.
    ///
    /// Set via CACHET_MAX_KEY_LENGTH environment variable.
    #[serde(default = "default_max_key_length")]
    pub max_key_length: usize,

    /// Characters of normalized text that feed the text digest.
    ///
    /// Set via CACHET_MAX_TEXT_LENGTH environment variable.
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,

    /// Whether content metadata contributes to the key.
    ///
    /// Set via CACHET_INCLUDE_METADATA environment variable.
    #[serde(default = "default_true")]
    pub include_metadata: bool,

    /// Field names stripped from metadata and context before hashing.
    ///
    /// Set via CACHET_SENSITIVE_FIELD_NAMES environment variable.
    #[serde(default = "default_sensitive_field_names")]
    pub sensitive_field_names: Vec<String>,

    /// Number of metrics snapshots kept for trend analysis.
    ///
    /// Set via CACHET_MAX_SNAPSHOT_HISTORY environment variable.
    #[serde(default = "default_max_snapshot_history")]
    pub max_snapshot_history: usize,

    /// Number of response time samples in the rolling average.
    ///
    /// Set via CACHET_MAX_RESPONSE_TIME_SAMPLES environment variable.
    #[serde(default = "default_max_response_time_samples")]
    pub max_response_time_samples: usize,

    /// Interval of the optional expired-entry sweep, in seconds.
    ///
    /// Set via CACHET_SWEEP_INTERVAL_SECS environment variable. Unset disables
    /// the sweep; expiry is still enforced on access.
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,

    /// Whether the built-in policy set is registered on startup.
    ///
    /// Set via CACHET_BUILTIN_POLICIES environment variable.
    #[serde(default = "default_true")]
    pub builtin_policies: bool,

    /// Load thresholds for adaptive TTL shrinking.
    ///
    /// Set via CACHET_ADAPTIVE__* environment variables.
    #[serde(default)]
    pub adaptive: AdaptiveConfig,
}

/// Thresholds that decide when the system counts as degraded, and how hard
/// adaptive policies shrink their TTL when it is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// CPU usage percentage above which load is degraded.
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f64,

    /// Memory usage percentage above which load is degraded.
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,

    /// Hit rate (0..=1) below which load is degraded.
    #[serde(default = "default_min_hit_rate")]
    pub min_hit_rate: f64,

    /// Request volume per minute above which load is degraded.
    #[serde(default = "default_target_requests_per_minute")]
    pub target_requests_per_minute: f64,

    /// Multiplier applied to an adaptive policy's TTL under degradation.
    #[serde(default = "default_ttl_reduction_factor")]
    pub ttl_reduction_factor: f64,

    /// Floor for shrunk TTLs, in seconds.
    #[serde(default = "default_min_ttl_secs")]
    pub min_ttl_secs: u64,
}

fn default_max_entries() -> usize {
    1000
}

fn default_max_memory_bytes() -> u64 {
    104_857_600 // 100MB
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_max_key_length() -> usize {
    250
}

fn default_max_text_length() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_sensitive_field_names() -> Vec<String> {
    [
        "userId",
        "user_id",
        "sessionId",
        "session_id",
        "requestId",
        "request_id",
        "timestamp",
        "apiKey",
        "api_key",
        "token",
        "password",
        "email",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_max_snapshot_history() -> usize {
    100
}

fn default_max_response_time_samples() -> usize {
    1000
}

fn default_cpu_threshold() -> f64 {
    80.0
}

fn default_memory_threshold() -> f64 {
    85.0
}

fn default_min_hit_rate() -> f64 {
    0.3
}

fn default_target_requests_per_minute() -> f64 {
    1000.0
}

fn default_ttl_reduction_factor() -> f64 {
    0.5
}

fn default_min_ttl_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_memory_bytes: default_max_memory_bytes(),
            default_ttl_secs: default_ttl_secs(),
            max_key_length: default_max_key_length(),
            max_text_length: default_max_text_length(),
            include_metadata: true,
            sensitive_field_names: default_sensitive_field_names(),
            max_snapshot_history: default_max_snapshot_history(),
            max_response_time_samples: default_max_response_time_samples(),
            sweep_interval_secs: None,
            builtin_policies: true,
            adaptive: AdaptiveConfig::default(),
        }
    }
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: default_cpu_threshold(),
            memory_threshold: default_memory_threshold(),
            min_hit_rate: default_min_hit_rate(),
            target_requests_per_minute: default_target_requests_per_minute(),
            ttl_reduction_factor: default_ttl_reduction_factor(),
            min_ttl_secs: default_min_ttl_secs(),
        }
    }
}

impl AdaptiveConfig {
    /// Floor for shrunk TTLs as a Duration.
    pub fn min_ttl(&self) -> Duration {
        Duration::from_secs(self.min_ttl_secs)
    }
}

impl CacheConfig {
    /// Default TTL as Duration.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Sweep interval as Duration, if the sweep is enabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs.map(Duration::from_secs)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `CACHET_`
    /// 2. TOML file from `CACHET_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("CACHET_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("CACHET_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
