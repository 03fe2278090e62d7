//! Configuration validation rules.
//!
//! This module provides validation logic for `CacheConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::CacheConfig;
use thiserror::Error;

/// Fallback keys are `prefix + ":" + sha256_hex`, so the bound must leave room
/// for the 64-char digest plus a meaningful prefix.
pub(crate) const MIN_KEY_LENGTH: usize = 80;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl CacheConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - any capacity, TTL, history, or sample bound is 0
    /// - `max_key_length` is below 80
    /// - an adaptive threshold is outside its range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(invalid("max_entries", "must be greater than 0"));
        }
        if self.max_memory_bytes == 0 {
            return Err(invalid("max_memory_bytes", "must be greater than 0"));
        }
        if self.default_ttl_secs == 0 {
            return Err(invalid("default_ttl_secs", "must be greater than 0"));
        }
        if self.max_key_length < MIN_KEY_LENGTH {
            return Err(invalid("max_key_length", "must be at least 80"));
        }
        if self.max_text_length == 0 {
            return Err(invalid("max_text_length", "must be greater than 0"));
        }
        if self.max_snapshot_history == 0 {
            return Err(invalid("max_snapshot_history", "must be greater than 0"));
        }
        if self.max_response_time_samples == 0 {
            return Err(invalid("max_response_time_samples", "must be greater than 0"));
        }
        if self.sweep_interval_secs == Some(0) {
            return Err(invalid("sweep_interval_secs", "must be greater than 0 when set"));
        }

        let adaptive = &self.adaptive;
        if !(0.0..=100.0).contains(&adaptive.cpu_threshold) {
            return Err(invalid("adaptive.cpu_threshold", "must be a percentage between 0 and 100"));
        }
        if !(0.0..=100.0).contains(&adaptive.memory_threshold) {
            return Err(invalid("adaptive.memory_threshold", "must be a percentage between 0 and 100"));
        }
        if !(0.0..=1.0).contains(&adaptive.min_hit_rate) {
            return Err(invalid("adaptive.min_hit_rate", "must be between 0 and 1"));
        }
        if adaptive.target_requests_per_minute.is_nan() || adaptive.target_requests_per_minute <= 0.0 {
            return Err(invalid("adaptive.target_requests_per_minute", "must be greater than 0"));
        }
        if adaptive.ttl_reduction_factor.is_nan() || adaptive.ttl_reduction_factor <= 0.0 || adaptive.ttl_reduction_factor > 1.0 {
            return Err(invalid("adaptive.ttl_reduction_factor", "must be in (0, 1]"));
        }

        if self.sensitive_field_names.is_empty() {
            tracing::warn!("sensitive_field_names is empty; caller identifiers will fragment cache keys");
        }

        if adaptive.min_ttl_secs > self.default_ttl_secs {
            tracing::warn!(
                min_ttl_secs = adaptive.min_ttl_secs,
                default_ttl_secs = self.default_ttl_secs,
                "adaptive TTL floor exceeds the default TTL; adaptive shrinking never applies to default entries"
            );
        }

        Ok(())
    }
}
