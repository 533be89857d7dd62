//! Configuration types

use crate::error::{ConfigError, ConfigResult};
use boardsync_common::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on automatic retries so a dead backend cannot stall a board forever
const MAX_RETRIES_LIMIT: u32 = 10;

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Retry policy for persistence calls
    pub retry: RetrySettings,
    /// Bound on a single persistence call, in milliseconds
    pub timeout_ms: u64,
    /// Position allocation settings
    pub ordering: OrderingSettings,
}

/// Retry policy for transient persistence failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub use_jitter: bool,
}

/// Position allocation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderingSettings {
    /// Gap between neighbours for boundary inserts and after a rebalance
    pub step: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            timeout_ms: 10_000,
            ordering: OrderingSettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 200,
            backoff_multiplier: 2.0,
            max_delay_ms: 5_000,
            use_jitter: true,
        }
    }
}

impl Default for OrderingSettings {
    fn default() -> Self {
        Self { step: 1.0 }
    }
}

impl SyncConfig {
    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> ConfigResult<()> {
        if self.retry.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::invalid(
                "retry.max_retries",
                format!("must be at most {MAX_RETRIES_LIMIT}"),
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "retry.backoff_multiplier",
                "must be a finite number of at least 1.0",
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::invalid("timeout_ms", "must be positive"));
        }
        if !self.ordering.step.is_finite() || self.ordering.step <= 0.0 {
            return Err(ConfigError::invalid(
                "ordering.step",
                "must be a finite positive number",
            ));
        }
        Ok(())
    }

    /// Retry policy in the form the dispatcher consumes
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.retry.max_retries,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            backoff_multiplier: self.retry.backoff_multiplier,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            use_jitter: self.retry.use_jitter,
        }
    }

    /// Bound on a single persistence call
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.ordering.step, 1.0);
    }

    #[test]
    fn test_retry_config_conversion() {
        let config = SyncConfig::default();
        let retry = config.retry_config();
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.initial_delay, Duration::from_millis(200));
        assert_eq!(retry.max_delay, Duration::from_secs(5));
        assert!(retry.use_jitter);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SyncConfig::default();
        config.retry.max_retries = 50;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { key, .. }) if key == "retry.max_retries"
        ));

        let mut config = SyncConfig::default();
        config.ordering.step = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());

        for multiplier in [f64::INFINITY, f64::NAN] {
            let mut config = SyncConfig::default();
            config.retry.backoff_multiplier = multiplier;
            assert!(matches!(
                config.validate(),
                Err(ConfigError::ValidationError { key, .. }) if key == "retry.backoff_multiplier"
            ));
        }

        let mut config = SyncConfig::default();
        config.timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
