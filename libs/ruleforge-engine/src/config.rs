//! Engine configuration
//!
//! Loaded by callers through `common::config_loader` (`[engine]` section or
//! `FORGE_*` environment variables); every field has a default.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::dispatch::DispatchPolicy;
use crate::error::{Result, RuleError};
use crate::pool::{PoolConfig, DEFAULT_SHUTDOWN_GRACE_MS};

const MAX_DEFAULT_POOL_SIZE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads in the pool
    pub pool_size: usize,
    /// Global switch for offloading threadable rules
    pub threading_enabled: bool,
    /// Per-job deadline, counted from hand-off to a worker
    pub job_timeout_ms: u64,
    /// Jobs allowed to wait for a free worker
    pub queue_depth: usize,
    /// Budget a dispatch decision may spend waiting for capacity
    pub admission_wait_ms: u64,
    pub shutdown_grace_ms: u64,
    /// Run a stage locally when the pool rejects it as saturated
    pub fallback_on_saturation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            threading_enabled: true,
            job_timeout_ms: 5000,
            queue_depth: 64,
            admission_wait_ms: 0,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            fallback_on_saturation: true,
        }
    }
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_POOL_SIZE)
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(RuleError::Config("pool_size must be at least 1".to_string()));
        }
        if self.job_timeout_ms == 0 {
            return Err(RuleError::Config(
                "job_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            pool_size: self.pool_size,
            queue_depth: self.queue_depth,
            job_timeout: Duration::from_millis(self.job_timeout_ms),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        }
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            threading_enabled: self.threading_enabled,
            admission_wait: Duration::from_millis(self.admission_wait_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!((1..=MAX_DEFAULT_POOL_SIZE).contains(&config.pool_size));
        assert!(config.threading_enabled);
        assert_eq!(config.pool_config().job_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = EngineConfig {
            pool_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RuleError::Config(_))));

        let config = EngineConfig {
            job_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"pool_size": 8, "threading_enabled": false}"#).unwrap();
        assert_eq!(config.pool_size, 8);
        assert!(!config.threading_enabled);
        assert_eq!(config.queue_depth, 64);
        assert!(!config.dispatch_policy().threading_enabled);
    }
}
