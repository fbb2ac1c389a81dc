//! CLI configuration file
//!
//! ```toml
//! [engine]
//! pool_size = 4
//! job_timeout_ms = 2000
//!
//! [logging]
//! level = "info,ruleforge_engine=debug"
//! ```

use anyhow::{Context, Result};
use common::config_loader::load_config;
use common::LogConfig;
use ruleforge_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix (`FORGE_ENGINE__POOL_SIZE=8`)
pub const ENV_PREFIX: &str = "FORGE_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub engine: EngineConfig,
    pub logging: LogConfig,
}

/// Command-line overrides applied on top of file and environment
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub threads: Option<bool>,
    pub pool_size: Option<usize>,
    pub verbose: bool,
    pub no_color: bool,
}

impl ForgeConfig {
    pub fn load(file: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let mut config: ForgeConfig =
            load_config(file, ENV_PREFIX).context("Failed to load forge configuration")?;
        config.apply(overrides);
        config
            .engine
            .validate()
            .context("Invalid engine configuration")?;
        Ok(config)
    }

    fn apply(&mut self, overrides: Overrides) {
        if let Some(threads) = overrides.threads {
            self.engine.threading_enabled = threads;
        }
        if let Some(size) = overrides.pool_size {
            self.engine.pool_size = size;
        }
        if overrides.verbose {
            self.logging.level = "debug".to_string();
        }
        if overrides.no_color {
            self.logging.ansi = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_sections_and_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[engine]\npool_size = 3\nqueue_depth = 5\n\n[logging]\nlevel = \"warn\""
        )
        .unwrap();

        let config = ForgeConfig::load(Some(file.path()), Overrides::default()).unwrap();
        assert_eq!(config.engine.pool_size, 3);
        assert_eq!(config.engine.queue_depth, 5);
        assert_eq!(config.logging.level, "warn");

        let overrides = Overrides {
            threads: Some(false),
            pool_size: Some(1),
            verbose: true,
            no_color: true,
        };
        let config = ForgeConfig::load(Some(file.path()), overrides).unwrap();
        assert!(!config.engine.threading_enabled);
        assert_eq!(config.engine.pool_size, 1);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.ansi);
    }

    #[test]
    fn test_invalid_pool_size_is_rejected() {
        let overrides = Overrides {
            pool_size: Some(0),
            ..Default::default()
        };
        assert!(ForgeConfig::load(None, overrides).is_err());
    }
}
