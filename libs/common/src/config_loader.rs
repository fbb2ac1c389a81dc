//! Layered configuration loading
//!
//! Priority (highest to lowest):
//! 1. Environment variables (prefixed, `__` separates nested keys)
//! 2. Config file (TOML, YAML or JSON, chosen by extension)
//! 3. Default values of the target type

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};

/// Load `T` from defaults, an optional file and prefixed environment variables
///
/// With prefix `FORGE_`, `FORGE_ENGINE__POOL_SIZE=8` sets `engine.pool_size`.
pub fn load_config<T>(file: Option<&Path>, env_prefix: &str) -> Result<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = file {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        debug!("Loading configuration from {}", path.display());
        figment = merge_file(figment, path)?;
    }

    figment
        .merge(Env::prefixed(env_prefix).split("__"))
        .extract()
        .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))
}

/// Load configuration from a specific file
pub fn load_config_from_file<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    merge_file(Figment::new(), path.as_ref())?
        .extract()
        .map_err(|e| Error::Config(format!("Failed to load configuration from file: {}", e)))
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Config("Config file must have an extension".to_string()))?;

    match extension {
        "toml" => Ok(figment.merge(Toml::file(path))),
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        "json" => Ok(figment.merge(Json::file(path))),
        _ => Err(Error::Config(format!(
            "Unsupported config file format: {}",
            extension
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct Section {
        size: usize,
        enabled: bool,
    }

    impl Default for Section {
        fn default() -> Self {
            Self {
                size: 4,
                enabled: true,
            }
        }
    }

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct TestConfig {
        engine: Section,
        name: String,
    }

    fn write_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config: TestConfig = load_config(None, "CFGTEST_NONE_").unwrap();
        assert_eq!(config, TestConfig::default());
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let file = write_file(".toml", "name = \"forge\"\n[engine]\nsize = 8\n");
        let config: TestConfig = load_config(Some(file.path()), "CFGTEST_TOML_").unwrap();
        assert_eq!(config.engine.size, 8);
        assert!(config.engine.enabled);
        assert_eq!(config.name, "forge");
    }

    #[test]
    fn test_yaml_and_json_files() {
        let yaml = write_file(".yaml", "engine:\n  enabled: false\n");
        let config: TestConfig = load_config_from_file(yaml.path()).unwrap();
        assert!(!config.engine.enabled);

        let json = write_file(".json", r#"{"engine": {"size": 2}}"#);
        let config: TestConfig = load_config_from_file(json.path()).unwrap();
        assert_eq!(config.engine.size, 2);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_file(".toml", "[engine]\nsize = 8\n");
        std::env::set_var("CFGTEST_ENV_ENGINE__SIZE", "16");
        let config: TestConfig = load_config(Some(file.path()), "CFGTEST_ENV_").unwrap();
        std::env::remove_var("CFGTEST_ENV_ENGINE__SIZE");
        assert_eq!(config.engine.size, 16);
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        let missing = load_config::<TestConfig>(Some(Path::new("/no/such/forge.toml")), "X_");
        assert!(matches!(missing, Err(Error::Config(_))));

        let ini = write_file(".ini", "size=1");
        assert!(load_config_from_file::<TestConfig, _>(ini.path()).is_err());
    }
}
