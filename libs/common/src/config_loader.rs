//! Configuration loading helper functions
//!
//! Layers configuration sources with figment. Priority (highest to lowest):
//! 1. Environment variables with the service prefix (`BMSLINK_TIMING__POLL_TIMEOUT_MS=80`)
//! 2. The explicit config file, if one was given
//! 3. Serialized defaults of the target type

use std::path::Path;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Error, Result};

/// Build the layered figment for a service without extracting it.
///
/// Exposed separately so callers can add their own providers on top.
pub fn build_figment<T>(defaults: &T, file: Option<&Path>, env_prefix: &str) -> Result<Figment>
where
    T: Serialize,
{
    let mut figment = Figment::from(Serialized::defaults(defaults));

    if let Some(path) = file {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        figment = match file_format(path)? {
            FileFormat::Yaml => figment.merge(Yaml::file(path)),
            FileFormat::Toml => figment.merge(Toml::file(path)),
            FileFormat::Json => figment.merge(Json::file(path)),
        };
        info!("Using configuration file: {}", path.display());
    } else {
        debug!("No configuration file given, using defaults");
    }

    // `__` separates nesting so that single underscores stay inside field names
    Ok(figment.merge(Env::prefixed(env_prefix).split("__")))
}

/// Load configuration: defaults, then optional file, then prefixed environment
pub fn load_config<T>(file: Option<&Path>, env_prefix: &str) -> Result<T>
where
    T: Serialize + for<'de> Deserialize<'de> + Default,
{
    let defaults = T::default();
    build_figment(&defaults, file, env_prefix)?
        .extract()
        .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))
}

enum FileFormat {
    Yaml,
    Toml,
    Json,
}

fn file_format(path: &Path) -> Result<FileFormat> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Config("Config file must have an extension".to_string()))?;

    match extension {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        other => Err(Error::Config(format!(
            "Unsupported config file format: {}",
            other
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestConfig {
        name: String,
        port: u16,
        nested: NestedConfig,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct NestedConfig {
        enabled: bool,
        value: i32,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            Self {
                name: "default".to_string(),
                port: 3000,
                nested: NestedConfig {
                    enabled: false,
                    value: 1,
                },
            }
        }
    }

    #[test]
    fn test_defaults_without_file() {
        let cfg: TestConfig = load_config(None, "CFGTEST_NONE_").unwrap();
        assert_eq!(cfg, TestConfig::default());
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "port: 8080\nnested:\n  enabled: true").unwrap();

        let cfg: TestConfig = load_config(Some(&path), "CFGTEST_YAML_").unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.nested.enabled);
        // Untouched fields keep their defaults
        assert_eq!(cfg.name, "default");
        assert_eq!(cfg.nested.value, 1);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        let result: Result<TestConfig> = load_config(Some(&path), "CFGTEST_MISSING_");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg.ini");
        std::fs::write(&path, "port=1").unwrap();
        let result: Result<TestConfig> = load_config(Some(&path), "CFGTEST_INI_");
        assert!(result.is_err());
    }
}
