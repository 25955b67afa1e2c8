use std::path::{Path, PathBuf};

use datashift_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

pub const ENV_DATABASE: &str = "DATASHIFT_DATABASE";
pub const ENV_MIGRATIONS_DIR: &str = "DATASHIFT_MIGRATIONS_DIR";
pub const ENV_LOG_TABLE: &str = "DATASHIFT_LOG_TABLE";

/// Loads an `AppConfig` from a YAML or TOML file and layers environment
/// overrides on top.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Read `path` if given, otherwise start from defaults. Process
    /// environment overrides are applied afterwards.
    pub fn load(path: Option<&Path>) -> Result<AppConfig> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                debug!("no config file given, using defaults");
                AppConfig::default()
            }
        };
        Self::apply_overrides(&mut config, |key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = Self::parse(&contents, ext)?;
        info!("config loaded from {}", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str, ext: &str) -> Result<AppConfig> {
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => {
                toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
            }
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }

    /// Apply `DATASHIFT_*` overrides resolved through `lookup`. Blank values
    /// are ignored.
    pub fn apply_overrides<F>(config: &mut AppConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get(ENV_DATABASE) {
            debug!("{ENV_DATABASE} overrides database path");
            config.database.path = PathBuf::from(path);
        }
        if let Some(dir) = get(ENV_MIGRATIONS_DIR) {
            debug!("{ENV_MIGRATIONS_DIR} overrides migrations dir");
            config.migrations.dir = PathBuf::from(dir);
        }
        if let Some(table) = get(ENV_LOG_TABLE) {
            debug!("{ENV_LOG_TABLE} overrides log table");
            config.migrations.log_table = table;
        }
    }
}
