use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_DATABASE_PATH: &str = "data.sqlite3";
pub const DEFAULT_MIGRATIONS_DIR: &str = "db/data-migrations";
pub const DEFAULT_LOG_TABLE: &str = "data_migrations";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file the data migrations run against.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DATABASE_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Directory scanned for `<version>_<name>.<ext>` files.
    pub dir: PathBuf,
    /// Table recording applied versions. Kept apart from any schema
    /// migration table.
    pub log_table: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            log_table: DEFAULT_LOG_TABLE.to_string(),
        }
    }
}
