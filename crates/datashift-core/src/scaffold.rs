//! Writes new, empty migration files with a fresh version stamp.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use datashift_common::{Error, Result, Version};
use tracing::info;

use crate::discovery::parse_filename;

/// Kind of skeleton to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Template {
    /// Self-contained `.sql` file with an `up` section.
    #[default]
    Sql,
    /// `.rs` file whose `up` function must be registered in a `Registry`.
    Rust,
}

impl Template {
    fn extension(self) -> &'static str {
        match self {
            Template::Sql => "sql",
            Template::Rust => "rs",
        }
    }
}

/// Turn `TestMigration`, `test migration` or `test-migration` into
/// `test_migration`.
pub fn normalize_name(name: &str) -> Result<String> {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        } else {
            if !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        }
    }

    let normalized = out.trim_matches('_').to_string();
    if normalized.is_empty() {
        return Err(Error::Other(format!("invalid migration name '{name}'")));
    }
    Ok(normalized)
}

/// Create `<version>_<name>.<ext>` under `dir`, stamped from `now`, and return
/// its path. The skeleton exposes only an `up` operation.
///
/// Refuses to write if any file in `dir` already carries the same version.
pub fn generate(dir: &Path, name: &str, now: DateTime<Utc>, template: Template) -> Result<PathBuf> {
    let name = normalize_name(name)?;
    let version = Version::from_timestamp(now)?;

    std::fs::create_dir_all(dir)?;
    for entry in std::fs::read_dir(dir)? {
        let file_name = entry?.file_name().to_string_lossy().into_owned();
        if let Ok(existing) = parse_filename(&file_name) {
            if existing.version == version {
                return Err(Error::DuplicateVersion(version));
            }
        }
    }

    let path = dir.join(format!("{version}_{name}.{}", template.extension()));
    let generated_at = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let contents = match template {
        Template::Sql => sql_skeleton(&name, &generated_at),
        Template::Rust => rust_skeleton(version, &name, &generated_at),
    };
    std::fs::write(&path, contents)?;

    info!("created data migration {}", path.display());
    Ok(path)
}

fn sql_skeleton(name: &str, generated_at: &str) -> String {
    format!("-- Data migration: {name}\n-- Generated at: {generated_at}\n\n-- migrate:up\n\n")
}

fn rust_skeleton(version: Version, name: &str, generated_at: &str) -> String {
    format!(
        "//! Data migration: {name}
//! Generated at: {generated_at}
//!
//! Register at startup with `registry.register(Version::new({version}), up)`.

use datashift_core::Result;
use rusqlite::Transaction;

pub fn up(tx: &Transaction<'_>) -> Result<()> {{
    let _ = tx;
    Ok(())
}}
"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Discovery, Registry};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn halloween() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 10, 31, 0, 0, 0).unwrap()
    }

    #[test]
    fn normalizes_names() {
        assert_eq!(normalize_name("test_migration").unwrap(), "test_migration");
        assert_eq!(normalize_name("TestMigration").unwrap(), "test_migration");
        assert_eq!(normalize_name("test migration").unwrap(), "test_migration");
        assert_eq!(normalize_name(" Backfill-User  Emails ").unwrap(), "backfill_user_emails");
        assert_eq!(normalize_name("v2Import").unwrap(), "v2_import");
        assert!(normalize_name("  --  ").is_err());
    }

    #[test]
    fn creates_non_empty_sql_migration_at_expected_path() {
        let dir = TempDir::new().unwrap();
        let path = generate(dir.path(), "test_migration", halloween(), Template::Sql).unwrap();

        assert_eq!(path, dir.path().join("20161031000000_test_migration.sql"));
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn generated_sql_is_discoverable_one_way_unit() {
        let dir = TempDir::new().unwrap();
        generate(dir.path(), "test", halloween(), Template::Sql).unwrap();

        let registry = Registry::new();
        let units = Discovery::new(&registry).migrations(dir.path()).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].version(), Version::new(20161031000000));
        assert!(!units[0].is_reversible());
    }

    #[test]
    fn rust_skeleton_exposes_only_up() {
        let dir = TempDir::new().unwrap();
        let path = generate(dir.path(), "Backfill", halloween(), Template::Rust).unwrap();
        assert_eq!(path, dir.path().join("20161031000000_backfill.rs"));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("pub fn up("));
        assert!(!contents.contains("fn down("));
        assert!(contents.contains("Version::new(20161031000000)"));
    }

    #[test]
    fn refuses_to_reuse_a_version() {
        let dir = TempDir::new().unwrap();
        generate(dir.path(), "first", halloween(), Template::Sql).unwrap();
        let err = generate(dir.path(), "second", halloween(), Template::Rust).unwrap_err();
        assert!(matches!(err, Error::DuplicateVersion(v) if v == Version::new(20161031000000)));
    }

    #[test]
    fn out_of_range_timestamp_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let far = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();

        let err = generate(dir.path(), "x", far, Template::Sql).unwrap_err();
        assert!(matches!(err, Error::InvalidVersion(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(Discovery::new(&Registry::new())
            .migrations(dir.path())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("db").join("data-migrations");
        let path = generate(&nested, "seed", halloween(), Template::Sql).unwrap();
        assert!(path.starts_with(&nested));
    }
}
