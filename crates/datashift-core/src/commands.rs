//! Entry points for the command surface: `migrate`, `migrate:up` and
//! `migrate:down`, taking already-parsed arguments.

use std::path::Path;

use datashift_common::{Error, Result, Version};

use crate::migrator::{MigrationReport, Migrator, Target};

/// `migrate`: apply every pending migration.
pub fn migrate(migrator: &Migrator, dir: &Path) -> Result<MigrationReport> {
    migrator.migrate(dir)
}

/// `migrate:up`: apply the single migration named by `version`.
pub fn migrate_up(migrator: &Migrator, dir: &Path, version: Option<&str>) -> Result<MigrationReport> {
    let version = require_version(version)?;
    migrator.migrate_up(dir, Target::Version(version))
}

/// `migrate:down`: roll back the single migration named by `version`.
pub fn migrate_down(
    migrator: &Migrator,
    dir: &Path,
    version: Option<&str>,
) -> Result<MigrationReport> {
    let version = require_version(version)?;
    migrator.migrate_down(dir, version)
}

/// A single-version command never falls back to a default version.
pub fn require_version(version: Option<&str>) -> Result<Version> {
    match version.map(str::trim) {
        None | Some("") => Err(Error::MissingVersion),
        Some(raw) => raw.parse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Registry;
    use datashift_db::{Store, VersionLog};
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Migrator) {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("20161101020304_test.sql"),
            "-- migrate:up\nCREATE TABLE IF NOT EXISTS touched (id INTEGER);\n",
        )
        .unwrap();
        let migrator = Migrator::new(
            Store::in_memory().unwrap(),
            VersionLog::new("data_migrations").unwrap(),
            Registry::new(),
        );
        (dir, migrator)
    }

    #[test]
    fn require_version_rejects_missing_and_blank() {
        assert!(matches!(require_version(None), Err(Error::MissingVersion)));
        assert!(matches!(require_version(Some("   ")), Err(Error::MissingVersion)));
        assert!(matches!(require_version(Some("soon")), Err(Error::InvalidVersion(_))));
        assert_eq!(
            require_version(Some("20161101020304")).unwrap(),
            Version::new(20161101020304)
        );
    }

    #[test]
    fn single_version_commands_require_version() {
        let (dir, migrator) = setup();

        let err = migrate_up(&migrator, dir.path(), None).unwrap_err();
        assert_eq!(err.to_string(), "VERSION is required");
        let err = migrate_down(&migrator, dir.path(), None).unwrap_err();
        assert_eq!(err.to_string(), "VERSION is required");

        assert!(migrator.all_versions().unwrap().is_empty());
    }

    #[test]
    fn migrate_twice_logs_once() {
        let (dir, migrator) = setup();
        for _ in 0..2 {
            let report = migrate(&migrator, dir.path()).unwrap();
            assert_eq!(report.current_version, Version::new(20161101020304));
            assert_eq!(migrator.all_versions().unwrap().len(), 1);
        }
    }

    #[test]
    fn migrate_up_by_version_twice_logs_once() {
        let (dir, migrator) = setup();
        for _ in 0..2 {
            let report = migrate_up(&migrator, dir.path(), Some("20161101020304")).unwrap();
            assert_eq!(report.current_version, Version::new(20161101020304));
            assert_eq!(migrator.all_versions().unwrap().len(), 1);
        }
    }
}
