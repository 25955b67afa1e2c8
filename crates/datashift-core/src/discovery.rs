use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use datashift_common::{Error, Result, Version};
use regex::Regex;
use tracing::debug;

use crate::registry::Registry;
use crate::unit::{MigrationUnit, Operation, SqlOperation, is_blank_sql};

const UP_MARKER: &str = "-- migrate:up";
const DOWN_MARKER: &str = "-- migrate:down";

static FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<version>\d{14})_(?P<name>[a-z0-9]+(?:_[a-z0-9]+)*)\.(?P<ext>[A-Za-z0-9]+)$")
        .expect("migration filename pattern is valid")
});

/// Metadata carried by a migration filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    pub version: Version,
    pub name: String,
    pub extension: String,
}

/// Parse `<14-digit version>_<snake_case_name>.<ext>`.
pub fn parse_filename(file_name: &str) -> Result<ParsedFilename> {
    let caps = FILENAME
        .captures(file_name)
        .ok_or_else(|| Error::MalformedFilename(file_name.to_string()))?;

    let version: Version = caps["version"]
        .parse()
        .map_err(|_| Error::MalformedFilename(file_name.to_string()))?;

    Ok(ParsedFilename {
        version,
        name: caps["name"].to_string(),
        extension: caps["ext"].to_ascii_lowercase(),
    })
}

/// `up` and `down` bodies of a `.sql` migration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlSections {
    /// Whether the file declares an `up` section at all. An explicit but
    /// empty `-- migrate:up` section is a valid no-op.
    pub has_up: bool,
    pub up: String,
    pub down: String,
}

/// Split a SQL file on `-- migrate:up` / `-- migrate:down` marker lines.
/// A file without markers is entirely `up` (and declares one only if it is
/// not blank); text before the first marker is ignored.
pub fn split_sections(sql: &str) -> SqlSections {
    enum Section {
        Preamble,
        Up,
        Down,
    }

    let has_markers = sql.lines().any(|l| is_marker(l, UP_MARKER) || is_marker(l, DOWN_MARKER));
    if !has_markers {
        return SqlSections {
            has_up: !is_blank_sql(sql),
            up: sql.to_string(),
            down: String::new(),
        };
    }

    let mut sections = SqlSections::default();
    let mut current = Section::Preamble;
    for line in sql.lines() {
        if is_marker(line, UP_MARKER) {
            sections.has_up = true;
            current = Section::Up;
            continue;
        }
        if is_marker(line, DOWN_MARKER) {
            current = Section::Down;
            continue;
        }
        let target = match current {
            Section::Preamble => continue,
            Section::Up => &mut sections.up,
            Section::Down => &mut sections.down,
        };
        target.push_str(line);
        target.push('\n');
    }
    sections
}

fn is_marker(line: &str, marker: &str) -> bool {
    line.trim().eq_ignore_ascii_case(marker)
}

/// Scans a directory for migration files and binds each to its operations.
///
/// Every call re-reads the directory; nothing is cached between calls since
/// files may be added between runs.
pub struct Discovery<'r> {
    registry: &'r Registry,
}

impl<'r> Discovery<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    /// All migrations under `dir`, ascending by version.
    ///
    /// Fails before loading anything runnable if a filename is malformed, two
    /// files share a version, or a unit has no `up` operation. A missing
    /// directory yields no migrations.
    ///
    /// The listing is collected eagerly rather than yielded lazily: every file
    /// must be validated before any unit runs. Each call rescans `dir`, so
    /// calling again restarts the sequence and picks up new files.
    pub fn migrations(&self, dir: &Path) -> Result<Vec<MigrationUnit>> {
        if !dir.exists() {
            debug!("migrations directory does not exist: {}", dir.display());
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('.') {
                continue;
            }
            files.push((file_name, entry.path()));
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut parsed = BTreeMap::new();
        for (file_name, path) in files {
            let meta = parse_filename(&file_name)?;
            if parsed.contains_key(&meta.version) {
                return Err(Error::DuplicateVersion(meta.version));
            }
            parsed.insert(meta.version, (meta, path));
        }

        let mut units = Vec::with_capacity(parsed.len());
        for (meta, path) in parsed.into_values() {
            units.push(self.load(meta, &path)?);
        }

        debug!("discovered {} migrations in {}", units.len(), dir.display());
        Ok(units)
    }

    fn load(&self, meta: ParsedFilename, path: &Path) -> Result<MigrationUnit> {
        let (up, down) = if meta.extension == "sql" {
            load_sql(meta.version, path)?
        } else {
            let handler = self
                .registry
                .get(meta.version)
                .ok_or_else(|| Error::InvalidMigration {
                    version: meta.version,
                    reason: format!("no up operation registered for {}", path.display()),
                })?;
            (handler.up.clone(), handler.down.clone())
        };

        Ok(MigrationUnit::new(meta.version, meta.name, path, up, down))
    }
}

type Operations = (Arc<dyn Operation>, Option<Arc<dyn Operation>>);

fn load_sql(version: Version, path: &Path) -> Result<Operations> {
    let contents = std::fs::read_to_string(path)?;
    let sections = split_sections(&contents);

    if !sections.has_up {
        return Err(Error::InvalidMigration {
            version,
            reason: format!("{} has no up section", path.display()),
        });
    }

    let up: Arc<dyn Operation> = Arc::new(SqlOperation::new(sections.up));
    let down: Option<Arc<dyn Operation>> = if is_blank_sql(&sections.down) {
        None
    } else {
        Some(Arc::new(SqlOperation::new(sections.down)))
    };
    Ok((up, down))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn parses_well_formed_filename() {
        let parsed = parse_filename("20161101020304_backfill_emails.sql").unwrap();
        assert_eq!(parsed.version, Version::new(20161101020304));
        assert_eq!(parsed.name, "backfill_emails");
        assert_eq!(parsed.extension, "sql");
    }

    #[test]
    fn rejects_malformed_filenames() {
        for name in [
            "backfill.sql",
            "2016_backfill.sql",
            "20161101020304-backfill.sql",
            "20161101020304_Backfill.sql",
            "20161101020304_backfill",
            "20161101020304_.sql",
            "201611010203045_backfill.sql",
            "00000000000000_zero.sql",
        ] {
            let err = parse_filename(name).unwrap_err();
            assert!(
                matches!(err, Error::MalformedFilename(ref f) if f == name),
                "{name} should be malformed"
            );
        }
    }

    #[test]
    fn split_without_markers_is_all_up() {
        let sections = split_sections("UPDATE users SET active = 1;\n");
        assert!(sections.has_up);
        assert_eq!(sections.up, "UPDATE users SET active = 1;\n");
        assert!(sections.down.is_empty());

        assert!(!split_sections("  \n-- just a comment\n").has_up);
    }

    #[test]
    fn empty_up_marker_still_declares_up() {
        let sections = split_sections("-- migrate:up\n\n-- migrate:down\n");
        assert!(sections.has_up);
        assert!(is_blank_sql(&sections.up));
        assert!(is_blank_sql(&sections.down));
    }

    #[test]
    fn split_with_markers() {
        let sql = "-- preamble\n-- migrate:up\nUPDATE t SET a = 1;\n-- Migrate:Down \nUPDATE t SET a = 0;\n";
        let sections = split_sections(sql);
        assert_eq!(sections.up, "UPDATE t SET a = 1;\n");
        assert_eq!(sections.down, "UPDATE t SET a = 0;\n");
    }

    #[test]
    fn empty_dir_and_missing_dir_have_no_migrations() {
        let registry = Registry::new();
        let discovery = Discovery::new(&registry);

        let dir = TempDir::new().unwrap();
        assert!(discovery.migrations(dir.path()).unwrap().is_empty());
        assert!(
            discovery
                .migrations(Path::new("/nonexistent/data-migrations"))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn discovers_sorted_by_version_and_skips_hidden_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("20160103000000_third.sql"), "SELECT 3;").unwrap();
        fs::write(dir.path().join("20160101000000_first.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("20160102000000_second.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join(".keep"), "").unwrap();
        fs::create_dir(dir.path().join("archive")).unwrap();

        let registry = Registry::new();
        let units = Discovery::new(&registry).migrations(dir.path()).unwrap();
        let names: Vec<_> = units.iter().map(|u| u.name()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert!(units.windows(2).all(|w| w[0].version() < w[1].version()));
    }

    #[test]
    fn malformed_file_fails_discovery() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("20160101000000_first.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("readme.txt"), "notes").unwrap();

        let registry = Registry::new();
        let err = Discovery::new(&registry).migrations(dir.path()).unwrap_err();
        assert!(matches!(err, Error::MalformedFilename(f) if f == "readme.txt"));
    }

    #[test]
    fn duplicate_versions_fail_discovery() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("20160101000000_first.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("20160101000000_again.sql"), "SELECT 1;").unwrap();

        let registry = Registry::new();
        let err = Discovery::new(&registry).migrations(dir.path()).unwrap_err();
        assert!(matches!(err, Error::DuplicateVersion(v) if v == Version::new(20160101000000)));
    }

    #[test]
    fn sql_without_up_is_invalid() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("20160101000000_only_down.sql"),
            "-- migrate:down\nDELETE FROM t;\n",
        )
        .unwrap();

        let registry = Registry::new();
        let err = Discovery::new(&registry).migrations(dir.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidMigration { version, .. } if version == Version::new(20160101000000)));
    }

    #[test]
    fn sql_down_section_makes_unit_reversible() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("20160101000000_flag.sql"),
            "-- migrate:up\nUPDATE t SET a = 1;\n-- migrate:down\nUPDATE t SET a = 0;\n",
        )
        .unwrap();
        fs::write(dir.path().join("20160102000000_one_way.sql"), "UPDATE t SET b = 1;").unwrap();

        let registry = Registry::new();
        let units = Discovery::new(&registry).migrations(dir.path()).unwrap();
        assert!(units[0].is_reversible());
        assert!(!units[1].is_reversible());
    }

    #[test]
    fn code_migrations_bind_to_registered_handlers() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("20160101000000_backfill.rs"), "// registered in code").unwrap();

        let mut registry = Registry::new();
        registry
            .register_reversible(Version::new(20160101000000), |_tx| Ok(()), |_tx| Ok(()))
            .unwrap();

        let units = Discovery::new(&registry).migrations(dir.path()).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].label(), "Backfill");
        assert!(units[0].is_reversible());
    }

    #[test]
    fn code_migration_without_handler_is_invalid() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("20160101000000_backfill.rs"), "").unwrap();

        let registry = Registry::new();
        let err = Discovery::new(&registry).migrations(dir.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidMigration { .. }));
    }

    #[test]
    fn rescans_directory_on_every_call() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new();
        let discovery = Discovery::new(&registry);

        fs::write(dir.path().join("20160101000000_first.sql"), "SELECT 1;").unwrap();
        assert_eq!(discovery.migrations(dir.path()).unwrap().len(), 1);

        fs::write(dir.path().join("20160102000000_second.sql"), "SELECT 2;").unwrap();
        assert_eq!(discovery.migrations(dir.path()).unwrap().len(), 2);
    }
}
