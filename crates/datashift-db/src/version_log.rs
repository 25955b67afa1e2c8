use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use datashift_common::{Error, Result, Version};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::Serialize;
use tracing::debug;

/// Durable fact that `version` was applied at `applied_at` and has not been
/// rolled back since.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub version: Version,
    pub applied_at: DateTime<Utc>,
}

/// Record of applied data-migration versions, one row per version.
///
/// Every operation takes the connection explicitly so that log writes can
/// share a transaction with the migration they describe. Nothing here locks;
/// at most one migrator may work against a log at a time.
#[derive(Debug, Clone)]
pub struct VersionLog {
    table: String,
}

impl VersionLog {
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !is_identifier(&table) {
            return Err(Error::Config(format!(
                "invalid log table name '{table}'"
            )));
        }
        Ok(Self { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the log table if it is absent. Safe to call repeatedly.
    pub fn ensure_table_exists(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                version INTEGER PRIMARY KEY NOT NULL,
                applied_at TEXT NOT NULL
            );",
            self.table
        ))
        .map_err(|e| Error::Database(format!("failed to create log table: {e}")))?;
        Ok(())
    }

    /// Every logged version, ascending. Empty when nothing has run.
    pub fn all_versions(&self, conn: &Connection) -> Result<BTreeSet<Version>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT version FROM {} ORDER BY version ASC",
                self.table
            ))
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .map_err(|e| Error::Database(format!("failed to query versions: {e}")))?;

        let mut versions = BTreeSet::new();
        for row in rows {
            let raw =
                row.map_err(|e| Error::Database(format!("failed to read version row: {e}")))?;
            versions.insert(from_sql_version(raw)?);
        }
        Ok(versions)
    }

    /// Highest logged version, or `Version::ZERO` when the log is empty.
    pub fn current_version(&self, conn: &Connection) -> Result<Version> {
        let max: Option<i64> = conn
            .query_row(&format!("SELECT MAX(version) FROM {}", self.table), [], |row| {
                row.get(0)
            })
            .map_err(|e| Error::Database(format!("failed to read current version: {e}")))?;

        match max {
            Some(raw) => from_sql_version(raw),
            None => Ok(Version::ZERO),
        }
    }

    pub fn contains(&self, conn: &Connection, version: Version) -> Result<bool> {
        let found = conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE version = ?1", self.table),
                params![to_sql_version(version)?],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to look up version {version}: {e}")))?;
        Ok(found.is_some())
    }

    /// All entries with their application time, ascending by version.
    pub fn entries(&self, conn: &Connection) -> Result<Vec<LogEntry>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT version, applied_at FROM {} ORDER BY version ASC",
                self.table
            ))
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| Error::Database(format!("failed to query log entries: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            let (raw, applied_at) =
                row.map_err(|e| Error::Database(format!("failed to read log row: {e}")))?;
            entries.push(LogEntry {
                version: from_sql_version(raw)?,
                applied_at: parse_datetime(&applied_at)?,
            });
        }
        Ok(entries)
    }

    /// Insert the entry for `version`. Fails with `DuplicateVersion` if the
    /// version is already logged.
    pub fn record(
        &self,
        conn: &Connection,
        version: Version,
        applied_at: DateTime<Utc>,
    ) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO {} (version, applied_at) VALUES (?1, ?2)",
                self.table
            ),
            params![
                to_sql_version(version)?,
                applied_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
                Error::DuplicateVersion(version)
            }
            other => Error::Database(format!("failed to record version {version}: {other}")),
        })?;

        debug!("logged version {version}");
        Ok(())
    }

    /// Delete the entry for `version`. Fails with `NotFound` if it is absent.
    pub fn erase(&self, conn: &Connection, version: Version) -> Result<()> {
        let deleted = conn
            .execute(
                &format!("DELETE FROM {} WHERE version = ?1", self.table),
                params![to_sql_version(version)?],
            )
            .map_err(|e| Error::Database(format!("failed to erase version {version}: {e}")))?;

        if deleted == 0 {
            return Err(Error::NotFound(format!("version {version} is not logged")));
        }
        debug!("erased version {version}");
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn to_sql_version(version: Version) -> Result<i64> {
    i64::try_from(version.get())
        .map_err(|_| Error::InvalidVersion(format!("{version} does not fit the log column")))
}

fn from_sql_version(raw: i64) -> Result<Version> {
    u64::try_from(raw)
        .map(Version::new)
        .map_err(|_| Error::Database(format!("negative version {raw} in log")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite datetime('now') produces "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
        })
        .map_err(|e| Error::Database(format!("invalid applied_at '{s}': {e}")))
}
