use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use datashift_common::{Error, Result, Version};
use rusqlite::Transaction;

/// One direction of a data migration, run inside the transaction that also
/// writes the version log.
pub trait Operation: Send + Sync {
    fn run(&self, tx: &Transaction<'_>) -> Result<()>;
}

/// Adapts a closure into an [`Operation`].
pub struct FnOperation<F>(pub F);

impl<F> Operation for FnOperation<F>
where
    F: Fn(&Transaction<'_>) -> Result<()> + Send + Sync,
{
    fn run(&self, tx: &Transaction<'_>) -> Result<()> {
        (self.0)(tx)
    }
}

/// A batch of SQL statements loaded from a `.sql` migration file.
#[derive(Debug, Clone)]
pub struct SqlOperation {
    sql: String,
}

impl SqlOperation {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }
}

impl Operation for SqlOperation {
    fn run(&self, tx: &Transaction<'_>) -> Result<()> {
        if is_blank_sql(&self.sql) {
            return Ok(());
        }
        tx.execute_batch(&self.sql)
            .map_err(|e| Error::Database(e.to_string()))
    }
}

/// True when `sql` holds nothing but whitespace and `--` comments.
pub(crate) fn is_blank_sql(sql: &str) -> bool {
    sql.lines().all(|l| {
        let l = l.trim();
        l.is_empty() || l.starts_with("--")
    })
}

/// A discovered, loaded data migration. Immutable once built.
#[derive(Clone)]
pub struct MigrationUnit {
    version: Version,
    name: String,
    source: PathBuf,
    up: Arc<dyn Operation>,
    down: Option<Arc<dyn Operation>>,
}

impl MigrationUnit {
    pub fn new(
        version: Version,
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        up: Arc<dyn Operation>,
        down: Option<Arc<dyn Operation>>,
    ) -> Self {
        Self {
            version,
            name: name.into(),
            source: source.into(),
            up,
            down,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Snake-case name taken from the filename.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human label: `backfill_user_emails` becomes `Backfill user emails`.
    pub fn label(&self) -> String {
        let spaced = self.name.replace('_', " ");
        let mut chars = spaced.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }

    pub fn up(&self) -> &dyn Operation {
        self.up.as_ref()
    }

    pub fn down(&self) -> Option<&dyn Operation> {
        self.down.as_deref()
    }
}

impl fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("source", &self.source)
            .field("reversible", &self.is_reversible())
            .finish()
    }
}
