use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use datashift_common::{Error, Result};
use rusqlite::{Connection, Transaction};
use tracing::{debug, info};

/// SQLite database the data migrations run against.
///
/// The store is an opaque transactional executor: callers either borrow the
/// connection or run a closure inside a transaction that commits on `Ok` and
/// rolls back on `Err`.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening data store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("data store lock poisoned".into()))
    }

    /// Run `f` against the connection outside of any explicit transaction.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connection()?;
        f(&conn)
    }

    /// Run `f` inside a single transaction. The transaction commits only if
    /// `f` returns `Ok`; on `Err` it is rolled back when dropped.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to start transaction: {e}")))?;

        let value = f(&tx)?;

        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit transaction: {e}")))?;
        debug!("transaction committed");
        Ok(value)
    }
}
