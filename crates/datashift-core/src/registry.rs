use std::collections::BTreeMap;
use std::sync::Arc;

use datashift_common::{Error, Result, Version};
use rusqlite::Transaction;
use tracing::debug;

use crate::unit::{FnOperation, Operation};

/// Operations registered in code for one version.
#[derive(Clone)]
pub struct Handler {
    pub up: Arc<dyn Operation>,
    pub down: Option<Arc<dyn Operation>>,
}

/// Compiled-in operations keyed by version.
///
/// Files whose extension is not `.sql` carry only metadata; discovery binds
/// them to the handler registered here under the same version. Populate the
/// registry once at startup before handing it to a migrator.
#[derive(Clone, Default)]
pub struct Registry {
    handlers: BTreeMap<Version, Handler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a one-way migration.
    pub fn register<U>(&mut self, version: Version, up: U) -> Result<()>
    where
        U: Fn(&Transaction<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.register_operation(version, Arc::new(FnOperation(up)), None)
    }

    /// Register a migration that can be rolled back.
    pub fn register_reversible<U, D>(&mut self, version: Version, up: U, down: D) -> Result<()>
    where
        U: Fn(&Transaction<'_>) -> Result<()> + Send + Sync + 'static,
        D: Fn(&Transaction<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.register_operation(
            version,
            Arc::new(FnOperation(up)),
            Some(Arc::new(FnOperation(down))),
        )
    }

    pub fn register_operation(
        &mut self,
        version: Version,
        up: Arc<dyn Operation>,
        down: Option<Arc<dyn Operation>>,
    ) -> Result<()> {
        if self.handlers.contains_key(&version) {
            return Err(Error::DuplicateVersion(version));
        }
        debug!("registered handler for version {version}");
        self.handlers.insert(version, Handler { up, down });
        Ok(())
    }

    pub fn get(&self, version: Version) -> Option<&Handler> {
        self.handlers.get(&version)
    }
}
