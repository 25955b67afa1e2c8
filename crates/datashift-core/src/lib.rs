//! Data-migration engine: discovers versioned migration files, diffs them
//! against the version log and applies or reverts them one transaction at a
//! time.

pub mod commands;
pub mod discovery;
pub mod migrator;
pub mod registry;
pub mod scaffold;
pub mod unit;

pub use discovery::Discovery;
pub use migrator::{MigrationReport, MigrationStatus, Migrator, Phase, StatusReport, Target};
pub use registry::Registry;
pub use unit::{MigrationUnit, Operation, SqlOperation};

pub use datashift_common::{Error, Result, Version};
pub use datashift_db::{LogEntry, Store, VersionLog};
