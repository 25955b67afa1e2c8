use std::cell::Cell;
use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use datashift_common::{Error, Result, Version};
use datashift_db::{LogEntry, Store, VersionLog};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::discovery::Discovery;
use crate::registry::Registry;
use crate::unit::MigrationUnit;

/// Which versions `migrate_up` should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every pending version, ascending.
    Latest,
    /// Exactly this version.
    Version(Version),
}

/// Where the migrator is in its current (or last) invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Resolving,
    Applying(Version),
    Recording(Version),
    Reverting(Version),
    Erasing(Version),
    /// The unit at this version failed and the batch was abandoned.
    Failed(Version),
}

/// Outcome of one `migrate_up` / `migrate_down` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub applied: Vec<Version>,
    pub reverted: Vec<Version>,
    pub current_version: Version,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty() && self.reverted.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub version: Version,
    pub name: String,
    pub reversible: bool,
    pub applied_at: Option<DateTime<Utc>>,
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub migrations: Vec<MigrationStatus>,
    /// Logged versions with no migration file behind them.
    pub orphaned: Vec<LogEntry>,
    pub current_version: Version,
}

impl StatusReport {
    pub fn applied(&self) -> impl Iterator<Item = &MigrationStatus> {
        self.migrations.iter().filter(|m| m.is_applied())
    }

    pub fn pending(&self) -> impl Iterator<Item = &MigrationStatus> {
        self.migrations.iter().filter(|m| !m.is_applied())
    }
}

/// Applies and reverts data migrations against a [`Store`], tracking them in
/// a [`VersionLog`].
///
/// Each unit's operation and its log write share one transaction, so a
/// version is either applied and logged or neither. A batch stops at the
/// first failing unit; versions applied before it stay applied.
///
/// Discovery and the log are re-read on every call. Running two migrators
/// against the same log at once is not supported.
pub struct Migrator {
    store: Store,
    log: VersionLog,
    registry: Registry,
    clock: fn() -> DateTime<Utc>,
    phase: Cell<Phase>,
}

impl Migrator {
    pub fn new(store: Store, log: VersionLog, registry: Registry) -> Self {
        Self {
            store,
            log,
            registry,
            clock: Utc::now,
            phase: Cell::new(Phase::Idle),
        }
    }

    /// Replace the clock used to stamp `applied_at`.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn log(&self) -> &VersionLog {
        &self.log
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    fn enter(&self, phase: Phase) {
        debug!("migrator phase: {phase:?}");
        self.phase.set(phase);
    }

    /// Settle the phase after an invocation: `Failed` if a unit was in
    /// flight when the error surfaced, `Idle` otherwise.
    fn finish<T>(&self, result: Result<T>) -> Result<T> {
        match (&result, self.phase.get()) {
            (
                Err(e),
                Phase::Applying(v) | Phase::Recording(v) | Phase::Reverting(v) | Phase::Erasing(v),
            ) => {
                warn!("data migration {v} failed, batch aborted: {e}");
                self.enter(Phase::Failed(v));
            }
            _ => self.enter(Phase::Idle),
        }
        result
    }

    fn ensure_log(&self) -> Result<()> {
        self.store
            .with_connection(|conn| self.log.ensure_table_exists(conn))
    }

    /// All migrations under `dir`, ascending by version.
    pub fn migrations(&self, dir: &Path) -> Result<Vec<MigrationUnit>> {
        Discovery::new(&self.registry).migrations(dir)
    }

    pub fn all_versions(&self) -> Result<BTreeSet<Version>> {
        self.ensure_log()?;
        self.store.with_connection(|conn| self.log.all_versions(conn))
    }

    pub fn current_version(&self) -> Result<Version> {
        self.ensure_log()?;
        self.store
            .with_connection(|conn| self.log.current_version(conn))
    }

    /// Discovered migrations that are not logged, ascending.
    pub fn pending(&self, dir: &Path) -> Result<Vec<MigrationUnit>> {
        let units = self.migrations(dir)?;
        let applied = self.all_versions()?;
        Ok(units
            .into_iter()
            .filter(|u| !applied.contains(&u.version()))
            .collect())
    }

    /// Apply every pending migration.
    pub fn migrate(&self, dir: &Path) -> Result<MigrationReport> {
        self.migrate_up(dir, Target::Latest)
    }

    /// Apply the pending set or a single version.
    ///
    /// A version that is already logged is left alone and reported as a
    /// no-op; its `up` is never invoked a second time.
    pub fn migrate_up(&self, dir: &Path, target: Target) -> Result<MigrationReport> {
        let result = self.run_up(dir, target);
        self.finish(result)
    }

    fn run_up(&self, dir: &Path, target: Target) -> Result<MigrationReport> {
        self.enter(Phase::Resolving);
        self.ensure_log()?;
        let units = self.migrations(dir)?;
        let applied = self.store.with_connection(|conn| self.log.all_versions(conn))?;

        let batch: Vec<&MigrationUnit> = match target {
            Target::Latest => units
                .iter()
                .filter(|u| !applied.contains(&u.version()))
                .collect(),
            Target::Version(version) => {
                let unit = units
                    .iter()
                    .find(|u| u.version() == version)
                    .ok_or(Error::UnknownVersion(version))?;
                if applied.contains(&version) {
                    info!("data migration {version} already applied, nothing to do");
                    Vec::new()
                } else {
                    vec![unit]
                }
            }
        };

        if batch.is_empty() {
            debug!("no pending data migrations");
        }

        let mut report = MigrationReport::default();
        for unit in batch {
            if self.apply(unit)? {
                report.applied.push(unit.version());
            }
        }

        report.current_version = self
            .store
            .with_connection(|conn| self.log.current_version(conn))?;
        Ok(report)
    }

    fn apply(&self, unit: &MigrationUnit) -> Result<bool> {
        let version = unit.version();
        self.enter(Phase::Applying(version));
        info!("applying data migration {version}: {}", unit.label());
        debug!("loaded from {}", unit.source().display());

        let applied = self.store.transaction(|tx| {
            if self.log.contains(tx, version)? {
                debug!("version {version} was logged meanwhile, skipping");
                return Ok(false);
            }
            unit.up().run(tx).map_err(|e| unit_failed(unit, e))?;

            self.enter(Phase::Recording(version));
            self.log.record(tx, version, (self.clock)())?;
            Ok(true)
        })?;

        if applied {
            info!("data migration {version} applied");
        }
        Ok(applied)
    }

    /// Roll back a single version.
    ///
    /// Fails with `UnknownVersion` if no file carries `version` and with
    /// `NoDownOperation` if the unit is one-way. A version that is not logged
    /// is a no-op.
    pub fn migrate_down(&self, dir: &Path, version: Version) -> Result<MigrationReport> {
        let result = self.run_down(dir, version);
        self.finish(result)
    }

    fn run_down(&self, dir: &Path, version: Version) -> Result<MigrationReport> {
        self.enter(Phase::Resolving);
        self.ensure_log()?;
        let units = self.migrations(dir)?;
        let unit = units
            .iter()
            .find(|u| u.version() == version)
            .ok_or(Error::UnknownVersion(version))?;
        let down = unit.down().ok_or(Error::NoDownOperation(version))?;

        let mut report = MigrationReport::default();
        let logged = self
            .store
            .with_connection(|conn| self.log.contains(conn, version))?;

        if logged {
            self.enter(Phase::Reverting(version));
            info!("reverting data migration {version}: {}", unit.label());
            debug!("loaded from {}", unit.source().display());

            let reverted = self.store.transaction(|tx| {
                if !self.log.contains(tx, version)? {
                    return Ok(false);
                }
                down.run(tx).map_err(|e| unit_failed(unit, e))?;

                self.enter(Phase::Erasing(version));
                self.log.erase(tx, version)?;
                Ok(true)
            })?;

            if reverted {
                info!("data migration {version} reverted");
                report.reverted.push(version);
            }
        } else {
            info!("data migration {version} is not applied, nothing to revert");
        }

        report.current_version = self
            .store
            .with_connection(|conn| self.log.current_version(conn))?;
        Ok(report)
    }

    /// Every discovered migration with its applied time, plus log entries
    /// that no longer have a file.
    pub fn status(&self, dir: &Path) -> Result<StatusReport> {
        self.ensure_log()?;
        let units = self.migrations(dir)?;
        let mut entries = self.store.with_connection(|conn| self.log.entries(conn))?;

        let migrations = units
            .iter()
            .map(|unit| {
                let applied_at = entries
                    .iter()
                    .find(|e| e.version == unit.version())
                    .map(|e| e.applied_at);
                MigrationStatus {
                    version: unit.version(),
                    name: unit.name().to_string(),
                    reversible: unit.is_reversible(),
                    applied_at,
                }
            })
            .collect();

        entries.retain(|e| !units.iter().any(|u| u.version() == e.version));
        for orphan in &entries {
            warn!(
                "version {} is logged but has no migration file",
                orphan.version
            );
        }

        let current_version = self
            .store
            .with_connection(|conn| self.log.current_version(conn))?;

        Ok(StatusReport {
            migrations,
            orphaned: entries,
            current_version,
        })
    }
}

fn unit_failed(unit: &MigrationUnit, err: Error) -> Error {
    Error::MigrationFailed {
        version: unit.version(),
        name: unit.name().to_string(),
        message: err.to_string(),
    }
}
