//! Migration engine
//!
//! [`Migrator`] orchestrates discovery, the ledger and the dialect: it
//! computes unapplied/applied sets, executes migrations in version order
//! (one transaction each), batches rollbacks, and generates new migration
//! file pairs. Execution is strictly sequential; later migrations may
//! depend on earlier schema changes, and the ledger must reflect a total
//! order.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SubsecRound, Utc};

use crate::db::{Ledger, LedgerOp, LedgerOrder};
use crate::dialect::Dialect;
use crate::discovery;
use crate::error::{MigrateError, MigrateResult};
use crate::events::EventSink;
use crate::migration::{display_version, Direction, Migration};
use crate::settings::{Settings, DEFAULT_MIGRATIONS_TABLE};

/// Directory holding migration files, relative to the project root
pub const MIGRATIONS_DIR: &str = "migrations";

/// Passing this to [`Migrator::migrate_steps`] applies every pending migration
pub const ALL_STEPS: usize = 0;

/// Find the project root: the first ancestor of `from` (inclusive) that
/// contains the migrations directory
pub fn find_project_dir(from: &Path) -> MigrateResult<PathBuf> {
    let mut dir = from;
    loop {
        if dir.join(MIGRATIONS_DIR).is_dir() {
            return Ok(dir.to_path_buf());
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return Err(MigrateError::ProjectDirNotFound(from.to_path_buf())),
        }
    }
}

/// The end-user interface for all migration operations.
///
/// A migrator owns one database connection for its lifetime. Consume it
/// with [`close`](Migrator::close) to release the connection and end the
/// notification streams.
#[derive(Debug)]
pub struct Migrator {
    settings: Settings,
    dialect: Dialect,
    ledger: Ledger,
    project_dir: PathBuf,
    events: EventSink,
}

impl Migrator {
    /// Validate settings, resolve the dialect, locate the project root,
    /// open the connection and bootstrap the ledger table
    pub async fn new(settings: Settings) -> MigrateResult<Migrator> {
        if settings.engine.is_empty() {
            return Err(MigrateError::EngineNotSpecified);
        }
        if settings.database.is_empty() {
            return Err(MigrateError::DatabaseNotSpecified);
        }
        let dialect = Dialect::from_name(&settings.engine)
            .ok_or_else(|| MigrateError::UnknownEngine(settings.engine.clone()))?;

        let mut settings = settings;
        if settings.migrations_table.is_empty() {
            settings.migrations_table = DEFAULT_MIGRATIONS_TABLE.to_string();
        }

        let start = match &settings.project_dir {
            Some(dir) => dir.clone(),
            None => env::current_dir().map_err(MigrateError::WorkingDir)?,
        };
        let project_dir = find_project_dir(&start)?;

        let url = dialect.connection_url(&settings, &project_dir)?;
        let mut ledger = Ledger::open(dialect, &url, &settings.migrations_table).await?;
        ledger.ensure_table().await?;

        let events = EventSink::new(settings.migrations_tx.take(), settings.errors_tx.take());

        Ok(Migrator {
            settings,
            dialect,
            ledger,
            project_dir,
            events,
        })
    }

    /// Close the connection and end both notification streams
    pub async fn close(mut self) -> MigrateResult<()> {
        self.events.close();
        self.ledger.close().await
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Toggle the missing-downs policy between operations
    pub fn set_allow_missing_downs(&mut self, allow: bool) {
        self.settings.allow_missing_downs = allow;
    }

    /// Apply all unapplied migrations
    pub async fn migrate(&mut self) -> MigrateResult<usize> {
        self.migrate_steps(ALL_STEPS).await
    }

    /// Apply up to `steps` unapplied migrations in version order, returning
    /// the number applied.
    ///
    /// Every migration in one call shares the same `applied_at` timestamp
    /// and so forms one batch. On failure the error carries how many
    /// migrations succeeded before it.
    pub async fn migrate_steps(&mut self, steps: usize) -> MigrateResult<usize> {
        let unapplied = self.unapplied_migrations().await?;
        let steps = if steps == ALL_STEPS || steps > unapplied.len() {
            unapplied.len()
        } else {
            steps
        };

        // one timestamp for the whole call: the batch identity
        let applied_at = Utc::now().trunc_subsecs(0);

        for (completed, migration) in unapplied[..steps].iter().enumerate() {
            let mut migration = migration.clone();
            migration.applied_at = Some(applied_at);
            if let Err(source) = self.run(&migration).await {
                return Err(MigrateError::ApplyFailed {
                    file_name: migration.file_name(),
                    completed,
                    source: Box::new(source),
                });
            }
        }
        Ok(steps)
    }

    /// Roll back the most recent batch
    pub async fn rollback(&mut self) -> MigrateResult<usize> {
        self.rollback_steps(0).await
    }

    /// Roll back `steps` applied migrations, most recently applied first;
    /// `0` means exactly the most recent batch.
    ///
    /// A version whose down file cannot be resolved fails the whole call
    /// unless `allow_missing_downs` is set, in which case it is reported as
    /// a warning and skipped with its ledger row intact.
    pub async fn rollback_steps(&mut self, steps: usize) -> MigrateResult<usize> {
        let applied = self.ledger.applied_rows(LedgerOrder::LastAppliedFirst).await?;

        let steps = if steps == 0 {
            self.ledger.count_in_last_batch().await?
        } else {
            steps
        };
        let steps = steps.min(applied.len());

        let mut migrations = Vec::with_capacity(steps);
        for row in &applied[..steps] {
            match discovery::find_for_version(
                &self.migrations_dir(),
                self.dialect,
                row.version,
                Direction::Down,
            ) {
                Ok(migration) => migrations.push(migration),
                Err(source) => {
                    let error = MigrateError::LedgerFileMissing {
                        version: display_version(row.version),
                        source: Box::new(source),
                    };
                    if !self.settings.allow_missing_downs {
                        return Err(error);
                    }
                    self.events.warning(error).await;
                }
            }
        }

        for (completed, migration) in migrations.iter().enumerate() {
            if let Err(source) = self.run(migration).await {
                return Err(MigrateError::ApplyFailed {
                    file_name: migration.file_name(),
                    completed,
                    source: Box::new(source),
                });
            }
        }
        Ok(migrations.len())
    }

    /// The migration with the highest version in the ledger, which is not
    /// necessarily the one applied last; `None` on an empty ledger
    pub async fn latest_version_migration(&mut self) -> MigrateResult<Option<Migration>> {
        self.ledger_migration(LedgerOrder::VersionDesc).await
    }

    /// The migration recorded most recently; differs from
    /// [`latest_version_migration`](Migrator::latest_version_migration)
    /// whenever migrations were applied out of version order
    pub async fn last_applied_migration(&mut self) -> MigrateResult<Option<Migration>> {
        self.ledger_migration(LedgerOrder::LastAppliedFirst).await
    }

    /// All discovered up migrations in version order, with `applied_at`
    /// merged in from the ledger for the ones that have been applied
    pub async fn status(&mut self) -> MigrateResult<Vec<Migration>> {
        let mut found =
            discovery::find_migrations(&self.migrations_dir(), self.dialect, Direction::Up)?;
        let applied = self.ledger.applied_rows(LedgerOrder::VersionAsc).await?;

        for migration in &mut found {
            if let Some(row) = applied.iter().find(|r| r.version == migration.version) {
                migration.applied_at = Some(row.applied_at);
            }
        }
        Ok(found)
    }

    /// Create an empty up/down migration file pair named after
    /// `description`, optionally tagged for one engine; returns both paths
    pub fn generate(
        &self,
        description: &str,
        dialect: Option<&str>,
    ) -> MigrateResult<Vec<PathBuf>> {
        let dialect = match dialect {
            Some(name) => Some(
                Dialect::from_name(name)
                    .ok_or_else(|| MigrateError::UnknownEngine(name.to_string()))?,
            ),
            None => None,
        };

        let version = Utc::now().trunc_subsecs(0);
        let lowered = description.to_lowercase();
        let slug = lowered.split_whitespace().collect::<Vec<_>>().join("_");

        let mut paths = Vec::with_capacity(2);
        for direction in [Direction::Up, Direction::Down] {
            let migration = Migration {
                version,
                name: slug.clone(),
                direction,
                dialect,
                applied_at: None,
            };
            let file_name = migration.file_name();
            let path = self.migrations_dir().join(&file_name);
            if path.exists() {
                return Err(MigrateError::AlreadyExists(file_name));
            }
            fs::File::create(&path).map_err(|source| MigrateError::CreateFile {
                file_name: file_name.clone(),
                source,
            })?;
            paths.push(path);
        }
        Ok(paths)
    }

    /// Execute one migration: read its body, run it transactionally with
    /// the direction-appropriate ledger mutation, publish it on success
    async fn run(&mut self, migration: &Migration) -> MigrateResult<()> {
        let file_name = migration.file_name();
        let path = self.migrations_dir().join(&file_name);
        let body = fs::read_to_string(&path).map_err(|source| MigrateError::ReadMigration {
            file_name: file_name.clone(),
            source,
        })?;

        if body.trim().is_empty() {
            // an empty down body models a change with no reverse; allowed
            // only by policy, and the up's ledger row is left untouched
            if migration.direction == Direction::Up || !self.settings.allow_missing_downs {
                return Err(MigrateError::EmptyQuery);
            }
            self.events.warning(MigrateError::EmptyQuery).await;
            return Ok(());
        }

        let op = match migration.direction {
            Direction::Up => LedgerOp::Insert {
                version: migration.version,
                applied_at: migration
                    .applied_at
                    .unwrap_or_else(|| Utc::now().trunc_subsecs(0)),
            },
            Direction::Down => LedgerOp::Delete {
                version: migration.version,
            },
        };

        tracing::debug!(file = %file_name, direction = %migration.direction, "executing migration");
        self.ledger.run_migration_queries(&body, op).await?;

        self.events.migration_applied(migration.clone()).await;
        Ok(())
    }

    async fn ledger_migration(&mut self, order: LedgerOrder) -> MigrateResult<Option<Migration>> {
        let Some(version) = self.ledger.latest_version(order).await? else {
            return Ok(None);
        };
        let migration = discovery::find_for_version(
            &self.migrations_dir(),
            self.dialect,
            version,
            Direction::Up,
        )
        .map_err(|source| MigrateError::LedgerFileMissing {
            version: display_version(version),
            source: Box::new(source),
        })?;
        Ok(Some(migration))
    }

    async fn unapplied_migrations(&mut self) -> MigrateResult<Vec<Migration>> {
        let found =
            discovery::find_migrations(&self.migrations_dir(), self.dialect, Direction::Up)?;
        let applied = self.ledger.applied_rows(LedgerOrder::VersionAsc).await?;

        Ok(found
            .into_iter()
            .filter(|m| !applied.iter().any(|r| r.version == m.version))
            .collect())
    }

    fn migrations_dir(&self) -> PathBuf {
        self.project_dir.join(MIGRATIONS_DIR)
    }
}
