//! Engine settings
//!
//! `Settings` is built once by the caller (CLI, config loader, test) and
//! handed to [`Migrator::new`](crate::Migrator::new). It is not mutated after
//! construction except for the `allow_missing_downs` policy flag, which may
//! be toggled between operations.

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::error::MigrateError;
use crate::migration::Migration;

/// Default name for the table tracking applied migrations
pub const DEFAULT_MIGRATIONS_TABLE: &str = "migrations";

/// Configuration consumed by [`Migrator`](crate::Migrator)
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Database engine name; see [`engines`](crate::engines) for valid values
    pub engine: String,
    /// Database name, or the database file path for SQLite
    pub database: String,
    pub user: String,
    pub password: String,
    /// Server host; defaults per engine when empty
    pub host: String,
    /// Server port; defaults per engine when zero
    pub port: u16,
    /// Table for applied migrations data; [`DEFAULT_MIGRATIONS_TABLE`] when empty
    pub migrations_table: String,
    /// Treat missing or empty down migrations as warnings instead of errors,
    /// meaning the corresponding up migrations have no rollback and that is ok
    pub allow_missing_downs: bool,
    /// Where to start the project root search; the process working
    /// directory when unset
    pub project_dir: Option<PathBuf>,
    /// Receives every successfully executed migration; the consumer must
    /// drain it concurrently with the engine call
    pub migrations_tx: Option<mpsc::Sender<Migration>>,
    /// Receives non-fatal warnings demoted by `allow_missing_downs`
    pub errors_tx: Option<mpsc::Sender<MigrateError>>,
}
