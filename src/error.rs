//! Error types for the migration engine
//!
//! Errors fall into a few groups: configuration errors surfaced from
//! construction, discovery errors from scanning the migrations directory,
//! execution errors from running SQL, and policy-demotable errors that the
//! `allow_missing_downs` flag turns into non-fatal warnings.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Error type for all migration operations
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Database engine name missing from settings
    #[error("database engine not specified")]
    EngineNotSpecified,

    /// Database engine is not one of the supported dialects
    #[error("unknown database engine {0}")]
    UnknownEngine(String),

    /// Database name missing from settings
    #[error("database name not specified")]
    DatabaseNotSpecified,

    /// Database user missing from settings for a dialect that requires one
    #[error("database user not specified")]
    UserNotSpecified,

    /// No ancestor of the starting directory contains a migrations directory
    #[error("project dir not found: no migrations directory in any ancestor of {}", .0.display())]
    ProjectDirNotFound(PathBuf),

    /// File name does not follow `VERSION.NAME.DIRECTION[.DIALECT].sql`
    #[error("can't parse migration from file name {name}: {reason}")]
    InvalidFileName { name: String, reason: String },

    /// Two discovered files encode the same version
    #[error("migrations with version {0} are duplicated")]
    DuplicateVersion(String),

    /// Migrations directory could not be scanned
    #[error("can't scan migrations directory {}", .path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No file on disk for a version the operation needs
    #[error("{direction} migration with version {version} does not exist")]
    MigrationNotFound { version: String, direction: String },

    /// More than one file on disk matches a version and direction
    #[error("got {count} {direction} migrations with version {version}, should be only one")]
    AmbiguousVersion {
        version: String,
        direction: String,
        count: usize,
    },

    /// Migration file exists but could not be read
    #[error("can't read migration {file_name}")]
    ReadMigration {
        file_name: String,
        #[source]
        source: std::io::Error,
    },

    /// Migration body is empty or whitespace-only
    #[error("empty query")]
    EmptyQuery,

    /// Generated migration file name collides with an existing file
    #[error("migration file {0} already exists")]
    AlreadyExists(String),

    /// Generated migration file could not be created
    #[error("can't create migration file {file_name}")]
    CreateFile {
        file_name: String,
        #[source]
        source: std::io::Error,
    },

    /// Working directory is unavailable
    #[error("can't get working directory")]
    WorkingDir(#[source] std::io::Error),

    /// Database connection could not be opened or closed
    #[error("database connection error")]
    Connection(#[source] sqlx::Error),

    /// Ledger table could not be checked or created
    #[error("migrations table error: {message}")]
    Schema {
        message: String,
        #[source]
        source: sqlx::Error,
    },

    /// Ledger row could not be read or written
    #[error("migrations table {operation} failed")]
    Ledger {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// A statement inside a migration body failed
    #[error("can't execute query {query}")]
    Execution {
        query: String,
        #[source]
        source: sqlx::Error,
    },

    /// Transaction could not be started or committed
    #[error("can't {stage} transaction")]
    Transaction {
        stage: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// A migration inside a multi-step apply/rollback failed; `completed`
    /// is the number of migrations that succeeded before this one
    #[error("can't execute migration {file_name} ({completed} applied before the failure)")]
    ApplyFailed {
        file_name: String,
        completed: usize,
        #[source]
        source: Box<MigrateError>,
    },

    /// The ledger references a version whose file could not be resolved
    #[error("can't get migration for version {version}")]
    LedgerFileMissing {
        version: String,
        #[source]
        source: Box<MigrateError>,
    },
}
