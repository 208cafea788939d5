//! # sqlshift: plain-SQL schema migrations
//!
//! sqlshift applies and reverses ordered, file-based schema changes against
//! PostgreSQL, MySQL and SQLite, tracking applied versions in a ledger table
//! so a schema can be brought to, or rolled back from, any point in its
//! history. Migrations are plain `.sql` files named
//! `VERSION.NAME.DIRECTION[.DIALECT].sql` — no DSL, no code generation.
//!
//! The entry point is [`Migrator`]: construct it from [`Settings`], then
//! call [`migrate`](Migrator::migrate) / [`rollback`](Migrator::rollback)
//! (or their `_steps` variants), [`status`](Migrator::status), or
//! [`generate`](Migrator::generate). Command-line parsing, configuration
//! loading and console output belong to the caller.

pub mod dialect;
pub mod error;
pub mod migration;
pub mod migrator;
pub mod settings;

mod db;
mod discovery;
mod events;

pub use dialect::{engines, Dialect, DIALECTS};
pub use error::{MigrateError, MigrateResult};
pub use events::EVENT_CHANNEL_CAPACITY;
pub use migration::{Direction, Migration, DISPLAY_TIMESTAMP_FORMAT, TIMESTAMP_FORMAT};
pub use migrator::{find_project_dir, Migrator, ALL_STEPS, MIGRATIONS_DIR};
pub use settings::{Settings, DEFAULT_MIGRATIONS_TABLE};
