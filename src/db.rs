//! Ledger accessor
//!
//! [`Ledger`] wraps the single database connection owned by a
//! [`Migrator`](crate::Migrator): it bootstraps and queries the applied-
//! migrations table and executes migration bodies transactionally. The
//! ledger mutation (insert for up, delete for down) runs inside the same
//! transaction as the schema change, so the two succeed or fail together.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use sqlx::{AnyConnection, Connection, Row};

use crate::dialect::Dialect;
use crate::error::{MigrateError, MigrateResult};
use crate::migration::{parse_version, TIMESTAMP_FORMAT};

static SQLX_DRIVERS: Lazy<()> = Lazy::new(sqlx::any::install_default_drivers);

/// A row of the applied-migrations table
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LedgerRow {
    pub version: DateTime<Utc>,
    pub applied_at: DateTime<Utc>,
}

/// Orderings the engine reads the ledger in
#[derive(Debug, Clone, Copy)]
pub(crate) enum LedgerOrder {
    VersionAsc,
    VersionDesc,
    /// Most recently applied first; version breaks ties within a batch
    LastAppliedFirst,
}

impl LedgerOrder {
    fn as_sql(&self) -> &'static str {
        match self {
            LedgerOrder::VersionAsc => "version ASC",
            LedgerOrder::VersionDesc => "version DESC",
            LedgerOrder::LastAppliedFirst => "applied_at DESC, version DESC",
        }
    }
}

/// Ledger mutation applied inside a migration's transaction
#[derive(Debug, Clone, Copy)]
pub(crate) enum LedgerOp {
    Insert {
        version: DateTime<Utc>,
        applied_at: DateTime<Utc>,
    },
    Delete {
        version: DateTime<Utc>,
    },
}

impl LedgerOp {
    fn operation(&self) -> &'static str {
        match self {
            LedgerOp::Insert { .. } => "insert",
            LedgerOp::Delete { .. } => "delete",
        }
    }
}

/// The applied-migrations table and the connection it lives on
#[derive(Debug)]
pub(crate) struct Ledger {
    dialect: Dialect,
    table: String,
    conn: AnyConnection,
}

impl Ledger {
    /// Open the single connection this ledger owns for its lifetime
    pub async fn open(dialect: Dialect, url: &str, table: &str) -> MigrateResult<Ledger> {
        Lazy::force(&SQLX_DRIVERS);
        let conn = AnyConnection::connect(url)
            .await
            .map_err(MigrateError::Connection)?;
        Ok(Ledger {
            dialect,
            table: table.to_string(),
            conn,
        })
    }

    pub async fn close(self) -> MigrateResult<()> {
        self.conn.close().await.map_err(MigrateError::Connection)
    }

    /// Create the ledger table if it does not exist yet; returns whether it
    /// already existed. Idempotent.
    pub async fn ensure_table(&mut self) -> MigrateResult<bool> {
        if self.has_table().await? {
            return Ok(true);
        }
        tracing::debug!(table = %self.table, "creating migrations table");
        let sql = format!(
            "CREATE TABLE {} (version VARCHAR(14) NOT NULL, applied_at VARCHAR(14) NOT NULL, PRIMARY KEY(version))",
            self.table
        );
        sqlx::query(&sql)
            .execute(&mut self.conn)
            .await
            .map_err(|source| MigrateError::Schema {
                message: format!("can't create migrations table {}", self.table),
                source,
            })?;
        Ok(false)
    }

    async fn has_table(&mut self) -> MigrateResult<bool> {
        let sql = self.dialect.set_placeholders(self.dialect.has_table_query());
        let row = sqlx::query(&sql)
            .bind(self.table.as_str())
            .fetch_optional(&mut self.conn)
            .await
            .map_err(|source| MigrateError::Schema {
                message: format!("can't check if migrations table {} exists", self.table),
                source,
            })?;
        Ok(row.is_some())
    }

    /// First version in the given order; `None` on an empty ledger
    pub async fn latest_version(
        &mut self,
        order: LedgerOrder,
    ) -> MigrateResult<Option<DateTime<Utc>>> {
        let sql = format!(
            "SELECT version FROM {} ORDER BY {} LIMIT 1",
            self.table,
            order.as_sql()
        );
        let row = sqlx::query(&sql)
            .fetch_optional(&mut self.conn)
            .await
            .map_err(|source| MigrateError::Ledger {
                operation: "select version",
                source,
            })?;

        let Some(row) = row else {
            return Ok(None);
        };
        let version: String = row.try_get(0).map_err(|source| MigrateError::Ledger {
            operation: "select version",
            source,
        })?;
        Ok(decode_timestamp(&version, "version"))
    }

    /// All ledger rows in the given order
    pub async fn applied_rows(&mut self, order: LedgerOrder) -> MigrateResult<Vec<LedgerRow>> {
        let sql = format!(
            "SELECT version, applied_at FROM {} ORDER BY {}",
            self.table,
            order.as_sql()
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|source| MigrateError::Ledger {
                operation: "select rows",
                source,
            })?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let version: String = row.try_get(0).map_err(|source| MigrateError::Ledger {
                operation: "select rows",
                source,
            })?;
            let applied_at: String = row.try_get(1).map_err(|source| MigrateError::Ledger {
                operation: "select rows",
                source,
            })?;
            let (Some(version), Some(applied_at)) = (
                decode_timestamp(&version, "version"),
                decode_timestamp(&applied_at, "applied_at"),
            ) else {
                continue;
            };
            out.push(LedgerRow {
                version,
                applied_at,
            });
        }
        Ok(out)
    }

    /// Size of the group of rows sharing the most recent `applied_at`;
    /// zero on an empty ledger
    pub async fn count_in_last_batch(&mut self) -> MigrateResult<usize> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} GROUP BY applied_at ORDER BY applied_at DESC LIMIT 1",
            self.table
        );
        let row = sqlx::query(&sql)
            .fetch_optional(&mut self.conn)
            .await
            .map_err(|source| MigrateError::Ledger {
                operation: "count last batch",
                source,
            })?;

        let Some(row) = row else {
            return Ok(0);
        };
        let count: i64 = row.try_get(0).map_err(|source| MigrateError::Ledger {
            operation: "count last batch",
            source,
        })?;
        Ok(count as usize)
    }

    /// Record an applied version outside of any migration transaction
    pub async fn insert_version(
        &mut self,
        version: DateTime<Utc>,
        applied_at: DateTime<Utc>,
    ) -> MigrateResult<()> {
        let op = LedgerOp::Insert {
            version,
            applied_at,
        };
        let (sql, binds) = self.op_statement(&op);
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind.as_str());
        }
        query
            .execute(&mut self.conn)
            .await
            .map_err(|source| MigrateError::Ledger {
                operation: op.operation(),
                source,
            })?;
        Ok(())
    }

    /// Remove a version's row outside of any migration transaction
    pub async fn delete_version(&mut self, version: DateTime<Utc>) -> MigrateResult<()> {
        let op = LedgerOp::Delete { version };
        let (sql, binds) = self.op_statement(&op);
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind.as_str());
        }
        query
            .execute(&mut self.conn)
            .await
            .map_err(|source| MigrateError::Ledger {
                operation: op.operation(),
                source,
            })?;
        Ok(())
    }

    /// Execute a migration body and its ledger mutation in one transaction.
    ///
    /// The body is split on `;` and run one statement at a time, because the
    /// MySQL driver cannot execute a multi-statement batch in a single call.
    /// Any statement or ledger failure rolls the whole transaction back.
    /// Engines without transactional DDL (MySQL) may still leave partial
    /// schema changes applied on failure.
    pub async fn run_migration_queries(&mut self, sql: &str, op: LedgerOp) -> MigrateResult<()> {
        let (op_sql, op_binds) = self.op_statement(&op);

        let mut tx = self
            .conn
            .begin()
            .await
            .map_err(|source| MigrateError::Transaction {
                stage: "begin",
                source,
            })?;

        for statement in sql.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            if let Err(source) = sqlx::query(statement).execute(&mut *tx).await {
                let _ = tx.rollback().await;
                return Err(MigrateError::Execution {
                    query: statement.to_string(),
                    source,
                });
            }
        }

        let mut query = sqlx::query(&op_sql);
        for bind in &op_binds {
            query = query.bind(bind.as_str());
        }
        if let Err(source) = query.execute(&mut *tx).await {
            let _ = tx.rollback().await;
            return Err(MigrateError::Ledger {
                operation: op.operation(),
                source,
            });
        }

        tx.commit()
            .await
            .map_err(|source| MigrateError::Transaction {
                stage: "commit",
                source,
            })
    }

    fn op_statement(&self, op: &LedgerOp) -> (String, Vec<String>) {
        match op {
            LedgerOp::Insert {
                version,
                applied_at,
            } => (
                self.dialect.set_placeholders(&format!(
                    "INSERT INTO {} (version, applied_at) VALUES (?, ?)",
                    self.table
                )),
                vec![
                    version.format(TIMESTAMP_FORMAT).to_string(),
                    applied_at.format(TIMESTAMP_FORMAT).to_string(),
                ],
            ),
            LedgerOp::Delete { version } => (
                self.dialect
                    .set_placeholders(&format!("DELETE FROM {} WHERE version = ?", self.table)),
                vec![version.format(TIMESTAMP_FORMAT).to_string()],
            ),
        }
    }
}

/// Decode a stored 14-character timestamp; rows that do not parse are
/// reported and dropped rather than failing the whole read
fn decode_timestamp(value: &str, column: &str) -> Option<DateTime<Utc>> {
    let parsed = parse_version(value);
    if parsed.is_none() {
        tracing::warn!(column, value, "skipping unparseable ledger timestamp");
    }
    parsed
}
