//! Migration identity
//!
//! A migration is identified by its file name:
//! `VERSION.NAME.DIRECTION[.DIALECT].sql`, where `VERSION` is a 14-digit
//! UTC timestamp (`YYYYMMDDHHMMSS`), `DIRECTION` is `up` or `down`, and the
//! optional `DIALECT` restricts the migration to one engine. Parsing and
//! formatting are exact inverses for canonical names.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::{MigrateError, MigrateResult};

/// Format for versions and applied-at timestamps, in file names and in the
/// migrations table
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Format for timestamps in human-facing messages
pub const DISPLAY_TIMESTAMP_FORMAT: &str = "%Y.%m.%d %H:%M:%S";

/// Whether a migration applies or reverses a schema change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Parse a direction case-insensitively
    pub fn from_str(s: &str) -> Option<Direction> {
        if s.eq_ignore_ascii_case("up") {
            Some(Direction::Up)
        } else if s.eq_ignore_ascii_case("down") {
            Some(Direction::Down)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single directional schema change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    /// Creation timestamp; the primary sort key and identity
    pub version: DateTime<Utc>,
    /// Human-readable slug, shared between the up and down counterpart
    pub name: String,
    pub direction: Direction,
    /// Restricts the migration to one engine; `None` applies everywhere
    pub dialect: Option<Dialect>,
    /// Set once the migration has been recorded in the migrations table
    pub applied_at: Option<DateTime<Utc>>,
}

impl Migration {
    /// Parse a migration from its file name
    pub fn from_file_name(file_name: &str) -> MigrateResult<Migration> {
        let invalid = |reason: &str| MigrateError::InvalidFileName {
            name: file_name.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = file_name.split('.').collect();
        if parts.len() != 4 && parts.len() != 5 {
            return Err(invalid("expected VERSION.NAME.DIRECTION[.DIALECT].sql"));
        }

        if !parts[parts.len() - 1].eq_ignore_ascii_case("sql") {
            return Err(invalid("file name is not sql"));
        }

        let version = parse_version(parts[0]).ok_or_else(|| invalid("malformed version"))?;

        let name = parts[1].to_string();

        let direction =
            Direction::from_str(parts[2]).ok_or_else(|| invalid("unknown direction"))?;

        let dialect = if parts.len() == 5 {
            Some(Dialect::from_name(parts[3]).ok_or_else(|| invalid("engine is not known"))?)
        } else {
            None
        };

        Ok(Migration {
            version,
            name,
            direction,
            dialect,
            applied_at: None,
        })
    }

    /// Canonical file name for this migration
    pub fn file_name(&self) -> String {
        let mut parts = vec![
            self.version.format(TIMESTAMP_FORMAT).to_string(),
            self.name.clone(),
            self.direction.as_str().to_string(),
        ];
        if let Some(dialect) = self.dialect {
            parts.push(dialect.name().to_string());
        }
        parts.push("sql".to_string());
        parts.join(".")
    }

    /// Display name with underscores replaced by spaces
    pub fn human_name(&self) -> String {
        self.name.replace('_', " ")
    }
}

/// Parse a 14-digit `YYYYMMDDHHMMSS` version
pub(crate) fn parse_version(s: &str) -> Option<DateTime<Utc>> {
    if s.len() != 14 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Format a version for human-facing messages
pub(crate) fn display_version(ts: DateTime<Utc>) -> String {
    ts.format(DISPLAY_TIMESTAMP_FORMAT).to_string()
}
