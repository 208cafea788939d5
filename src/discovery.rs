//! Migration discovery
//!
//! Scans the immediate entries of the migrations directory (subdirectories
//! are skipped, never descended), parses each file name into a
//! [`Migration`], filters by direction and dialect applicability, and
//! returns the result ordered by version. Files whose names do not parse are
//! ignored rather than rejected, so stray files can live next to migrations.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::dialect::Dialect;
use crate::error::{MigrateError, MigrateResult};
use crate::migration::{display_version, Direction, Migration, TIMESTAMP_FORMAT};

/// Find all migrations for one direction, ordered ascending by version.
///
/// Returns a [`MigrateError::DuplicateVersion`] when two applicable files
/// encode the same version, since replaying them would be ambiguous.
pub(crate) fn find_migrations(
    dir: &Path,
    engine: Dialect,
    direction: Direction,
) -> MigrateResult<Vec<Migration>> {
    let mut migrations = scan(dir, engine, |m| m.direction == direction)?;

    migrations.sort_by_key(|m| m.version);

    for pair in migrations.windows(2) {
        if pair[0].version == pair[1].version {
            return Err(MigrateError::DuplicateVersion(display_version(
                pair[0].version,
            )));
        }
    }

    Ok(migrations)
}

/// Find the single migration file for a version and direction.
///
/// A file without a dialect tag wins over an engine-specific one; within the
/// selected class there must be exactly one match.
pub(crate) fn find_for_version(
    dir: &Path,
    engine: Dialect,
    version: DateTime<Utc>,
    direction: Direction,
) -> MigrateResult<Migration> {
    let matches = scan(dir, engine, |m| {
        m.direction == direction && m.version == version
    })?;

    let generic: Vec<&Migration> = matches.iter().filter(|m| m.dialect.is_none()).collect();
    let selected = if generic.is_empty() {
        matches.iter().collect()
    } else {
        generic
    };

    match selected.len() {
        0 => Err(MigrateError::MigrationNotFound {
            version: version.format(TIMESTAMP_FORMAT).to_string(),
            direction: direction.to_string(),
        }),
        1 => Ok(selected[0].clone()),
        count => Err(MigrateError::AmbiguousVersion {
            version: version.format(TIMESTAMP_FORMAT).to_string(),
            direction: direction.to_string(),
            count,
        }),
    }
}

/// List applicable migrations in `dir` matching `keep`
fn scan(
    dir: &Path,
    engine: Dialect,
    keep: impl Fn(&Migration) -> bool,
) -> MigrateResult<Vec<Migration>> {
    let entries = fs::read_dir(dir).map_err(|source| MigrateError::Scan {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut migrations = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| MigrateError::Scan {
            path: dir.to_path_buf(),
            source,
        })?;

        let is_file = entry
            .file_type()
            .map_err(|source| MigrateError::Scan {
                path: dir.to_path_buf(),
                source,
            })?
            .is_file();
        if !is_file {
            continue;
        }

        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };

        // non-migration files are tolerated, not errors
        let Ok(migration) = Migration::from_file_name(file_name) else {
            continue;
        };

        if let Some(dialect) = migration.dialect {
            if dialect != engine {
                continue;
            }
        }

        if keep(&migration) {
            migrations.push(migration);
        }
    }

    Ok(migrations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::parse_version;
    use std::fs::{self, File};
    use tempfile::TempDir;

    fn dir_with(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for name in files {
            File::create(dir.path().join(name)).unwrap();
        }
        dir
    }

    #[test]
    fn finds_sorted_migrations_for_direction() {
        let dir = dir_with(&[
            "20180918200632.second.up.sql",
            "20180918200453.first.up.sql",
            "20180918200453.first.down.sql",
            "notes.txt",
            ".gitkeep",
        ]);

        let found = find_migrations(dir.path(), Dialect::Sqlite, Direction::Up).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "first");
        assert_eq!(found[1].name, "second");

        let found = find_migrations(dir.path(), Dialect::Sqlite, Direction::Down).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn filters_by_dialect_applicability() {
        let dir = dir_with(&[
            "20180918200453.everywhere.up.sql",
            "20180918200632.pg_only.up.postgres.sql",
            "20180918200715.lite_only.up.sqlite.sql",
        ]);

        let found = find_migrations(dir.path(), Dialect::Sqlite, Direction::Up).unwrap();
        let names: Vec<&str> = found.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["everywhere", "lite_only"]);

        let found = find_migrations(dir.path(), Dialect::Postgres, Direction::Up).unwrap();
        let names: Vec<&str> = found.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["everywhere", "pg_only"]);
    }

    #[test]
    fn duplicate_versions_are_rejected() {
        let dir = dir_with(&[
            "20180918200632.one.up.sql",
            "20180918200632.other.up.sqlite.sql",
        ]);

        let err = find_migrations(dir.path(), Dialect::Sqlite, Direction::Up).unwrap_err();
        assert!(matches!(err, MigrateError::DuplicateVersion(_)));

        // the postgres view only sees the generic file, so no duplicate
        let found = find_migrations(dir.path(), Dialect::Postgres, Direction::Up).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn subdirectories_are_skipped() {
        let dir = dir_with(&["20180918200453.only.up.sql"]);
        let sub = dir.path().join("archive");
        fs::create_dir(&sub).unwrap();
        File::create(sub.join("20170101000000.old.up.sql")).unwrap();

        let found = find_migrations(dir.path(), Dialect::Sqlite, Direction::Up).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "only");
    }

    #[test]
    fn missing_directory_is_a_scan_error() {
        let dir = TempDir::new().unwrap();
        let err = find_migrations(&dir.path().join("nope"), Dialect::Sqlite, Direction::Up)
            .unwrap_err();
        assert!(matches!(err, MigrateError::Scan { .. }));
    }

    #[test]
    fn find_for_version_prefers_untagged_file() {
        let dir = dir_with(&[
            "20180918200453.tagged.up.sqlite.sql",
            "20180918200632.both.up.sql",
            "20180918200632.both.up.sqlite.sql",
        ]);

        let m = find_for_version(
            dir.path(),
            Dialect::Sqlite,
            parse_version("20180918200632").unwrap(),
            Direction::Up,
        )
        .unwrap();
        assert_eq!(m.dialect, None);

        let m = find_for_version(
            dir.path(),
            Dialect::Sqlite,
            parse_version("20180918200453").unwrap(),
            Direction::Up,
        )
        .unwrap();
        assert_eq!(m.dialect, Some(Dialect::Sqlite));
    }

    #[test]
    fn find_for_version_reports_missing_and_ambiguous() {
        let dir = dir_with(&[
            "20180918200453.only_up.up.sql",
            "20180918200632.twice.up.sql",
            "20180918200632.twice_again.up.sql",
            "20180918200715.wrong_engine.up.postgres.sql",
        ]);

        let err = find_for_version(
            dir.path(),
            Dialect::Sqlite,
            parse_version("20180918200453").unwrap(),
            Direction::Down,
        )
        .unwrap_err();
        assert!(matches!(err, MigrateError::MigrationNotFound { .. }));

        let err = find_for_version(
            dir.path(),
            Dialect::Sqlite,
            parse_version("20180918200715").unwrap(),
            Direction::Up,
        )
        .unwrap_err();
        assert!(matches!(err, MigrateError::MigrationNotFound { .. }));

        let err = find_for_version(
            dir.path(),
            Dialect::Sqlite,
            parse_version("20180918200632").unwrap(),
            Direction::Up,
        )
        .unwrap_err();
        assert!(matches!(err, MigrateError::AmbiguousVersion { count: 2, .. }));
    }
}
