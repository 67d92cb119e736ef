//! Database migrations for harvest-mcp
//!
//! This module provides schema migration functionality. Each migration runs
//! inside its own transaction and records its version in
//! `schema_migrations`.

use chrono::Utc;
use rusqlite::{Connection, params};
use thiserror::Error;

/// Migration errors
#[derive(Debug, Error)]
pub enum MigrationError {
    /// SQLite error during migration
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Database is newer than this binary
    #[error("Schema version {found} is newer than supported version {expected}")]
    VersionMismatch { expected: i32, found: i32 },
}

/// Current schema version
pub const CURRENT_VERSION: i32 = 1;

const MIGRATIONS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS schema_migrations (
        version    INTEGER PRIMARY KEY NOT NULL,
        name       TEXT NOT NULL,
        applied_at TEXT NOT NULL
    );
";

/// A database migration
#[allow(dead_code)]
pub struct Migration {
    /// Migration version number
    pub version: i32,
    /// Migration name/description
    pub name: &'static str,
    /// SQL to apply the migration
    pub up: &'static str,
    /// SQL to revert the migration (optional)
    pub down: Option<&'static str>,
}

/// All available migrations in order
pub static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    up: include_str!("schema.sql"),
    down: Some(
        r#"
        DROP INDEX IF EXISTS idx_commits_committed_at;
        DROP INDEX IF EXISTS idx_commits_repo;
        DROP TABLE IF EXISTS commits;
    "#,
    ),
}];

/// Get the current schema version from the database
///
/// Returns 0 if no migrations have been applied.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_version(conn: &Connection) -> Result<i32, MigrationError> {
    let table_exists: i32 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_migrations'",
        [],
        |row| row.get(0),
    )?;

    if table_exists == 0 {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Apply all pending migrations
///
/// Returns the versions that were applied.
///
/// # Errors
///
/// Returns an error if any migration fails or the database was written by
/// a newer schema.
pub fn migrate(conn: &Connection) -> Result<Vec<i32>, MigrationError> {
    conn.execute_batch(MIGRATIONS_TABLE)?;

    let current_version = get_version(conn)?;
    if current_version > CURRENT_VERSION {
        return Err(MigrationError::VersionMismatch {
            expected: CURRENT_VERSION,
            found: current_version,
        });
    }

    let mut applied = Vec::new();
    for migration in MIGRATIONS {
        if migration.version > current_version {
            apply_migration(conn, migration)?;
            applied.push(migration.version);
        }
    }

    Ok(applied)
}

/// Apply a single migration and record it
///
/// # Errors
///
/// Returns an error if the migration fails; nothing is recorded then.
pub fn apply_migration(conn: &Connection, migration: &Migration) -> Result<(), MigrationError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.up)?;
    tx.execute(
        "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
        params![migration.version, migration.name, Utc::now().to_rfc3339()],
    )?;
    tx.commit()?;
    Ok(())
}

/// Rollback to a specific version
///
/// # Errors
///
/// Returns an error if a down migration fails.
#[cfg(test)]
pub fn rollback_to(conn: &Connection, target_version: i32) -> Result<Vec<i32>, MigrationError> {
    let current_version = get_version(conn)?;
    let mut rolled_back = Vec::new();

    for migration in MIGRATIONS.iter().rev() {
        if migration.version > target_version && migration.version <= current_version {
            if let Some(down) = migration.down {
                let tx = conn.unchecked_transaction()?;
                tx.execute_batch(down)?;
                tx.execute(
                    "DELETE FROM schema_migrations WHERE version = ?1",
                    [migration.version],
                )?;
                tx.commit()?;
                rolled_back.push(migration.version);
            }
        }
    }

    Ok(rolled_back)
}

/// Check if the database is up to date
#[must_use]
pub fn is_up_to_date(conn: &Connection) -> bool {
    get_version(conn)
        .map(|v| v >= CURRENT_VERSION)
        .unwrap_or(false)
}
