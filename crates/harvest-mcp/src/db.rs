//! Database module for harvest-mcp
//!
//! This module provides the SQLite store for harvested commits and the
//! insert-if-absent write path. The store is reached only through an
//! explicit [`Database`] handle, constructed once at startup and handed to
//! whoever writes.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use harvest_github::Commit;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::migrations;

/// URI selecting a private in-memory store
pub const MEMORY_URI: &str = ":memory:";

/// Busy timeout applied to every connection; bounds the connectivity check
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Database errors
#[derive(Debug, Error)]
pub enum DbError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(#[from] migrations::MigrationError),

    /// Database not initialized
    #[error("Database not initialized")]
    NotInitialized,

    /// Write of a single commit failed
    #[error("Failed to store commit {commit_id}: {source}")]
    Write {
        commit_id: String,
        #[source]
        source: rusqlite::Error,
    },
}

// ============================================================================
// Store Capability
// ============================================================================

/// Capability the harvester needs from a commit store
///
/// [`Database`] is the production implementation; tests substitute fakes.
pub trait StoreHandle {
    /// Connectivity check
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot serve writes.
    fn ping(&self) -> Result<(), DbError>;

    /// Insert the commit unless a record with the same `commit_id` exists
    ///
    /// Returns `true` if a row was inserted, `false` if it already existed.
    /// Existing records are never modified.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn insert_if_absent(&mut self, commit: &Commit) -> Result<bool, DbError>;
}

/// Outcome of one [`save_commits`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveStats {
    /// Newly inserted records
    pub inserted: usize,
    /// Records that already existed and were left untouched
    pub skipped: usize,
}

/// Persist a batch of commits with insert-if-absent semantics
///
/// Commits are written one by one. The first failure aborts the call;
/// commits written before it stay written, so re-running the batch is safe.
///
/// # Errors
///
/// Returns the first write error.
pub fn save_commits<S>(store: &mut S, commits: &[Commit]) -> Result<SaveStats, DbError>
where
    S: StoreHandle + ?Sized,
{
    let mut stats = SaveStats::default();
    for commit in commits {
        if store.insert_if_absent(commit)? {
            stats.inserted += 1;
        } else {
            stats.skipped += 1;
        }
    }
    debug!(
        inserted = stats.inserted,
        skipped = stats.skipped,
        "saved commit batch"
    );
    Ok(stats)
}

// ============================================================================
// SQLite Database
// ============================================================================

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create a new in-memory database
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Self::configure(conn)
    }

    /// Open a database file
    ///
    /// # Errors
    ///
    /// Returns an error if the database file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        Self::configure(conn)
    }

    /// Open the store named by a URI
    ///
    /// Accepts `:memory:`, a `sqlite://` prefixed path, or a plain path.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn connect(uri: &str) -> Result<Self, DbError> {
        let target = uri.strip_prefix("sqlite://").unwrap_or(uri);
        if target == MEMORY_URI {
            Self::in_memory()
        } else {
            Self::open(Path::new(target))
        }
    }

    fn configure(conn: Connection) -> Result<Self, DbError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    /// Initialize the database schema using migrations
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn initialize(&self) -> Result<(), DbError> {
        migrations::migrate(&self.conn)?;
        Ok(())
    }

    /// Check if the database is initialized and up to date
    pub fn is_initialized(&self) -> bool {
        migrations::is_up_to_date(&self.conn)
    }

    /// Get the current schema version
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be read.
    pub fn schema_version(&self) -> Result<i32, DbError> {
        Ok(migrations::get_version(&self.conn)?)
    }

    /// Get the underlying connection (for advanced queries)
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Execute a simple query and return the count
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self, table: &str) -> Result<i64, DbError> {
        let query = format!("SELECT COUNT(*) FROM {table}");
        let count: i64 = self.conn.query_row(&query, [], |row| row.get(0))?;
        Ok(count)
    }

    /// Insert a commit unless its `commit_id` is already stored
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Write`] if the statement fails.
    pub fn insert_commit_if_absent(&self, commit: &Commit) -> Result<bool, DbError> {
        let changed = self
            .conn
            .prepare_cached(
                "INSERT INTO commits (
                    commit_id, repo_name, message, committed_by, committed_at,
                    lines_added, lines_deleted, files_added, files_deleted, files_updated,
                    harvested_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT (commit_id) DO NOTHING",
            )
            .and_then(|mut stmt| {
                stmt.execute(params![
                    commit.commit_id,
                    commit.repo_name,
                    commit.message,
                    commit.committed_by,
                    commit.committed_at.to_rfc3339(),
                    count_to_sql(commit.lines_added),
                    count_to_sql(commit.lines_deleted),
                    count_to_sql(commit.files_added),
                    count_to_sql(commit.files_deleted),
                    count_to_sql(commit.files_updated),
                    Utc::now().to_rfc3339(),
                ])
            })
            .map_err(|source| DbError::Write {
                commit_id: commit.commit_id.clone(),
                source,
            })?;

        Ok(changed == 1)
    }

    /// Load a stored commit by id
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored value is malformed.
    pub fn get_commit(&self, commit_id: &str) -> Result<Option<Commit>, DbError> {
        let commit = self
            .conn
            .query_row(
                "SELECT commit_id, repo_name, message, committed_by, committed_at,
                        lines_added, lines_deleted, files_added, files_deleted, files_updated
                 FROM commits WHERE commit_id = ?1",
                [commit_id],
                commit_from_row,
            )
            .optional()?;
        Ok(commit)
    }

    /// Number of stored commits for one repository
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    #[cfg(test)]
    pub fn count_commits_for_repo(&self, repo_name: &str) -> Result<i64, DbError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM commits WHERE repo_name = ?1",
            [repo_name],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn commit_from_row(row: &Row<'_>) -> rusqlite::Result<Commit> {
    let committed_at: String = row.get(4)?;
    let committed_at = DateTime::parse_from_rfc3339(&committed_at)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Commit {
        commit_id: row.get(0)?,
        repo_name: row.get(1)?,
        message: row.get(2)?,
        committed_by: row.get(3)?,
        committed_at,
        lines_added: count_from_sql(row.get(5)?),
        lines_deleted: count_from_sql(row.get(6)?),
        files_added: count_from_sql(row.get(7)?),
        files_deleted: count_from_sql(row.get(8)?),
        files_updated: count_from_sql(row.get(9)?),
    })
}

// Counts are stored as INTEGER, which SQLite keeps as a signed 64-bit value
fn count_to_sql(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn count_from_sql(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl StoreHandle for Database {
    fn ping(&self) -> Result<(), DbError> {
        if !self.is_initialized() {
            return Err(DbError::NotInitialized);
        }
        self.conn.query_row("SELECT 1", [], |row| row.get::<_, i32>(0))?;
        Ok(())
    }

    fn insert_if_absent(&mut self, commit: &Commit) -> Result<bool, DbError> {
        self.insert_commit_if_absent(commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use similar_asserts::assert_eq;

    fn test_db() -> Database {
        let db = Database::in_memory().expect("should create db");
        db.initialize().expect("should initialize");
        db
    }

    fn sample_commit(id: &str) -> Commit {
        Commit {
            commit_id: id.to_string(),
            message: "fix: handle empty history".to_string(),
            committed_by: "Ada".to_string(),
            committed_at: Utc.with_ymd_and_hms(2026, 1, 17, 2, 33, 6).unwrap(),
            lines_added: 12,
            lines_deleted: 4,
            repo_name: "harvest".to_string(),
            files_added: 1,
            files_deleted: 0,
            files_updated: 2,
        }
    }

    #[test]
    fn test_database_in_memory() {
        let db = Database::in_memory().expect("should create in-memory db");
        assert!(!db.is_initialized());
    }

    #[test]
    fn test_database_initialize_idempotent() {
        let db = Database::in_memory().expect("should create db");
        db.initialize().expect("first init");
        db.initialize().expect("second init should succeed");
        assert!(db.is_initialized());
        assert_eq!(
            db.schema_version().expect("version"),
            crate::migrations::CURRENT_VERSION
        );
    }

    #[test]
    fn test_connect_memory_uri() {
        let db = Database::connect(":memory:").expect("connect");
        db.initialize().expect("init");
        assert_eq!(db.count("commits").expect("count"), 0);

        let db = Database::connect("sqlite://:memory:").expect("connect prefixed");
        db.initialize().expect("init");
    }

    #[test]
    fn test_ping_requires_initialization() {
        let db = Database::in_memory().expect("create");
        assert!(matches!(db.ping(), Err(DbError::NotInitialized)));
        db.initialize().expect("init");
        db.ping().expect("ping after init");
    }

    #[test]
    fn test_insert_then_get() {
        let db = test_db();
        let commit = sample_commit("c1");
        assert!(db.insert_commit_if_absent(&commit).expect("insert"));

        let stored = db.get_commit("c1").expect("get").expect("present");
        assert_eq!(stored, commit);
        assert!(db.get_commit("missing").expect("get").is_none());
    }

    #[test]
    fn test_insert_if_absent_never_overwrites() {
        let mut db = test_db();
        let original = sample_commit("c1");
        assert!(db.insert_if_absent(&original).expect("first insert"));

        let mut changed = sample_commit("c1");
        changed.message = "rewritten".to_string();
        changed.files_added = 99;
        assert!(!db.insert_if_absent(&changed).expect("second insert"));

        assert_eq!(db.count("commits").expect("count"), 1);
        let stored = db.get_commit("c1").expect("get").expect("present");
        assert_eq!(stored.message, "fix: handle empty history");
        assert_eq!(stored.files_added, 1);
    }

    #[test]
    fn test_save_commits_twice_is_idempotent() {
        let mut db = test_db();
        let batch = vec![sample_commit("a"), sample_commit("b"), sample_commit("c")];

        let first = save_commits(&mut db, &batch).expect("first save");
        assert_eq!(
            first,
            SaveStats {
                inserted: 3,
                skipped: 0
            }
        );

        let second = save_commits(&mut db, &batch).expect("second save");
        assert_eq!(
            second,
            SaveStats {
                inserted: 0,
                skipped: 3
            }
        );
        assert_eq!(db.count("commits").expect("count"), 3);
    }

    #[test]
    fn test_save_commits_duplicates_within_batch() {
        let mut db = test_db();
        let batch = vec![sample_commit("a"), sample_commit("a")];
        let stats = save_commits(&mut db, &batch).expect("save");
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn test_write_without_schema_fails() {
        let mut db = Database::in_memory().expect("create");
        let result = save_commits(&mut db, &[sample_commit("a")]);
        assert!(matches!(result, Err(DbError::Write { ref commit_id, .. }) if commit_id == "a"));
    }

    #[test]
    fn test_count_commits_for_repo() {
        let mut db = test_db();
        let mut other = sample_commit("b");
        other.repo_name = "other".to_string();
        save_commits(&mut db, &[sample_commit("a"), other]).expect("save");

        assert_eq!(db.count_commits_for_repo("harvest").expect("count"), 1);
        assert_eq!(db.count_commits_for_repo("other").expect("count"), 1);
        assert_eq!(db.count_commits_for_repo("none").expect("count"), 0);
    }

    #[test]
    fn test_indexes_created() {
        let db = test_db();
        for index in ["idx_commits_repo", "idx_commits_committed_at"] {
            let exists: i32 = db
                .connection()
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name=?",
                    [index],
                    |row| row.get(0),
                )
                .expect("query should succeed");
            assert_eq!(exists, 1, "Index {index} should exist");
        }
    }
}
