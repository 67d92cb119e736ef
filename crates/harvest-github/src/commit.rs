//! Commit and repository types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A repository owned by the harvested user
///
/// Identity is the name, scoped to the queried user. Repositories only
/// live for the duration of a harvest run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repository {
    /// Repository name (without owner)
    pub name: String,
}

impl Repository {
    /// Create a repository by name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// File change tallies for one commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCounts {
    /// Files with status `added`
    pub added: u64,
    /// Files with status `removed`
    pub deleted: u64,
    /// Files with status `modified`
    pub updated: u64,
}

impl FileCounts {
    /// Sum of all classified files
    #[must_use]
    pub fn total(&self) -> u64 {
        self.added + self.deleted + self.updated
    }
}

/// A harvested commit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// The commit object id; the deduplication key
    pub commit_id: String,
    /// Full commit message
    pub message: String,
    /// Author name
    pub committed_by: String,
    /// Author timestamp, normalized to UTC
    pub committed_at: DateTime<Utc>,
    /// Lines added
    pub lines_added: u64,
    /// Lines deleted
    pub lines_deleted: u64,
    /// Name of the repository the commit was harvested from
    pub repo_name: String,
    /// Files added (zero when enrichment failed)
    pub files_added: u64,
    /// Files removed (zero when enrichment failed)
    pub files_deleted: u64,
    /// Files modified (zero when enrichment failed)
    pub files_updated: u64,
}

impl Commit {
    /// Get the short commit id (first 7 characters)
    #[must_use]
    pub fn short_id(&self) -> &str {
        let end = self
            .commit_id
            .char_indices()
            .nth(7)
            .map_or(self.commit_id.len(), |(idx, _)| idx);
        &self.commit_id[..end]
    }

    /// Get the first line of the commit message (subject)
    #[must_use]
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    /// Current file counts of this record
    #[must_use]
    pub fn file_counts(&self) -> FileCounts {
        FileCounts {
            added: self.files_added,
            deleted: self.files_deleted,
            updated: self.files_updated,
        }
    }

    /// Merge enrichment results into the record
    pub fn apply_file_counts(&mut self, counts: FileCounts) {
        self.files_added = counts.added;
        self.files_deleted = counts.deleted;
        self.files_updated = counts.updated;
    }

    /// Builder form of [`Commit::apply_file_counts`]
    #[must_use]
    pub fn with_file_counts(mut self, counts: FileCounts) -> Self {
        self.apply_file_counts(counts);
        self
    }
}
