// Copyright (c) 2026 - present Nicholas D. Crosbie
// SPDX-License-Identifier: MIT

//! Per-commit file classification
//!
//! The GraphQL history only carries line counts. File-level counts come from
//! a secondary REST lookup per commit, whose `files[].status` tags are
//! tallied into [`FileCounts`].

use serde::Deserialize;

use crate::client::EnrichmentClient;
use crate::commit::FileCounts;
use crate::error::ApiError;

/// Default per-commit detail endpoint
pub const DEFAULT_ENRICHMENT_TEMPLATE: &str =
    "https://api.github.com/repos/{user}/{repo}/commits/{commit_id}";

/// URL template for the per-commit detail endpoint
///
/// Supports the `{user}`, `{repo}` and `{commit_id}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentEndpoint {
    template: String,
}

impl EnrichmentEndpoint {
    /// Create an endpoint from a template
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// The raw template
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Whether the template references the commit id at all
    #[must_use]
    pub fn is_per_commit(&self) -> bool {
        self.template.contains("{commit_id}")
    }

    /// Build the URL for one commit; values are inserted without encoding
    #[must_use]
    pub fn url_for(&self, user: &str, repo: &str, commit_id: &str) -> String {
        self.template
            .replace("{user}", user)
            .replace("{repo}", repo)
            .replace("{commit_id}", commit_id)
    }
}

impl Default for EnrichmentEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_ENRICHMENT_TEMPLATE)
    }
}

/// Classified change status of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// New file
    Added,
    /// Deleted file
    Removed,
    /// Changed file
    Modified,
}

impl FileStatus {
    /// Parse a status tag; unknown tags yield `None`
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "added" => Some(FileStatus::Added),
            "removed" => Some(FileStatus::Removed),
            "modified" => Some(FileStatus::Modified),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    #[serde(default)]
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    #[serde(default)]
    status: String,
}

/// Tally status tags into file counts
///
/// Unrecognized tags (`renamed`, `copied`, future additions) are skipped.
pub fn tally_statuses<'a, I>(statuses: I) -> FileCounts
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts = FileCounts::default();
    for status in statuses.into_iter().filter_map(FileStatus::from_tag) {
        match status {
            FileStatus::Added => counts.added += 1,
            FileStatus::Removed => counts.deleted += 1,
            FileStatus::Modified => counts.updated += 1,
        }
    }
    counts
}

/// Decode a commit detail body and tally its files
///
/// # Errors
///
/// Returns [`ApiError::Decode`] if the body is not a JSON object with an
/// optional `files` list.
pub fn decode_file_counts(body: &str) -> Result<FileCounts, ApiError> {
    let detail: CommitDetail = serde_json::from_str(body)?;
    Ok(tally_statuses(detail.files.iter().map(|f| f.status.as_str())))
}

/// Classify the files touched by one commit
///
/// # Errors
///
/// Returns the lookup error of the client, or [`ApiError::Decode`] for a
/// malformed body. Callers treat any error as "counts unknown".
pub fn classify_files<C>(
    client: &C,
    user: &str,
    repo: &str,
    commit_id: &str,
) -> Result<FileCounts, ApiError>
where
    C: EnrichmentClient + ?Sized,
{
    let body = client.commit_detail(user, repo, commit_id)?;
    decode_file_counts(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;
    use std::sync::Mutex;

    struct FakeDetails {
        response: Result<String, fn() -> ApiError>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeDetails {
        fn ok(body: &str) -> Self {
            Self {
                response: Ok(body.to_string()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing(err: fn() -> ApiError) -> Self {
            Self {
                response: Err(err),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl EnrichmentClient for FakeDetails {
        fn commit_detail(
            &self,
            user: &str,
            repo: &str,
            commit_id: &str,
        ) -> Result<String, ApiError> {
            self.calls
                .lock()
                .expect("lock")
                .push(format!("{user}/{repo}/{commit_id}"));
            match &self.response {
                Ok(body) => Ok(body.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    #[test]
    fn test_status_mapping_ignores_unknown() {
        let counts = tally_statuses(["added", "modified", "removed", "unknown_status"]);
        assert_eq!(
            counts,
            FileCounts {
                added: 1,
                deleted: 1,
                updated: 1
            }
        );
    }

    #[test]
    fn test_renamed_and_copied_are_not_counted() {
        let counts = tally_statuses(["renamed", "copied", "changed", "unchanged", "added"]);
        assert_eq!(counts.total(), 1);
        assert_eq!(counts.added, 1);
    }

    #[test]
    fn test_classify_files_decodes_body() {
        let client = FakeDetails::ok(
            r#"{
                "sha": "abc",
                "files": [
                    {"filename": "a.rs", "status": "added"},
                    {"filename": "b.rs", "status": "added"},
                    {"filename": "c.rs", "status": "modified"},
                    {"filename": "d.rs", "status": "removed"},
                    {"filename": "e.rs", "status": "renamed"}
                ]
            }"#,
        );

        let counts = classify_files(&client, "octocat", "hello", "abc").expect("classify");
        assert_eq!(
            counts,
            FileCounts {
                added: 2,
                deleted: 1,
                updated: 1
            }
        );
        let calls = client.calls.lock().expect("lock").clone();
        assert_eq!(calls, vec!["octocat/hello/abc".to_string()]);
    }

    #[test]
    fn test_missing_files_is_empty() {
        let counts = decode_file_counts(r#"{"sha": "abc"}"#).expect("decode");
        assert_eq!(counts, FileCounts::default());
    }

    #[test]
    fn test_malformed_body_is_decode_error() {
        assert!(matches!(
            decode_file_counts("<html>oops</html>"),
            Err(ApiError::Decode(_))
        ));
        assert!(matches!(
            decode_file_counts(r#"{"files": "not a list"}"#),
            Err(ApiError::Decode(_))
        ));
    }

    #[test]
    fn test_lookup_error_propagates() {
        let client = FakeDetails::failing(|| ApiError::NotFound("gone".into()));
        assert!(matches!(
            classify_files(&client, "u", "r", "c"),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn test_url_template_substitution() {
        let endpoint = EnrichmentEndpoint::default();
        assert_eq!(
            endpoint.url_for("octocat", "hello-world", "deadbeef"),
            "https://api.github.com/repos/octocat/hello-world/commits/deadbeef"
        );
        assert!(endpoint.is_per_commit());

        let custom = EnrichmentEndpoint::new("http://localhost:9000/{repo}/{commit_id}?u={user}");
        assert_eq!(
            custom.url_for("me", "r", "c1"),
            "http://localhost:9000/r/c1?u=me"
        );
        assert!(!EnrichmentEndpoint::new("http://static").is_per_commit());
    }

    #[test]
    fn test_url_values_inserted_verbatim() {
        let endpoint = EnrichmentEndpoint::default();
        assert_eq!(
            endpoint.url_for("octo cat", "a.b_c", "ff"),
            "https://api.github.com/repos/octo cat/a.b_c/commits/ff"
        );
    }
}
