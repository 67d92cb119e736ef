// Copyright (c) 2026 - present Nicholas D. Crosbie
// SPDX-License-Identifier: MIT

//! Cursor-paginated fetching of repositories and commit history
//!
//! Every listing follows the same discipline: the first request carries a
//! null cursor, each following request carries the `endCursor` the server
//! returned, verbatim, and the loop ends when `hasNextPage` is false.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::client::{GraphQlRequest, QueryClient};
use crate::commit::{Commit, Repository};
use crate::error::ApiError;

/// Largest page the GitHub GraphQL API accepts
pub const MAX_PAGE_SIZE: u32 = 100;

const REPOSITORIES_QUERY: &str = r#"
query($user: String!, $first: Int!, $cursor: String) {
  user(login: $user) {
    repositories(first: $first, after: $cursor, ownerAffiliations: OWNER, orderBy: {field: NAME, direction: ASC}) {
      pageInfo { hasNextPage endCursor }
      nodes { name }
    }
  }
}
"#;

const DEFAULT_BRANCH_QUERY: &str = r#"
query($user: String!, $repo: String!) {
  repository(owner: $user, name: $repo) {
    defaultBranchRef { name prefix }
  }
}
"#;

const HISTORY_QUERY: &str = r#"
query($user: String!, $repo: String!, $branch: String!, $first: Int!, $cursor: String) {
  repository(owner: $user, name: $repo) {
    ref(qualifiedName: $branch) {
      target {
        ... on Commit {
          history(first: $first, after: $cursor) {
            pageInfo { hasNextPage endCursor }
            nodes {
              oid
              message
              additions
              deletions
              committedDate
              author { name date }
            }
          }
        }
      }
    }
  }
}
"#;

// ============================================================================
// Options
// ============================================================================

/// Predicate polled between pages; returning `true` stops the fetch
pub type Interrupt = Arc<dyn Fn() -> bool + Send + Sync>;

/// Options for a paginated fetch
#[derive(Clone)]
pub struct FetchOptions {
    /// Nodes requested per page (1..=100)
    pub page_size: u32,
    /// Stop after this many nodes (None = all pages)
    pub limit: Option<usize>,
    interrupt: Option<Interrupt>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            limit: None,
            interrupt: None,
        }
    }
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("page_size", &self.page_size)
            .field("limit", &self.limit)
            .field("interruptible", &self.interrupt.is_some())
            .finish()
    }
}

impl FetchOptions {
    /// Use the given page size, clamped to what the API accepts
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Stop after `limit` nodes
    #[must_use]
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Poll `interrupt` before every page request
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupt.as_ref().is_some_and(|check| check())
    }
}

// ============================================================================
// Pagination
// ============================================================================

/// Pagination position reported by the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Whether another page follows
    pub has_next_page: bool,
    /// Opaque cursor of the last node on this page
    pub end_cursor: Option<String>,
}

/// One page of nodes
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Nodes on this page, in server order
    pub nodes: Vec<T>,
    /// Position after this page
    pub page_info: PageInfo,
}

/// Drive `fetch_page` until the server reports no further page
///
/// `fetch_page` receives `None` on the first call and the previous page's
/// `endCursor` afterwards.
///
/// # Errors
///
/// Propagates the first page error. A page that claims a successor but
/// carries no cursor, or repeats the cursor just sent, is a
/// [`ApiError::Protocol`] error.
pub fn paginate<T, F>(options: &FetchOptions, mut fetch_page: F) -> Result<Vec<T>, ApiError>
where
    F: FnMut(Option<&str>) -> Result<Page<T>, ApiError>,
{
    let mut cursor: Option<String> = None;
    let mut nodes = Vec::new();
    let mut pages = 0usize;

    loop {
        if options.interrupted() {
            return Err(ApiError::Cancelled);
        }

        let page = fetch_page(cursor.as_deref())?;
        pages += 1;
        nodes.extend(page.nodes);

        if let Some(limit) = options.limit
            && nodes.len() >= limit
        {
            nodes.truncate(limit);
            break;
        }

        if !page.page_info.has_next_page {
            break;
        }

        match page.page_info.end_cursor {
            None => {
                return Err(ApiError::Protocol(
                    "server reported another page without an end cursor".to_string(),
                ));
            }
            Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                return Err(ApiError::Protocol(format!(
                    "server returned the same cursor twice: {next}"
                )));
            }
            Some(next) => {
                trace!(page = pages, "advancing cursor");
                cursor = Some(next);
            }
        }
    }

    debug!(pages, nodes = nodes.len(), "pagination complete");
    Ok(nodes)
}

// ============================================================================
// Wire Shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct NodeConnection<T> {
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
    #[serde(default = "Vec::new")]
    nodes: Vec<Option<T>>,
}

impl<T> NodeConnection<T> {
    fn into_page(self) -> Page<T> {
        Page {
            nodes: self.nodes.into_iter().flatten().collect(),
            page_info: self.page_info,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RepositoriesData {
    user: Option<UserRepositories>,
}

#[derive(Debug, Deserialize)]
struct UserRepositories {
    repositories: NodeConnection<Repository>,
}

#[derive(Debug, Deserialize)]
struct DefaultBranchData {
    repository: Option<DefaultBranchRepository>,
}

#[derive(Debug, Deserialize)]
struct DefaultBranchRepository {
    #[serde(rename = "defaultBranchRef")]
    default_branch_ref: Option<BranchRef>,
}

/// A resolved branch reference
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BranchRef {
    /// Short branch name, e.g. `main`
    pub name: String,
    /// Ref prefix, e.g. `refs/heads/`
    #[serde(default)]
    pub prefix: Option<String>,
}

impl BranchRef {
    /// Fully qualified ref name
    #[must_use]
    pub fn qualified_name(&self) -> String {
        let prefix = self.prefix.as_deref().unwrap_or("refs/heads/");
        format!("{prefix}{}", self.name)
    }
}

#[derive(Debug, Deserialize)]
struct HistoryData {
    repository: Option<HistoryRepository>,
}

#[derive(Debug, Deserialize)]
struct HistoryRepository {
    #[serde(rename = "ref")]
    git_ref: Option<HistoryRef>,
}

#[derive(Debug, Deserialize)]
struct HistoryRef {
    target: Option<HistoryTarget>,
}

#[derive(Debug, Deserialize)]
struct HistoryTarget {
    history: Option<NodeConnection<CommitNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitNode {
    oid: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
    committed_date: Option<String>,
    author: Option<AuthorNode>,
}

#[derive(Debug, Deserialize)]
struct AuthorNode {
    name: Option<String>,
    date: Option<String>,
}

fn decode<T: DeserializeOwned>(data: Value, what: &str) -> Result<T, ApiError> {
    serde_json::from_value(data)
        .map_err(|e| ApiError::Protocol(format!("unexpected {what} response shape: {e}")))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

impl CommitNode {
    fn into_commit(self, repo: &str) -> Result<Commit, ApiError> {
        let (author_name, author_date) = match self.author {
            Some(author) => (author.name, author.date),
            None => (None, None),
        };

        let committed_at = author_date
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| self.committed_date.as_deref().and_then(parse_timestamp))
            .ok_or_else(|| {
                ApiError::Protocol(format!("commit {} has no usable timestamp", self.oid))
            })?;

        Ok(Commit {
            commit_id: self.oid,
            message: self.message,
            committed_by: author_name.unwrap_or_else(|| "Unknown".to_string()),
            committed_at,
            lines_added: self.additions,
            lines_deleted: self.deletions,
            repo_name: repo.to_string(),
            files_added: 0,
            files_deleted: 0,
            files_updated: 0,
        })
    }
}

// ============================================================================
// Fetchers
// ============================================================================

/// List every repository owned by `user`
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the user does not exist, or the first
/// page error.
pub fn fetch_repositories<C>(
    client: &C,
    user: &str,
    options: &FetchOptions,
) -> Result<Vec<Repository>, ApiError>
where
    C: QueryClient + ?Sized,
{
    let repositories = paginate(options, |cursor| {
        let request = GraphQlRequest::new(REPOSITORIES_QUERY)
            .var("user", user)
            .var("first", options.page_size)
            .var("cursor", cursor);
        let data: RepositoriesData = decode(client.run(&request)?, "repositories")?;
        let user_node = data
            .user
            .ok_or_else(|| ApiError::NotFound(format!("user {user}")))?;
        Ok(user_node.repositories.into_page())
    })?;

    debug!(user, count = repositories.len(), "listed repositories");
    Ok(repositories)
}

/// Resolve the default branch of a repository
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the repository does not exist and
/// [`ApiError::BranchNotFound`] if it has no default branch.
pub fn resolve_default_branch<C>(client: &C, user: &str, repo: &str) -> Result<BranchRef, ApiError>
where
    C: QueryClient + ?Sized,
{
    let request = GraphQlRequest::new(DEFAULT_BRANCH_QUERY)
        .var("user", user)
        .var("repo", repo);
    let data: DefaultBranchData = decode(client.run(&request)?, "default branch")?;

    data.repository
        .ok_or_else(|| ApiError::NotFound(format!("repository {user}/{repo}")))?
        .default_branch_ref
        .ok_or_else(|| ApiError::BranchNotFound {
            repo: repo.to_string(),
        })
}

/// Fetch the full commit history of a repository's default branch
///
/// File counts of the returned commits are zero; see [`crate::enrich`].
///
/// # Errors
///
/// Returns [`ApiError::BranchNotFound`] if the default branch cannot be
/// resolved (or disappears while paging), or the first page error.
pub fn fetch_commit_history<C>(
    client: &C,
    user: &str,
    repo: &str,
    options: &FetchOptions,
) -> Result<Vec<Commit>, ApiError>
where
    C: QueryClient + ?Sized,
{
    let branch = resolve_default_branch(client, user, repo)?;
    let qualified = branch.qualified_name();
    debug!(repo, branch = %qualified, "resolved default branch");

    let nodes = paginate(options, |cursor| {
        let request = GraphQlRequest::new(HISTORY_QUERY)
            .var("user", user)
            .var("repo", repo)
            .var("branch", qualified.as_str())
            .var("first", options.page_size)
            .var("cursor", cursor);
        let data: HistoryData = decode(client.run(&request)?, "history")?;

        let git_ref = data
            .repository
            .ok_or_else(|| ApiError::NotFound(format!("repository {user}/{repo}")))?
            .git_ref
            .ok_or_else(|| ApiError::BranchNotFound {
                repo: repo.to_string(),
            })?;

        let history = git_ref
            .target
            .and_then(|target| target.history)
            .ok_or_else(|| {
                ApiError::Protocol(format!("{qualified} in {repo} does not point at a commit"))
            })?;

        Ok(history.into_page())
    })?;

    nodes
        .into_iter()
        .map(|node| node.into_commit(repo))
        .collect()
}
