// Copyright (c) 2026 - present Nicholas D. Crosbie
// SPDX-License-Identifier: MIT

//! Commit harvesting
//!
//! This module drives a full harvest for one user: list the user's
//! repositories, fetch the default-branch history of each, classify the files
//! of every commit, and persist the result into the store.
//!
//! A failing repository never stops the others, and a failing enrichment
//! lookup never drops its commit. Only a failed repository listing, a store
//! that fails its connectivity check, or cancellation fail the whole run.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use harvest_github::{ClientConfig, GitHubClient};
//! use harvest_mcp::db::Database;
//! use harvest_mcp::ingest::Harvester;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut db = Database::in_memory()?;
//! db.initialize()?;
//!
//! let client = Arc::new(GitHubClient::new(ClientConfig::github("ghp_token")));
//! let harvester = Harvester::new(Arc::clone(&client), client);
//!
//! let report = harvester
//!     .harvest("octocat", &mut db, &CancellationToken::new())
//!     .await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use harvest_github::{
    ApiError, Commit, EnrichmentClient, FetchOptions, FileCounts, QueryClient, Repository,
    classify_files, fetch_commit_history, fetch_repositories,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::{DbError, SaveStats, StoreHandle, save_commits};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that fail a whole harvest invocation
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The repository listing failed; nothing was harvested
    #[error("Failed to list repositories: {0}")]
    Listing(ApiError),

    /// The credential was rejected while harvesting a repository
    #[error("Credential rejected while harvesting {repo}: {source}")]
    Auth {
        /// Repository being harvested when the credential was rejected
        repo: String,
        /// The authentication failure
        source: ApiError,
    },

    /// The store is unreachable
    #[error("Store error: {0}")]
    Store(#[from] DbError),

    /// The caller cancelled the invocation
    #[error("Harvest cancelled")]
    Cancelled,

    /// A worker task panicked or was aborted
    #[error("Worker task failed: {0}")]
    Join(String),
}

impl HarvestError {
    /// Whether the failure was caused by the caller
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, HarvestError::Cancelled)
    }
}

/// Failure scoped to a single repository
#[derive(Debug, Error)]
enum RepoError {
    #[error(transparent)]
    Fetch(ApiError),

    #[error(transparent)]
    Auth(ApiError),

    #[error(transparent)]
    Store(DbError),

    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("cancelled")]
    Cancelled,
}

impl RepoError {
    fn is_retryable(&self) -> bool {
        match self {
            RepoError::Fetch(err) => err.is_retryable(),
            RepoError::Store(_) => true,
            RepoError::Auth(_) | RepoError::Worker(_) | RepoError::Cancelled => false,
        }
    }
}

impl From<ApiError> for RepoError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Cancelled => RepoError::Cancelled,
            err @ ApiError::Auth(_) => RepoError::Auth(err),
            other => RepoError::Fetch(other),
        }
    }
}

// ============================================================================
// Progress Reporting
// ============================================================================

/// Stages of a harvest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestPhase {
    /// Checking the store
    Start,
    /// Listing the user's repositories
    ListingRepos,
    /// Paging through one repository's history
    FetchingCommits,
    /// Classifying the files of each commit
    EnrichingCommits,
    /// Writing commits to the store
    Persisting,
    /// Finished
    Done,
}

/// Progress callback signature
pub type ProgressCallback = Box<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Progress event during a harvest
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A new phase started
    Phase {
        /// The phase entered
        phase: HarvestPhase,
        /// Repository the phase applies to, if any
        repo: Option<String>,
    },
    /// A repository was processed, successfully or not
    Repository(RepoOutcome),
    /// Non-fatal problem
    Warning {
        /// Repository where the problem occurred
        repo: String,
        /// Description of the problem
        message: String,
    },
    /// The harvest completed
    Completed {
        /// Totals over all repositories
        totals: HarvestTotals,
    },
}

// ============================================================================
// Options and Report
// ============================================================================

/// Default bound on concurrent enrichment lookups per repository
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Options for a harvest
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    /// Nodes per GraphQL page (clamped to 1..=100)
    pub page_size: u32,
    /// Concurrent enrichment lookups per repository (at least 1)
    pub max_concurrency: usize,
    /// Process at most this many repositories (None = all)
    pub repo_limit: Option<usize>,
    /// Fetch at most this many commits per repository (None = all)
    pub commit_limit: Option<usize>,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            page_size: harvest_github::fetch::MAX_PAGE_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            repo_limit: None,
            commit_limit: None,
        }
    }
}

impl HarvestOptions {
    /// Set the GraphQL page size
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Bound concurrent enrichment lookups
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Limit the number of repositories processed
    #[must_use]
    pub fn with_repo_limit(mut self, limit: Option<usize>) -> Self {
        self.repo_limit = limit;
        self
    }

    /// Limit the number of commits fetched per repository
    #[must_use]
    pub fn with_commit_limit(mut self, limit: Option<usize>) -> Self {
        self.commit_limit = limit;
        self
    }

    fn fetch_options(&self, limit: Option<usize>, cancel: &CancellationToken) -> FetchOptions {
        let token = cancel.clone();
        FetchOptions::default()
            .with_page_size(self.page_size)
            .with_limit(limit)
            .with_interrupt(Arc::new(move || token.is_cancelled()))
    }
}

/// Result of processing one repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepoOutcome {
    /// Repository name
    pub name: String,
    /// Commits returned by the history fetch
    pub commits_fetched: usize,
    /// Commits newly written to the store
    pub commits_inserted: usize,
    /// Commits already present in the store
    pub commits_skipped: usize,
    /// Commits persisted with zero file counts because enrichment failed
    pub enrichment_failures: usize,
    /// Why the repository failed, if it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RepoOutcome {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Whether the repository was harvested without error
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Whether every repository was harvested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HarvestStatus {
    /// Every repository succeeded
    Complete,
    /// At least one repository failed
    Partial,
}

/// Totals over all repositories of a harvest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HarvestTotals {
    /// Repositories processed
    pub repositories: usize,
    /// Repositories that failed
    pub failed_repositories: usize,
    /// Commits fetched
    pub commits_fetched: usize,
    /// Commits newly inserted
    pub commits_inserted: usize,
    /// Commits already stored
    pub commits_skipped: usize,
    /// Commits stored without file counts
    pub enrichment_failures: usize,
}

impl HarvestTotals {
    fn add(&mut self, outcome: &RepoOutcome) {
        self.repositories += 1;
        if !outcome.succeeded() {
            self.failed_repositories += 1;
        }
        self.commits_fetched += outcome.commits_fetched;
        self.commits_inserted += outcome.commits_inserted;
        self.commits_skipped += outcome.commits_skipped;
        self.enrichment_failures += outcome.enrichment_failures;
    }
}

/// Outcome of a harvest invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestReport {
    /// The harvested user
    pub user: String,
    /// Complete or partial
    pub status: HarvestStatus,
    /// Per-repository outcomes, in listing order
    pub repositories: Vec<RepoOutcome>,
    /// Totals over all repositories
    pub totals: HarvestTotals,
}

impl HarvestReport {
    fn from_outcomes(user: &str, repositories: Vec<RepoOutcome>) -> Self {
        let mut totals = HarvestTotals::default();
        for outcome in &repositories {
            totals.add(outcome);
        }
        let status = if totals.failed_repositories == 0 {
            HarvestStatus::Complete
        } else {
            HarvestStatus::Partial
        };
        Self {
            user: user.to_string(),
            status,
            repositories,
            totals,
        }
    }

    /// Names of the repositories that failed
    pub fn failed_repositories(&self) -> impl Iterator<Item = &str> {
        self.repositories
            .iter()
            .filter(|r| !r.succeeded())
            .map(|r| r.name.as_str())
    }

    /// One-line human readable summary
    #[must_use]
    pub fn summary(&self) -> String {
        match self.status {
            HarvestStatus::Complete => format!(
                "Commits fetched and stored for user {} successfully ({} new, {} already stored, {} repositories)",
                self.user,
                self.totals.commits_inserted,
                self.totals.commits_skipped,
                self.totals.repositories
            ),
            HarvestStatus::Partial => format!(
                "Commits harvested for user {} with failures: {} of {} repositories failed ({})",
                self.user,
                self.totals.failed_repositories,
                self.totals.repositories,
                self.failed_repositories().collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

// ============================================================================
// Harvester
// ============================================================================

/// Drives the harvest of one user's commits into a store
pub struct Harvester<Q, E> {
    query: Arc<Q>,
    enrichment: Arc<E>,
    options: HarvestOptions,
    progress: Option<ProgressCallback>,
}

impl<Q, E> Harvester<Q, E>
where
    Q: QueryClient + 'static,
    E: EnrichmentClient + 'static,
{
    /// Create a harvester over the given capabilities
    #[must_use]
    pub fn new(query: Arc<Q>, enrichment: Arc<E>) -> Self {
        Self {
            query,
            enrichment,
            options: HarvestOptions::default(),
            progress: None,
        }
    }

    /// Use the given default options
    #[must_use]
    pub fn with_options(mut self, options: HarvestOptions) -> Self {
        self.options = options;
        self
    }

    /// Set a progress callback
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Default options of this harvester
    #[must_use]
    pub fn options(&self) -> &HarvestOptions {
        &self.options
    }

    fn report(&self, event: ProgressEvent) {
        if let Some(ref callback) = self.progress {
            callback(&event);
        }
    }

    fn phase(&self, phase: HarvestPhase, repo: Option<&str>) {
        debug!(?phase, repo, "harvest phase");
        self.report(ProgressEvent::Phase {
            phase,
            repo: repo.map(str::to_string),
        });
    }

    /// Harvest every repository of `user` into `store`
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Store`] if the store fails its connectivity
    /// check, [`HarvestError::Listing`] if the repositories cannot be listed,
    /// [`HarvestError::Auth`] if the credential is rejected mid-run, and
    /// [`HarvestError::Cancelled`] if `cancel` fires. Repository and
    /// commit level failures are reported in the [`HarvestReport`] instead.
    pub async fn harvest<S>(
        &self,
        user: &str,
        store: &mut S,
        cancel: &CancellationToken,
    ) -> Result<HarvestReport, HarvestError>
    where
        S: StoreHandle + Send,
    {
        let options = self.options.clone();
        self.harvest_with_options(user, store, cancel, &options)
            .await
    }

    /// Harvest with explicit options
    ///
    /// # Errors
    ///
    /// See [`Harvester::harvest`].
    pub async fn harvest_with_options<S>(
        &self,
        user: &str,
        store: &mut S,
        cancel: &CancellationToken,
        options: &HarvestOptions,
    ) -> Result<HarvestReport, HarvestError>
    where
        S: StoreHandle + Send,
    {
        self.phase(HarvestPhase::Start, None);
        store.ping()?;
        if cancel.is_cancelled() {
            return Err(HarvestError::Cancelled);
        }

        self.phase(HarvestPhase::ListingRepos, None);
        let repositories = self.list_repositories(user, cancel, options).await?;
        info!(user, count = repositories.len(), "harvesting repositories");

        let mut outcomes = Vec::with_capacity(repositories.len());
        for repo in &repositories {
            if cancel.is_cancelled() {
                return Err(HarvestError::Cancelled);
            }

            let mut outcome = RepoOutcome::new(&repo.name);
            match self
                .harvest_repository(user, repo, store, cancel, options, &mut outcome)
                .await
            {
                Ok(()) => {
                    info!(
                        repo = %repo.name,
                        fetched = outcome.commits_fetched,
                        inserted = outcome.commits_inserted,
                        skipped = outcome.commits_skipped,
                        "harvested repository"
                    );
                }
                Err(RepoError::Cancelled) => return Err(HarvestError::Cancelled),
                Err(RepoError::Auth(source)) => {
                    warn!(repo = %repo.name, error = %source, "credential rejected, stopping harvest");
                    return Err(HarvestError::Auth {
                        repo: repo.name.clone(),
                        source,
                    });
                }
                Err(err) => {
                    warn!(
                        repo = %repo.name,
                        error = %err,
                        retryable = err.is_retryable(),
                        "repository harvest failed"
                    );
                    self.report(ProgressEvent::Warning {
                        repo: repo.name.clone(),
                        message: err.to_string(),
                    });
                    outcome.error = Some(err.to_string());
                }
            }
            self.report(ProgressEvent::Repository(outcome.clone()));
            outcomes.push(outcome);
        }

        let report = HarvestReport::from_outcomes(user, outcomes);
        self.phase(HarvestPhase::Done, None);
        self.report(ProgressEvent::Completed {
            totals: report.totals,
        });
        info!(user, status = ?report.status, "{}", report.summary());
        Ok(report)
    }

    async fn list_repositories(
        &self,
        user: &str,
        cancel: &CancellationToken,
        options: &HarvestOptions,
    ) -> Result<Vec<Repository>, HarvestError> {
        let client = Arc::clone(&self.query);
        let owner = user.to_string();
        let fetch = options.fetch_options(options.repo_limit, cancel);

        let listed = run_blocking(cancel, move || {
            fetch_repositories(client.as_ref(), &owner, &fetch)
        })
        .await;

        match listed {
            Ok(Ok(repositories)) => Ok(repositories),
            Ok(Err(ApiError::Cancelled)) | Err(RepoError::Cancelled) => {
                Err(HarvestError::Cancelled)
            }
            Ok(Err(err)) => {
                warn!(user, error = %err, "repository listing failed");
                Err(HarvestError::Listing(err))
            }
            Err(err) => Err(HarvestError::Join(err.to_string())),
        }
    }

    async fn harvest_repository<S>(
        &self,
        user: &str,
        repo: &Repository,
        store: &mut S,
        cancel: &CancellationToken,
        options: &HarvestOptions,
        outcome: &mut RepoOutcome,
    ) -> Result<(), RepoError>
    where
        S: StoreHandle + Send,
    {
        self.phase(HarvestPhase::FetchingCommits, Some(&repo.name));
        let client = Arc::clone(&self.query);
        let (owner, name) = (user.to_string(), repo.name.clone());
        let fetch = options.fetch_options(options.commit_limit, cancel);
        let commits = run_blocking(cancel, move || {
            fetch_commit_history(client.as_ref(), &owner, &name, &fetch)
        })
        .await??;
        outcome.commits_fetched = commits.len();

        self.phase(HarvestPhase::EnrichingCommits, Some(&repo.name));
        let (commits, failures) = self
            .enrich(user, &repo.name, commits, cancel, options.max_concurrency)
            .await?;
        outcome.enrichment_failures = failures;
        if failures > 0 {
            self.report(ProgressEvent::Warning {
                repo: repo.name.clone(),
                message: format!("{failures} commits stored without file counts"),
            });
        }

        if cancel.is_cancelled() {
            return Err(RepoError::Cancelled);
        }
        self.phase(HarvestPhase::Persisting, Some(&repo.name));
        let SaveStats { inserted, skipped } =
            save_commits(store, &commits).map_err(RepoError::Store)?;
        outcome.commits_inserted = inserted;
        outcome.commits_skipped = skipped;
        Ok(())
    }

    /// Classify the files of every commit, at most `max_concurrency` at once
    ///
    /// Returns the commits in their original order and the number of failed
    /// lookups. A failed lookup leaves the commit's counts at zero.
    async fn enrich(
        &self,
        user: &str,
        repo: &str,
        commits: Vec<Commit>,
        cancel: &CancellationToken,
        max_concurrency: usize,
    ) -> Result<(Vec<Commit>, usize), RepoError> {
        let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, commit) in commits.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RepoError::Cancelled),
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(|e| RepoError::Worker(e.to_string()))?
                }
            };

            let client = Arc::clone(&self.enrichment);
            let (owner, name, id) = (user.to_string(), repo.to_string(), commit.commit_id.clone());
            tasks.spawn_blocking(move || {
                let _permit = permit;
                (index, classify_files(client.as_ref(), &owner, &name, &id))
            });
        }

        let mut counts: Vec<Option<FileCounts>> = vec![None; commits.len()];
        loop {
            let joined = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(RepoError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else { break };

            match joined {
                Ok((index, Ok(file_counts))) => counts[index] = Some(file_counts),
                Ok((index, Err(err))) => {
                    warn!(
                        repo,
                        commit = %commits[index].short_id(),
                        error = %err,
                        "file classification failed, storing zero counts"
                    );
                }
                Err(err) => warn!(repo, error = %err, "enrichment task failed"),
            }
        }

        let failures = counts.iter().filter(|c| c.is_none()).count();
        let enriched = commits
            .into_iter()
            .zip(counts)
            .map(|(commit, file_counts)| commit.with_file_counts(file_counts.unwrap_or_default()))
            .collect();
        Ok((enriched, failures))
    }
}

/// Run a blocking call off the async runtime, abandoning it on cancellation
async fn run_blocking<T, F>(cancel: &CancellationToken, task: F) -> Result<T, RepoError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(task);
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(RepoError::Cancelled),
        joined = handle => joined.map_err(|e| RepoError::Worker(e.to_string())),
    }
}
