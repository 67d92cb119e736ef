// Copyright (c) 2026 - present Nicholas D. Crosbie
// SPDX-License-Identifier: MIT

//! Hosting API clients
//!
//! This module defines the two capability traits the harvester depends on,
//! [`QueryClient`] for the GraphQL endpoint and [`EnrichmentClient`] for the
//! per-commit REST endpoint, together with [`GitHubClient`], the `ureq`
//! backed implementation of both.
//!
//! Both traits are blocking. Async callers run them on
//! `tokio::task::spawn_blocking`.

use std::fmt;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::enrich::EnrichmentEndpoint;
use crate::error::ApiError;

/// Default GraphQL endpoint
pub const DEFAULT_GRAPHQL_ENDPOINT: &str = "https://api.github.com/graphql";

/// User agent sent with every request (required by the GitHub API)
pub const USER_AGENT: &str = concat!("harvest-mcp/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Capability Traits
// ============================================================================

/// A GraphQL query plus its named variables
#[derive(Debug, Clone, PartialEq)]
pub struct GraphQlRequest {
    /// Query document
    pub query: String,
    /// Named variables
    pub variables: Map<String, Value>,
}

impl GraphQlRequest {
    /// Create a request with no variables
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: Map::new(),
        }
    }

    /// Set a named variable
    #[must_use]
    pub fn var(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.variables.insert(name.to_string(), value.into());
        self
    }

    /// Look up a variable (used by fakes in tests)
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Wire body for the POST call
    #[must_use]
    pub fn to_body(&self) -> Value {
        json!({
            "query": self.query,
            "variables": self.variables,
        })
    }
}

/// Executes GraphQL requests against the query endpoint
///
/// Implementations present the bearer credential themselves; callers never
/// see it. The returned value is the `data` member of the response.
pub trait QueryClient: Send + Sync {
    /// Run a query and return its `data` object
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Auth`], [`ApiError::Transport`],
    /// [`ApiError::NotFound`] or [`ApiError::Protocol`].
    fn run(&self, request: &GraphQlRequest) -> Result<Value, ApiError>;
}

/// Fetches per-commit detail documents from the enrichment endpoint
pub trait EnrichmentClient: Send + Sync {
    /// Fetch the raw detail body for one commit
    ///
    /// # Errors
    ///
    /// Any non-200 response is an error for this commit only.
    fn commit_detail(&self, user: &str, repo: &str, commit_id: &str) -> Result<String, ApiError>;
}

// ============================================================================
// Response Mapping
// ============================================================================

/// Map a non-success HTTP status to an error
///
/// `rate_limit_remaining` is the value of the `x-ratelimit-remaining`
/// header, if the response carried one.
#[must_use]
pub fn status_error(status: u16, rate_limit_remaining: Option<&str>, context: &str) -> ApiError {
    match status {
        401 => ApiError::Auth(format!("{context}: credential rejected (HTTP 401)")),
        403 if rate_limit_remaining.map(str::trim) == Some("0") => {
            ApiError::Transport(format!("{context}: rate limit exhausted (HTTP 403)"))
        }
        403 => ApiError::Auth(format!("{context}: access forbidden (HTTP 403)")),
        404 => ApiError::NotFound(format!("{context} (HTTP 404)")),
        429 => ApiError::Transport(format!("{context}: rate limited (HTTP 429)")),
        400..=499 => ApiError::Protocol(format!("{context}: request rejected (HTTP {status})")),
        _ => ApiError::Transport(format!("{context}: HTTP {status}")),
    }
}

/// Extract `data` from a GraphQL response body
///
/// A non-empty `errors` array wins over any partial `data`.
///
/// # Errors
///
/// The first error's `type` decides the variant: `NOT_FOUND` maps to
/// [`ApiError::NotFound`], `FORBIDDEN`/`UNAUTHORIZED` to [`ApiError::Auth`],
/// `RATE_LIMITED` to [`ApiError::Transport`]; anything else, or a missing
/// `data`, is a [`ApiError::Protocol`].
pub fn extract_data(mut body: Value) -> Result<Value, ApiError> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array)
        && !errors.is_empty()
    {
        let messages: Vec<&str> = errors
            .iter()
            .filter_map(|e| e.get("message").and_then(Value::as_str))
            .collect();
        let summary = if messages.is_empty() {
            "unspecified GraphQL error".to_string()
        } else {
            messages.join("; ")
        };
        let kind = errors[0].get("type").and_then(Value::as_str).unwrap_or("");
        return Err(match kind {
            "NOT_FOUND" => ApiError::NotFound(summary),
            "FORBIDDEN" | "UNAUTHORIZED" => ApiError::Auth(summary),
            "RATE_LIMITED" => ApiError::Transport(summary),
            _ => ApiError::Protocol(summary),
        });
    }

    match body.get_mut("data").map(Value::take) {
        Some(data) if data.is_object() => Ok(data),
        _ => Err(ApiError::Protocol(
            "response carried neither data nor errors".to_string(),
        )),
    }
}

// ============================================================================
// GitHub Client
// ============================================================================

/// Connection settings for [`GitHubClient`]
#[derive(Clone)]
pub struct ClientConfig {
    /// Bearer credential
    pub token: String,
    /// GraphQL endpoint URL
    pub graphql_endpoint: String,
    /// Enrichment URL template
    pub enrichment: EnrichmentEndpoint,
    /// Per-request deadline
    pub timeout: Duration,
}

impl ClientConfig {
    /// Settings for api.github.com with the given credential
    #[must_use]
    pub fn github(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            graphql_endpoint: DEFAULT_GRAPHQL_ENDPOINT.to_string(),
            enrichment: EnrichmentEndpoint::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("token", &"<redacted>")
            .field("graphql_endpoint", &self.graphql_endpoint)
            .field("enrichment", &self.enrichment)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Blocking client for the GitHub GraphQL and REST APIs
///
/// The credential is immutable after construction, so one client can be
/// shared across threads behind an `Arc`.
pub struct GitHubClient {
    agent: ureq::Agent,
    config: ClientConfig,
}

impl GitHubClient {
    /// Create a client from connection settings
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build();
        Self { agent, config }
    }

    /// Connection settings (credential redacted in `Debug`)
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.config.token)
    }
}

/// Convert a `ureq` failure into an [`ApiError`]
fn map_ureq_error(err: ureq::Error, context: &str) -> ApiError {
    match err {
        ureq::Error::Status(code, response) => {
            let remaining = response.header("x-ratelimit-remaining").map(str::to_owned);
            status_error(code, remaining.as_deref(), context)
        }
        ureq::Error::Transport(transport) => {
            ApiError::Transport(format!("{context}: {transport}"))
        }
    }
}

impl QueryClient for GitHubClient {
    fn run(&self, request: &GraphQlRequest) -> Result<Value, ApiError> {
        debug!(endpoint = %self.config.graphql_endpoint, "POST graphql");

        let response = self
            .agent
            .post(&self.config.graphql_endpoint)
            .set("Authorization", &self.bearer())
            .set("Accept", "application/json")
            .send_json(request.to_body())
            .map_err(|e| map_ureq_error(e, "graphql query"))?;

        let body: Value = response
            .into_json()
            .map_err(|e| ApiError::Protocol(format!("graphql response is not JSON: {e}")))?;

        extract_data(body)
    }
}

impl EnrichmentClient for GitHubClient {
    fn commit_detail(&self, user: &str, repo: &str, commit_id: &str) -> Result<String, ApiError> {
        let url = self.config.enrichment.url_for(user, repo, commit_id);
        debug!(url = %url, "GET commit detail");

        let context = format!("commit detail {repo}@{commit_id}");
        let response = self
            .agent
            .get(&url)
            .set("Authorization", &self.bearer())
            .set("Accept", "application/vnd.github+json")
            .call()
            .map_err(|e| map_ureq_error(e, &context))?;

        if response.status() != 200 {
            return Err(ApiError::Transport(format!(
                "{context}: unexpected HTTP {}",
                response.status()
            )));
        }

        response
            .into_string()
            .map_err(|e| ApiError::Transport(format!("{context}: reading body failed: {e}")))
    }
}
