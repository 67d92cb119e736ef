//! Tool handlers for the MCP server
//!
//! This module implements `HarvestForUser`: it validates the request,
//! runs the harvester and turns its outcome into a response. The same
//! handler backs both the `harvest_commits` tool and the `harvest`
//! subcommand.

use harvest_github::{EnrichmentClient, QueryClient};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::db::StoreHandle;
use crate::ingest::{HarvestError, HarvestReport, HarvestStatus, Harvester};

// ============================================================================
// Error Types
// ============================================================================

/// Handler errors
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Invalid input - missing or malformed required field
    #[error("Invalid input: {0}. Check the tool's required parameters.")]
    InvalidInput(String),

    /// No tool with this name
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The harvest failed as a whole
    #[error("Harvest failed: {0}")]
    Harvest(#[from] HarvestError),

    /// JSON serialization error
    #[error("Failed to process JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl HandlerError {
    /// Whether the caller sent a bad request (as opposed to a server failure)
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            HandlerError::InvalidInput(_) | HandlerError::UnknownTool(_)
        )
    }
}

// ============================================================================
// Input and Response Types
// ============================================================================

/// Input for the harvest_commits tool
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarvestInput {
    /// Login of the user whose repositories are harvested
    pub user: Option<String>,
    /// Process at most this many repositories
    pub repo_limit: Option<usize>,
    /// Fetch at most this many commits per repository
    pub commit_limit: Option<usize>,
}

/// Response of a successful (possibly partial) harvest
#[derive(Debug, Clone, Serialize)]
pub struct HarvestResponse {
    /// The harvested user
    pub user: String,
    /// Complete or partial
    pub status: HarvestStatus,
    /// Human readable outcome
    pub message: String,
    /// Detailed per-repository report
    pub report: HarvestReport,
}

impl From<HarvestReport> for HarvestResponse {
    fn from(report: HarvestReport) -> Self {
        Self {
            user: report.user.clone(),
            status: report.status,
            message: report.summary(),
            report,
        }
    }
}

// ============================================================================
// Handler Functions
// ============================================================================

/// Parse input from MCP arguments into a typed struct
fn parse_input<T: for<'de> Deserialize<'de>>(
    args: Option<Map<String, Value>>,
) -> Result<T, HandlerError> {
    let value = args
        .map(Value::Object)
        .unwrap_or(Value::Object(serde_json::Map::new()));
    serde_json::from_value(value).map_err(|e| HandlerError::InvalidInput(e.to_string()))
}

/// Check that `user` looks like an account login
///
/// # Errors
///
/// Returns [`HandlerError::InvalidInput`] for a missing, blank or
/// malformed login.
pub fn validate_user(user: Option<&str>) -> Result<&str, HandlerError> {
    let user = user
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| HandlerError::InvalidInput("Missing user parameter".to_string()))?;

    if user.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(HandlerError::InvalidInput(format!(
            "'{user}' is not a valid user login"
        )));
    }
    Ok(user)
}

/// Harvest all commits of `user` into `store`
///
/// Validation happens before any network call.
///
/// # Errors
///
/// Returns [`HandlerError::InvalidInput`] for a bad user and
/// [`HandlerError::Harvest`] if the harvest fails as a whole.
pub async fn harvest_for_user<Q, E, S>(
    harvester: &Harvester<Q, E>,
    store: &mut S,
    user: &str,
    cancel: &CancellationToken,
) -> Result<HarvestResponse, HandlerError>
where
    Q: QueryClient + 'static,
    E: EnrichmentClient + 'static,
    S: StoreHandle + Send,
{
    let input = HarvestInput {
        user: Some(user.to_string()),
        ..HarvestInput::default()
    };
    run_harvest(harvester, store, input, cancel).await
}

/// Handle the harvest_commits tool
///
/// # Errors
///
/// See [`harvest_for_user`].
pub async fn handle_harvest<Q, E, S>(
    harvester: &Harvester<Q, E>,
    store: &mut S,
    args: Option<Map<String, Value>>,
    cancel: &CancellationToken,
) -> Result<HarvestResponse, HandlerError>
where
    Q: QueryClient + 'static,
    E: EnrichmentClient + 'static,
    S: StoreHandle + Send,
{
    let input: HarvestInput = parse_input(args)?;
    run_harvest(harvester, store, input, cancel).await
}

async fn run_harvest<Q, E, S>(
    harvester: &Harvester<Q, E>,
    store: &mut S,
    input: HarvestInput,
    cancel: &CancellationToken,
) -> Result<HarvestResponse, HandlerError>
where
    Q: QueryClient + 'static,
    E: EnrichmentClient + 'static,
    S: StoreHandle + Send,
{
    let user = validate_user(input.user.as_deref())?;

    let mut options = harvester.options().clone();
    if input.repo_limit.is_some() {
        options.repo_limit = input.repo_limit;
    }
    if input.commit_limit.is_some() {
        options.commit_limit = input.commit_limit;
    }

    let report = harvester
        .harvest_with_options(user, store, cancel, &options)
        .await?;
    Ok(HarvestResponse::from(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use similar_asserts::assert_eq;

    /// Helper to convert a JSON Value to a Map for testing
    fn to_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("Expected JSON object"),
        }
    }

    #[test]
    fn test_parse_harvest_input() {
        let args = to_map(json!({"user": "octocat", "repo_limit": 3}));
        let input: HarvestInput = parse_input(Some(args)).expect("should parse");
        assert_eq!(input.user.as_deref(), Some("octocat"));
        assert_eq!(input.repo_limit, Some(3));
        assert_eq!(input.commit_limit, None);
    }

    #[test]
    fn test_parse_harvest_input_defaults() {
        let input: HarvestInput = parse_input(None).expect("should parse");
        assert!(input.user.is_none());
    }

    #[test]
    fn test_parse_harvest_input_wrong_type() {
        let args = to_map(json!({"user": 42}));
        let result: Result<HarvestInput, _> = parse_input(Some(args));
        assert!(matches!(result, Err(HandlerError::InvalidInput(_))));
    }

    #[test]
    fn test_validate_user_missing() {
        for user in [None, Some(""), Some("   ")] {
            let err = validate_user(user).expect_err("should reject");
            assert!(err.is_client_error());
            assert!(err.to_string().contains("Missing user parameter"));
        }
    }

    #[test]
    fn test_validate_user_malformed() {
        for user in ["octo cat", "octo/cat"] {
            assert!(matches!(
                validate_user(Some(user)),
                Err(HandlerError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_validate_user_trims() {
        assert_eq!(validate_user(Some("  octocat ")).expect("valid"), "octocat");
    }

    #[test]
    fn test_harvest_error_is_server_error() {
        let err = HandlerError::from(HarvestError::Cancelled);
        assert!(!err.is_client_error());
    }
}
