//! Configuration for the harvest-mcp server
//!
//! This module provides the command line and environment configuration,
//! the optional JSON secrets file, and the resolution of both into the
//! [`Settings`] the rest of the binary runs on.
//!
//! Precedence is command line / environment first, then the secrets file,
//! then built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use harvest_github::client::DEFAULT_GRAPHQL_ENDPOINT;
use harvest_github::enrich::DEFAULT_ENRICHMENT_TEMPLATE;
use harvest_github::fetch::MAX_PAGE_SIZE;
use harvest_github::{ClientConfig, EnrichmentEndpoint};
use serde::Deserialize;
use tracing::warn;

use crate::db::MEMORY_URI;
use crate::ingest::{DEFAULT_MAX_CONCURRENCY, HarvestOptions};

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Harvest MCP Server - GitHub commit history for your assistant
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "harvest-mcp")]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Subcommand to run (defaults to MCP server mode)
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Store URI: a SQLite file path or `:memory:`
    ///
    /// If the file doesn't exist, it will be created and initialized.
    /// Defaults to ~/.local/share/harvest/harvest.db (or platform equivalent).
    #[arg(short, long, env = "HARVEST_DATABASE")]
    pub database: Option<String>,

    /// GitHub bearer token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// JSON file with `github_token`, `store_uri` and `enrichment_endpoint`
    #[arg(long, env = "HARVEST_SECRETS_FILE")]
    pub secrets_file: Option<PathBuf>,

    /// GraphQL endpoint URL
    #[arg(long, env = "HARVEST_GRAPHQL_ENDPOINT")]
    pub graphql_endpoint: Option<String>,

    /// Per-commit detail URL template ({user}, {repo}, {commit_id})
    #[arg(long, env = "HARVEST_ENRICHMENT_ENDPOINT")]
    pub enrichment_endpoint: Option<String>,

    /// Per-request timeout in seconds [default: 30]
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Concurrent enrichment lookups per repository [default: 4]
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Nodes per GraphQL page, at most 100 [default: 100]
    #[arg(long)]
    pub page_size: Option<u32>,

    /// Enable verbose logging (debug level)
    ///
    /// Logs are written to stderr to avoid interfering with MCP stdio
    /// transport.
    #[arg(short, long, default_value = "false")]
    pub verbose: bool,

    /// Quiet mode - suppress info-level logs
    ///
    /// Only errors and warnings will be logged.
    #[arg(short, long, default_value = "false")]
    pub quiet: bool,

    /// Skip database initialization/migration check
    ///
    /// Useful when connecting to an externally managed database.
    #[arg(long, default_value = "false")]
    pub skip_init: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the MCP server over stdio (the default)
    Serve,

    /// Harvest one user's commits and print the report as JSON
    ///
    /// Example:
    ///   GITHUB_TOKEN=ghp_... harvest-mcp harvest --user octocat
    Harvest {
        /// GitHub login to harvest
        #[arg(short, long)]
        user: String,

        /// Process at most this many repositories
        #[arg(long)]
        repo_limit: Option<usize>,

        /// Fetch at most this many commits per repository
        #[arg(long)]
        commit_limit: Option<usize>,
    },
}

/// Contents of the secrets file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Secrets {
    /// GitHub bearer token
    pub github_token: Option<String>,
    /// Store URI
    pub store_uri: Option<String>,
    /// Per-commit detail URL template
    pub enrichment_endpoint: Option<String>,
}

impl Secrets {
    /// Read and parse a secrets file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::SecretsUnreadable(path.to_path_buf(), e))?;
        serde_json::from_str(&content)
            .map_err(|e| ConfigError::SecretsMalformed(path.to_path_buf(), e))
    }
}

/// Fully resolved runtime settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Client connection settings (credential included)
    pub client: ClientConfig,
    /// Store URI
    pub database_uri: String,
    /// Default harvest options
    pub harvest: HarvestOptions,
}

impl Config {
    /// Resolve the configuration into runtime settings
    ///
    /// # Errors
    ///
    /// Returns an error if the secrets file is unusable, no credential is
    /// configured, or a value is out of range.
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        let secrets = match self.secrets_file {
            Some(ref path) => Secrets::load(path)?,
            None => Secrets::default(),
        };

        let token = self
            .token
            .clone()
            .or(secrets.github_token)
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingCredential)?;

        let enrichment = EnrichmentEndpoint::new(
            self.enrichment_endpoint
                .clone()
                .or(secrets.enrichment_endpoint)
                .unwrap_or_else(|| DEFAULT_ENRICHMENT_TEMPLATE.to_string()),
        );
        let graphql_endpoint = self
            .graphql_endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_GRAPHQL_ENDPOINT.to_string());
        for endpoint in [graphql_endpoint.as_str(), enrichment.template()] {
            if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
                return Err(ConfigError::InvalidEndpoint(endpoint.to_string()));
            }
        }
        if !enrichment.is_per_commit() {
            warn!(
                template = enrichment.template(),
                "enrichment endpoint has no {{commit_id}} placeholder"
            );
        }

        let timeout_secs = self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::OutOfRange("timeout-secs", "must be positive"));
        }
        let max_concurrency = self.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY);
        if max_concurrency == 0 {
            return Err(ConfigError::OutOfRange("max-concurrency", "must be positive"));
        }
        let page_size = self.page_size.unwrap_or(MAX_PAGE_SIZE);
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::OutOfRange("page-size", "must be between 1 and 100"));
        }

        let database_uri = self
            .database
            .clone()
            .or(secrets.store_uri)
            .unwrap_or_else(|| default_database_path().to_string_lossy().into_owned());

        Ok(Settings {
            client: ClientConfig {
                token,
                graphql_endpoint,
                enrichment,
                timeout: Duration::from_secs(timeout_secs),
            },
            database_uri,
            harvest: HarvestOptions::default()
                .with_page_size(page_size)
                .with_max_concurrency(max_concurrency),
        })
    }

    /// Get the log level based on verbose/quiet flags
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::WARN
        } else {
            tracing::Level::INFO
        }
    }
}

impl Settings {
    /// Validate the settings against the filesystem
    ///
    /// # Errors
    ///
    /// Returns an error if the database parent directory cannot be created.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = self.database_path() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        ConfigError::DatabaseDirectoryCreateFailed(parent.to_path_buf(), e)
                    })?;
                }
            }
        }
        Ok(())
    }

    /// The on-disk database file, or `None` for an in-memory store
    #[must_use]
    pub fn database_path(&self) -> Option<PathBuf> {
        let target = self
            .database_uri
            .strip_prefix("sqlite://")
            .unwrap_or(&self.database_uri);
        (target != MEMORY_URI).then(|| PathBuf::from(target))
    }
}

/// Default database location
///
/// Default location is platform-specific:
/// - macOS: ~/Library/Application Support/harvest/harvest.db
/// - Linux: ~/.local/share/harvest/harvest.db
/// - Windows: %LOCALAPPDATA%\harvest\harvest.db
#[must_use]
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("harvest")
        .join("harvest.db")
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No GitHub token configured
    #[error("No GitHub token configured: pass --token, set GITHUB_TOKEN or use a secrets file")]
    MissingCredential,

    /// Secrets file could not be read
    #[error("Failed to read secrets file {0}: {1}")]
    SecretsUnreadable(PathBuf, std::io::Error),

    /// Secrets file is not the expected JSON document
    #[error("Malformed secrets file {0}: {1}")]
    SecretsMalformed(PathBuf, serde_json::Error),

    /// Endpoint is not an HTTP(S) URL
    #[error("Invalid endpoint URL: {0}")]
    InvalidEndpoint(String),

    /// Numeric option out of range
    #[error("Invalid --{0}: {1}")]
    OutOfRange(&'static str, &'static str),

    /// Failed to create database directory
    #[error("Failed to create database directory {0}: {1}")]
    DatabaseDirectoryCreateFailed(PathBuf, std::io::Error),
}
