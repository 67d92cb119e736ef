// Copyright (c) 2026 - present Nicholas D. Crosbie
// SPDX-License-Identifier: MIT

//! Error types for harvest-github

use thiserror::Error;

/// Errors that can occur while talking to the hosting API
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Bad or expired credential
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Network, connectivity, timeout or rate-limit failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response did not have the expected shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Repository has no resolvable default branch
    #[error("Default branch not found for repository: {repo}")]
    BranchNotFound {
        /// The repository whose default branch could not be resolved
        repo: String,
    },

    /// Payload body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// The caller stopped the operation between requests
    #[error("Operation cancelled")]
    Cancelled,
}

impl ApiError {
    /// Whether a caller could reasonably retry the failed call later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}
