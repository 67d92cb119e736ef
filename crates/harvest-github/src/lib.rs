// Copyright (c) 2026 - present Nicholas D. Crosbie
// SPDX-License-Identifier: MIT

//! harvest-github: GitHub commit history fetching for harvest-mcp
//!
//! This library crate lists a user's repositories and the commit history of
//! each repository's default branch through the GraphQL API, and classifies
//! the files touched by each commit through the REST API.

#![warn(missing_docs)]

//! # Example
//!
//! ```no_run
//! use harvest_github::{ClientConfig, FetchOptions, GitHubClient};
//! use harvest_github::{classify_files, fetch_commit_history, fetch_repositories};
//!
//! let client = GitHubClient::new(ClientConfig::github("ghp_token"));
//! let options = FetchOptions::default();
//!
//! for repo in fetch_repositories(&client, "octocat", &options).expect("list repos") {
//!     let commits = fetch_commit_history(&client, "octocat", &repo.name, &options)
//!         .expect("fetch history");
//!     for c in commits {
//!         let counts = classify_files(&client, "octocat", &repo.name, &c.commit_id)
//!             .unwrap_or_default();
//!         println!("{} {} (+{} files)", c.short_id(), c.subject(), counts.added);
//!     }
//! }
//! ```

pub mod client;
pub mod commit;
pub mod enrich;
pub mod error;
pub mod fetch;

pub use client::{ClientConfig, EnrichmentClient, GitHubClient, GraphQlRequest, QueryClient};
pub use commit::{Commit, FileCounts, Repository};
pub use enrich::{EnrichmentEndpoint, classify_files};
pub use error::ApiError;
pub use fetch::{FetchOptions, fetch_commit_history, fetch_repositories};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::{EnrichmentClient, GitHubClient, QueryClient};
    pub use crate::commit::{Commit, FileCounts, Repository};
    pub use crate::error::ApiError;
    pub use crate::fetch::FetchOptions;
}
