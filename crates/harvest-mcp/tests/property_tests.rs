// Copyright (c) 2026 - present Nicholas D. Crosbie
// SPDX-License-Identifier: MIT

//! Property-based tests for harvest-mcp
//!
//! These tests use proptest to verify invariants hold for arbitrary inputs.


use std::sync::Arc;

use proptest::prelude::*;
use serde_json::{Map, Value, json};

use fixtures::{FakeGitHub, harvester, test_database};
use harvest_mcp::db::save_commits;
use harvest_mcp::handlers::validate_user;
use harvest_mcp::server::{HARVEST_TOOL, HarvestServer};
use tokio_util::sync::CancellationToken;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build runtime")
}

/// Arbitrary tool arguments, most of them not a valid request
fn arbitrary_args() -> impl Strategy<Value = Value> {
    let user = prop_oneof![
        Just(Value::Null),
        Just(json!("")),
        Just(json!(" \t ")),
        Just(json!(17)),
        Just(json!(["octocat"])),
        "[a-z/ ]{0,12}".prop_map(Value::String),
    ];
    (user, proptest::option::of(0usize..5)).prop_map(|(user, limit)| {
        let mut args = Map::new();
        args.insert("user".to_string(), user);
        if let Some(limit) = limit {
            args.insert("repo_limit".to_string(), json!(limit));
        }
        Value::Object(args)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever the arguments, a rejected request never reaches the network
    #[test]
    fn prop_rejected_requests_make_no_calls(args in arbitrary_args()) {
        let fake = Arc::new(FakeGitHub::new());
        let server = HarvestServer::new(test_database(), harvester(&fake));
        let Value::Object(map) = args else { unreachable!() };

        let result = runtime().block_on(server.call_tool(HARVEST_TOOL, Some(map)));
        if let Err(err) = result {
            prop_assert!(err.is_client_error());
            prop_assert_eq!(fake.total_calls(), 0);
        }
    }

    /// Any login made of word characters is accepted unchanged
    #[test]
    fn prop_valid_logins_accepted(login in "[A-Za-z0-9][A-Za-z0-9-]{0,38}") {
        prop_assert_eq!(validate_user(Some(&login)).expect("valid"), login.as_str());
    }

    /// Harvesting any number of times stores each commit exactly once
    #[test]
    fn prop_harvest_is_idempotent(
        commit_count in 0usize..12,
        runs in 1usize..4,
        page_size in 1u32..5,
    ) {
        let oids: Vec<String> = (0..commit_count).map(|i| format!("{i:040x}")).collect();
        let oid_refs: Vec<&str> = oids.iter().map(String::as_str).collect();
        let fake = Arc::new(FakeGitHub::new().repo("r", &oid_refs));
        let harvester = harvester(&fake).with_options(
            harvest_mcp::ingest::HarvestOptions::default().with_page_size(page_size),
        );
        let mut db = test_database();
        let rt = runtime();

        for _ in 0..runs {
            rt.block_on(harvester.harvest("octocat", &mut db, &CancellationToken::new()))
                .expect("harvest");
        }
        prop_assert_eq!(db.count("commits").expect("count"), commit_count as i64);
    }

    /// Saving a batch with duplicates inserts each id once
    #[test]
    fn prop_save_counts_add_up(ids in proptest::collection::vec(0u8..6, 0..20)) {
        let mut db = test_database();
        let commits: Vec<_> = ids
            .iter()
            .map(|id| harvest_github::Commit {
                commit_id: format!("c{id}"),
                message: "m".to_string(),
                committed_by: "a".to_string(),
                committed_at: chrono::Utc::now(),
                lines_added: 0,
                lines_deleted: 0,
                repo_name: "r".to_string(),
                files_added: 0,
                files_deleted: 0,
                files_updated: 0,
            })
            .collect();

        let stats = save_commits(&mut db, &commits).expect("save");
        let distinct = ids.iter().collect::<std::collections::HashSet<_>>().len();
        prop_assert_eq!(stats.inserted, distinct);
        prop_assert_eq!(stats.inserted + stats.skipped, ids.len());
    }
}
