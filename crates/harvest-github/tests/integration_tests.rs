//! Integration tests for harvest-github
//!
//! These tests point a real `GitHubClient` at a one-shot local HTTP server to
//! verify the wire format and the HTTP status to error mapping.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread::JoinHandle;
use std::time::Duration;

use harvest_github::{
    ApiError, ClientConfig, EnrichmentEndpoint, FetchOptions, GitHubClient, GraphQlRequest,
    QueryClient, classify_files, fetch_repositories,
};
use serde_json::{Value, json};
use similar_asserts::assert_eq;

/// A request as seen by the local server
struct Captured {
    request_line: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl Captured {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status, extra headers and body of one canned response
type Canned = (u16, Vec<(&'static str, &'static str)>, String);

/// Serve one canned response per accepted connection, in order
fn serve(responses: Vec<Canned>) -> (String, JoinHandle<Vec<Captured>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let base = format!("http://{}", listener.local_addr().expect("addr"));

    let handle = std::thread::spawn(move || {
        let mut captured = Vec::new();
        for (status, headers, body) in responses {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

            let mut request_line = String::new();
            reader.read_line(&mut request_line).expect("request line");
            let mut request_headers = Vec::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("header line");
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((k, v)) = line.split_once(':') {
                    request_headers.push((k.trim().to_string(), v.trim().to_string()));
                }
            }
            let length = request_headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.parse::<usize>().ok())
                .unwrap_or(0);
            let mut request_body = vec![0; length];
            reader.read_exact(&mut request_body).expect("body");

            let mut response = format!(
                "HTTP/1.1 {status} Status\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n",
                body.len()
            );
            for (k, v) in headers {
                response.push_str(&format!("{k}: {v}\r\n"));
            }
            response.push_str("\r\n");
            response.push_str(&body);
            let mut stream = stream;
            stream.write_all(response.as_bytes()).expect("write");
            stream.flush().expect("flush");

            captured.push(Captured {
                request_line: request_line.trim_end().to_string(),
                headers: request_headers,
                body: String::from_utf8_lossy(&request_body).into_owned(),
            });
        }
        captured
    });

    (base, handle)
}

fn client_for(base: &str) -> GitHubClient {
    GitHubClient::new(ClientConfig {
        token: "ghp_integration".to_string(),
        graphql_endpoint: format!("{base}/graphql"),
        enrichment: EnrichmentEndpoint::new(format!(
            "{base}/repos/{{user}}/{{repo}}/commits/{{commit_id}}"
        )),
        timeout: Duration::from_secs(5),
    })
}

fn ok(body: Value) -> Canned {
    (200, Vec::new(), body.to_string())
}

#[test]
fn test_graphql_request_carries_credential_and_variables() {
    let (base, server) = serve(vec![ok(
        json!({ "data": { "viewer": { "login": "octocat" } } }),
    )]);
    let client = client_for(&base);

    let request = GraphQlRequest::new("query { viewer { login } }").var("first", 5);
    let data = client.run(&request).expect("query should succeed");
    assert_eq!(data, json!({ "viewer": { "login": "octocat" } }));

    let captured = server.join().expect("server thread");
    assert_eq!(captured[0].request_line, "POST /graphql HTTP/1.1");
    assert_eq!(captured[0].header("authorization"), Some("Bearer ghp_integration"));
    let body: Value = serde_json::from_str(&captured[0].body).expect("JSON body");
    assert_eq!(body["variables"]["first"], json!(5));
    assert_eq!(body["query"], json!("query { viewer { login } }"));
}

#[test]
fn test_graphql_errors_array_is_protocol_error() {
    let (base, server) = serve(vec![ok(json!({
        "data": null,
        "errors": [{ "message": "Field 'bogus' doesn't exist" }]
    }))]);

    let err = client_for(&base)
        .run(&GraphQlRequest::new("query { bogus }"))
        .expect_err("should fail");
    assert!(matches!(err, ApiError::Protocol(ref m) if m.contains("bogus")));
    server.join().expect("server thread");
}

fn kind(err: &ApiError) -> &'static str {
    match err {
        ApiError::Auth(_) => "auth",
        ApiError::Transport(_) => "transport",
        ApiError::Protocol(_) => "protocol",
        ApiError::NotFound(_) => "not_found",
        ApiError::BranchNotFound { .. } => "branch_not_found",
        ApiError::Decode(_) => "decode",
        ApiError::Cancelled => "cancelled",
    }
}

#[test]
fn test_http_status_mapping() {
    let cases: Vec<(u16, Vec<(&'static str, &'static str)>, &str)> = vec![
        (401, Vec::new(), "auth"),
        (403, vec![("x-ratelimit-remaining", "0")], "transport"),
        (403, vec![("x-ratelimit-remaining", "4999")], "auth"),
        (422, Vec::new(), "protocol"),
        (429, Vec::new(), "transport"),
        (502, Vec::new(), "transport"),
    ];

    for (status, headers, expected) in cases {
        let (base, server) = serve(vec![(status, headers, "{}".to_string())]);
        let err = client_for(&base)
            .run(&GraphQlRequest::new("query { viewer { login } }"))
            .expect_err("should fail");
        assert_eq!(kind(&err), expected, "HTTP {status} mapped to {err:?}");
        server.join().expect("server thread");
    }
}

#[test]
fn test_connection_refused_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let base = format!("http://{}", listener.local_addr().expect("addr"));
    drop(listener);

    let err = client_for(&base)
        .run(&GraphQlRequest::new("query { viewer { login } }"))
        .expect_err("nothing listens");
    assert!(matches!(err, ApiError::Transport(_)));
    assert!(err.is_retryable());
}

#[test]
fn test_classify_files_over_http() {
    let detail = json!({
        "sha": "abc123",
        "files": [
            { "filename": "a.rs", "status": "added" },
            { "filename": "b.rs", "status": "modified" },
            { "filename": "c.rs", "status": "modified" },
            { "filename": "d.rs", "status": "renamed" }
        ]
    });
    let (base, server) = serve(vec![ok(detail)]);

    let counts =
        classify_files(&client_for(&base), "octocat", "hello", "abc123").expect("classify");
    assert_eq!((counts.added, counts.deleted, counts.updated), (1, 0, 2));

    let captured = server.join().expect("server thread");
    assert_eq!(
        captured[0].request_line,
        "GET /repos/octocat/hello/commits/abc123 HTTP/1.1"
    );
    assert_eq!(captured[0].header("authorization"), Some("Bearer ghp_integration"));
}

#[test]
fn test_classify_files_not_found() {
    let (base, server) = serve(vec![(
        404,
        Vec::new(),
        r#"{"message":"No commit found"}"#.to_string(),
    )]);

    let err = classify_files(&client_for(&base), "octocat", "hello", "missing")
        .expect_err("should fail");
    assert!(matches!(err, ApiError::NotFound(_)));
    server.join().expect("server thread");
}

#[test]
fn test_fetch_repositories_over_http() {
    let page = |names: &[&str], next: Option<&str>| {
        let nodes: Vec<Value> = names.iter().map(|n| json!({ "name": n })).collect();
        ok(json!({
            "data": {
                "user": {
                    "repositories": {
                        "pageInfo": { "hasNextPage": next.is_some(), "endCursor": next },
                        "nodes": nodes
                    }
                }
            }
        }))
    };
    let (base, server) = serve(vec![page(&["one", "two"], Some("c2")), page(&["three"], None)]);

    let repos = fetch_repositories(
        &client_for(&base),
        "octocat",
        &FetchOptions::default().with_page_size(2),
    )
    .expect("list");
    let names: Vec<&str> = repos.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["one", "two", "three"]);

    let captured = server.join().expect("server thread");
    let second: Value = serde_json::from_str(&captured[1].body).expect("JSON body");
    assert_eq!(second["variables"]["cursor"], json!("c2"));
    assert_eq!(second["variables"]["user"], json!("octocat"));
}
