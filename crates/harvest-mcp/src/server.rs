//! MCP server implementation for harvest-mcp
//!
//! This module provides the MCP server that exposes commit harvesting to
//! LLM clients through the `harvest_commits` tool.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use harvest_github::{EnrichmentClient, QueryClient};
use rust_mcp_sdk::McpServer;
use rust_mcp_sdk::error::SdkResult;
use rust_mcp_sdk::mcp_server::{McpServerHandler, ServerHandler, ToMcpServerHandler};
use rust_mcp_sdk::schema::schema_utils::{
    CallToolError, ClientJsonrpcNotification, ClientJsonrpcRequest, ResultFromServer,
};
use rust_mcp_sdk::schema::{
    CallToolRequestParams, CallToolResult, CancelledNotificationParams, ListToolsResult,
    PaginatedRequestParams, RequestId, RpcError, TextContent, Tool, ToolInputSchema,
};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::db::Database;
use crate::handlers::{self, HandlerError};
use crate::ingest::{HarvestError, Harvester};

/// Name of the harvest tool
pub const HARVEST_TOOL: &str = "harvest_commits";

tokio::task_local! {
    /// JSON-RPC id of the request being handled on this task
    static REQUEST_ID: RequestId;
}

/// Map key for a request id; `RequestId` itself is not hashable
fn request_key(id: &RequestId) -> String {
    match id {
        RequestId::String(s) => format!("s:{s}"),
        RequestId::Integer(n) => format!("i:{n}"),
    }
}

/// Convert a JSON object into the properties format expected by ToolInputSchema.
///
/// ToolInputSchema expects `HashMap<String, Map<String, Value>>` for properties,
/// where each key maps to a JSON object describing that property's schema.
fn make_properties(json_obj: Value) -> HashMap<String, Map<String, Value>> {
    let mut properties = HashMap::new();
    if let Value::Object(obj) = json_obj {
        for (key, value) in obj {
            if let Value::Object(inner) = value {
                properties.insert(key, inner);
            }
        }
    }
    properties
}

/// The harvest MCP server handler
///
/// The database is wrapped in a Mutex to satisfy the `Sync` requirement;
/// harvests therefore run one at a time.
pub struct HarvestServer<Q, E> {
    /// The SQLite store harvested commits are written to
    db: Arc<Mutex<Database>>,
    harvester: Arc<Harvester<Q, E>>,
    /// Cancelled when the server shuts down; every call runs under a child
    shutdown: CancellationToken,
    /// Tokens of in-flight tool calls, keyed by request id
    in_flight: Mutex<HashMap<String, CancellationToken>>,
}

impl<Q, E> HarvestServer<Q, E>
where
    Q: QueryClient + 'static,
    E: EnrichmentClient + 'static,
{
    /// Create a new harvest server
    ///
    /// # Arguments
    ///
    /// * `db` - The initialized SQLite store
    /// * `harvester` - Harvester used by every tool call
    #[must_use]
    pub fn new(db: Database, harvester: Harvester<Q, E>) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            harvester: Arc::new(harvester),
            shutdown: CancellationToken::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Use `token` as the shutdown signal for in-flight harvests
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Get access to the database (async, requires await)
    pub async fn db(&self) -> tokio::sync::MutexGuard<'_, Database> {
        self.db.lock().await
    }

    /// Shutdown signal of this server
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Build the list of available tools
    pub fn build_tools() -> Vec<Tool> {
        vec![Self::harvest_tool()]
    }

    fn harvest_tool() -> Tool {
        Tool {
            name: HARVEST_TOOL.into(),
            description: Some(
                "Fetch the default-branch commit history of every repository owned by a \
                 GitHub user and store it. Existing commits are left untouched."
                    .into(),
            ),
            input_schema: ToolInputSchema::new(
                vec!["user".into()],
                Some(make_properties(json!({
                    "user": {
                        "type": "string",
                        "description": "GitHub login whose repositories are harvested"
                    },
                    "repo_limit": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Process at most this many repositories (optional)"
                    },
                    "commit_limit": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Fetch at most this many commits per repository (optional)"
                    }
                }))),
                None,
            ),
            annotations: None,
            execution: None,
            icons: vec![],
            meta: None,
            output_schema: None,
            title: Some("Harvest Commits".into()),
        }
    }

    /// Wrap this server for the MCP runtime
    ///
    /// Tool calls handled through the returned handler can be cancelled by
    /// the client with a `notifications/cancelled` message.
    #[must_use]
    pub fn into_mcp_handler(self) -> Arc<dyn McpServerHandler + 'static> {
        Arc::new(RequestScoped {
            inner: self.to_mcp_server_handler(),
        })
    }

    /// Run a tool and return its JSON response text
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::UnknownTool`] for an unknown tool, otherwise
    /// the handler's error.
    pub async fn call_tool(
        &self,
        name: &str,
        args: Option<Map<String, Value>>,
    ) -> Result<String, HandlerError> {
        self.call_tool_for_request(None, name, args).await
    }

    /// Run a tool on behalf of request `id`
    ///
    /// While it runs, [`HarvestServer::cancel_request`] with the same id
    /// cancels it.
    ///
    /// # Errors
    ///
    /// See [`HarvestServer::call_tool`].
    pub async fn call_tool_for_request(
        &self,
        id: Option<&RequestId>,
        name: &str,
        args: Option<Map<String, Value>>,
    ) -> Result<String, HandlerError> {
        if name != HARVEST_TOOL {
            return Err(HandlerError::UnknownTool(name.to_string()));
        }

        let cancel = self.shutdown.child_token();
        let key = id.map(request_key);
        if let Some(ref key) = key {
            self.in_flight
                .lock()
                .await
                .insert(key.clone(), cancel.clone());
        }

        let result = self.run_harvest(args, &cancel).await;

        if let Some(ref key) = key {
            self.in_flight.lock().await.remove(key);
        }
        result
    }

    async fn run_harvest(
        &self,
        args: Option<Map<String, Value>>,
        cancel: &CancellationToken,
    ) -> Result<String, HandlerError> {
        let mut db = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HarvestError::Cancelled.into()),
            db = self.db.lock() => db,
        };
        let response = handlers::handle_harvest(&self.harvester, &mut *db, args, cancel).await?;
        Ok(serde_json::to_string_pretty(&response)?)
    }

    /// Cancel the in-flight tool call of request `id`
    ///
    /// Returns false if no such call is running.
    pub async fn cancel_request(&self, id: &RequestId) -> bool {
        match self.in_flight.lock().await.get(&request_key(id)) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Makes the JSON-RPC id of each request visible to [`HarvestServer`]
///
/// The typed `ServerHandler` callbacks only see request params, so the id
/// travels in a task-local around the inner handler.
struct RequestScoped {
    inner: Arc<dyn McpServerHandler + 'static>,
}

#[async_trait]
impl McpServerHandler for RequestScoped {
    async fn handle_request(
        &self,
        client_jsonrpc_request: ClientJsonrpcRequest,
        runtime: Arc<dyn McpServer>,
    ) -> Result<ResultFromServer, RpcError> {
        let id = client_jsonrpc_request.request_id().clone();
        REQUEST_ID
            .scope(id, self.inner.handle_request(client_jsonrpc_request, runtime))
            .await
    }

    async fn handle_error(
        &self,
        jsonrpc_error: &RpcError,
        runtime: Arc<dyn McpServer>,
    ) -> SdkResult<()> {
        self.inner.handle_error(jsonrpc_error, runtime).await
    }

    async fn handle_notification(
        &self,
        client_jsonrpc_notification: ClientJsonrpcNotification,
        runtime: Arc<dyn McpServer>,
    ) -> SdkResult<()> {
        self.inner
            .handle_notification(client_jsonrpc_notification, runtime)
            .await
    }
}

/// ServerHandler implementation for the MCP protocol
#[async_trait]
impl<Q, E> ServerHandler for HarvestServer<Q, E>
where
    Q: QueryClient + 'static,
    E: EnrichmentClient + 'static,
{
    /// Handle requests to list available tools
    async fn handle_list_tools_request(
        &self,
        _params: Option<PaginatedRequestParams>,
        _runtime: Arc<dyn McpServer>,
    ) -> Result<ListToolsResult, RpcError> {
        Ok(ListToolsResult {
            tools: Self::build_tools(),
            meta: None,
            next_cursor: None,
        })
    }

    /// Handle requests to call a specific tool
    async fn handle_call_tool_request(
        &self,
        params: CallToolRequestParams,
        _runtime: Arc<dyn McpServer>,
    ) -> Result<CallToolResult, CallToolError> {
        let id = REQUEST_ID.try_with(RequestId::clone).ok();
        debug!(tool = %params.name, request = ?id, "Calling tool");

        match self
            .call_tool_for_request(id.as_ref(), &params.name, params.arguments)
            .await
        {
            Ok(text) => Ok(CallToolResult::text_content(vec![TextContent::new(
                text, None, None,
            )])),
            Err(HandlerError::UnknownTool(name)) => Err(CallToolError::unknown_tool(&name)),
            Err(err) => {
                if !err.is_client_error() {
                    warn!(tool = %params.name, error = %err, "tool call failed");
                }
                Err(CallToolError::new(err))
            }
        }
    }

    /// Cancel the tool call named by the notification
    async fn handle_cancelled_notification(
        &self,
        params: CancelledNotificationParams,
        _runtime: Arc<dyn McpServer>,
    ) -> Result<(), RpcError> {
        let Some(id) = params.request_id else {
            return Ok(());
        };
        let found = self.cancel_request(&id).await;
        debug!(request = ?id, reason = ?params.reason, found, "cancel requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_github::{ApiError, GraphQlRequest};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and fails every one of them
    #[derive(Default)]
    struct Offline {
        calls: AtomicUsize,
    }

    impl QueryClient for Offline {
        fn run(&self, _request: &GraphQlRequest) -> Result<Value, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::Transport("offline".into()))
        }
    }

    impl EnrichmentClient for Offline {
        fn commit_detail(&self, _user: &str, _repo: &str, _id: &str) -> Result<String, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::Transport("offline".into()))
        }
    }

    fn create_test_server() -> (HarvestServer<Offline, Offline>, Arc<Offline>) {
        let db = Database::in_memory().expect("Failed to create in-memory database");
        db.initialize().expect("init");
        let client = Arc::new(Offline::default());
        let harvester = Harvester::new(Arc::clone(&client), Arc::clone(&client));
        (HarvestServer::new(db, harvester), client)
    }

    fn to_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("Expected JSON object"),
        }
    }

    #[test]
    fn test_build_tools() {
        let tools = HarvestServer::<Offline, Offline>::build_tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, HARVEST_TOOL);
    }

    #[test]
    fn test_tool_schema_requires_user() {
        let tool = HarvestServer::<Offline, Offline>::harvest_tool();
        let properties = tool.input_schema.properties.expect("properties");
        assert!(properties.contains_key("user"));
        assert!(tool.input_schema.required.contains(&"user".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (server, _) = create_test_server();
        let result = server.call_tool("search_commits", None).await;
        assert!(matches!(result, Err(HandlerError::UnknownTool(_))));
    }

    #[tokio::test]
    async fn test_missing_user_makes_no_network_call() {
        let (server, client) = create_test_server();

        for args in [None, Some(to_map(json!({"user": ""})))] {
            let err = server
                .call_tool(HARVEST_TOOL, args)
                .await
                .expect_err("should reject");
            assert!(err.is_client_error());
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_listing_failure_is_server_error() {
        let (server, client) = create_test_server();
        let err = server
            .call_tool(HARVEST_TOOL, Some(to_map(json!({"user": "octocat"}))))
            .await
            .expect_err("listing fails");

        assert!(!err.is_client_error());
        assert!(err.to_string().contains("offline"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_request_cancels_its_call() {
        let (server, client) = create_test_server();
        let server = Arc::new(server);
        let id = RequestId::Integer(7);

        // Hold the store so the call parks before any network request
        let guard = server.db().await;
        let call = tokio::spawn({
            let server = Arc::clone(&server);
            let id = id.clone();
            async move {
                server
                    .call_tool_for_request(
                        Some(&id),
                        HARVEST_TOOL,
                        Some(to_map(json!({"user": "octocat"}))),
                    )
                    .await
            }
        });
        while !server.cancel_request(&id).await {
            tokio::task::yield_now().await;
        }
        drop(guard);

        let err = call.await.expect("join").expect_err("cancelled");
        assert!(matches!(err, HandlerError::Harvest(HarvestError::Cancelled)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert!(!server.cancel_request(&id).await, "finished call is forgotten");
    }

    #[tokio::test]
    async fn test_cancel_unknown_request_is_ignored() {
        let (server, _) = create_test_server();
        assert!(!server.cancel_request(&RequestId::String("nope".into())).await);
    }

    #[test]
    fn test_request_keys_distinguish_id_kinds() {
        assert_ne!(
            request_key(&RequestId::Integer(1)),
            request_key(&RequestId::String("1".into()))
        );
    }

    #[tokio::test]
    async fn test_shutdown_cancels_harvest() {
        let (server, _) = create_test_server();
        server.shutdown_token().cancel();
        let err = server
            .call_tool(HARVEST_TOOL, Some(to_map(json!({"user": "octocat"}))))
            .await
            .expect_err("cancelled");
        assert!(matches!(err, HandlerError::Harvest(HarvestError::Cancelled)));
    }
}
