//! harvest-mcp: MCP server harvesting GitHub commit history
//!
//! This binary crate serves the `harvest_commits` tool over MCP stdio, or
//! runs a single harvest from the command line with `harvest --user`.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use harvest_github::GitHubClient;
use rust_mcp_sdk::mcp_server::{McpServerOptions, server_runtime};
use rust_mcp_sdk::schema::{
    Implementation, InitializeResult, LATEST_PROTOCOL_VERSION, ServerCapabilities,
    ServerCapabilitiesTools,
};
use rust_mcp_sdk::{McpServer, StdioTransport, TransportOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use harvest_mcp::config::{Command, Config, Settings};
use harvest_mcp::db::{Database, StoreHandle};
use harvest_mcp::handlers;
use harvest_mcp::ingest::Harvester;
use harvest_mcp::server::HarvestServer;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // Logs go to stderr; stdout belongs to the MCP transport
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(config.log_level().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = config.resolve().context("invalid configuration")?;
    settings.validate()?;
    debug!(client = ?settings.client, database = %settings.database_uri, "resolved settings");

    let db = open_store(&settings, config.skip_init)?;
    let client = Arc::new(GitHubClient::new(settings.client.clone()));
    let harvester =
        Harvester::new(Arc::clone(&client), client).with_options(settings.harvest.clone());

    match config.command {
        Some(Command::Harvest {
            user,
            repo_limit,
            commit_limit,
        }) => {
            let options = settings
                .harvest
                .clone()
                .with_repo_limit(repo_limit)
                .with_commit_limit(commit_limit);
            run_harvest(db, harvester.with_options(options), &user).await
        }
        Some(Command::Serve) | None => serve(db, harvester).await,
    }
}

/// Open the store, bring its schema up to date and check it responds
fn open_store(settings: &Settings, skip_init: bool) -> Result<Database> {
    let db = Database::connect(&settings.database_uri)
        .with_context(|| format!("failed to open store {}", settings.database_uri))?;
    if !skip_init {
        db.initialize().context("database initialization failed")?;
    }
    db.ping().context("store connectivity check failed")?;
    info!(database = %settings.database_uri, "store ready");
    Ok(db)
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping harvest");
            token.cancel();
        }
    });
}

async fn run_harvest(
    mut db: Database,
    harvester: Harvester<GitHubClient, GitHubClient>,
    user: &str,
) -> Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    let response = handlers::harvest_for_user(&harvester, &mut db, user, &cancel).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn serve(db: Database, harvester: Harvester<GitHubClient, GitHubClient>) -> Result<()> {
    info!("Starting harvest-mcp server...");

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(&shutdown);
    let handler = HarvestServer::new(db, harvester).with_shutdown(shutdown);

    let server_details = InitializeResult {
        server_info: Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Harvest MCP".to_string()),
            description: Some(env!("CARGO_PKG_DESCRIPTION").to_string()),
            icons: vec![],
            website_url: None,
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools { list_changed: None }),
            ..Default::default()
        },
        meta: None,
        instructions: Some(
            "Call harvest_commits with a GitHub login to store that user's commit history."
                .to_string(),
        ),
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    };

    let transport = StdioTransport::new(TransportOptions::default())
        .map_err(|e| anyhow!("failed to open stdio transport: {e}"))?;
    let server = server_runtime::create_server(McpServerOptions {
        server_details,
        transport,
        handler: handler.into_mcp_handler(),
        task_store: None,
        client_task_store: None,
    });

    server
        .start()
        .await
        .map_err(|e| anyhow!("MCP server stopped with an error: {e}"))
}
