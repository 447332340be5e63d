//! CLI tool for testing MCP servers over SSE.
//!
//! Thin front end over [`metaid_mcp_client::McpClient`]: connect to a
//! server, list its tools, or call one.

use anyhow::Context;
use clap::{Parser, Subcommand};
use metaid_mcp_client::{ClientConfig, ClientInfo, McpClient, DEFAULT_URL};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "metaid-mcp")]
#[command(author, version, about = "CLI tool for testing MCP servers", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to an MCP server and stay attached
    Connect {
        /// MCP server URL
        #[arg(short, long, default_value = DEFAULT_URL)]
        url: String,
    },
    /// List available tools
    Tools {
        /// MCP server URL
        #[arg(short, long, default_value = DEFAULT_URL)]
        url: String,
    },
    /// Call a tool
    Call {
        /// MCP server URL
        #[arg(short, long, default_value = DEFAULT_URL)]
        url: String,
        /// Tool name
        #[arg(short, long)]
        name: String,
        /// Tool arguments as JSON
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Connect { url } => run_connect(&url).await,
        Commands::Tools { url } => run_tools(&url).await,
        Commands::Call { url, name, args } => run_call(&url, &name, &args).await,
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        "metaid_mcp_cli=debug,metaid_mcp_client=debug"
    } else {
        "metaid_mcp_cli=info,metaid_mcp_client=warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn client_info() -> ClientInfo {
    ClientInfo {
        name: "metaid-mcp-cli".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// Connect, initialize, print the tool list, then stay attached and
/// echo server messages until Ctrl+C.
async fn run_connect(url: &str) -> anyhow::Result<()> {
    println!("Connecting to {url}...");

    let client = McpClient::new(ClientConfig {
        base_url: Some(url.to_string()),
        on_connected: Some(Arc::new(|| println!("✓ Connected"))),
        on_disconnected: Some(Arc::new(|| println!("✗ Disconnected"))),
        on_error: Some(Arc::new(|error| eprintln!("Error: {error}"))),
        on_message: Some(Arc::new(|message| {
            println!(
                "Message: {}",
                serde_json::to_string_pretty(message).unwrap_or_default()
            );
        })),
        ..Default::default()
    })?;

    client.connect().await?;

    info!("Initializing session");
    let init_result = client.initialize(client_info()).await?;
    println!("Init result: {}", serde_json::to_string_pretty(&init_result)?);

    let tools = client.list_tools().await?;
    println!("Tools: {}", serde_json::to_string_pretty(&tools)?);

    println!("\nPress Ctrl+C to exit...");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!("\nDisconnecting...");
    client.disconnect().await;
    Ok(())
}

async fn run_tools(url: &str) -> anyhow::Result<()> {
    let client = McpClient::new(ClientConfig {
        base_url: Some(url.to_string()),
        ..Default::default()
    })?;

    let result = async {
        client.connect().await?;
        client.initialize(client_info()).await?;
        client.list_tools().await
    }
    .await;

    client.disconnect().await;
    let tools = result?;
    println!("{}", serde_json::to_string_pretty(&tools)?);
    Ok(())
}

async fn run_call(url: &str, name: &str, args: &str) -> anyhow::Result<()> {
    let args: serde_json::Value =
        serde_json::from_str(args).context("Tool arguments must be valid JSON")?;

    let client = McpClient::new(ClientConfig {
        base_url: Some(url.to_string()),
        ..Default::default()
    })?;

    let result = async {
        client.connect().await?;
        client.initialize(client_info()).await?;
        client.call_tool(name, Some(args)).await
    }
    .await;

    client.disconnect().await;
    let output = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
