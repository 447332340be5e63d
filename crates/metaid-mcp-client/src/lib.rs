//! MCP (Model Context Protocol) client over Server-Sent Events.
//!
//! The server exposes a streaming channel at `GET <base>/sse`. The
//! first event on that channel (`endpoint`) announces a private
//! per-session callback URL; the client then POSTs JSON-RPC requests
//! to that URL and receives the matching responses asynchronously on
//! the original stream as `message` events.
//!
//! # Architecture
//!
//! ```text
//! ┌────────┐  GET /sse   ┌────────────┐  endpoint  ┌────────────┐
//! │ caller │────────────▶│  listener  │───────────▶│  registrar │
//! └────────┘             │   (SSE)    │            └─────┬──────┘
//!     │                  └─────┬──────┘     session URL  │
//!     │ request               message                    ▼
//!     └───────────────────────▶┌─────────────────────────────┐
//!                              │      request correlator     │
//!                              │  POST <session>, match by id│
//!                              └─────────────────────────────┘
//! ```
//!
//! Replies are matched to callers purely by identifier; concurrent
//! requests multiplex over the single stream and may complete in any
//! order.
//!
//! # Example
//!
//! ```no_run
//! use metaid_mcp_client::{ClientConfig, ClientInfo, McpClient};
//!
//! # async fn example() -> metaid_mcp_client::McpResult<()> {
//! let client = McpClient::new(ClientConfig::default())?;
//! client.connect().await?;
//! client.initialize(ClientInfo::default()).await?;
//!
//! let tools = client.list_tools().await?;
//! println!("{tools}");
//!
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod endpoint;
mod error;
pub mod protocol;
mod sse;

pub use client::{
    ClientConfig, ErrorHook, Hook, McpClient, MessageHook, DEFAULT_TIMEOUT, DEFAULT_URL,
};
pub use error::{McpError, McpResult};
pub use protocol::{ClientInfo, PROTOCOL_VERSION};
