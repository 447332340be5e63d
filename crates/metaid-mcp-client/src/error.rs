//! MCP client error types.

use serde_json::Value;
use thiserror::Error;

/// Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// No `endpoint` event arrived before the configured deadline.
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// Transport-level failure on the event stream. Fatal only while
    /// no session endpoint has been established.
    #[error("Stream error: {0}")]
    Stream(String),

    /// A request was issued without an active session endpoint.
    #[error("Not connected to MCP server")]
    NotConnected,

    /// The HTTP POST carrying a request was rejected or failed.
    #[error("Request failed: {0}")]
    SendFailure(String),

    /// No matching reply arrived before the per-request deadline.
    #[error("Request timeout: {method}")]
    RequestTimeout { method: String },

    /// The server answered with a JSON-RPC error object.
    #[error("Server error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// The connection was torn down while the request was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Create a stream error.
    pub(crate) fn stream(message: impl Into<String>) -> Self {
        Self::Stream(message.into())
    }

    /// Create a send failure error.
    pub(crate) fn send_failure(message: impl Into<String>) -> Self {
        Self::SendFailure(message.into())
    }
}
