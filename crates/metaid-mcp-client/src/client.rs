//! MCP client implementation.
//!
//! One [`McpClient`] owns one connection: the event-stream listener
//! task, the session endpoint it announces, and the set of requests
//! still waiting for a reply. Replies are matched to callers purely
//! by identifier, so concurrent requests may complete in any order.

use crate::endpoint;
use crate::error::{McpError, McpResult};
use crate::protocol::{
    CallToolParams, ClientInfo, GetPromptParams, InitializeParams, JsonRpcRequest,
    JsonRpcResponse, ReadResourceParams, RequestId,
};
use crate::sse::{EventStream, StreamEvent};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default online service URL.
pub const DEFAULT_URL: &str = "https://api.metaid.io/mcp-service";

/// Default connect/request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Observer hook with no payload (connected/disconnected).
pub type Hook = Arc<dyn Fn() + Send + Sync>;
/// Observer hook invoked with the error that occurred.
pub type ErrorHook = Arc<dyn Fn(&McpError) + Send + Sync>;
/// Observer hook invoked with every inbound message event.
pub type MessageHook = Arc<dyn Fn(&Value) + Send + Sync>;

/// MCP client configuration. All fields are optional.
#[derive(Clone, Default)]
pub struct ClientConfig {
    /// Server base URL; defaults to [`DEFAULT_URL`].
    pub base_url: Option<String>,
    /// Connect/request timeout; defaults to [`DEFAULT_TIMEOUT`].
    pub timeout: Option<Duration>,
    /// Invoked when the session endpoint has been established.
    pub on_connected: Option<Hook>,
    /// Invoked on every `disconnect` call.
    pub on_disconnected: Option<Hook>,
    /// Invoked on stream-level errors.
    pub on_error: Option<ErrorHook>,
    /// Invoked for every `message` event, before reply correlation.
    pub on_message: Option<MessageHook>,
}

/// Observer hooks, invoked synchronously within the event-processing
/// turn.
#[derive(Clone, Default)]
struct Hooks {
    on_connected: Option<Hook>,
    on_disconnected: Option<Hook>,
    on_error: Option<ErrorHook>,
    on_message: Option<MessageHook>,
}

/// Correlation state shared with the listener task.
struct Shared {
    base_url: String,
    hooks: Hooks,
    inner: Mutex<Inner>,
    /// True iff a session endpoint exists and the stream is open.
    connected: AtomicBool,
}

#[derive(Default)]
struct Inner {
    session_url: Option<String>,
    pending: HashMap<RequestId, oneshot::Sender<McpResult<Value>>>,
}

impl Shared {
    /// Report a transport failure on the event stream.
    ///
    /// Fatal only while no session endpoint exists, in which case the
    /// in-flight `connect` is failed. With a session established the
    /// connection simply stalls: pending requests run into their own
    /// deadlines and the caller must re-connect to recover.
    fn stream_failed(
        &self,
        error: McpError,
        ready_tx: &mut Option<oneshot::Sender<McpResult<()>>>,
    ) {
        warn!(error = %error, "Event stream error");
        self.connected.store(false, Ordering::SeqCst);
        if let Some(hook) = &self.hooks.on_error {
            hook(&error);
        }
        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(Err(error));
        }
    }

    /// Match an inbound envelope against the pending set.
    ///
    /// Envelopes without an identifier, or with an identifier no
    /// request is waiting on, are dropped without error; the message
    /// observer has already seen them.
    async fn resolve_reply(&self, message: Value) {
        let reply: JsonRpcResponse = match serde_json::from_value(message) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(error = %e, "Ignoring non-envelope message");
                return;
            }
        };
        let Some(id) = reply.id else {
            return;
        };

        let tx = self.inner.lock().await.pending.remove(&id);
        let Some(tx) = tx else {
            debug!(%id, "No pending request for reply, dropping");
            return;
        };

        let outcome = match reply.error {
            Some(error) => Err(McpError::Remote {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            None => Ok(reply.result.unwrap_or(Value::Null)),
        };
        let _ = tx.send(outcome);
    }
}

/// MCP client speaking JSON-RPC over an SSE reply channel.
pub struct McpClient {
    shared: Arc<Shared>,
    http: reqwest::Client,
    timeout: Duration,
    /// Request ID counter; ids are never reused within a connection.
    next_id: AtomicU64,
    listener: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl McpClient {
    /// Create a new client. Does not connect.
    pub fn new(config: ClientConfig) -> McpResult<Self> {
        // No client-wide timeout: it would kill the long-lived event
        // stream. Deadlines are applied per operation instead.
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| McpError::stream(format!("Failed to create HTTP client: {e}")))?;

        let base_url = config
            .base_url
            .unwrap_or_else(|| DEFAULT_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            shared: Arc::new(Shared {
                base_url,
                hooks: Hooks {
                    on_connected: config.on_connected,
                    on_disconnected: config.on_disconnected,
                    on_error: config.on_error,
                    on_message: config.on_message,
                },
                inner: Mutex::new(Inner::default()),
                connected: AtomicBool::new(false),
            }),
            http,
            timeout: config.timeout.unwrap_or(DEFAULT_TIMEOUT),
            next_id: AtomicU64::new(1),
            listener: std::sync::Mutex::new(None),
        })
    }

    /// Connect to the MCP server.
    ///
    /// Opens the event stream and waits for the server to announce
    /// the per-session callback URL. Fails with
    /// [`McpError::ConnectionTimeout`] if no endpoint arrives within
    /// the configured timeout, or [`McpError::Stream`] on transport
    /// failure before the session is established.
    pub async fn connect(&self) -> McpResult<()> {
        let sse_url = format!("{}/sse", self.shared.base_url);
        info!(url = %sse_url, "Connecting to MCP server");

        let response = self
            .http
            .get(&sse_url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| McpError::stream(format!("Failed to open event stream: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::stream(format!("Server returned {status}")));
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(listen(
            EventStream::new(response),
            self.shared.clone(),
            ready_tx,
        ));
        if let Some(old) = self.store_listener(Some(task)) {
            old.abort();
        }

        match tokio::time::timeout(self.timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => {
                self.teardown().await;
                Err(e)
            }
            // Listener ended without reporting; treat as stream loss.
            Ok(Err(_)) => {
                self.teardown().await;
                Err(McpError::stream("Event stream closed before session setup"))
            }
            Err(_) => {
                self.disconnect().await;
                Err(McpError::ConnectionTimeout)
            }
        }
    }

    /// Disconnect from the server.
    ///
    /// Closes the stream, clears the session endpoint and rejects
    /// every pending request with [`McpError::ConnectionClosed`].
    /// Calling it again is a no-op apart from the observer hook.
    pub async fn disconnect(&self) {
        self.teardown().await;
        if let Some(hook) = &self.shared.hooks.on_disconnected {
            hook();
        }
    }

    async fn teardown(&self) {
        if let Some(task) = self.store_listener(None) {
            task.abort();
        }
        self.shared.connected.store(false, Ordering::SeqCst);

        let pending = {
            let mut inner = self.shared.inner.lock().await;
            inner.session_url = None;
            std::mem::take(&mut inner.pending)
        };
        for (_, tx) in pending {
            let _ = tx.send(Err(McpError::ConnectionClosed));
        }
    }

    fn store_listener(&self, task: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        let mut listener = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match task {
            Some(task) => listener.replace(task),
            None => listener.take(),
        }
    }

    /// Send a JSON-RPC request and wait for the matching reply.
    ///
    /// Resolves on the first of: a reply carrying this request's
    /// identifier, the per-request deadline, or connection teardown.
    pub async fn request(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        let session_url = self
            .shared
            .inner
            .lock()
            .await
            .session_url
            .clone()
            .ok_or(McpError::NotConnected)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);
        let request_id = RequestId::Number(id);

        // Register before sending so a fast reply cannot race the
        // insert. The deadline covers send and reply wait together.
        let (tx, rx) = oneshot::channel();
        self.shared
            .inner
            .lock()
            .await
            .pending
            .insert(request_id.clone(), tx);
        let deadline = tokio::time::Instant::now() + self.timeout;

        debug!(id, method, "Sending request");
        let sent = self
            .http
            .post(&session_url)
            .header("Content-Type", "application/json")
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await;

        match sent {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                self.remove_pending(&request_id).await;
                return Err(McpError::send_failure(format!(
                    "Server returned {}",
                    response.status()
                )));
            }
            Err(e) => {
                self.remove_pending(&request_id).await;
                return Err(McpError::send_failure(e.to_string()));
            }
        }

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without completing: client went away.
            Ok(Err(_)) => Err(McpError::ConnectionClosed),
            Err(_) => {
                self.remove_pending(&request_id).await;
                Err(McpError::RequestTimeout {
                    method: method.to_string(),
                })
            }
        }
    }

    async fn remove_pending(&self, id: &RequestId) {
        self.shared.inner.lock().await.pending.remove(id);
    }

    /// Initialize the MCP session.
    pub async fn initialize(&self, client_info: ClientInfo) -> McpResult<Value> {
        let params = InitializeParams::new(client_info);
        self.request("initialize", Some(serde_json::to_value(&params)?))
            .await
    }

    /// List available tools.
    pub async fn list_tools(&self) -> McpResult<Value> {
        self.request("tools/list", None).await
    }

    /// Call a tool.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> McpResult<Value> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments: arguments.unwrap_or_else(|| serde_json::json!({})),
        };
        self.request("tools/call", Some(serde_json::to_value(&params)?))
            .await
    }

    /// List resources.
    pub async fn list_resources(&self) -> McpResult<Value> {
        self.request("resources/list", None).await
    }

    /// Read a resource.
    pub async fn read_resource(&self, uri: &str) -> McpResult<Value> {
        let params = ReadResourceParams {
            uri: uri.to_string(),
        };
        self.request("resources/read", Some(serde_json::to_value(&params)?))
            .await
    }

    /// List prompts.
    pub async fn list_prompts(&self) -> McpResult<Value> {
        self.request("prompts/list", None).await
    }

    /// Get a prompt.
    pub async fn get_prompt(&self, name: &str, arguments: Option<Value>) -> McpResult<Value> {
        let params = GetPromptParams {
            name: name.to_string(),
            arguments: arguments.unwrap_or_else(|| serde_json::json!({})),
        };
        self.request("prompts/get", Some(serde_json::to_value(&params)?))
            .await
    }

    /// Check if connected: a session endpoint exists and the stream
    /// is open.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// The active session callback URL, if any.
    pub async fn session_url(&self) -> Option<String> {
        self.shared.inner.lock().await.session_url.clone()
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        // Stop the listener task; pending requests observe closed
        // completion channels.
        if let Some(task) = self.store_listener(None) {
            task.abort();
        }
    }
}

/// Listener task: drains the event stream, feeding the registrar
/// (endpoint events) and the correlator (message events).
async fn listen(
    mut events: EventStream,
    shared: Arc<Shared>,
    ready_tx: oneshot::Sender<McpResult<()>>,
) {
    let mut ready_tx = Some(ready_tx);
    loop {
        match events.next_event().await {
            Ok(Some(StreamEvent::Endpoint(raw))) => {
                let session_url = endpoint::resolve_session_url(&shared.base_url, &raw);
                info!(%session_url, "Session endpoint received");
                shared.inner.lock().await.session_url = Some(session_url);
                shared.connected.store(true, Ordering::SeqCst);
                if let Some(hook) = &shared.hooks.on_connected {
                    hook();
                }
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(Some(StreamEvent::Message(message))) => {
                // Observers see every message, matched or not.
                if let Some(hook) = &shared.hooks.on_message {
                    hook(&message);
                }
                shared.resolve_reply(message).await;
            }
            Ok(None) => {
                shared.stream_failed(
                    McpError::stream("Event stream closed by server"),
                    &mut ready_tx,
                );
                break;
            }
            Err(e) => {
                shared.stream_failed(e, &mut ready_tx);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn client() -> McpClient {
        McpClient::new(ClientConfig::default()).unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let client = McpClient::new(ClientConfig {
            base_url: Some("https://example.com/mcp/".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.shared.base_url, "https://example.com/mcp");
    }

    #[test]
    fn test_default_config() {
        let client = client();
        assert_eq!(client.shared.base_url, DEFAULT_URL);
        assert_eq!(client.timeout, DEFAULT_TIMEOUT);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_request_ids_strictly_increasing() {
        let client = client();
        assert_eq!(client.next_id.fetch_add(1, Ordering::SeqCst), 1);
        assert_eq!(client.next_id.fetch_add(1, Ordering::SeqCst), 2);
        assert_eq!(client.next_id.fetch_add(1, Ordering::SeqCst), 3);
    }

    #[test]
    fn test_clients_have_independent_counters() {
        let a = client();
        let b = client();
        assert_eq!(a.next_id.fetch_add(1, Ordering::SeqCst), 1);
        assert_eq!(b.next_id.fetch_add(1, Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_request_without_session_fails_not_connected() {
        let client = client();
        let result = client.request("tools/list", None).await;
        assert!(matches!(result, Err(McpError::NotConnected)));
        // No pending entry was created.
        assert!(client.shared.inner.lock().await.pending.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_idempotent() {
        let count = Arc::new(AtomicUsize::new(0));
        let hook_count = count.clone();
        let client = McpClient::new(ClientConfig {
            on_disconnected: Some(Arc::new(move || {
                hook_count.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        })
        .unwrap();

        client.disconnect().await;
        client.disconnect().await;

        assert!(!client.is_connected());
        assert!(client.session_url().await.is_none());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disconnect_rejects_pending() {
        let client = client();
        {
            let mut inner = client.shared.inner.lock().await;
            inner.session_url = Some("http://unused".to_string());
        }

        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        {
            let mut inner = client.shared.inner.lock().await;
            inner.pending.insert(RequestId::Number(1), tx_a);
            inner.pending.insert(RequestId::Number(2), tx_b);
        }

        client.disconnect().await;

        for rx in [rx_a, rx_b] {
            match rx.await.unwrap() {
                Err(McpError::ConnectionClosed) => {}
                other => panic!("Expected ConnectionClosed, got {other:?}"),
            }
        }
        assert!(client.shared.inner.lock().await.pending.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_reply_matches_by_id() {
        let client = client();
        let (tx, rx) = oneshot::channel();
        client
            .shared
            .inner
            .lock()
            .await
            .pending
            .insert(RequestId::Number(5), tx);

        client
            .shared
            .resolve_reply(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 5,
                "result": {"ok": true}
            }))
            .await;

        let result = rx.await.unwrap().unwrap();
        assert_eq!(result["ok"], true);
        assert!(client.shared.inner.lock().await.pending.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_reply_error_object() {
        let client = client();
        let (tx, rx) = oneshot::channel();
        client
            .shared
            .inner
            .lock()
            .await
            .pending
            .insert(RequestId::Number(6), tx);

        client
            .shared
            .resolve_reply(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 6,
                "error": {"code": -32000, "message": "boom", "data": {"k": 1}}
            }))
            .await;

        match rx.await.unwrap() {
            Err(McpError::Remote {
                code,
                message,
                data,
            }) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "boom");
                assert_eq!(data.unwrap()["k"], 1);
            }
            other => panic!("Expected Remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_reply_unmatched_id_is_dropped() {
        let client = client();
        client
            .shared
            .resolve_reply(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 99,
                "result": null
            }))
            .await;
        assert!(client.shared.inner.lock().await.pending.is_empty());
    }
}
