//! Server-Sent Events stream listener.
//!
//! The server pushes two kinds of events on the long-lived stream
//! opened by `connect`:
//!
//! - `endpoint`: announces the per-session callback URL (sent once,
//!   first).
//! - `message`: a JSON-RPC envelope carrying a reply or an
//!   unsolicited notification.
//!
//! Both arrive multiplexed on the single subscription; the listener
//! demultiplexes them into a tagged [`StreamEvent`] at the channel
//! boundary.

use crate::endpoint::decode_endpoint_payload;
use crate::error::{McpError, McpResult};
use futures::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

/// A decoded server-pushed event.
#[derive(Debug)]
pub(crate) enum StreamEvent {
    /// Raw endpoint string announced by the server.
    Endpoint(String),
    /// JSON-RPC envelope (reply or notification).
    Message(Value),
}

/// Incremental SSE frame parser over the response body.
pub(crate) struct EventStream {
    lines: Lines<Box<dyn AsyncBufRead + Send + Unpin>>,
    event: Option<String>,
    data: Vec<String>,
}

impl EventStream {
    /// Wrap a streaming HTTP response body.
    pub(crate) fn new(response: reqwest::Response) -> Self {
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed();
        Self::from_reader(Box::new(StreamReader::new(bytes)))
    }

    fn from_reader(reader: Box<dyn AsyncBufRead + Send + Unpin>) -> Self {
        Self {
            lines: reader.lines(),
            event: None,
            data: Vec::new(),
        }
    }

    /// Read the next `endpoint` or `message` event.
    ///
    /// Returns `Ok(None)` when the server closes the stream, and an
    /// error on transport failure. Comment lines, unknown event names
    /// and unparseable `message` payloads are skipped.
    pub(crate) async fn next_event(&mut self) -> McpResult<Option<StreamEvent>> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| McpError::stream(e.to_string()))?;

            let Some(mut line) = line else {
                return Ok(None);
            };
            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                if let Some(event) = self.take_frame() {
                    return Ok(Some(event));
                }
                continue;
            }

            if line.starts_with(':') {
                continue;
            }

            if let Some(rest) = line.strip_prefix("event:") {
                self.event = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                let rest = rest.strip_prefix(' ').unwrap_or(rest);
                self.data.push(rest.to_string());
            }
            // Other fields (id, retry) are irrelevant here.
        }
    }

    /// Dispatch the accumulated frame, if it holds a relevant event.
    fn take_frame(&mut self) -> Option<StreamEvent> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();

        match event.as_deref().unwrap_or("message") {
            "endpoint" => Some(StreamEvent::Endpoint(decode_endpoint_payload(&data))),
            "message" => match serde_json::from_str::<Value>(&data) {
                Ok(value) => Some(StreamEvent::Message(value)),
                Err(e) => {
                    warn!(error = %e, "Failed to parse message event");
                    None
                }
            },
            other => {
                debug!(event = other, "Ignoring unknown event");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn stream_from(text: &str) -> EventStream {
        EventStream::from_reader(Box::new(Cursor::new(text.to_string().into_bytes())))
    }

    #[tokio::test]
    async fn test_endpoint_event_json_payload() {
        let mut stream =
            stream_from("event: endpoint\ndata: {\"endpoint\":\"http://0.0.0.0:7911/message\"}\n\n");
        match stream.next_event().await.unwrap() {
            Some(StreamEvent::Endpoint(endpoint)) => {
                assert_eq!(endpoint, "http://0.0.0.0:7911/message");
            }
            other => panic!("Expected endpoint event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_endpoint_event_raw_payload() {
        let mut stream = stream_from("event: endpoint\ndata: https://host/cb\n\n");
        match stream.next_event().await.unwrap() {
            Some(StreamEvent::Endpoint(endpoint)) => assert_eq!(endpoint, "https://host/cb"),
            other => panic!("Expected endpoint event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_message_event() {
        let mut stream =
            stream_from("event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n");
        match stream.next_event().await.unwrap() {
            Some(StreamEvent::Message(value)) => assert_eq!(value["id"], 1),
            other => panic!("Expected message event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_default_event_name_is_message() {
        let mut stream = stream_from("data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":null}\n\n");
        assert!(matches!(
            stream.next_event().await.unwrap(),
            Some(StreamEvent::Message(_))
        ));
    }

    #[tokio::test]
    async fn test_skips_comments_and_unknown_events() {
        let mut stream = stream_from(
            ": keep-alive\n\nevent: ping\ndata: {}\n\nevent: message\ndata: {\"id\":3}\n\n",
        );
        match stream.next_event().await.unwrap() {
            Some(StreamEvent::Message(value)) => assert_eq!(value["id"], 3),
            other => panic!("Expected message event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_message_skipped() {
        let mut stream = stream_from("event: message\ndata: not-json\n\n");
        assert!(stream.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_data_without_space_and_crlf() {
        let mut stream = stream_from("event:message\r\ndata:{\"id\":4}\r\n\r\n");
        match stream.next_event().await.unwrap() {
            Some(StreamEvent::Message(value)) => assert_eq!(value["id"], 4),
            other => panic!("Expected message event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_multiline_data_joined() {
        let mut stream = stream_from("event: message\ndata: {\ndata: \"id\": 5\ndata: }\n\n");
        match stream.next_event().await.unwrap() {
            Some(StreamEvent::Message(value)) => assert_eq!(value["id"], 5),
            other => panic!("Expected message event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_end_of_stream() {
        let mut stream = stream_from("");
        assert!(stream.next_event().await.unwrap().is_none());
    }
}
