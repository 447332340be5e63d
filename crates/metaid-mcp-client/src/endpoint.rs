//! Session endpoint resolution.
//!
//! Servers announce their per-session callback URL on the event
//! stream, but frequently report their internal bind address
//! (`http://0.0.0.0:7911/message?sessionId=...`) instead of a
//! client-reachable one. The resolver rewrites such URLs against the
//! base address the client actually connected to.

use tracing::warn;
use url::Url;

/// Hosts that indicate the server reported its own bind address.
const INTERNAL_HOSTS: [&str; 3] = ["0.0.0.0", "localhost", "127.0.0.1"];

/// Decode the payload of an `endpoint` event into the raw endpoint
/// string. The payload is either a JSON object with an `endpoint`
/// field, a JSON string, or a plain URL; anything that does not parse
/// is used as-is.
pub(crate) fn decode_endpoint_payload(data: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(data) {
        if let Some(endpoint) = value.get("endpoint").and_then(|v| v.as_str()) {
            return endpoint.to_string();
        }
        if let Some(endpoint) = value.as_str() {
            return endpoint.to_string();
        }
    }
    data.trim().to_string()
}

/// Resolve the announced endpoint against the connection's base URL.
///
/// If the endpoint's host is one of the internal sentinels, the
/// callback URL is rebuilt as `<base><path>?<query>`; otherwise the
/// announced URL is used verbatim. An unparseable endpoint falls back
/// to the raw string.
pub(crate) fn resolve_session_url(base_url: &str, endpoint: &str) -> String {
    let parsed = match Url::parse(endpoint) {
        Ok(url) => url,
        Err(e) => {
            warn!(endpoint, error = %e, "Failed to parse endpoint URL, using as-is");
            return endpoint.to_string();
        }
    };

    let is_internal = parsed
        .host_str()
        .is_some_and(|host| INTERNAL_HOSTS.contains(&host));
    if !is_internal {
        return endpoint.to_string();
    }

    let mut path = parsed.path().to_string();
    if let Some(query) = parsed.query() {
        path.push('?');
        path.push_str(query);
    }
    if path.starts_with('/') {
        format!("{base_url}{path}")
    } else {
        format!("{base_url}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrites_any_address_host() {
        let resolved = resolve_session_url(
            "https://api.example.com",
            "http://0.0.0.0:7911/message?sessionId=abc",
        );
        assert_eq!(resolved, "https://api.example.com/message?sessionId=abc");
    }

    #[test]
    fn test_rewrites_localhost_and_loopback() {
        for host in ["localhost", "127.0.0.1"] {
            let resolved = resolve_session_url(
                "https://api.example.com",
                &format!("http://{host}:8080/cb?sessionId=x"),
            );
            assert_eq!(resolved, "https://api.example.com/cb?sessionId=x");
        }
    }

    #[test]
    fn test_keeps_public_host_verbatim() {
        let endpoint = "https://other.example.net/message?sessionId=abc";
        assert_eq!(
            resolve_session_url("https://api.example.com", endpoint),
            endpoint
        );
    }

    #[test]
    fn test_unparseable_endpoint_used_as_is() {
        let endpoint = "/message?sessionId=abc";
        assert_eq!(
            resolve_session_url("https://api.example.com", endpoint),
            endpoint
        );
    }

    #[test]
    fn test_rewrite_without_query() {
        let resolved = resolve_session_url("https://api.example.com", "http://0.0.0.0/message");
        assert_eq!(resolved, "https://api.example.com/message");
    }

    #[test]
    fn test_decode_json_object_payload() {
        let decoded = decode_endpoint_payload(r#"{"endpoint":"http://0.0.0.0:7911/message"}"#);
        assert_eq!(decoded, "http://0.0.0.0:7911/message");
    }

    #[test]
    fn test_decode_json_string_payload() {
        let decoded = decode_endpoint_payload(r#""https://host/cb""#);
        assert_eq!(decoded, "https://host/cb");
    }

    #[test]
    fn test_decode_raw_string_payload() {
        let decoded = decode_endpoint_payload("  https://host/cb \n");
        assert_eq!(decoded, "https://host/cb");
    }

    #[test]
    fn test_decode_json_object_without_endpoint_field() {
        // Parses as JSON but carries no usable endpoint; fall back to
        // the raw payload.
        let payload = r#"{"other":"value"}"#;
        assert_eq!(decode_endpoint_payload(payload), payload);
    }
}
