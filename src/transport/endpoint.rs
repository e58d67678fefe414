//! WebSocket endpoint derivation.
//!
//! The backend serves its socket at `/ws` on the same host as its pages.
//! A secure origin (`https`) maps to `wss`, anything else to `ws`.

use super::TransportError;

/// Path of the streaming socket on the backend host.
pub const WS_PATH: &str = "/ws";

/// Derive the socket URL from a page origin.
///
/// * `https://host[:port][/...]` → `wss://host[:port]/ws`
/// * `http://host[:port][/...]`  → `ws://host[:port]/ws`
/// * `host[:port]`               → `ws://host[:port]/ws`
/// * `ws://…` / `wss://…`        → returned unchanged
///
/// ```rust
/// use voice_stream::transport::endpoint_url;
///
/// assert_eq!(endpoint_url("https://asr.example.com").unwrap(), "wss://asr.example.com/ws");
/// assert_eq!(endpoint_url("http://localhost:8000/").unwrap(), "ws://localhost:8000/ws");
/// ```
pub fn endpoint_url(origin: &str) -> Result<String, TransportError> {
    let origin = origin.trim();

    if origin.starts_with("ws://") || origin.starts_with("wss://") {
        return Ok(origin.to_string());
    }

    let (scheme, rest) = if let Some(rest) = origin.strip_prefix("https://") {
        ("wss", rest)
    } else if let Some(rest) = origin.strip_prefix("http://") {
        ("ws", rest)
    } else if origin.contains("://") {
        return Err(TransportError::InvalidEndpoint(format!(
            "unsupported scheme in {origin:?}"
        )));
    } else {
        ("ws", origin)
    };

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(TransportError::InvalidEndpoint(format!(
            "no host in {origin:?}"
        )));
    }

    Ok(format!("{scheme}://{host}{WS_PATH}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_origin_uses_wss() {
        assert_eq!(
            endpoint_url("https://voice.example.com:8443").unwrap(),
            "wss://voice.example.com:8443/ws"
        );
    }

    #[test]
    fn plain_origin_uses_ws() {
        assert_eq!(
            endpoint_url("http://127.0.0.1:8000").unwrap(),
            "ws://127.0.0.1:8000/ws"
        );
    }

    #[test]
    fn page_path_query_and_fragment_are_dropped() {
        assert_eq!(
            endpoint_url("https://example.com/static/index.html?x=1#top").unwrap(),
            "wss://example.com/ws"
        );
        assert_eq!(
            endpoint_url("http://example.com?debug").unwrap(),
            "ws://example.com/ws"
        );
    }

    #[test]
    fn bare_host_defaults_to_ws() {
        assert_eq!(endpoint_url(" localhost:8000 ").unwrap(), "ws://localhost:8000/ws");
    }

    #[test]
    fn socket_urls_pass_through() {
        assert_eq!(
            endpoint_url("wss://voice.example.com/custom").unwrap(),
            "wss://voice.example.com/custom"
        );
    }

    #[test]
    fn rejects_missing_host_and_foreign_schemes() {
        assert!(endpoint_url("https://").is_err());
        assert!(endpoint_url("").is_err());
        assert!(endpoint_url("ftp://example.com").is_err());
    }
}
