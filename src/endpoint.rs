//! Connect URL construction.
//!
//! The first attempt targets `<base>connect`, later attempts
//! `<base>reconnect`, both followed by the receive query string. The scheme
//! is upgraded from `http`/`https` to `ws`/`wss`.

// ============================================================================
// Imports
// ============================================================================

use url::Url;

use crate::connection::Connection;
use crate::error::{Error, Result};

// ============================================================================
// Query String
// ============================================================================

/// Builds the receive query string for a transport URL.
///
/// Format: `?transport=<name>[&connectionToken=..][&messageId=..]
/// [&groupsToken=..][&connectionData=..][&<custom>]`. Tokens are
/// percent-escaped; connection data is opaque and appended as given.
#[must_use]
pub fn receive_query_string(
    connection: &dyn Connection,
    connection_data: &str,
    transport: &str,
) -> String {
    let mut qs = format!("?transport={transport}");

    if let Some(token) = connection.connection_token() {
        qs.push_str("&connectionToken=");
        qs.push_str(&urlencoding::encode(&token));
    }

    if let Some(message_id) = connection.message_id() {
        qs.push_str("&messageId=");
        qs.push_str(&urlencoding::encode(&message_id));
    }

    if let Some(groups_token) = connection.groups_token() {
        qs.push_str("&groupsToken=");
        qs.push_str(&urlencoding::encode(&groups_token));
    }

    if !connection_data.is_empty() {
        qs.push_str("&connectionData=");
        qs.push_str(connection_data);
    }

    if let Some(custom) = connection.query_string() {
        let custom = custom.trim_start_matches(['?', '&']);
        if !custom.is_empty() {
            qs.push('&');
            qs.push_str(custom);
        }
    }

    qs
}

// ============================================================================
// Connect URL
// ============================================================================

/// Builds the WebSocket URL for one connect attempt.
///
/// # Errors
///
/// Returns [`Error::InvalidUrl`] if the base URL does not parse or its
/// scheme cannot be switched to `ws`/`wss`.
pub fn connect_url(
    connection: &dyn Connection,
    connection_data: &str,
    transport: &str,
    reconnecting: bool,
) -> Result<Url> {
    let action = if reconnecting { "reconnect" } else { "connect" };
    let raw = format!(
        "{}{}{}",
        connection.url(),
        action,
        receive_query_string(connection, connection_data, transport)
    );

    let mut url = Url::parse(&raw).map_err(|e| Error::invalid_url(&raw, e.to_string()))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::invalid_url(&raw, format!("cannot switch scheme to {scheme}")))?;

    Ok(url)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::mock::MockConnection;

    #[test]
    fn test_query_string_minimal() {
        let conn = MockConnection::new("http://localhost/signalr/");
        assert_eq!(receive_query_string(&conn, "", "webSockets"), "?transport=webSockets");
    }

    #[test]
    fn test_query_string_full() {
        let conn = MockConnection::new("http://localhost/signalr/")
            .with_token("a b/c")
            .with_message_id("m1")
            .with_groups_token("g+1")
            .with_query_string("?tenant=7");

        let qs = receive_query_string(&conn, "%5B%5D", "webSockets");
        assert_eq!(
            qs,
            "?transport=webSockets&connectionToken=a%20b%2Fc&messageId=m1\
             &groupsToken=g%2B1&connectionData=%5B%5D&tenant=7"
        );
    }

    #[test]
    fn test_connect_url_upgrades_http() {
        let conn = MockConnection::new("http://example.com/signalr/");
        let url = connect_url(&conn, "", "webSockets", false).expect("valid url");
        assert_eq!(url.as_str(), "ws://example.com/signalr/connect?transport=webSockets");
    }

    #[test]
    fn test_reconnect_url_upgrades_https() {
        let conn = MockConnection::new("https://example.com:8443/signalr/").with_token("t");
        let url = connect_url(&conn, "", "webSockets", true).expect("valid url");
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.port(), Some(8443));
        assert_eq!(url.path(), "/signalr/reconnect");
        assert_eq!(url.query(), Some("transport=webSockets&connectionToken=t"));
    }

    #[test]
    fn test_connect_url_rejects_garbage() {
        let conn = MockConnection::new("not a url");
        let err = connect_url(&conn, "", "webSockets", false).expect_err("invalid");
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }
}
