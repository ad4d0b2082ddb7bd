//! HTTP side-channel collaborator.
//!
//! Negotiation and abort notifications travel over plain HTTP, outside the
//! socket. The transport only needs the two requests below; the client
//! behind them is supplied by the application.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::connection::Connection;
use crate::error::Result;

// ============================================================================
// NegotiationResponse
// ============================================================================

/// Connection metadata returned by the negotiation handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NegotiationResponse {
    /// Relative URL of the endpoint.
    pub url: String,

    /// Opaque token for the logical connection.
    pub connection_token: String,

    /// Server-assigned connection ID.
    pub connection_id: String,

    /// Seconds between keep-alives, absent when keep-alive is off.
    #[serde(default)]
    pub keep_alive_timeout: Option<f64>,

    /// Seconds the server keeps a dropped connection alive.
    pub disconnect_timeout: f64,

    /// Whether the server accepts WebSocket connections.
    #[serde(default)]
    pub try_web_sockets: bool,

    /// Protocol version spoken by the server.
    pub protocol_version: String,

    /// Seconds a transport may take to connect.
    #[serde(default)]
    pub transport_connect_timeout: Option<f64>,
}

impl NegotiationResponse {
    /// Parses a negotiation payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the payload is malformed.
    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}

// ============================================================================
// HttpClient
// ============================================================================

/// Out-of-band HTTP requests used by the transport.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Performs the negotiation request.
    async fn negotiate(
        &self,
        connection: &dyn Connection,
        connection_data: &str,
    ) -> Result<NegotiationResponse>;

    /// Tells the remote endpoint the client is shutting down.
    ///
    /// The remote acknowledges by closing the socket.
    async fn abort(
        &self,
        connection: &dyn Connection,
        transport: &str,
        connection_data: &str,
    ) -> Result<()>;
}

// ============================================================================
// Tests
// ============================================================================
