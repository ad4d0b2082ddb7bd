//! Reconnecting WebSocket client transport.
//!
//! This library provides the transport half of a persistent, bidirectional
//! message channel: it opens a WebSocket to a remote endpoint, keeps it
//! alive across transient failures, and supports a cooperative shutdown
//! acknowledged by the remote.
//!
//! # Architecture
//!
//! The transport sits between a higher-level connection manager and a
//! socket:
//!
//! - **Connection manager** (your code, [`Connection`]): owns framing,
//!   application state, tracing and message dispatch
//! - **Transport** ([`WebSocketTransport`]): owns the lifecycle state
//!   machine, reconnects and abort
//! - **Socket** ([`Socket`]): one WebSocket per connect attempt, by default
//!   [`TungsteniteSocket`]
//!
//! Key design principles:
//!
//! - One socket instance is registered for events at any time
//! - `start` settles exactly once
//! - `dispose` is idempotent and safe from any task
//! - Cancellations never reach the error sink
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tokio_util::sync::CancellationToken;
//! use ws_transport::{Connection, HttpClient, Result, WebSocketTransport};
//!
//! async fn run(http: Arc<dyn HttpClient>, connection: Arc<dyn Connection>) -> Result<()> {
//!     let transport = WebSocketTransport::builder()
//!         .http_client(http)
//!         .reconnect_delay(Duration::from_secs(2))
//!         .build()?;
//!
//!     transport
//!         .start(connection, "", CancellationToken::new())
//!         .await?;
//!
//!     transport.send("{\"H\":\"chat\",\"M\":\"send\",\"A\":[\"hi\"]}")?;
//!
//!     transport.abort(Duration::from_secs(5)).await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`completion`] | Single-fulfilment completion bridge |
//! | [`config`] | Configuration and builder |
//! | [`connection`] | The connection manager trait |
//! | [`endpoint`] | Connect URL construction |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`http`] | HTTP side-channel trait and negotiation model |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`proxy`] | Proxy discovery and CONNECT tunnelling |
//! | [`transport`] | Lifecycle, sockets, abort and reconnect |

// ============================================================================
// Modules
// ============================================================================

/// Single-fulfilment completion bridge.
pub mod completion;

/// Transport configuration and builder.
pub mod config;

/// The connection manager as seen by the transport.
pub mod connection;

/// Connect URL and query string construction.
pub mod endpoint;

/// Error types and result alias.
pub mod error;

/// HTTP side-channel.
pub mod http;

/// Type-safe identifiers.
pub mod identifiers;

/// Proxy discovery and tunnelling.
pub mod proxy;

/// WebSocket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

pub use completion::{Completion, CompletionSource};
pub use config::{DEFAULT_ABORT_TIMEOUT, TransportBuilder, TransportConfig};
pub use connection::{Connection, ConnectionState, MessageOutcome, TraceLevel};
pub use error::{Error, Result};
pub use http::{HttpClient, NegotiationResponse};
pub use identifiers::AttemptId;
pub use proxy::{EnvProxyResolver, NoProxy, ProxyResolver, ProxySettings};
pub use transport::{
    AbortOutcome, LifecycleState, Socket, SocketEvent, SocketEvents, SocketFactory,
    TRANSPORT_NAME, TungsteniteSocket, TungsteniteSocketFactory, WebSocketTransport,
};
