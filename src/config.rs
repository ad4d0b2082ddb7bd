//! Transport configuration and builder.
//!
//! Provides a fluent API for configuring and creating
//! [`WebSocketTransport`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use ws_transport::{HttpClient, WebSocketTransport};
//!
//! # fn example(http: Arc<dyn HttpClient>) -> ws_transport::Result<()> {
//! let transport = WebSocketTransport::builder()
//!     .http_client(http)
//!     .reconnect_delay(Duration::from_secs(1))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::proxy::{NoProxy, ProxyResolver};
use crate::transport::{
    DEFAULT_RECONNECT_DELAY, SocketFactory, TungsteniteSocketFactory, WebSocketTransport,
};

// ============================================================================
// Constants
// ============================================================================

/// Default time to wait for the remote to acknowledge an abort.
pub const DEFAULT_ABORT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// TransportConfig
// ============================================================================

/// Tunables of a [`WebSocketTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,

    /// Extra attempts for the very first connect before `start` fails.
    ///
    /// `0` fails `start` on the first error.
    pub retry_initial_connect: u32,

    /// Timeout used by [`WebSocketTransport::abort_with_default_timeout`].
    pub abort_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            retry_initial_connect: 0,
            abort_timeout: DEFAULT_ABORT_TIMEOUT,
        }
    }
}

// ============================================================================
// TransportBuilder
// ============================================================================

/// Builder for configuring a [`WebSocketTransport`].
///
/// Use [`WebSocketTransport::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct TransportBuilder {
    /// Tunables.
    config: TransportConfig,
    /// Negotiation and abort requests.
    http: Option<Arc<dyn HttpClient>>,
    /// Socket source, defaults to tungstenite.
    factory: Option<Arc<dyn SocketFactory>>,
    /// Proxy lookup, defaults to none.
    resolver: Option<Arc<dyn ProxyResolver>>,
}

impl fmt::Debug for TransportBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportBuilder")
            .field("config", &self.config)
            .field("http", &self.http.is_some())
            .field("factory", &self.factory.is_some())
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

impl TransportBuilder {
    /// Creates a builder with default configuration and no collaborators.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the HTTP client used for negotiation and abort. Required.
    #[inline]
    #[must_use]
    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    /// Sets the socket factory.
    #[inline]
    #[must_use]
    pub fn socket_factory(mut self, factory: Arc<dyn SocketFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Sets the proxy resolver.
    #[inline]
    #[must_use]
    pub fn proxy_resolver(mut self, resolver: Arc<dyn ProxyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Sets the delay between reconnect attempts.
    #[inline]
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    /// Sets how many times the first connect is retried before `start`
    /// fails.
    #[inline]
    #[must_use]
    pub fn retry_initial_connect(mut self, retries: u32) -> Self {
        self.config.retry_initial_connect = retries;
        self
    }

    /// Sets the default abort timeout.
    #[inline]
    #[must_use]
    pub fn abort_timeout(mut self, timeout: Duration) -> Self {
        self.config.abort_timeout = timeout;
        self
    }

    /// Replaces all tunables at once.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the transport with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no HTTP client was set
    /// - [`Error::Config`] if the reconnect delay is zero
    pub fn build(self) -> Result<WebSocketTransport> {
        let http = self.validate_http()?;
        self.validate_config()?;

        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(TungsteniteSocketFactory));
        let resolver = self.resolver.unwrap_or_else(|| Arc::new(NoProxy));

        Ok(WebSocketTransport::new(self.config, http, factory, resolver))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl TransportBuilder {
    /// Validates the HTTP client.
    fn validate_http(&self) -> Result<Arc<dyn HttpClient>> {
        self.http.clone().ok_or_else(|| {
            Error::config(
                "HTTP client is required. Use .http_client() to set it.\n\
                 Example: WebSocketTransport::builder().http_client(client)",
            )
        })
    }

    /// Validates the tunables.
    fn validate_config(&self) -> Result<()> {
        if self.config.reconnect_delay.is_zero() {
            return Err(Error::config(
                "Reconnect delay must be greater than zero.\n\
                 Example: .reconnect_delay(Duration::from_secs(2))",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
