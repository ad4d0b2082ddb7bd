//! Connection lifecycle state machine.
//!
//! [`WebSocketTransport`] orchestrates one logical connection lineage: the
//! first connect, silent reconnects after unexpected drops, cooperative
//! abort, and teardown.
//!
//! # State Machine
//!
//! ```text
//!          start               opened
//!  Idle ─────────► Connecting ─────────► Open ◄──────────┐
//!                      │                  │  │            │ opened
//!                      │ failed           │  │ closed     │
//!                      ▼                  │  ▼            │
//!                  Disposed ◄─────────────┼─ Reconnecting ┘
//!                      ▲    exhausted     │
//!                      │                  │ abort
//!                      └──── Aborting ◄───┘
//! ```
//!
//! # Locking
//!
//! State, the active attempt and the connection info live behind one
//! `parking_lot::Mutex`. It is never held while calling into the
//! [`Connection`] or starting a socket, so socket events raised
//! synchronously from `open` cannot deadlock.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, trace, warn};

use crate::completion::{Completion, CompletionSource};
use crate::config::{TransportBuilder, TransportConfig};
use crate::connection::{Connection, ConnectionState, MessageOutcome, TraceLevel};
use crate::endpoint::connect_url;
use crate::error::{Error, Result};
use crate::http::{HttpClient, NegotiationResponse};
use crate::identifiers::AttemptId;
use crate::proxy::ProxyResolver;

use super::abort::{AbortCoordinator, AbortOutcome};
use super::reconnect::{AttemptFailure, ReconnectOutcome, ReconnectPolicy};
use super::socket::{EventCallback, SocketAdapter, SocketEvent, SocketFactory};
use super::state::LifecycleState;

// ============================================================================
// Constants
// ============================================================================

/// Transport name sent as `transport=` on every request.
pub const TRANSPORT_NAME: &str = "webSockets";

// ============================================================================
// Types
// ============================================================================

/// Connection handle and opaque connection data captured by `start`.
#[derive(Clone)]
struct ConnectionInfo {
    connection: Arc<dyn Connection>,
    data: String,
}

/// One connect attempt and the socket it owns.
struct Attempt {
    adapter: SocketAdapter,
    /// Child of the instance token; cancelled by `lost_connection`.
    token: CancellationToken,
    /// Settles the attempt's completion.
    opened: CompletionSource<()>,
    /// Set once the failure reached the error sink.
    reported: Arc<AtomicBool>,
    is_open: bool,
}

impl Attempt {
    #[inline]
    fn id(&self) -> AttemptId {
        self.adapter.id()
    }

    /// Closes the socket and cancels the attempt if still unsettled.
    fn release(self) {
        self.adapter.teardown(false);
        self.token.cancel();
        let _ = self.opened.cancel();
    }
}

/// Everything guarded by the lifecycle lock.
struct Shared {
    state: LifecycleState,
    info: Option<ConnectionInfo>,
    attempt: Option<Attempt>,
    /// Child of the caller's disconnect token; cancelled by dispose.
    instance: CancellationToken,
    /// Bumped for every reconnect loop started.
    generation: u64,
}

impl Shared {
    /// Returns the active attempt if it is `id`.
    fn attempt_mut(&mut self, id: AttemptId) -> Option<&mut Attempt> {
        self.attempt.as_mut().filter(|attempt| attempt.id() == id)
    }

    /// Removes the active attempt if it is `id`.
    fn take_attempt(&mut self, id: AttemptId) -> Option<Attempt> {
        if self.attempt.as_ref().is_some_and(|attempt| attempt.id() == id) {
            self.attempt.take()
        } else {
            None
        }
    }

    fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.info.as_ref().map(|info| Arc::clone(&info.connection))
    }
}

// ============================================================================
// WebSocketTransport
// ============================================================================

/// Reconnecting WebSocket transport for one logical connection.
///
/// Cheap to clone; clones share the same state. Requires a Tokio runtime:
/// `start`, socket events and `lost_connection` spawn tasks.
#[derive(Clone)]
pub struct WebSocketTransport {
    inner: Arc<TransportInner>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

struct TransportInner {
    config: TransportConfig,
    http: Arc<dyn HttpClient>,
    factory: Arc<dyn SocketFactory>,
    resolver: Arc<dyn ProxyResolver>,
    reconnect: ReconnectPolicy,
    abort: AbortCoordinator,
    /// Teardown guard; flipped exactly once.
    disposed: AtomicBool,
    shared: Mutex<Shared>,
}

// ============================================================================
// WebSocketTransport - Public API
// ============================================================================

impl WebSocketTransport {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> TransportBuilder {
        TransportBuilder::new()
    }

    pub(crate) fn new(
        config: TransportConfig,
        http: Arc<dyn HttpClient>,
        factory: Arc<dyn SocketFactory>,
        resolver: Arc<dyn ProxyResolver>,
    ) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                reconnect: ReconnectPolicy::new(config.reconnect_delay),
                config,
                http,
                factory,
                resolver,
                abort: AbortCoordinator::new(),
                disposed: AtomicBool::new(false),
                shared: Mutex::new(Shared {
                    state: LifecycleState::Idle,
                    info: None,
                    attempt: None,
                    instance: CancellationToken::new(),
                    generation: 0,
                }),
            }),
        }
    }

    /// Returns the transport name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        TRANSPORT_NAME
    }

    /// Returns `true`; this transport supports keep-alive.
    #[inline]
    #[must_use]
    pub fn supports_keep_alive(&self) -> bool {
        true
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.inner.shared.lock().state
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Performs the negotiation request.
    ///
    /// # Errors
    ///
    /// Whatever the HTTP client reports.
    pub async fn negotiate(
        &self,
        connection: &dyn Connection,
        connection_data: &str,
    ) -> Result<NegotiationResponse> {
        self.inner.http.negotiate(connection, connection_data).await
    }

    /// Begins the first connect attempt.
    ///
    /// The returned completion resolves on the first open, fails on the
    /// first unrecoverable connect error (after `retry_initial_connect`
    /// retries), or resolves to [`Error::Cancelled`] if `disconnect` fires or
    /// the transport is disposed first. A failed start leaves the transport
    /// disposed.
    ///
    /// Only one `start` per instance is accepted; later calls fail with
    /// [`Error::InvalidState`].
    pub fn start(
        &self,
        connection: Arc<dyn Connection>,
        connection_data: impl Into<String>,
        disconnect: CancellationToken,
    ) -> Completion<()> {
        let instance = {
            let mut shared = self.inner.shared.lock();
            match shared.state {
                LifecycleState::Idle => {}
                LifecycleState::Disposed => return Completion::ready(Err(Error::Disposed)),
                _ => return Completion::ready(Err(Error::already_started())),
            }

            shared.state = LifecycleState::Connecting;
            shared.info = Some(ConnectionInfo {
                connection: Arc::clone(&connection),
                data: connection_data.into(),
            });
            shared.instance = disconnect.child_token();
            shared.instance.clone()
        };

        info!(transport = TRANSPORT_NAME, url = connection.url(), "Starting transport");
        connection.trace(TraceLevel::StateChanges, "Transport starting");

        let weak = Arc::downgrade(&self.inner);
        let watched = instance.clone();
        tokio::spawn(
            async move {
                watched.cancelled().await;
                if let Some(inner) = weak.upgrade() {
                    debug!("Disconnect requested");
                    inner.dispose();
                }
            }
            .in_current_span(),
        );

        let (source, completion) = CompletionSource::new();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(
            async move {
                let result = inner.initial_connect(&instance).await;
                let _ = match result {
                    Ok(()) => source.succeed(()),
                    Err(e) if e.is_request_aborted() => {
                        debug!(error = %e, "Transport start cancelled");
                        inner.dispose();
                        source.cancel()
                    }
                    Err(e) => {
                        warn!(error = %e, "Transport failed to start");
                        inner.dispose();
                        source.fail(e)
                    }
                };
            }
            .in_current_span(),
        );

        completion
    }

    /// Sends one payload over the open socket.
    ///
    /// # Errors
    ///
    /// - [`Error::Disposed`] after dispose
    /// - [`Error::InvalidState`] if the transport is not `Open`; nothing is
    ///   transmitted
    pub fn send(&self, data: &str) -> Result<()> {
        let adapter = {
            let shared = self.inner.shared.lock();
            if shared.state.is_terminal() {
                return Err(Error::Disposed);
            }
            if !shared.state.can_send() {
                return Err(Error::invalid_state(shared.state));
            }
            match &shared.attempt {
                Some(attempt) if attempt.is_open => attempt.adapter.clone(),
                _ => return Err(Error::socket_not_open()),
            }
        };

        trace!(attempt = %adapter.id(), len = data.len(), "Sending payload");
        adapter.send(data)
    }

    /// Cooperative shutdown.
    ///
    /// Sends the abort request and waits up to `timeout` for the remote to
    /// close the socket. Whatever the outcome, the transport ends disposed.
    /// Before `start` this is a no-op returning [`AbortOutcome::Moot`].
    pub async fn abort(&self, timeout: Duration) -> AbortOutcome {
        let info = {
            let mut shared = self.inner.shared.lock();
            if matches!(shared.state, LifecycleState::Idle | LifecycleState::Disposed) {
                return AbortOutcome::Moot;
            }
            let Some(info) = shared.info.clone() else {
                return AbortOutcome::Moot;
            };
            // Closes observed from here on count as the acknowledgement.
            shared.state = LifecycleState::Aborting;
            self.inner.abort.mark_requested();
            info
        };

        debug!(timeout_ms = timeout.as_millis() as u64, "Aborting transport");

        let outcome = self
            .inner
            .abort
            .request(
                Arc::clone(&self.inner.http),
                Arc::clone(&info.connection),
                TRANSPORT_NAME,
                info.data.clone(),
                timeout,
            )
            .await;

        match outcome {
            AbortOutcome::Acknowledged => {
                debug!("Abort acknowledged");
            }
            AbortOutcome::TimedOut => {
                let e = Error::abort_timeout(timeout.as_millis() as u64);
                warn!(error = %e, "Forcing close");
                info.connection
                    .trace(TraceLevel::Events, "Abort was not acknowledged, forcing close");
            }
            AbortOutcome::Moot => {
                debug!("Abort moot, transport already disposed");
            }
        }

        self.inner.dispose();
        outcome
    }

    /// [`abort`](Self::abort) with the configured default timeout.
    pub async fn abort_with_default_timeout(&self) -> AbortOutcome {
        self.abort(self.inner.config.abort_timeout).await
    }

    /// Abandons the current attempt.
    ///
    /// Cancels only the active attempt's token. A pending attempt is retried
    /// by whoever started it; an open socket is closed and the reconnect loop
    /// takes over.
    pub fn lost_connection(&self) {
        let token = {
            let shared = self.inner.shared.lock();
            shared.attempt.as_ref().map(|attempt| attempt.token.clone())
        };

        if let Some(token) = token {
            debug!("Connection lost, abandoning attempt");
            token.cancel();
        }
    }

    /// Irreversible teardown. Safe to call any number of times from any task.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

// ============================================================================
// TransportInner - Connect
// ============================================================================

impl TransportInner {
    /// First connect, with the configured number of retries.
    async fn initial_connect(self: &Arc<Self>, instance: &CancellationToken) -> Result<()> {
        let mut retries_left = self.config.retry_initial_connect;

        loop {
            match self.connect(false).await {
                Ok(()) => return Ok(()),

                Err(failure) if failure.error.is_connection_lost() && !instance.is_cancelled() => {
                    debug!("Initial attempt abandoned, retrying");
                }

                Err(failure) if failure.error.is_request_aborted() || instance.is_cancelled() => {
                    return Err(Error::Cancelled);
                }

                Err(AttemptFailure { error, reported }) if retries_left > 0 => {
                    retries_left -= 1;
                    warn!(error = %error, retries_left, "Initial connect failed, retrying");
                    let connection = self.shared.lock().connection();
                    if let (Some(connection), false) = (connection, reported) {
                        connection.on_error(&error);
                    }

                    tokio::select! {
                        () = instance.cancelled() => return Err(Error::Cancelled),
                        () = tokio::time::sleep(self.reconnect.delay()) => {}
                    }
                }

                Err(failure) => return Err(failure.error),
            }
        }
    }

    /// Runs one connect attempt to completion.
    async fn connect(self: &Arc<Self>, reconnecting: bool) -> std::result::Result<(), AttemptFailure> {
        let (completion, reported) = self.begin_attempt(reconnecting);
        completion.await.map_err(|error| AttemptFailure {
            error,
            reported: reported.load(Ordering::Acquire),
        })
    }

    /// Starts one connect attempt, replacing any previous one.
    ///
    /// Returns the attempt's completion and its reported flag.
    fn begin_attempt(self: &Arc<Self>, reconnecting: bool) -> (Completion<()>, Arc<AtomicBool>) {
        let reported = Arc::new(AtomicBool::new(false));
        let failed = |error: Error| (Completion::ready(Err(error)), Arc::clone(&reported));

        let info = {
            let shared = self.shared.lock();
            if shared.state.is_terminal() {
                return failed(Error::Disposed);
            }
            match &shared.info {
                Some(info) => info.clone(),
                None => return failed(Error::invalid_state(shared.state)),
            }
        };

        if self.abort.is_requested() {
            return failed(Error::request_cancelled("abort in progress"));
        }

        let uri = match connect_url(
            info.connection.as_ref(),
            &info.data,
            TRANSPORT_NAME,
            reconnecting,
        ) {
            Ok(uri) => uri,
            Err(e) => return failed(e),
        };
        let proxy = self.resolver.resolve(&uri);

        let id = AttemptId::next();
        let (opened, completion) = CompletionSource::new();

        let adapter = {
            let mut shared = self.shared.lock();
            if shared.state.is_terminal() {
                return failed(Error::Disposed);
            }

            // The old socket is unregistered before the new one is wired.
            if let Some(previous) = shared.attempt.take() {
                trace!(previous = %previous.id(), attempt = %id, "Replacing attempt");
                previous.release();
            }

            let adapter = SocketAdapter::new(
                id,
                self.factory.as_ref(),
                uri.clone(),
                proxy,
                self.event_callback(id),
            );
            let token = shared.instance.child_token();
            self.watch_attempt(id, token.clone());

            if shared.state != LifecycleState::Aborting {
                shared.state = if reconnecting {
                    LifecycleState::Reconnecting
                } else {
                    LifecycleState::Connecting
                };
            }
            shared.attempt = Some(Attempt {
                adapter: adapter.clone(),
                token,
                opened,
                reported: Arc::clone(&reported),
                is_open: false,
            });
            adapter
        };

        debug!(attempt = %id, reconnecting, uri = %uri, "Connecting");
        info.connection
            .trace(TraceLevel::Events, &format!("Connecting to {uri}"));

        adapter.start();
        (completion, reported)
    }

    /// Socket callback routing events of attempt `id` back here.
    fn event_callback(self: &Arc<Self>, id: AttemptId) -> EventCallback {
        let weak: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_socket_event(id, event);
            }
        })
    }

    /// Reacts to `lost_connection` on attempt `id`.
    fn watch_attempt(self: &Arc<Self>, id: AttemptId, token: CancellationToken) {
        let weak = Arc::downgrade(self);
        tokio::spawn(
            async move {
                token.cancelled().await;
                if let Some(inner) = weak.upgrade() {
                    inner.on_attempt_cancelled(id);
                }
            }
            .in_current_span(),
        );
    }
}

// ============================================================================
// TransportInner - Socket Events
// ============================================================================

impl TransportInner {
    fn on_socket_event(self: &Arc<Self>, id: AttemptId, event: SocketEvent) {
        match event {
            SocketEvent::Opened => self.on_opened(id),
            SocketEvent::Error(e) => self.on_error(id, e),
            SocketEvent::Closed => self.on_closed(id),
            SocketEvent::Message(payload) => self.on_message(id, &payload),
        }
    }

    fn on_opened(&self, id: AttemptId) {
        let (opened, connection) = {
            let mut shared = self.shared.lock();
            if shared.state.is_terminal() {
                return;
            }
            let Some(attempt) = shared.attempt_mut(id) else {
                trace!(attempt = %id, "Ignoring open from stale attempt");
                return;
            };
            attempt.is_open = true;
            let opened = attempt.opened.clone();
            if shared.state != LifecycleState::Aborting {
                shared.state = LifecycleState::Open;
            }
            (opened, shared.connection())
        };

        debug!(attempt = %id, "Socket opened");

        if let Some(connection) = connection {
            connection.trace(TraceLevel::StateChanges, "Socket opened");
            if connection.change_state(ConnectionState::Reconnecting, ConnectionState::Connected) {
                info!(attempt = %id, "Reconnected");
                connection.on_reconnected();
            }
        }

        let _ = opened.succeed(());
    }

    fn on_error(&self, id: AttemptId, error: Error) {
        enum Disposition {
            PreOpen(Attempt, Option<Arc<dyn Connection>>),
            Open(Option<Arc<dyn Connection>>),
        }

        let disposition = {
            let mut shared = self.shared.lock();
            match shared.attempt_mut(id).map(|attempt| attempt.is_open) {
                Some(false) => {
                    let connection = shared.connection();
                    shared
                        .take_attempt(id)
                        .map(|attempt| Disposition::PreOpen(attempt, connection))
                }
                Some(true) => Some(Disposition::Open(shared.connection())),
                None => None,
            }
        };

        match disposition {
            Some(Disposition::PreOpen(attempt, connection)) => {
                debug!(attempt = %id, error = %error, "Socket failed before opening");
                attempt.adapter.teardown(false);
                attempt.token.cancel();
                if let (Some(connection), false) = (connection, error.is_request_aborted()) {
                    connection.on_error(&error);
                    attempt.reported.store(true, Ordering::Release);
                }
                let _ = attempt.opened.fail(error);
            }
            Some(Disposition::Open(connection)) => {
                if error.is_request_aborted() {
                    debug!(attempt = %id, error = %error, "Socket error during shutdown");
                } else if let Some(connection) = connection {
                    warn!(attempt = %id, error = %error, "Socket error");
                    connection.on_error(&error);
                }
            }
            None => {
                trace!(attempt = %id, error = %error, "Ignoring error from stale attempt");
            }
        }
    }

    fn on_closed(self: &Arc<Self>, id: AttemptId) {
        let (attempt, connection, shutting_down, acknowledged) = {
            let mut shared = self.shared.lock();
            let Some(attempt) = shared.take_attempt(id) else {
                trace!(attempt = %id, "Ignoring close from stale attempt");
                return;
            };
            let shutting_down = shared.state.is_terminal() || shared.instance.is_cancelled();
            // Decided under the lock that `abort` marks the request under.
            let acknowledged = attempt.is_open && self.abort.try_complete();
            (attempt, shared.connection(), shutting_down, acknowledged)
        };

        attempt.adapter.teardown(true);
        attempt.token.cancel();

        if !attempt.is_open {
            debug!(attempt = %id, "Socket closed before opening");
            let _ = attempt.opened.fail(Error::ConnectionClosed);
            return;
        }

        if acknowledged {
            debug!(attempt = %id, "Socket closed by abort");
            if let Some(connection) = &connection {
                connection.trace(TraceLevel::Events, "Abort acknowledged by remote");
            }
            self.dispose();
            return;
        }

        if shutting_down {
            return;
        }

        info!(attempt = %id, "Socket closed unexpectedly");
        if let Some(connection) = &connection {
            connection.trace(TraceLevel::Events, "Connection lost, reconnecting");
        }
        self.spawn_reconnect();
    }

    fn on_message(&self, id: AttemptId, payload: &str) {
        let connection = {
            let shared = self.shared.lock();
            if shared.attempt.as_ref().is_none_or(|attempt| attempt.id() != id) {
                trace!(attempt = %id, "Ignoring message from stale attempt");
                return;
            }
            shared.connection()
        };
        let Some(connection) = connection else {
            return;
        };

        connection.mark_last_message();
        connection.trace(TraceLevel::Messages, &format!("OnMessage({payload})"));

        match connection.on_received(payload) {
            Ok(MessageOutcome::Continue) => {}
            Ok(MessageOutcome::Disconnect) => {
                debug!(attempt = %id, "Server requested disconnect");
                connection.disconnect();
            }
            Err(e) if e.is_request_aborted() => {
                debug!(error = %e, "Message processing cancelled");
            }
            Err(e) => {
                warn!(error = %e, "Message processing failed");
                connection.on_error(&e);
            }
        }
    }

    fn on_attempt_cancelled(self: &Arc<Self>, id: AttemptId) {
        let attempt = {
            let mut shared = self.shared.lock();
            if shared.state.is_terminal() {
                return;
            }
            shared.take_attempt(id)
        };
        let Some(attempt) = attempt else {
            return;
        };

        let was_open = attempt.is_open;
        debug!(attempt = %id, was_open, "Attempt abandoned");
        attempt.adapter.teardown(false);
        let _ = attempt.opened.fail(Error::ConnectionLost);

        if was_open {
            self.spawn_reconnect();
        }
    }
}

// ============================================================================
// TransportInner - Reconnect & Dispose
// ============================================================================

impl TransportInner {
    fn spawn_reconnect(self: &Arc<Self>) {
        let (connection, instance, generation) = {
            let mut shared = self.shared.lock();
            if shared.state.is_terminal() || self.abort.is_requested() {
                return;
            }
            let Some(connection) = shared.connection() else {
                return;
            };
            shared.state = LifecycleState::Reconnecting;
            shared.generation += 1;
            (connection, shared.instance.clone(), shared.generation)
        };

        let inner = Arc::clone(self);
        tokio::spawn(
            async move {
                let outcome = inner
                    .reconnect
                    .run(
                        connection.as_ref(),
                        &instance,
                        || inner.is_current_loop(generation),
                        || inner.connect(true),
                    )
                    .await;

                match outcome {
                    ReconnectOutcome::Reconnected | ReconnectOutcome::Superseded => {
                        debug!(generation, ?outcome, "Reconnect loop finished");
                    }
                    ReconnectOutcome::Exhausted | ReconnectOutcome::Cancelled => {
                        debug!(generation, ?outcome, "Reconnect loop gave up");
                        inner.dispose();
                    }
                }
            }
            .in_current_span(),
        );
    }

    fn is_current_loop(&self, generation: u64) -> bool {
        if self.abort.is_requested() {
            return false;
        }
        let shared = self.shared.lock();
        shared.generation == generation && !shared.state.is_terminal()
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let (attempt, instance, connection) = {
            let mut shared = self.shared.lock();
            shared.state = LifecycleState::Disposed;
            (
                shared.attempt.take(),
                shared.instance.clone(),
                shared.connection(),
            )
        };

        instance.cancel();
        if let Some(attempt) = attempt {
            attempt.release();
        }
        self.abort.dispose();

        debug!("Transport disposed");
        if let Some(connection) = connection {
            connection.trace(TraceLevel::StateChanges, "Transport disposed");
        }
    }
}

impl Drop for TransportInner {
    fn drop(&mut self) {
        // Releases the disconnect watcher and the socket when dropped without
        // dispose.
        let shared = self.shared.get_mut();
        shared.instance.cancel();
        if let Some(attempt) = shared.attempt.take() {
            attempt.release();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
