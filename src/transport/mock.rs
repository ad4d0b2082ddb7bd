//! Test doubles: scripted sockets, a recording connection and HTTP client.
//!
//! Mocks never hold their own lock while emitting socket events, so the
//! lifecycle may call straight back into them.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::connection::{Connection, ConnectionState, MessageOutcome, TraceLevel};
use crate::error::{Error, Result};
use crate::http::{HttpClient, NegotiationResponse};
use crate::proxy::ProxySettings;

use super::socket::{Socket, SocketEvent, SocketEvents, SocketFactory};

// ============================================================================
// Logging
// ============================================================================

/// Installs a test subscriber once; filter with `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MockSocket
// ============================================================================

/// What a mock socket does when opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenBehavior {
    /// Raise `Opened` from inside `open`.
    OpenImmediately,
    /// Raise `Error` then `Closed` from inside `open`.
    FailImmediately,
    /// Wait for the test to fire events.
    Manual,
}

/// Socket driven by the test.
pub(crate) struct MockSocket {
    uri: Url,
    proxy: Option<ProxySettings>,
    behavior: OpenBehavior,
    events: Mutex<Option<SocketEvents>>,
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
    closes: AtomicUsize,
}

impl MockSocket {
    fn new(uri: Url, proxy: Option<ProxySettings>, behavior: OpenBehavior) -> Self {
        Self {
            uri,
            proxy,
            behavior,
            events: Mutex::new(None),
            open: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        }
    }

    pub(crate) fn uri(&self) -> &Url {
        &self.uri
    }

    pub(crate) fn proxy(&self) -> Option<&ProxySettings> {
        self.proxy.as_ref()
    }

    fn emit(&self, event: SocketEvent) -> bool {
        let events = self.events.lock().clone();
        events.is_some_and(|events| events.emit(event))
    }

    pub(crate) fn fire_open(&self) -> bool {
        self.open.store(true, Ordering::SeqCst);
        self.emit(SocketEvent::Opened)
    }

    pub(crate) fn fire_error(&self, error: Error) -> bool {
        self.emit(SocketEvent::Error(error))
    }

    pub(crate) fn fire_close(&self) -> bool {
        self.open.store(false, Ordering::SeqCst);
        self.emit(SocketEvent::Closed)
    }

    pub(crate) fn fire_message(&self, payload: &str) -> bool {
        self.emit(SocketEvent::Message(payload.to_owned()))
    }

    /// Returns `true` while someone listens to this socket.
    pub(crate) fn is_registered(&self) -> bool {
        self.events
            .lock()
            .as_ref()
            .is_some_and(SocketEvents::is_registered)
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Socket for MockSocket {
    fn open(&self, events: SocketEvents) {
        *self.events.lock() = Some(events);

        match self.behavior {
            OpenBehavior::OpenImmediately => {
                self.fire_open();
            }
            OpenBehavior::FailImmediately => {
                self.fire_error(Error::connect_failure("connection refused"));
                self.fire_close();
            }
            OpenBehavior::Manual => {}
        }
    }

    fn send(&self, payload: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::socket_not_open());
        }
        self.sent.lock().push(payload.to_owned());
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.open.swap(false, Ordering::SeqCst) {
            self.emit(SocketEvent::Closed);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

// ============================================================================
// MockSocketFactory
// ============================================================================

/// Hands out [`MockSocket`]s and remembers every one it created.
pub(crate) struct MockSocketFactory {
    default: OpenBehavior,
    script: Mutex<VecDeque<OpenBehavior>>,
    sockets: Mutex<Vec<Arc<MockSocket>>>,
}

impl MockSocketFactory {
    pub(crate) fn new(default: OpenBehavior) -> Self {
        Self {
            default,
            script: Mutex::new(VecDeque::new()),
            sockets: Mutex::new(Vec::new()),
        }
    }

    /// Queues the behaviour of the next socket created.
    pub(crate) fn push_behavior(&self, behavior: OpenBehavior) {
        self.script.lock().push_back(behavior);
    }

    pub(crate) fn socket(&self, index: usize) -> Arc<MockSocket> {
        Arc::clone(&self.sockets.lock()[index])
    }

    pub(crate) fn count(&self) -> usize {
        self.sockets.lock().len()
    }

    /// Number of sockets still registered for events.
    pub(crate) fn registered_count(&self) -> usize {
        self.sockets
            .lock()
            .iter()
            .filter(|socket| socket.is_registered())
            .count()
    }
}

impl SocketFactory for MockSocketFactory {
    fn create(&self, uri: Url, proxy: Option<ProxySettings>) -> Arc<dyn Socket> {
        let behavior = self.script.lock().pop_front().unwrap_or(self.default);
        let socket = Arc::new(MockSocket::new(uri, proxy, behavior));
        self.sockets.lock().push(Arc::clone(&socket));
        socket
    }
}

// ============================================================================
// MockConnection
// ============================================================================

type ErrorFactory = Box<dyn Fn() -> Error + Send + Sync>;

/// Connection manager recording everything the transport tells it.
pub(crate) struct MockConnection {
    url: String,
    token: Option<String>,
    message_id: Option<String>,
    groups_token: Option<String>,
    query_string: Option<String>,
    state: Mutex<ConnectionState>,
    last_active: Mutex<Instant>,
    reconnect_window: Mutex<Duration>,
    receive_outcome: Mutex<MessageOutcome>,
    receive_error: Mutex<Option<ErrorFactory>>,
    errors: Mutex<Vec<String>>,
    received: Mutex<Vec<String>>,
    traces: Mutex<Vec<(TraceLevel, String)>>,
    marks: AtomicUsize,
    disconnects: AtomicUsize,
    reconnecting: AtomicUsize,
    reconnected: AtomicUsize,
}

impl MockConnection {
    pub(crate) fn new(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            token: None,
            message_id: None,
            groups_token: None,
            query_string: None,
            state: Mutex::new(ConnectionState::Connecting),
            last_active: Mutex::new(Instant::now()),
            reconnect_window: Mutex::new(Duration::from_secs(30)),
            receive_outcome: Mutex::new(MessageOutcome::Continue),
            receive_error: Mutex::new(None),
            errors: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            traces: Mutex::new(Vec::new()),
            marks: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            reconnecting: AtomicUsize::new(0),
            reconnected: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_owned());
        self
    }

    pub(crate) fn with_message_id(mut self, message_id: &str) -> Self {
        self.message_id = Some(message_id.to_owned());
        self
    }

    pub(crate) fn with_groups_token(mut self, groups_token: &str) -> Self {
        self.groups_token = Some(groups_token.to_owned());
        self
    }

    pub(crate) fn with_query_string(mut self, query_string: &str) -> Self {
        self.query_string = Some(query_string.to_owned());
        self
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    pub(crate) fn set_reconnect_window(&self, window: Duration) {
        *self.reconnect_window.lock() = window;
    }

    pub(crate) fn set_receive_outcome(&self, outcome: MessageOutcome) {
        *self.receive_outcome.lock() = outcome;
    }

    pub(crate) fn fail_receive_with(&self, error: impl Fn() -> Error + Send + Sync + 'static) {
        *self.receive_error.lock() = Some(Box::new(error));
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub(crate) fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    pub(crate) fn trace_count(&self, message: &str) -> usize {
        self.traces
            .lock()
            .iter()
            .filter(|(_, line)| line == message)
            .count()
    }

    pub(crate) fn mark_count(&self) -> usize {
        self.marks.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub(crate) fn reconnecting_count(&self) -> usize {
        self.reconnecting.load(Ordering::SeqCst)
    }

    pub(crate) fn reconnected_count(&self) -> usize {
        self.reconnected.load(Ordering::SeqCst)
    }
}

impl Connection for MockConnection {
    fn url(&self) -> &str {
        &self.url
    }

    fn connection_token(&self) -> Option<String> {
        self.token.clone()
    }

    fn message_id(&self) -> Option<String> {
        self.message_id.clone()
    }

    fn groups_token(&self) -> Option<String> {
        self.groups_token.clone()
    }

    fn query_string(&self) -> Option<String> {
        self.query_string.clone()
    }

    fn trace(&self, level: TraceLevel, message: &str) {
        self.traces.lock().push((level, message.to_owned()));
    }

    fn on_error(&self, error: &Error) {
        self.errors.lock().push(error.to_string());
    }

    fn on_received(&self, payload: &str) -> Result<MessageOutcome> {
        self.received.lock().push(payload.to_owned());
        if let Some(error) = self.receive_error.lock().as_ref() {
            return Err(error());
        }
        Ok(*self.receive_outcome.lock())
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn change_state(&self, old: ConnectionState, new: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if *state != old {
            return false;
        }
        *state = new;
        true
    }

    fn on_reconnecting(&self) {
        self.reconnecting.fetch_add(1, Ordering::SeqCst);
    }

    fn on_reconnected(&self) {
        self.reconnected.fetch_add(1, Ordering::SeqCst);
    }

    fn mark_last_message(&self) {
        self.marks.fetch_add(1, Ordering::SeqCst);
        *self.last_active.lock() = Instant::now();
    }

    fn last_active_at(&self) -> Instant {
        *self.last_active.lock()
    }

    fn reconnect_window(&self) -> Duration {
        *self.reconnect_window.lock()
    }
}

// ============================================================================
// MockHttp
// ============================================================================

type AbortHook = Box<dyn Fn() + Send + Sync>;

/// HTTP client recording negotiate and abort requests.
#[derive(Default)]
pub(crate) struct MockHttp {
    negotiations: Mutex<Vec<String>>,
    aborts: Mutex<Vec<(String, String)>>,
    abort_error: Mutex<Option<ErrorFactory>>,
    abort_hook: Mutex<Option<AbortHook>>,
}

impl MockHttp {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn negotiate_calls(&self) -> Vec<String> {
        self.negotiations.lock().clone()
    }

    /// `(transport, connection_data)` of every abort request.
    pub(crate) fn abort_calls(&self) -> Vec<(String, String)> {
        self.aborts.lock().clone()
    }

    pub(crate) fn fail_abort_with(&self, error: impl Fn() -> Error + Send + Sync + 'static) {
        *self.abort_error.lock() = Some(Box::new(error));
    }

    /// Runs `hook` whenever an abort request is received.
    pub(crate) fn on_abort(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.abort_hook.lock() = Some(Box::new(hook));
    }
}

#[async_trait]
impl HttpClient for MockHttp {
    async fn negotiate(
        &self,
        _connection: &dyn Connection,
        connection_data: &str,
    ) -> Result<NegotiationResponse> {
        self.negotiations.lock().push(connection_data.to_owned());
        Ok(NegotiationResponse {
            url: "/signalr".into(),
            connection_token: "token".into(),
            connection_id: "id".into(),
            keep_alive_timeout: Some(20.0),
            disconnect_timeout: 30.0,
            try_web_sockets: true,
            protocol_version: "1.5".into(),
            transport_connect_timeout: Some(5.0),
        })
    }

    async fn abort(
        &self,
        _connection: &dyn Connection,
        transport: &str,
        connection_data: &str,
    ) -> Result<()> {
        self.aborts
            .lock()
            .push((transport.to_owned(), connection_data.to_owned()));

        if let Some(hook) = self.abort_hook.lock().as_ref() {
            hook();
        }
        match self.abort_error.lock().as_ref() {
            Some(error) => Err(error()),
            None => Ok(()),
        }
    }
}
