//! Socket adapter.
//!
//! A [`SocketAdapter`] brackets the callback registration of exactly one
//! socket instance. It is built fresh for every connect attempt, registers
//! the lifecycle's callback before the handshake starts, and is discarded
//! after [`SocketAdapter::teardown`].
//!
//! # Event Delivery
//!
//! ```text
//! ┌──────────────┐  emit(SocketEvent)  ┌──────────────┐  callback  ┌───────────┐
//! │ dyn Socket   │────────────────────►│ SocketEvents │───────────►│ Lifecycle │
//! │ (I/O task)   │                     │ (slot)       │            │           │
//! └──────────────┘                     └──────────────┘            └───────────┘
//!                                         ▲ teardown() empties the slot
//! ```
//!
//! Once the slot is emptied, late events from that socket are dropped.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::AttemptId;
use crate::proxy::ProxySettings;

// ============================================================================
// Types
// ============================================================================

/// Callback receiving the events of one socket instance.
pub type EventCallback = Arc<dyn Fn(SocketEvent) + Send + Sync>;

// ============================================================================
// SocketEvent
// ============================================================================

/// Notification raised by a socket.
#[derive(Debug)]
pub enum SocketEvent {
    /// Handshake completed.
    Opened,
    /// The socket failed, before or after opening.
    Error(Error),
    /// The socket closed.
    Closed,
    /// One inbound payload.
    Message(String),
}

// ============================================================================
// SocketEvents
// ============================================================================

/// Registration slot a socket emits its events through.
///
/// Cloned into the socket's I/O task. The adapter owning the slot decides
/// whether anyone is listening.
#[derive(Clone, Default)]
pub struct SocketEvents {
    slot: Arc<Mutex<Option<EventCallback>>>,
}

impl fmt::Debug for SocketEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketEvents")
            .field("registered", &self.is_registered())
            .finish()
    }
}

impl SocketEvents {
    /// Delivers an event to the registered callback.
    ///
    /// Returns `false` if the slot was already emptied and the event dropped.
    pub fn emit(&self, event: SocketEvent) -> bool {
        // Invoke outside the slot lock; the callback may re-enter teardown.
        let callback = self.slot.lock().clone();
        match callback {
            Some(callback) => {
                callback(event);
                true
            }
            None => {
                trace!(?event, "Dropped event from unregistered socket");
                false
            }
        }
    }

    /// Returns `true` while a callback is registered.
    #[inline]
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub(crate) fn register(&self, callback: EventCallback) {
        *self.slot.lock() = Some(callback);
    }

    pub(crate) fn unregister(&self) -> bool {
        self.slot.lock().take().is_some()
    }
}

// ============================================================================
// Socket
// ============================================================================

/// One underlying socket connection.
///
/// `open` must not block: it starts the handshake and returns. All outcomes
/// are reported through the [`SocketEvents`] handed to it. `close` may be
/// called before `open` has made progress and must prevent the socket from
/// opening.
pub trait Socket: Send + Sync {
    /// Starts the handshake.
    fn open(&self, events: SocketEvents);

    /// Queues one outbound payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot accept the payload.
    fn send(&self, payload: &str) -> Result<()>;

    /// Requests close.
    fn close(&self);

    /// Returns `true` between `Opened` and `Closed`.
    fn is_open(&self) -> bool;
}

/// Creates socket instances, one per connect attempt.
pub trait SocketFactory: Send + Sync {
    /// Creates an unopened socket for `uri`, tunnelled through `proxy` when
    /// one is given.
    fn create(&self, uri: Url, proxy: Option<ProxySettings>) -> Arc<dyn Socket>;
}

// ============================================================================
// SocketAdapter
// ============================================================================

/// Owns the registration of one socket instance for one attempt.
#[derive(Clone)]
pub(crate) struct SocketAdapter {
    /// Attempt this socket belongs to.
    id: AttemptId,
    /// The wrapped socket.
    socket: Arc<dyn Socket>,
    /// Registration slot shared with the socket.
    events: SocketEvents,
}

impl fmt::Debug for SocketAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketAdapter")
            .field("id", &self.id)
            .field("events", &self.events)
            .finish()
    }
}

impl SocketAdapter {
    /// Creates the socket and registers `callback` for its events.
    ///
    /// The handshake is not started; call [`SocketAdapter::start`].
    pub(crate) fn new(
        id: AttemptId,
        factory: &dyn SocketFactory,
        uri: Url,
        proxy: Option<ProxySettings>,
        callback: EventCallback,
    ) -> Self {
        let socket = factory.create(uri, proxy);
        let events = SocketEvents::default();
        events.register(callback);

        Self { id, socket, events }
    }

    /// Starts the handshake.
    pub(crate) fn start(&self) {
        trace!(attempt = %self.id, "Opening socket");
        self.socket.open(self.events.clone());
    }

    /// Returns the attempt this adapter belongs to.
    #[inline]
    pub(crate) fn id(&self) -> AttemptId {
        self.id
    }

    /// Forwards a payload unmodified.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if the socket is not open
    /// - whatever the socket reports for the send itself
    pub(crate) fn send(&self, payload: &str) -> Result<()> {
        if !self.socket.is_open() {
            return Err(Error::socket_not_open());
        }
        self.socket.send(payload)
    }

    /// Unregisters the callback and, unless `release_only`, closes the
    /// socket.
    ///
    /// Unregistration happens first so the close cannot re-enter the
    /// lifecycle. Safe on a socket that never opened and safe to repeat.
    pub(crate) fn teardown(&self, release_only: bool) {
        let was_registered = self.events.unregister();
        if !release_only {
            self.socket.close();
        }
        trace!(attempt = %self.id, was_registered, release_only, "Socket torn down");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::transport::mock::{MockSocketFactory, OpenBehavior};

    fn counting_callback() -> (EventCallback, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let callback: EventCallback = Arc::new(move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (callback, count)
    }

    fn uri() -> Url {
        Url::parse("ws://localhost/signalr/connect").expect("valid url")
    }

    #[test]
    fn test_registration_precedes_open() {
        let factory = MockSocketFactory::new(OpenBehavior::OpenImmediately);
        let (callback, count) = counting_callback();

        let adapter = SocketAdapter::new(AttemptId::next(), &factory, uri(), None, callback);
        adapter.start();

        // The synchronous `Opened` raised inside `open` was not missed.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_requires_open_socket() {
        let factory = MockSocketFactory::new(OpenBehavior::Manual);
        let (callback, _count) = counting_callback();
        let adapter = SocketAdapter::new(AttemptId::next(), &factory, uri(), None, callback);
        adapter.start();

        let err = adapter.send("x").expect_err("not open");
        assert!(matches!(err, Error::InvalidState { .. }));
        assert!(factory.socket(0).sent().is_empty());

        factory.socket(0).fire_open();
        adapter.send("payload").expect("open socket");
        assert_eq!(factory.socket(0).sent(), vec!["payload".to_string()]);
    }

    #[test]
    fn test_teardown_unregisters_before_close() {
        let factory = MockSocketFactory::new(OpenBehavior::OpenImmediately);
        let (callback, count) = counting_callback();
        let adapter = SocketAdapter::new(AttemptId::next(), &factory, uri(), None, callback);
        adapter.start();

        adapter.teardown(false);

        let socket = factory.socket(0);
        assert_eq!(socket.close_count(), 1);
        assert!(!socket.is_registered());
        // The mock raises `Closed` from `close`; nobody heard it.
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(!socket.fire_message("late"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_teardown_release_only_keeps_socket() {
        let factory = MockSocketFactory::new(OpenBehavior::OpenImmediately);
        let (callback, _count) = counting_callback();
        let adapter = SocketAdapter::new(AttemptId::next(), &factory, uri(), None, callback);
        adapter.start();

        adapter.teardown(true);
        assert_eq!(factory.socket(0).close_count(), 0);
        assert!(!factory.socket(0).is_registered());
    }

    #[test]
    fn test_teardown_never_opened_is_safe() {
        let factory = MockSocketFactory::new(OpenBehavior::Manual);
        let (callback, count) = counting_callback();
        let adapter = SocketAdapter::new(AttemptId::next(), &factory, uri(), None, callback);

        adapter.teardown(false);
        adapter.teardown(false);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_payload_round_trip_is_identity() {
        let factory = MockSocketFactory::new(OpenBehavior::OpenImmediately);
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let callback: EventCallback = Arc::new(move |event| {
            if let SocketEvent::Message(payload) = event {
                sink.lock().push(payload);
            }
        });
        let adapter = SocketAdapter::new(AttemptId::next(), &factory, uri(), None, callback);
        adapter.start();

        let payload = "{\"C\":\"d-1\",\"M\":[\"héllo\\u0000 ✓\"]}\r\n";
        assert!(factory.socket(0).fire_message(payload));
        assert_eq!(received.lock().as_slice(), [payload.to_string()]);
    }
}
