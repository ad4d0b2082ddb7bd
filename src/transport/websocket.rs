//! Default socket backed by `tokio-tungstenite`.
//!
//! Each [`TungsteniteSocket`] spawns one I/O task on `open`. The task dials
//! (directly or through a CONNECT tunnel), performs the WebSocket handshake
//! and then runs a `select!` loop over inbound frames, outbound payloads and
//! the close signal.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpStream, lookup_host};
use tokio::sync::mpsc;
use tokio_tungstenite::client_async_tls;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::proxy::{ProxySettings, connect_tunnel};

use super::socket::{Socket, SocketEvent, SocketEvents, SocketFactory};

// ============================================================================
// TungsteniteSocketFactory
// ============================================================================

/// Creates [`TungsteniteSocket`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteSocketFactory;

impl SocketFactory for TungsteniteSocketFactory {
    fn create(&self, uri: Url, proxy: Option<ProxySettings>) -> Arc<dyn Socket> {
        Arc::new(TungsteniteSocket::new(uri, proxy))
    }
}

// ============================================================================
// TungsteniteSocket
// ============================================================================

/// WebSocket client connection over TCP, optionally TLS and proxied.
#[derive(Debug)]
pub struct TungsteniteSocket {
    /// Target URI (`ws` or `wss`).
    uri: Url,
    /// Proxy to tunnel through.
    proxy: Option<ProxySettings>,
    /// Outbound payload queue, present once opened.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// `true` between `Opened` and `Closed`.
    open: Arc<AtomicBool>,
    /// Cancelled by `close`.
    close_token: CancellationToken,
}

impl TungsteniteSocket {
    /// Creates an unopened socket.
    #[must_use]
    pub fn new(uri: Url, proxy: Option<ProxySettings>) -> Self {
        Self {
            uri,
            proxy,
            outbound: Mutex::new(None),
            open: Arc::new(AtomicBool::new(false)),
            close_token: CancellationToken::new(),
        }
    }

    /// Returns the target URI.
    #[inline]
    #[must_use]
    pub fn uri(&self) -> &Url {
        &self.uri
    }
}

impl Socket for TungsteniteSocket {
    fn open(&self, events: SocketEvents) {
        if self.close_token.is_cancelled() {
            debug!(uri = %self.uri, "Socket closed before open");
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.outbound.lock() = Some(tx);

        let task = IoTask {
            uri: self.uri.clone(),
            proxy: self.proxy.clone(),
            outbound: rx,
            open: Arc::clone(&self.open),
            close_token: self.close_token.clone(),
            events,
        };
        tokio::spawn(task.run().in_current_span());
    }

    fn send(&self, payload: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::socket_not_open());
        }

        let guard = self.outbound.lock();
        let tx = guard.as_ref().ok_or_else(Error::socket_not_open)?;
        tx.send(payload.to_owned())
            .map_err(|_| Error::ConnectionClosed)
    }

    fn close(&self) {
        self.close_token.cancel();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

// ============================================================================
// I/O Task
// ============================================================================

/// State moved into the spawned I/O task.
struct IoTask {
    uri: Url,
    proxy: Option<ProxySettings>,
    outbound: mpsc::UnboundedReceiver<String>,
    open: Arc<AtomicBool>,
    close_token: CancellationToken,
    events: SocketEvents,
}

impl IoTask {
    async fn run(self) {
        let Self {
            uri,
            proxy,
            mut outbound,
            open,
            close_token,
            events,
        } = self;

        let handshake = async {
            let stream = dial(&uri, proxy.as_ref()).await?;
            let (ws, response) = client_async_tls(uri.as_str(), stream).await?;
            debug!(uri = %uri, status = %response.status(), "WebSocket handshake completed");
            Ok::<_, Error>(ws)
        };

        let ws = tokio::select! {
            biased;

            () = close_token.cancelled() => {
                debug!(uri = %uri, "Socket closed during handshake");
                events.emit(SocketEvent::Closed);
                return;
            }

            result = handshake => match result {
                Ok(ws) => ws,
                Err(e) => {
                    debug!(uri = %uri, error = %e, "Socket failed to open");
                    events.emit(SocketEvent::Error(e));
                    events.emit(SocketEvent::Closed);
                    return;
                }
            },
        };

        open.store(true, Ordering::Release);
        events.emit(SocketEvent::Opened);

        let (mut ws_write, mut ws_read) = ws.split();

        loop {
            tokio::select! {
                biased;

                () = close_token.cancelled() => {
                    debug!(uri = %uri, "Closing socket");
                    let _ = ws_write.send(Message::Close(None)).await;
                    break;
                }

                payload = outbound.recv() => {
                    let Some(payload) = payload else {
                        debug!("Outbound channel closed");
                        break;
                    };
                    if let Err(e) = ws_write.send(Message::Text(payload.into())).await {
                        warn!(error = %e, "Failed to send payload");
                        events.emit(SocketEvent::Error(e.into()));
                        break;
                    }
                }

                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            events.emit(SocketEvent::Message(text.as_str().to_owned()));
                        }

                        Some(Ok(Message::Binary(bytes))) => {
                            match String::from_utf8(bytes.to_vec()) {
                                Ok(text) => {
                                    events.emit(SocketEvent::Message(text));
                                }
                                Err(e) => {
                                    events.emit(SocketEvent::Error(Error::invalid_frame(
                                        format!("binary frame is not UTF-8: {e}"),
                                    )));
                                }
                            }
                        }

                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            debug!(error = %e, "WebSocket error");
                            events.emit(SocketEvent::Error(e.into()));
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ping, Pong, raw frames
                        Some(Ok(_)) => {}
                    }
                }
            }
        }

        open.store(false, Ordering::Release);
        events.emit(SocketEvent::Closed);
        trace!(uri = %uri, "Socket I/O task terminated");
    }
}

/// Opens the TCP stream for `uri`, tunnelling when a proxy is given.
async fn dial(uri: &Url, proxy: Option<&ProxySettings>) -> Result<TcpStream> {
    if let Some(proxy) = proxy {
        return connect_tunnel(proxy, uri).await;
    }

    let host = uri
        .host_str()
        .ok_or_else(|| Error::invalid_url(uri.as_str(), "missing host"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port = uri
        .port_or_known_default()
        .ok_or_else(|| Error::invalid_url(uri.as_str(), "missing port"))?;

    let mut errors = Vec::new();
    for addr in lookup_host((host, port)).await? {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                trace!(%addr, error = %e, "Address refused");
                errors.push(Error::from(e));
            }
        }
    }

    Err(Error::aggregate(errors))
}

// ============================================================================
// Tests
// ============================================================================
