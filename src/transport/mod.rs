//! WebSocket transport layer.
//!
//! This module owns the connection lifecycle: one socket per attempt,
//! silent reconnects, cooperative abort and teardown.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐  start/send/abort  ┌──────────────────────┐
//! │ Connection manager │───────────────────►│ WebSocketTransport   │
//! │ (dyn Connection)   │◄───────────────────│  ├─ SocketAdapter    │
//! │                    │  on_received,      │  ├─ AbortCoordinator │
//! └────────────────────┘  on_error, trace   │  └─ ReconnectPolicy  │
//!                                           └──────────┬───────────┘
//!                                                      │ dyn Socket
//!                                                      ▼
//!                                           ┌──────────────────────┐
//!                                           │ TungsteniteSocket    │
//!                                           │ (I/O task)           │
//!                                           └──────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `lifecycle` | The transport state machine |
//! | `socket` | Socket traits and the per-attempt adapter |
//! | `websocket` | Default socket backed by `tokio-tungstenite` |
//! | `abort` | Cooperative shutdown latch |
//! | `reconnect` | Fixed-delay reconnect loop |
//! | `state` | Lifecycle states |

// ============================================================================
// Submodules
// ============================================================================

/// Cooperative shutdown.
pub mod abort;

/// Transport state machine.
pub mod lifecycle;

/// Fixed-delay reconnect loop.
pub mod reconnect;

/// Socket traits and adapter.
pub mod socket;

/// Lifecycle states.
pub mod state;

/// Default tungstenite-backed socket.
pub mod websocket;

/// Test doubles for collaborators.
#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use abort::AbortOutcome;
pub use lifecycle::{TRANSPORT_NAME, WebSocketTransport};
pub use reconnect::DEFAULT_RECONNECT_DELAY;
pub use socket::{EventCallback, Socket, SocketEvent, SocketEvents, SocketFactory};
pub use state::LifecycleState;
pub use websocket::{TungsteniteSocket, TungsteniteSocketFactory};
