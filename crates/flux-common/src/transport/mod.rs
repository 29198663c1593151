//! Channel-based messaging between flux participants.
//!
//! This module provides the infrastructure every participant talks through:
//! - `MessageBus`: connection supervision, channel membership, dispatch to handlers
//! - `Frame`: wire protocol for typed messages and acknowledgments
//! - `Transport`: pluggable connection establishment (WebSocket, in-memory)
//! - `SingleResponse`: one correlated response to a request, with timeout

mod backoff;
mod bus;
mod connection;
mod handler;
pub mod memory;
mod messages;
mod response;
mod router;
mod timer;
#[cfg(feature = "websocket")]
mod websocket;

pub use backoff::Backoff;
pub use bus::{BusConfig, BusError, BusStatus, ConnectionState, MessageBus, WeakBus};
pub use connection::{Connection, Transport, TransportError};
pub use handler::{
    ChannelListener, ConnectionListener, FnHandler, HandlerError, HandlerResult, MessageHandler,
};
pub use memory::{MemoryHub, MemoryTransport};
pub use messages::{Frame, Payload, PayloadExt, fields, types};
pub use response::{Correlation, ResponseError, SingleResponse};
pub use router::{ChannelRouter, ClientId};
pub use timer::{TimerHandle, TimerOutcome, TimerService};
#[cfg(feature = "websocket")]
pub use websocket::{TOKEN_HEADER, USER_HEADER, WebSocketTransport, spawn_socket_tasks};
