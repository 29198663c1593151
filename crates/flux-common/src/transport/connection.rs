use miette::Diagnostic;
use n0_future::boxed::BoxFuture;
use tokio::sync::mpsc;

use super::Frame;

/// Error type for connection establishment
#[derive(Debug, thiserror::Error, Diagnostic)]
#[diagnostic(code(flux::transport::connection))]
pub enum TransportError {
    #[error("failed to connect to {endpoint}")]
    Connect {
        endpoint: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("connection refused by {endpoint}")]
    Refused { endpoint: String },

    #[error("invalid connection request: {0}")]
    Request(String),
}

/// An established link to the relay.
///
/// Frames pushed into `outbound` are written to the peer. `inbound` yields
/// frames read from the peer and ends when the link is lost. Dropping
/// `outbound` closes the link.
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub inbound: mpsc::UnboundedReceiver<Frame>,
}

/// Something that can open a [`Connection`].
///
/// Called once per connection attempt; the message bus owns retries.
pub trait Transport: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<Result<Connection, TransportError>>;
}
