use miette::Diagnostic;
use smol_str::SmolStr;

use super::Payload;

/// Error returned by a handler; logged by the bus and otherwise ignored.
#[derive(Debug, thiserror::Error, Diagnostic)]
#[diagnostic(code(flux::transport::handler))]
pub enum HandlerError {
    #[error("malformed {message_type} payload: missing or invalid {field}")]
    Malformed {
        message_type: SmolStr,
        field: &'static str,
    },

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn malformed(message_type: &str, field: &'static str) -> Self {
        HandlerError::Malformed {
            message_type: message_type.into(),
            field,
        }
    }

    pub fn other(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        HandlerError::Other(Box::new(error))
    }
}

pub type HandlerResult = Result<(), HandlerError>;

/// Receives messages of one type from the bus.
///
/// Handlers run on the bus reader and must not block.
pub trait MessageHandler: Send + Sync {
    /// The message type this handler is registered for.
    fn message_type(&self) -> &str;

    /// Whether this handler wants this particular message.
    fn can_handle(&self, _message_type: &str, _payload: &Payload) -> bool {
        true
    }

    fn handle(&self, message_type: &str, payload: &Payload) -> HandlerResult;
}

/// Notified when the bus connection comes up (after rejoining) or goes down.
pub trait ConnectionListener: Send + Sync {
    fn connected(&self);
    fn disconnected(&self);
}

/// Notified when a channel is joined or left.
pub trait ChannelListener: Send + Sync {
    fn connected(&self, channel: &str);
    fn disconnected(&self, channel: &str);
}

/// A [`MessageHandler`] built from a closure.
pub struct FnHandler<F> {
    message_type: SmolStr,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Payload) -> HandlerResult + Send + Sync,
{
    pub fn new(message_type: impl Into<SmolStr>, f: F) -> Self {
        Self {
            message_type: message_type.into(),
            f,
        }
    }
}

impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&Payload) -> HandlerResult + Send + Sync,
{
    fn message_type(&self) -> &str {
        &self.message_type
    }

    fn handle(&self, _message_type: &str, payload: &Payload) -> HandlerResult {
        (self.f)(payload)
    }
}
