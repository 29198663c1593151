//! SingleResponse - one correlated reply to a request.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use miette::Diagnostic;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use smol_str::SmolStr;
use tokio::sync::oneshot;
use tracing::debug;

use super::{
    BusError, HandlerResult, MessageBus, MessageHandler, Payload, PayloadExt, TimerHandle,
    TimerOutcome, WeakBus, fields,
};

/// Error type for request/response exchanges
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum ResponseError {
    #[error("no {message_type} response within {timeout:?}")]
    #[diagnostic(code(flux::transport::response::timeout))]
    Timeout {
        message_type: SmolStr,
        timeout: Duration,
    },

    #[error("remote error: {message}")]
    #[diagnostic(code(flux::transport::response::remote))]
    Remote {
        message: String,
        details: Option<Value>,
    },

    #[error("malformed {message_type} response")]
    #[diagnostic(code(flux::transport::response::parse))]
    Parse {
        message_type: SmolStr,
        #[source]
        source: serde_json::Error,
    },

    #[error("message bus disposed before a response arrived")]
    #[diagnostic(code(flux::transport::response::disposed))]
    Disposed,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Send(#[from] BusError),
}

/// Which responses belong to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    /// The first response of the type.
    Any,
    Username(SmolStr),
    CallbackId(i64),
    RequestSenderId(SmolStr),
}

impl Correlation {
    pub fn matches(&self, payload: &Payload) -> bool {
        match self {
            Correlation::Any => true,
            Correlation::Username(name) => payload.get_str(fields::USERNAME) == Some(name.as_str()),
            Correlation::CallbackId(id) => payload.get_i64(fields::CALLBACK_ID) == Some(*id),
            Correlation::RequestSenderId(id) => {
                payload.get_str(fields::REQUEST_SENDER_ID) == Some(id.as_str())
            }
        }
    }
}

type Outcome = Result<Payload, ResponseError>;

/// Settles a request exactly once and tears down its handler and timer.
struct Pending {
    tx: Mutex<Option<oneshot::Sender<Outcome>>>,
    timer: OnceLock<TimerHandle>,
    registration: Mutex<Option<(WeakBus, Arc<dyn MessageHandler>)>>,
}

impl Pending {
    fn is_settled(&self) -> bool {
        self.tx.lock().is_none()
    }

    fn settle(&self, outcome: Outcome) {
        let Some(tx) = self.tx.lock().take() else {
            return;
        };
        let _ = tx.send(outcome);
        if let Some(timer) = self.timer.get() {
            timer.cancel();
        }
        if let Some((bus, handler)) = self.registration.lock().take() {
            if let Some(bus) = bus.upgrade() {
                bus.remove_message_handler(&handler);
            }
        }
    }
}

struct ResponseHandler {
    message_type: SmolStr,
    correlation: Correlation,
    pending: Arc<Pending>,
}

impl MessageHandler for ResponseHandler {
    fn message_type(&self) -> &str {
        &self.message_type
    }

    fn can_handle(&self, _message_type: &str, payload: &Payload) -> bool {
        !self.pending.is_settled() && self.correlation.matches(payload)
    }

    fn handle(&self, _message_type: &str, payload: &Payload) -> HandlerResult {
        let outcome = match payload.get(fields::ERROR) {
            Some(error) => Err(ResponseError::Remote {
                message: error
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
                details: payload.get(fields::ERROR_DETAILS).cloned(),
            }),
            None => Ok(payload.clone()),
        };
        self.pending.settle(outcome);
        Ok(())
    }
}

/// The eventual response to one request.
///
/// Resolves with the first matching message, rejects with the remote error
/// it carries, or times out. The transient handler is removed in every case.
pub struct SingleResponse {
    message_type: SmolStr,
    rx: oneshot::Receiver<Outcome>,
    pending: Arc<Pending>,
}

impl SingleResponse {
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Give up on the response and deregister its handler.
    pub fn cancel(&self) {
        self.pending.settle(Err(ResponseError::Disposed));
    }

    pub async fn wait(self) -> Result<Payload, ResponseError> {
        self.rx.await.unwrap_or(Err(ResponseError::Disposed))
    }

    /// Wait and deserialize the payload.
    pub async fn wait_as<T: DeserializeOwned>(self) -> Result<T, ResponseError> {
        let message_type = self.message_type.clone();
        let payload = self.wait().await?;
        serde_json::from_value(Value::Object(payload)).map_err(|source| ResponseError::Parse {
            message_type,
            source,
        })
    }

    /// Block the current thread until settled. Must not be called from
    /// within an async context.
    pub fn blocking_wait(self) -> Result<Payload, ResponseError> {
        self.rx.blocking_recv().unwrap_or(Err(ResponseError::Disposed))
    }
}

impl MessageBus {
    /// Register for one response of `response_type` matching `correlation`.
    ///
    /// Register before sending the request so a fast reply is not missed.
    pub fn expect_response(
        &self,
        response_type: &str,
        correlation: Correlation,
        timeout: Duration,
    ) -> SingleResponse {
        let (tx, rx) = oneshot::channel();
        let pending = Arc::new(Pending {
            tx: Mutex::new(Some(tx)),
            timer: OnceLock::new(),
            registration: Mutex::new(None),
        });
        let response = SingleResponse {
            message_type: response_type.into(),
            rx,
            pending: pending.clone(),
        };

        if self.is_disposed() {
            pending.settle(Err(ResponseError::Disposed));
            return response;
        }

        let handler: Arc<dyn MessageHandler> = Arc::new(ResponseHandler {
            message_type: response_type.into(),
            correlation,
            pending: pending.clone(),
        });
        *pending.registration.lock() = Some((self.downgrade(), handler.clone()));
        self.add_message_handler(handler);

        let timer_pending = pending.clone();
        let message_type = SmolStr::from(response_type);
        let timer = self.timers().schedule(timeout, move |outcome| {
            let error = match outcome {
                TimerOutcome::Elapsed => {
                    debug!(message_type = %message_type, "response timed out");
                    ResponseError::Timeout {
                        message_type,
                        timeout,
                    }
                }
                TimerOutcome::Shutdown => ResponseError::Disposed,
            };
            timer_pending.settle(Err(error));
        });
        let _ = pending.timer.set(timer);
        if pending.is_settled() {
            if let Some(timer) = pending.timer.get() {
                timer.cancel();
            }
        }

        response
    }

    /// Send a request and register for its response, using the configured timeout.
    pub fn request(
        &self,
        request_type: &str,
        payload: Payload,
        response_type: &str,
        correlation: Correlation,
    ) -> Result<SingleResponse, ResponseError> {
        let timeout = self.config().request_timeout;
        let response = self.expect_response(response_type, correlation, timeout);
        if let Err(e) = self.send(request_type, payload) {
            response.cancel();
            return Err(e.into());
        }
        Ok(response)
    }
}
