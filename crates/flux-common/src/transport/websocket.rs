use futures_util::{Sink, SinkExt, Stream, StreamExt};
use n0_future::boxed::BoxFuture;
use smol_str::SmolStr;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};
use url::Url;

use super::{Connection, Frame, Transport, TransportError};
use crate::FluxConfig;

pub const USER_HEADER: &str = "X-flux-user-name";
pub const TOKEN_HEADER: &str = "X-flux-user-token";

/// Connects to a relay over WebSocket, one JSON [`Frame`] per text message.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: Url,
    username: SmolStr,
    token: Option<String>,
}

impl WebSocketTransport {
    pub fn new(url: Url, username: impl Into<SmolStr>, token: Option<String>) -> Self {
        Self {
            url,
            username: username.into(),
            token,
        }
    }

    pub fn from_config(config: &FluxConfig) -> Self {
        Self::new(
            config.host.clone(),
            config.username.clone(),
            config.token.clone(),
        )
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self) -> BoxFuture<Result<Connection, TransportError>> {
        let transport = self.clone();
        Box::pin(async move { transport.open().await })
    }
}

impl WebSocketTransport {
    async fn open(self) -> Result<Connection, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(
            USER_HEADER,
            HeaderValue::from_str(&self.username).map_err(|e| TransportError::Request(e.to_string()))?,
        );
        if let Some(token) = &self.token {
            headers.insert(
                TOKEN_HEADER,
                HeaderValue::from_str(token).map_err(|e| TransportError::Request(e.to_string()))?,
            );
        }

        info!(url = %self.url, "connecting to relay");
        let (ws_stream, _response) =
            connect_async(request)
                .await
                .map_err(|e| TransportError::Connect {
                    endpoint: self.url.to_string(),
                    source: Box::new(e),
                })?;
        info!(url = %self.url, "connected to relay");

        Ok(spawn_socket_tasks(ws_stream))
    }
}

/// Bridge a WebSocket stream to a [`Connection`].
///
/// The reader ends the inbound side when the socket closes; dropping the
/// outbound sender closes the socket.
pub fn spawn_socket_tasks<S>(socket: S) -> Connection
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Sink<Message>
        + Send
        + Unpin
        + 'static,
    <S as Sink<Message>>::Error: std::fmt::Display + Send,
{
    let (write, read) = socket.split();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound) = mpsc::unbounded_channel();
    let (pong_tx, pong_rx) = mpsc::channel(16);

    tokio::spawn(run_writer(write, outbound_rx, pong_rx));
    tokio::spawn(run_reader(read, inbound_tx, pong_tx));

    Connection { outbound, inbound }
}

async fn run_reader<S>(
    mut read: S,
    inbound: mpsc::UnboundedSender<Frame>,
    pong_tx: mpsc::Sender<Message>,
) where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => match Frame::from_json(text.as_str()) {
                Ok(frame) => {
                    trace!(?frame, "frame received");
                    if inbound.send(frame).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, text = %text.as_str(), "failed to parse frame");
                }
            },
            Ok(Message::Ping(data)) => {
                if pong_tx.send(Message::Pong(data)).await.is_err() {
                    return;
                }
            }
            Ok(Message::Close(_)) => {
                debug!("relay closed the socket");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "socket read error");
                return;
            }
        }
    }
}

async fn run_writer<S>(
    mut write: S,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    mut pongs: mpsc::Receiver<Message>,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        let message = tokio::select! {
            biased;

            pong = pongs.recv() => match pong {
                Some(pong) => pong,
                None => break,
            },
            frame = outbound.recv() => match frame {
                Some(frame) => match frame.to_json() {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        warn!(error = %e, "failed to encode frame");
                        continue;
                    }
                },
                None => break,
            },
        };

        if let Err(e) = write.send(message).await {
            warn!(error = %e, "socket write error");
            return;
        }
    }

    let _ = write.send(Message::Close(None)).await;
}
