//! MessageBus - one supervised connection to the relay.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use miette::Diagnostic;
use parking_lot::{Mutex, RwLock};
use smol_str::SmolStr;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{
    Backoff, ChannelListener, Connection, ConnectionListener, Frame, MessageHandler, Payload,
    PayloadExt, TimerService, Transport, fields, types,
};
use crate::FluxConfig;

/// Error type for bus operations
#[derive(Debug, thiserror::Error, Diagnostic)]
#[diagnostic(code(flux::transport::bus))]
pub enum BusError {
    #[error("not connected")]
    NotConnected,

    #[error("join of channel {channel} was refused")]
    JoinRejected { channel: SmolStr },

    #[error("leave of channel {channel} was refused")]
    LeaveRejected { channel: SmolStr },

    #[error("no acknowledgment for {message_type} within {timeout:?}")]
    AckTimeout {
        message_type: SmolStr,
        timeout: Duration,
    },

    #[error("connection lost before {message_type} was acknowledged")]
    ConnectionLost { message_type: SmolStr },

    #[error("message bus disposed")]
    Disposed,
}

/// Connection lifecycle of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Observable bus state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusStatus {
    pub state: ConnectionState,
    /// Only meaningful while connected.
    pub joined_channel: Option<SmolStr>,
    /// Raised once a (re)connection has finished rejoining its channel.
    pub ready: bool,
}

impl BusStatus {
    fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            joined_channel: None,
            ready: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Channel joined on the first connect.
    pub channel: Option<SmolStr>,
    pub join_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel: None,
            join_timeout: FluxConfig::DEFAULT_JOIN_TIMEOUT,
            request_timeout: FluxConfig::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl From<&FluxConfig> for BusConfig {
    fn from(config: &FluxConfig) -> Self {
        Self {
            channel: Some(config.channel().into()),
            join_timeout: config.join_timeout,
            request_timeout: config.request_timeout,
        }
    }
}

/// Per-connection state, guarded together.
struct Link {
    outbound: Option<tokio::sync::mpsc::UnboundedSender<Frame>>,
    /// Channel to restore on the next successful connect.
    rejoin: Option<SmolStr>,
    backoff: Backoff,
}

type HandlerList = Arc<[Arc<dyn MessageHandler>]>;

struct BusInner {
    transport: Arc<dyn Transport>,
    config: BusConfig,
    link: Mutex<Link>,
    status: watch::Sender<BusStatus>,
    handlers: RwLock<HashMap<SmolStr, HandlerList>>,
    connection_listeners: RwLock<Arc<[Arc<dyn ConnectionListener>]>>,
    channel_listeners: RwLock<Arc<[Arc<dyn ChannelListener>]>>,
    pending_acks: Mutex<HashMap<u64, oneshot::Sender<Payload>>>,
    next_ack: AtomicU64,
    /// Serializes join/leave so a channel switch is atomic to callers.
    channel_switch: tokio::sync::Mutex<()>,
    timers: OnceLock<TimerService>,
    shutdown: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the message bus. Cheap to clone.
///
/// The bus owns one connection to the relay, reconnects with [`Backoff`]
/// when it drops, restores the joined channel and dispatches inbound
/// messages to registered handlers in registration order.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

/// Non-owning handle, for handlers and timers that must not keep the bus alive.
#[derive(Clone)]
pub struct WeakBus(Weak<BusInner>);

impl WeakBus {
    pub fn upgrade(&self) -> Option<MessageBus> {
        self.0.upgrade().map(|inner| MessageBus { inner })
    }
}

fn same_object<T: ?Sized, U: ?Sized>(a: &Arc<T>, b: &Arc<U>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl MessageBus {
    pub fn new(transport: impl Transport, config: BusConfig) -> Self {
        let (status, _) = watch::channel(BusStatus::disconnected());
        let rejoin = config.channel.clone();
        Self {
            inner: Arc::new(BusInner {
                transport: Arc::new(transport),
                config,
                link: Mutex::new(Link {
                    outbound: None,
                    rejoin,
                    backoff: Backoff::new(),
                }),
                status,
                handlers: RwLock::new(HashMap::new()),
                connection_listeners: RwLock::new(Arc::from(Vec::new())),
                channel_listeners: RwLock::new(Arc::from(Vec::new())),
                pending_acks: Mutex::new(HashMap::new()),
                next_ack: AtomicU64::new(1),
                channel_switch: tokio::sync::Mutex::new(()),
                timers: OnceLock::new(),
                shutdown: CancellationToken::new(),
                supervisor: Mutex::new(None),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakBus {
        WeakBus(Arc::downgrade(&self.inner))
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Start the connection supervisor. Must be called within a tokio runtime.
    ///
    /// Returns immediately; observe progress through [`status`](Self::status)
    /// or [`wait_ready`](Self::wait_ready). Calling it again while the
    /// supervisor runs does nothing.
    pub fn connect(&self) -> Result<(), BusError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(BusError::Disposed);
        }
        let mut supervisor = self.inner.supervisor.lock();
        if supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }
        let bus = self.clone();
        *supervisor = Some(tokio::spawn(async move { bus.supervise().await }));
        Ok(())
    }

    pub fn status(&self) -> BusStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BusStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.status.borrow().is_connected()
    }

    pub fn joined_channel(&self) -> Option<SmolStr> {
        self.inner.status.borrow().joined_channel.clone()
    }

    /// Current reconnect delay.
    pub fn backoff(&self) -> Duration {
        self.inner.link.lock().backoff.current()
    }

    /// Wait until the bus is connected and has rejoined its channel.
    pub async fn wait_ready(&self) -> Result<(), BusError> {
        let mut status = self.subscribe();
        tokio::select! {
            ready = status.wait_for(|s| s.ready) => ready.map(|_| ()).map_err(|_| BusError::Disposed),
            _ = self.inner.shutdown.cancelled() => Err(BusError::Disposed),
        }
    }

    /// Fire-and-forget send of a typed message.
    pub fn send(&self, message_type: &str, payload: Payload) -> Result<(), BusError> {
        trace!(message_type, "sending message");
        self.inner.push(Frame::message(message_type, payload))
    }

    /// Join `channel`, leaving the current channel first if it differs.
    ///
    /// Only an affirmative acknowledgment changes state. When leaving the
    /// old channel fails, the bus ends up joined to no channel.
    pub async fn join_channel(&self, channel: &str) -> Result<(), BusError> {
        let _switch = self.inner.channel_switch.lock().await;
        let current = self.joined_channel();
        if current.as_deref() == Some(channel) {
            return Ok(());
        }
        if let Some(current) = current {
            if let Err(e) = self.leave_locked(&current).await {
                warn!(channel = %current, error = %e, "failed to leave channel during switch");
                self.inner.set_joined(None);
                self.inner.notify_channel(&current, false);
                return Err(e);
            }
        }
        self.join_locked(channel).await
    }

    /// Leave `channel` if it is the joined one.
    pub async fn leave_channel(&self, channel: &str) -> Result<(), BusError> {
        let _switch = self.inner.channel_switch.lock().await;
        if self.joined_channel().as_deref() != Some(channel) {
            return Ok(());
        }
        self.leave_locked(channel).await
    }

    async fn join_locked(&self, channel: &str) -> Result<(), BusError> {
        let payload = Payload::new().with(fields::CHANNEL, channel);
        let ack = self.inner.exchange(types::CONNECT_TO_CHANNEL, payload).await?;
        if ack.get_bool(fields::CONNECTED_TO_CHANNEL) != Some(true) {
            info!(channel, "channel join refused");
            return Err(BusError::JoinRejected {
                channel: channel.into(),
            });
        }
        info!(channel, "joined channel");
        self.inner.set_joined(Some(channel.into()));
        self.inner.notify_channel(channel, true);
        Ok(())
    }

    async fn leave_locked(&self, channel: &str) -> Result<(), BusError> {
        let payload = Payload::new().with(fields::CHANNEL, channel);
        let ack = self
            .inner
            .exchange(types::DISCONNECT_FROM_CHANNEL, payload)
            .await?;
        if ack.get_bool(fields::DISCONNECTED_FROM_CHANNEL) != Some(true) {
            return Err(BusError::LeaveRejected {
                channel: channel.into(),
            });
        }
        info!(channel, "left channel");
        self.inner.set_joined(None);
        self.inner.notify_channel(channel, false);
        Ok(())
    }

    pub fn add_message_handler(&self, handler: Arc<dyn MessageHandler>) {
        let message_type = SmolStr::from(handler.message_type());
        let mut handlers = self.inner.handlers.write();
        let mut list: Vec<_> = handlers
            .get(&message_type)
            .map(|list| list.to_vec())
            .unwrap_or_default();
        list.push(handler);
        handlers.insert(message_type, Arc::from(list));
    }

    pub fn remove_message_handler(&self, handler: &Arc<dyn MessageHandler>) {
        let mut handlers = self.inner.handlers.write();
        let message_type = handler.message_type();
        let Some(list) = handlers.get(message_type) else {
            return;
        };
        let remaining: Vec<_> = list
            .iter()
            .filter(|h| !same_object(h, handler))
            .cloned()
            .collect();
        if remaining.is_empty() {
            handlers.remove(message_type);
        } else {
            handlers.insert(message_type.into(), Arc::from(remaining));
        }
    }

    pub fn handler_count(&self, message_type: &str) -> usize {
        self.inner
            .handlers
            .read()
            .get(message_type)
            .map_or(0, |list| list.len())
    }

    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        let mut listeners = self.inner.connection_listeners.write();
        let mut list = listeners.to_vec();
        list.push(listener);
        *listeners = Arc::from(list);
    }

    pub fn remove_connection_listener(&self, listener: &Arc<dyn ConnectionListener>) {
        let mut listeners = self.inner.connection_listeners.write();
        let list: Vec<_> = listeners
            .iter()
            .filter(|l| !same_object(l, listener))
            .cloned()
            .collect();
        *listeners = Arc::from(list);
    }

    pub fn add_channel_listener(&self, listener: Arc<dyn ChannelListener>) {
        let mut listeners = self.inner.channel_listeners.write();
        let mut list = listeners.to_vec();
        list.push(listener);
        *listeners = Arc::from(list);
    }

    pub fn remove_channel_listener(&self, listener: &Arc<dyn ChannelListener>) {
        let mut listeners = self.inner.channel_listeners.write();
        let list: Vec<_> = listeners
            .iter()
            .filter(|l| !same_object(l, listener))
            .cloned()
            .collect();
        *listeners = Arc::from(list);
    }

    /// Shared timer service, created on first use.
    pub fn timers(&self) -> &TimerService {
        let timers = self.inner.timers.get_or_init(TimerService::new);
        if self.inner.shutdown.is_cancelled() && !timers.is_shutdown() {
            timers.shutdown();
        }
        timers
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop the supervisor, drop the connection and cancel pending timers.
    pub fn dispose(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        debug!("disposing message bus");
        self.inner.shutdown.cancel();
        if let Some(timers) = self.inner.timers.get() {
            timers.shutdown();
        }
        self.inner.link.lock().outbound = None;
        self.inner.pending_acks.lock().clear();
        if let Some(task) = self.inner.supervisor.lock().take() {
            task.abort();
        }
        self.inner.status.send_replace(BusStatus::disconnected());
    }

    async fn supervise(self) {
        let inner = &self.inner;
        loop {
            if inner.shutdown.is_cancelled() {
                break;
            }
            inner.set_state(ConnectionState::Connecting);

            let attempt = tokio::select! {
                attempt = inner.transport.connect() => attempt,
                _ = inner.shutdown.cancelled() => break,
            };

            match attempt {
                Ok(connection) => self.run_connection(connection).await,
                Err(e) => {
                    warn!(error = %e, "failed to connect");
                    inner.set_state(ConnectionState::Disconnected);
                }
            }

            let delay = inner.link.lock().backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = inner.shutdown.cancelled() => break,
            }
        }
        inner.set_state(ConnectionState::Disconnected);
    }

    async fn run_connection(&self, connection: Connection) {
        let inner = &self.inner;
        let Connection {
            outbound,
            mut inbound,
        } = connection;

        let rejoin = {
            let mut link = inner.link.lock();
            link.outbound = Some(outbound);
            link.backoff.reset();
            link.rejoin.take()
        };
        inner.status.send_modify(|s| {
            s.state = ConnectionState::Connected;
            s.joined_channel = None;
            s.ready = false;
        });
        info!("connected");

        let reader_inner = inner.clone();
        let mut reader = tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                reader_inner.receive(frame);
            }
            reader_inner.fail_pending_acks();
        });

        let rejoined = match rejoin {
            Some(channel) => self.rejoin(channel, &mut reader).await,
            None => true,
        };

        if rejoined {
            if !reader.is_finished() {
                inner.status.send_modify(|s| s.ready = true);
                inner.notify_connection(true);
            }
            tokio::select! {
                _ = &mut reader => {}
                _ = inner.shutdown.cancelled() => reader.abort(),
            }
        } else {
            reader.abort();
        }

        inner.handle_disconnect();
    }

    /// Rejoin `channel` on a fresh connection, retrying on the backoff
    /// schedule until the relay accepts. Returns false when the connection
    /// ends or the bus shuts down first; the channel is then rejoined on the
    /// next connection.
    async fn rejoin(&self, channel: SmolStr, reader: &mut JoinHandle<()>) -> bool {
        let inner = &self.inner;
        loop {
            let error = match self.join_channel(&channel).await {
                Ok(()) => {
                    inner.link.lock().backoff.reset();
                    return true;
                }
                Err(error) => error,
            };
            let delay = inner.link.lock().backoff.next_delay();
            warn!(channel = %channel, %error, retry_in = ?delay, "failed to rejoin channel");
            let retry = tokio::select! {
                _ = tokio::time::sleep(delay) => true,
                _ = &mut *reader => false,
                _ = inner.shutdown.cancelled() => false,
            };
            if !retry {
                inner.link.lock().rejoin = Some(channel);
                return false;
            }
        }
    }
}

impl BusInner {
    fn set_state(&self, state: ConnectionState) {
        self.status.send_if_modified(|s| {
            let changed = s.state != state;
            s.state = state;
            changed
        });
    }

    fn set_joined(&self, channel: Option<SmolStr>) {
        self.status.send_modify(|s| s.joined_channel = channel);
    }

    fn push(&self, frame: Frame) -> Result<(), BusError> {
        if self.shutdown.is_cancelled() {
            return Err(BusError::Disposed);
        }
        let link = self.link.lock();
        let outbound = link.outbound.as_ref().ok_or(BusError::NotConnected)?;
        outbound.send(frame).map_err(|_| BusError::NotConnected)
    }

    /// Send a message that expects an acknowledgment and wait for it.
    async fn exchange(&self, message_type: &str, payload: Payload) -> Result<Payload, BusError> {
        let id = self.next_ack.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending_acks.lock().insert(id, tx);

        let frame = Frame::Message {
            message_type: message_type.into(),
            ack: Some(id),
            data: payload,
        };
        if let Err(e) = self.push(frame) {
            self.pending_acks.lock().remove(&id);
            return Err(e);
        }

        let timeout = self.config.join_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(_)) => Err(BusError::ConnectionLost {
                message_type: message_type.into(),
            }),
            Err(_) => {
                self.pending_acks.lock().remove(&id);
                Err(BusError::AckTimeout {
                    message_type: message_type.into(),
                    timeout,
                })
            }
        }
    }

    fn fail_pending_acks(&self) {
        // Dropping the senders wakes every waiter with a receive error.
        self.pending_acks.lock().clear();
    }

    fn receive(&self, frame: Frame) {
        match frame {
            Frame::Ack { ack, data } => match self.pending_acks.lock().remove(&ack) {
                Some(tx) => {
                    let _ = tx.send(data);
                }
                None => debug!(ack, "acknowledgment for unknown request"),
            },
            Frame::Message {
                message_type, data, ..
            } => self.dispatch(&message_type, &data),
        }
    }

    fn dispatch(&self, message_type: &str, payload: &Payload) {
        let Some(handlers) = self.handlers.read().get(message_type).cloned() else {
            trace!(message_type, "no handler for message");
            return;
        };

        for handler in handlers.iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                if handler.can_handle(message_type, payload) {
                    handler.handle(message_type, payload)
                } else {
                    Ok(())
                }
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(message_type, error = %e, "message handler failed"),
                Err(_) => error!(message_type, "message handler panicked"),
            }
        }
    }

    fn notify_connection(&self, connected: bool) {
        let listeners = self.connection_listeners.read().clone();
        for listener in listeners.iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                if connected {
                    listener.connected()
                } else {
                    listener.disconnected()
                }
            }));
            if outcome.is_err() {
                error!(connected, "connection listener panicked");
            }
        }
    }

    fn notify_channel(&self, channel: &str, connected: bool) {
        let listeners = self.channel_listeners.read().clone();
        for listener in listeners.iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                if connected {
                    listener.connected(channel)
                } else {
                    listener.disconnected(channel)
                }
            }));
            if outcome.is_err() {
                error!(channel, connected, "channel listener panicked");
            }
        }
    }

    fn handle_disconnect(&self) {
        let mut was_ready = false;
        let mut joined = None;
        self.status.send_modify(|s| {
            was_ready = s.ready;
            joined = s.joined_channel.take();
            s.state = ConnectionState::Disconnected;
            s.ready = false;
        });
        {
            let mut link = self.link.lock();
            link.outbound = None;
            if joined.is_some() {
                link.rejoin = joined.clone();
            }
        }
        self.fail_pending_acks();

        info!("disconnected");
        if let Some(channel) = joined {
            self.notify_channel(&channel, false);
        }
        if was_ready {
            self.notify_connection(false);
        }
    }
}
