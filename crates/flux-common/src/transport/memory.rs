//! In-process relay and transport.
//!
//! `MemoryHub` runs a [`ChannelRouter`] without any network. Every
//! [`MemoryTransport`] created from it connects to the same hub, so several
//! buses in one process can talk to each other. The hub can also refuse
//! connections and drop live ones, to exercise reconnect behavior.

use std::sync::Arc;

use n0_future::boxed::BoxFuture;
use parking_lot::Mutex;
use smol_str::SmolStr;
use tokio::sync::mpsc;
use tracing::debug;

use super::{ChannelRouter, Connection, Frame, Payload, Transport, TransportError};

const ENDPOINT: &str = "memory";

#[derive(Default)]
struct HubState {
    router: ChannelRouter,
    failing_connects: usize,
    connects: usize,
}

#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport { hub: self.clone() }
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().failing_connects = count;
    }

    pub fn refuse_channel(&self, channel: impl Into<SmolStr>) {
        self.state.lock().router.refuse(channel);
    }

    pub fn allow_channel(&self, channel: &str) {
        self.state.lock().router.allow(channel);
    }

    /// Drop every live connection, as if the relay went away.
    pub fn drop_connections(&self) {
        debug!("dropping all memory connections");
        self.state.lock().router.detach_all();
    }

    /// Successful connections so far.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().router.client_count()
    }

    pub fn members(&self, channel: &str) -> usize {
        self.state.lock().router.members(channel)
    }

    /// Deliver a message to every member of `channel`, as the relay would.
    pub fn publish(&self, channel: &str, message_type: &str, data: Payload) {
        self.state.lock().router.publish(channel, message_type, data);
    }

    fn open(&self) -> Result<Connection, TransportError> {
        let mut state = self.state.lock();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(TransportError::Refused {
                endpoint: ENDPOINT.to_string(),
            });
        }
        state.connects += 1;

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, mut from_client) = mpsc::unbounded_channel::<Frame>();
        let id = state.router.attach(to_client);
        drop(state);

        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = from_client.recv().await {
                hub.state.lock().router.route(id, frame);
            }
            hub.state.lock().router.detach(id);
        });

        Ok(Connection { outbound, inbound })
    }
}

/// Connects to a [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
}

impl Transport for MemoryTransport {
    fn connect(&self) -> BoxFuture<Result<Connection, TransportError>> {
        let hub = self.hub.clone();
        Box::pin(async move { hub.open() })
    }
}
