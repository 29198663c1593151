//! Relay-side channel routing.

use std::collections::{HashMap, HashSet};

use smol_str::SmolStr;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Frame, Payload, PayloadExt, fields, types};

pub type ClientId = u64;

struct Client {
    outbound: mpsc::UnboundedSender<Frame>,
    channels: HashSet<SmolStr>,
}

/// Channel membership and message fan-out for a relay.
///
/// Clients join channels with `connectToChannel` and leave them with
/// `disconnectFromChannel`, both acknowledged. Every other message goes to
/// the other members of the channel named by its `username` field, or of
/// the sender's own channels when it names none. Senders never receive
/// their own messages.
#[derive(Default)]
pub struct ChannelRouter {
    clients: HashMap<ClientId, Client>,
    refused: HashSet<SmolStr>,
    next_id: ClientId,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client; frames for it are pushed into `outbound`.
    pub fn attach(&mut self, outbound: mpsc::UnboundedSender<Frame>) -> ClientId {
        self.next_id += 1;
        let id = self.next_id;
        self.clients.insert(
            id,
            Client {
                outbound,
                channels: HashSet::new(),
            },
        );
        debug!(client = id, "client attached");
        id
    }

    pub fn detach(&mut self, id: ClientId) {
        if self.clients.remove(&id).is_some() {
            debug!(client = id, "client detached");
        }
    }

    /// Drop every client, closing their inbound streams.
    pub fn detach_all(&mut self) {
        self.clients.clear();
    }

    /// Refuse future joins of `channel`.
    pub fn refuse(&mut self, channel: impl Into<SmolStr>) {
        self.refused.insert(channel.into());
    }

    /// Accept joins of `channel` again.
    pub fn allow(&mut self, channel: &str) {
        self.refused.remove(channel);
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn members(&self, channel: &str) -> usize {
        self.clients
            .values()
            .filter(|c| c.channels.contains(channel))
            .count()
    }

    pub fn route(&mut self, from: ClientId, frame: Frame) {
        let Frame::Message {
            message_type,
            ack,
            data,
        } = frame
        else {
            trace!(client = from, "ignoring client acknowledgment");
            return;
        };

        match message_type.as_str() {
            types::CONNECT_TO_CHANNEL => {
                let joined = match data.get_str(fields::CHANNEL) {
                    Some(channel) if !self.refused.contains(channel) => {
                        let channel = SmolStr::from(channel);
                        if let Some(client) = self.clients.get_mut(&from) {
                            client.channels.insert(channel);
                            true
                        } else {
                            false
                        }
                    }
                    _ => false,
                };
                self.acknowledge(from, ack, fields::CONNECTED_TO_CHANNEL, joined);
            }
            types::DISCONNECT_FROM_CHANNEL => {
                let left = match (data.get_str(fields::CHANNEL), self.clients.get_mut(&from)) {
                    (Some(channel), Some(client)) => client.channels.remove(channel),
                    _ => false,
                };
                self.acknowledge(from, ack, fields::DISCONNECTED_FROM_CHANNEL, left);
            }
            _ => self.broadcast_from(from, message_type, data),
        }
    }

    /// Deliver a message to every member of `channel`.
    pub fn publish(&self, channel: &str, message_type: &str, data: Payload) {
        for client in self.clients.values() {
            if client.channels.contains(channel) {
                let _ = client
                    .outbound
                    .send(Frame::message(message_type, data.clone()));
            }
        }
    }

    fn acknowledge(&self, to: ClientId, ack: Option<u64>, field: &str, value: bool) {
        let (Some(ack), Some(client)) = (ack, self.clients.get(&to)) else {
            return;
        };
        let _ = client.outbound.send(Frame::Ack {
            ack,
            data: Payload::new().with(field, value),
        });
    }

    fn broadcast_from(&self, from: ClientId, message_type: SmolStr, data: Payload) {
        let targets: HashSet<SmolStr> = match data.get_str(fields::USERNAME) {
            Some(user) => HashSet::from([SmolStr::from(user)]),
            None => self
                .clients
                .get(&from)
                .map(|c| c.channels.clone())
                .unwrap_or_default(),
        };

        for (id, client) in &self.clients {
            if *id == from || client.channels.is_disjoint(&targets) {
                continue;
            }
            let _ = client
                .outbound
                .send(Frame::message(message_type.clone(), data.clone()));
        }
    }
}
