//! Live editing of one document over the message bus.
//!
//! A [`LiveEditSession`] owns the [`SyncController`] for one
//! `(project, resource)` pair. Local edits are applied and published as
//! `liveOperation` messages; matching inbound messages are applied to the
//! same controller.
//!
//! A session announces itself with `liveResourceStarted`. Any session that
//! has already applied operations answers with `liveResourceStartedResponse`
//! carrying the text it started from and its history, which the newcomer
//! replays before it takes part.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use flux_common::transport::{
    ConnectionListener, HandlerError, HandlerResult, MessageBus, MessageHandler, Payload,
    PayloadExt, WeakBus, fields, types,
};
use parking_lot::Mutex;
use smol_str::{SmolStr, format_smolstr};
use tracing::{debug, trace, warn};

use crate::{Applied, Operation, SyncController, SyncError, TextTarget, VersionVector};

/// Answer to a handshake, before it has been matched to a request.
const STARTED_CALLBACK: i64 = 0;

/// Remote operations held back until their dependencies arrive.
const MAX_PARKED: usize = 256;

/// Identifies one shared document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub project: SmolStr,
    pub resource: SmolStr,
}

impl DocumentKey {
    pub fn new(project: impl Into<SmolStr>, resource: impl Into<SmolStr>) -> Self {
        Self {
            project: project.into(),
            resource: resource.into(),
        }
    }

    fn matches(&self, payload: &Payload) -> bool {
        payload.get_str(fields::PROJECT) == Some(self.project.as_str())
            && payload.get_str(fields::RESOURCE) == Some(self.resource.as_str())
    }
}

/// Hash and timestamp of the last saved version of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavePoint {
    pub hash: SmolStr,
    pub timestamp: i64,
}

struct Shared<T> {
    key: DocumentKey,
    username: SmolStr,
    participant: SmolStr,
    controller: Mutex<SyncController<T>>,
    /// Text the controller's history starts from.
    base: Mutex<String>,
    save_point: Mutex<Option<SavePoint>>,
    /// Local operations the bus refused, oldest first.
    unsent: Mutex<VecDeque<Operation>>,
    /// Remote operations that arrived before an operation they depend on.
    parked: Mutex<Vec<Operation>>,
    bus: WeakBus,
}

impl<T: TextTarget> Shared<T> {
    fn payload(&self, operation: &Operation) -> Result<Payload, SyncError> {
        let operation = operation
            .to_json()
            .map_err(|e| SyncError::Malformed(e.to_string()))?;
        Ok(self.document_payload().with(fields::OPERATION, operation))
    }

    fn document_payload(&self) -> Payload {
        Payload::new()
            .with(fields::USERNAME, self.username.as_str())
            .with(fields::PROJECT, self.key.project.as_str())
            .with(fields::RESOURCE, self.key.resource.as_str())
    }

    /// Ask sessions already editing the document for their state, unless
    /// this one has applied something already.
    fn announce(&self) {
        if !self.controller.lock().history().is_empty() {
            return;
        }
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let mut payload = self
            .document_payload()
            .with(fields::REQUEST_SENDER_ID, self.participant.as_str())
            .with(fields::CALLBACK_ID, STARTED_CALLBACK);
        if let Some(save_point) = self.save_point.lock().clone() {
            payload = payload
                .with(fields::HASH, save_point.hash.as_str())
                .with(fields::TIMESTAMP, save_point.timestamp);
        }
        match bus.send(types::LIVE_RESOURCE_STARTED, payload) {
            Ok(()) => debug!(participant = %self.participant, "announced live edit session"),
            Err(error) => debug!(%error, "live edit announcement held until reconnect"),
        }
    }

    /// Describe this session's state to `requester`, if there is any to share.
    fn answer(&self, requester: &str, callback: i64) -> Result<Option<Payload>, SyncError> {
        let controller = self.controller.lock();
        if controller.history().is_empty() {
            return Ok(None);
        }
        let history = controller
            .history()
            .iter()
            .map(|entry| entry.original().to_json())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SyncError::Malformed(e.to_string()))?;
        let mut payload = self
            .document_payload()
            .with(fields::REQUEST_SENDER_ID, requester)
            .with(fields::CALLBACK_ID, callback)
            .with(fields::LIVE_CONTENT, controller.target().contents())
            .with(fields::LIVE_BASE, self.base.lock().as_str())
            .with(fields::LIVE_HISTORY, history);
        if let Some(save_point) = self.save_point.lock().clone() {
            payload = payload
                .with(fields::SAVE_POINT_HASH, save_point.hash.as_str())
                .with(fields::SAVE_POINT_TIMESTAMP, save_point.timestamp);
        }
        Ok(Some(payload))
    }

    /// Take over the state another session described.
    fn seed(&self, base: &str, history: &[Operation], content: Option<&str>) {
        let mut controller = self.controller.lock();
        if history.iter().all(|operation| controller.is_applied(operation.id())) {
            trace!("live edit state already known");
            return;
        }
        if let Err(error) = controller.seed(base, history) {
            warn!(%error, "ignoring live edit state");
            return;
        }
        *self.base.lock() = base.to_string();
        let current = controller.target().contents();
        if content.is_some_and(|content| content != current) {
            warn!(participant = %self.participant, "replayed text differs from the responder's");
        }
        debug!(operations = history.len(), "joined live edit session");
        self.retry_parked(&mut controller);
    }

    /// Send queued local operations in order, stopping at the first refusal.
    fn flush(&self) -> Result<(), SyncError> {
        let Some(bus) = self.bus.upgrade() else {
            return Ok(());
        };
        let mut unsent = self.unsent.lock();
        while let Some(operation) = unsent.front() {
            let payload = self.payload(operation)?;
            if let Err(error) = bus.send(types::LIVE_OPERATION, payload) {
                debug!(%error, queued = unsent.len(), "live operations held until reconnect");
                break;
            }
            unsent.pop_front();
        }
        Ok(())
    }

    /// Create, apply and queue a local operation under one lock, so
    /// operations are queued in the order they were created.
    fn local(
        &self,
        create: impl FnOnce(&mut SyncController<T>) -> Result<Operation, SyncError>,
    ) -> Result<Operation, SyncError> {
        let operation = {
            let mut controller = self.controller.lock();
            let operation = create(&mut controller)?;
            controller.apply_operation(&operation)?;
            self.unsent.lock().push_back(operation.clone());
            operation
        };
        self.flush()?;
        Ok(operation)
    }

    fn remote(&self, operation: Operation) {
        let mut controller = self.controller.lock();
        match controller.apply_operation(&operation) {
            Ok(applied) => {
                trace!(operation = %operation.id(), ?applied, "applied live operation");
                if applied != Applied::Duplicate {
                    self.retry_parked(&mut controller);
                }
            }
            Err(
                error @ (SyncError::OutOfOrder { .. }
                | SyncError::UnknownPreviousOperation { .. }
                | SyncError::MissingDependency { .. }),
            ) => {
                let mut parked = self.parked.lock();
                if parked.len() < MAX_PARKED {
                    debug!(%error, operation = %operation.id(), "parking live operation");
                    parked.push(operation);
                } else {
                    warn!(%error, operation = %operation.id(), "dropping live operation");
                }
            }
            Err(error) => {
                warn!(%error, operation = %operation.id(), "dropping live operation");
            }
        }
    }

    fn retry_parked(&self, controller: &mut SyncController<T>) {
        let mut parked = self.parked.lock();
        loop {
            let before = parked.len();
            parked.retain(|operation| match controller.apply_operation(operation) {
                Ok(_) => false,
                Err(
                    SyncError::OutOfOrder { .. }
                    | SyncError::UnknownPreviousOperation { .. }
                    | SyncError::MissingDependency { .. },
                ) => true,
                Err(error) => {
                    warn!(%error, operation = %operation.id(), "dropping live operation");
                    false
                }
            });
            if parked.len() == before {
                break;
            }
        }
    }
}

struct LiveOperationHandler<T> {
    shared: Weak<Shared<T>>,
    key: DocumentKey,
}

impl<T: TextTarget + Send + 'static> MessageHandler for LiveOperationHandler<T> {
    fn message_type(&self) -> &str {
        types::LIVE_OPERATION
    }

    fn can_handle(&self, _message_type: &str, payload: &Payload) -> bool {
        self.key.matches(payload)
    }

    fn handle(&self, message_type: &str, payload: &Payload) -> HandlerResult {
        let Some(shared) = self.shared.upgrade() else {
            return Ok(());
        };
        let value = payload
            .get(fields::OPERATION)
            .cloned()
            .ok_or_else(|| HandlerError::malformed(message_type, fields::OPERATION))?;
        let operation = Operation::from_json(value)
            .map_err(|_| HandlerError::malformed(message_type, fields::OPERATION))?;
        shared.remote(operation);
        Ok(())
    }
}

/// Answers newcomers to the document.
struct StartedHandler<T> {
    shared: Weak<Shared<T>>,
    key: DocumentKey,
}

impl<T: TextTarget + Send + 'static> MessageHandler for StartedHandler<T> {
    fn message_type(&self) -> &str {
        types::LIVE_RESOURCE_STARTED
    }

    fn can_handle(&self, _message_type: &str, payload: &Payload) -> bool {
        self.key.matches(payload)
    }

    fn handle(&self, message_type: &str, payload: &Payload) -> HandlerResult {
        let Some(shared) = self.shared.upgrade() else {
            return Ok(());
        };
        let requester = payload
            .get_str(fields::REQUEST_SENDER_ID)
            .ok_or_else(|| HandlerError::malformed(message_type, fields::REQUEST_SENDER_ID))?;
        if requester == shared.participant.as_str() {
            return Ok(());
        }
        let callback = payload.get_i64(fields::CALLBACK_ID).unwrap_or(STARTED_CALLBACK);
        let answer = match shared.answer(requester, callback) {
            Ok(Some(answer)) => answer,
            Ok(None) => return Ok(()),
            Err(error) => {
                warn!(%error, "cannot describe live edit state");
                return Ok(());
            }
        };
        if let Some(bus) = shared.bus.upgrade() {
            bus.send(types::LIVE_RESOURCE_STARTED_RESPONSE, answer)
                .map_err(HandlerError::other)?;
            debug!(%requester, "sent live edit state");
        }
        Ok(())
    }
}

/// Seeds this session from the first useful answer to its announcement.
struct StartedResponseHandler<T> {
    shared: Weak<Shared<T>>,
    key: DocumentKey,
    participant: SmolStr,
}

impl<T: TextTarget + Send + 'static> MessageHandler for StartedResponseHandler<T> {
    fn message_type(&self) -> &str {
        types::LIVE_RESOURCE_STARTED_RESPONSE
    }

    fn can_handle(&self, _message_type: &str, payload: &Payload) -> bool {
        self.key.matches(payload)
            && payload.get_str(fields::REQUEST_SENDER_ID) == Some(self.participant.as_str())
    }

    fn handle(&self, message_type: &str, payload: &Payload) -> HandlerResult {
        let Some(shared) = self.shared.upgrade() else {
            return Ok(());
        };
        let base = payload
            .get_str(fields::LIVE_BASE)
            .ok_or_else(|| HandlerError::malformed(message_type, fields::LIVE_BASE))?;
        let history = payload
            .get(fields::LIVE_HISTORY)
            .and_then(|history| history.as_array())
            .ok_or_else(|| HandlerError::malformed(message_type, fields::LIVE_HISTORY))?
            .iter()
            .map(|operation| Operation::from_json(operation.clone()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| HandlerError::malformed(message_type, fields::LIVE_HISTORY))?;

        if let (Some(hash), Some(timestamp)) = (
            payload.get_str(fields::SAVE_POINT_HASH),
            payload.get_i64(fields::SAVE_POINT_TIMESTAMP),
        ) {
            let mut save_point = shared.save_point.lock();
            if save_point.as_ref().is_none_or(|known| known.timestamp < timestamp) {
                *save_point = Some(SavePoint {
                    hash: hash.into(),
                    timestamp,
                });
            }
        }
        shared.seed(base, &history, payload.get_str(fields::LIVE_CONTENT));
        Ok(())
    }
}

struct Reconnected<T> {
    shared: Weak<Shared<T>>,
}

impl<T: TextTarget + Send + 'static> ConnectionListener for Reconnected<T> {
    fn connected(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if let Err(error) = shared.flush() {
            warn!(%error, "failed to resend live operations");
        }
        shared.announce();
    }

    fn disconnected(&self) {}
}

/// One participant editing one document live.
///
/// Every mutation goes through the session's controller lock, so local and
/// remote edits never interleave inside an operation.
pub struct LiveEditSession<T> {
    shared: Arc<Shared<T>>,
    bus: MessageBus,
    handlers: Vec<Arc<dyn MessageHandler>>,
    listener: Arc<dyn ConnectionListener>,
}

impl<T: TextTarget + Send + 'static> LiveEditSession<T> {
    /// Start editing `key` with `target` holding its current text.
    ///
    /// The participant id is `username` plus a random suffix, so the same
    /// user can edit from several places at once. If another session is
    /// already editing the document, its state replaces `target`'s text
    /// once it answers.
    pub fn open(bus: &MessageBus, username: impl Into<SmolStr>, key: DocumentKey, target: T) -> Self {
        let username = username.into();
        let participant = format_smolstr!("{username}.{:08x}", rand::random::<u32>());
        debug!(%participant, project = %key.project, resource = %key.resource, "opening live edit session");

        let shared = Arc::new(Shared {
            key: key.clone(),
            username,
            participant: participant.clone(),
            base: Mutex::new(target.contents()),
            controller: Mutex::new(SyncController::new(participant.clone(), target)),
            save_point: Mutex::new(None),
            unsent: Mutex::new(VecDeque::new()),
            parked: Mutex::new(Vec::new()),
            bus: bus.downgrade(),
        });
        let handlers: Vec<Arc<dyn MessageHandler>> = vec![
            Arc::new(LiveOperationHandler {
                shared: Arc::downgrade(&shared),
                key: key.clone(),
            }),
            Arc::new(StartedHandler {
                shared: Arc::downgrade(&shared),
                key: key.clone(),
            }),
            Arc::new(StartedResponseHandler {
                shared: Arc::downgrade(&shared),
                key,
                participant,
            }),
        ];
        let listener: Arc<dyn ConnectionListener> = Arc::new(Reconnected {
            shared: Arc::downgrade(&shared),
        });
        for handler in &handlers {
            bus.add_message_handler(handler.clone());
        }
        bus.add_connection_listener(listener.clone());
        shared.announce();

        Self {
            shared,
            bus: bus.clone(),
            handlers,
            listener,
        }
    }

    pub fn key(&self) -> &DocumentKey {
        &self.shared.key
    }

    pub fn participant(&self) -> SmolStr {
        self.shared.participant.clone()
    }

    /// Record that the document was saved as `hash` at `timestamp`.
    pub fn mark_saved(&self, hash: impl Into<SmolStr>, timestamp: i64) {
        *self.shared.save_point.lock() = Some(SavePoint {
            hash: hash.into(),
            timestamp,
        });
    }

    pub fn save_point(&self) -> Option<SavePoint> {
        self.shared.save_point.lock().clone()
    }

    /// Insert `characters` at char offset `position` and publish it.
    pub fn insert(&self, characters: &str, position: usize) -> Result<Operation, SyncError> {
        self.shared
            .local(|controller| controller.create_insert_operation(characters, position))
    }

    /// Delete `length` chars at char offset `position` and publish it.
    pub fn delete(&self, position: usize, length: usize) -> Result<Operation, SyncError> {
        self.shared
            .local(|controller| controller.create_delete_operation(position, length))
    }

    /// Run `f` against the current text.
    pub fn with_target<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(self.shared.controller.lock().target())
    }

    pub fn version(&self) -> VersionVector {
        self.shared.controller.lock().version().clone()
    }

    /// Local operations waiting for the bus to accept them.
    pub fn unsent(&self) -> usize {
        self.shared.unsent.lock().len()
    }

    /// Remote operations waiting for an operation they depend on.
    pub fn parked(&self) -> usize {
        self.shared.parked.lock().len()
    }

    /// Stop receiving and reject further edits.
    pub fn dispose(&self) {
        self.detach();
        self.shared.controller.lock().dispose();
    }
}

impl<T> LiveEditSession<T> {
    fn detach(&self) {
        for handler in &self.handlers {
            self.bus.remove_message_handler(handler);
        }
        self.bus.remove_connection_listener(&self.listener);
    }
}

impl<T> Drop for LiveEditSession<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use flux_common::transport::{BusConfig, MemoryHub};

    use super::*;
    use crate::StringTarget;

    async fn connected_bus(hub: &MemoryHub) -> MessageBus {
        let bus = MessageBus::new(
            hub.transport(),
            BusConfig {
                channel: Some("alice".into()),
                join_timeout: Duration::from_secs(2),
                request_timeout: Duration::from_secs(2),
            },
        );
        bus.connect().unwrap();
        bus.wait_ready().await.unwrap();
        bus
    }

    fn text(session: &LiveEditSession<StringTarget>) -> String {
        session.with_target(|t| t.as_str().to_string())
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    fn key() -> DocumentKey {
        DocumentKey::new("web", "src/cat.txt")
    }

    #[tokio::test]
    async fn test_local_edits_reach_other_participant() {
        let hub = MemoryHub::new();
        let first_bus = connected_bus(&hub).await;
        let second_bus = connected_bus(&hub).await;
        let first = LiveEditSession::open(&first_bus, "alice", key(), StringTarget::new("cat"));
        let second = LiveEditSession::open(&second_bus, "alice", key(), StringTarget::new("cat"));

        first.insert("s", 3).unwrap();
        first.delete(0, 1).unwrap();

        eventually(|| text(&second) == "ats").await;
        assert_eq!(text(&first), "ats");
        assert_ne!(first.participant(), second.participant());
    }

    #[tokio::test]
    async fn test_concurrent_edits_converge() {
        let hub = MemoryHub::new();
        let first_bus = connected_bus(&hub).await;
        let second_bus = connected_bus(&hub).await;
        let first = LiveEditSession::open(&first_bus, "alice", key(), StringTarget::new("cat"));
        let second = LiveEditSession::open(&second_bus, "alice", key(), StringTarget::new("cat"));

        first.insert("s", 3).unwrap();
        second.insert("old ", 0).unwrap();

        eventually(|| text(&first) == "old cats" && text(&second) == "old cats").await;
    }

    #[tokio::test]
    async fn test_other_documents_are_ignored() {
        let hub = MemoryHub::new();
        let first_bus = connected_bus(&hub).await;
        let second_bus = connected_bus(&hub).await;
        let first = LiveEditSession::open(&first_bus, "alice", key(), StringTarget::new("cat"));
        let other = LiveEditSession::open(
            &second_bus,
            "alice",
            DocumentKey::new("web", "src/dog.txt"),
            StringTarget::new("dog"),
        );
        let same = LiveEditSession::open(&second_bus, "alice", key(), StringTarget::new("cat"));

        first.insert("s", 3).unwrap();

        eventually(|| text(&same) == "cats").await;
        assert_eq!(text(&other), "dog");
    }

    #[tokio::test]
    async fn test_edits_while_disconnected_are_sent_after_reconnect() {
        let hub = MemoryHub::new();
        let second_bus = connected_bus(&hub).await;
        let second = LiveEditSession::open(&second_bus, "alice", key(), StringTarget::new("cat"));
        let first_bus = MessageBus::new(
            hub.transport(),
            BusConfig {
                channel: Some("alice".into()),
                join_timeout: Duration::from_secs(2),
                request_timeout: Duration::from_secs(2),
            },
        );
        let first = LiveEditSession::open(&first_bus, "alice", key(), StringTarget::new("cat"));

        first.insert("s", 3).unwrap();
        assert_eq!(first.unsent(), 1);

        first_bus.connect().unwrap();
        first_bus.wait_ready().await.unwrap();

        eventually(|| text(&second) == "cats").await;
        assert_eq!(first.unsent(), 0);
    }

    #[tokio::test]
    async fn test_dispose_stops_receiving() {
        let hub = MemoryHub::new();
        let first_bus = connected_bus(&hub).await;
        let second_bus = connected_bus(&hub).await;
        let first = LiveEditSession::open(&first_bus, "alice", key(), StringTarget::new("cat"));
        let second = LiveEditSession::open(&second_bus, "alice", key(), StringTarget::new("cat"));

        second.dispose();
        assert_eq!(second_bus.handler_count(types::LIVE_OPERATION), 0);
        first.insert("s", 3).unwrap();

        assert_eq!(second.insert("x", 0), Err(SyncError::Disposed));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(text(&second), "cat");
    }

    #[test]
    fn test_operations_wait_for_dependencies() {
        let hub_less = MessageBus::new(MemoryHub::new().transport(), BusConfig::default());
        let session = LiveEditSession::open(&hub_less, "bob", key(), StringTarget::new("cat"));

        let mut author = SyncController::new("alice.1", StringTarget::new("cat"));
        let first = author.create_insert_operation("s", 3).unwrap();
        author.apply_operation(&first).unwrap();
        let second = author.create_insert_operation("!", 4).unwrap();
        author.apply_operation(&second).unwrap();

        session.shared.remote(second);
        assert_eq!(session.parked(), 1);
        assert_eq!(text(&session), "cat");

        session.shared.remote(first);
        assert_eq!(session.parked(), 0);
        assert_eq!(text(&session), "cats!");
    }

    #[tokio::test]
    async fn test_late_session_takes_over_live_state() {
        let hub = MemoryHub::new();
        let first_bus = connected_bus(&hub).await;
        let second_bus = connected_bus(&hub).await;
        let first = LiveEditSession::open(&first_bus, "alice", key(), StringTarget::new("cat"));
        first.mark_saved("c0ffee", 42);
        first.insert("s", 3).unwrap();
        first.delete(0, 1).unwrap();

        // Opened on the saved file, which lacks the live edits.
        let second = LiveEditSession::open(&second_bus, "alice", key(), StringTarget::new("cat"));
        eventually(|| text(&second) == "ats").await;
        assert_eq!(second.version(), first.version());
        assert_eq!(
            second.save_point(),
            Some(SavePoint {
                hash: "c0ffee".into(),
                timestamp: 42
            })
        );

        first.insert("!", 3).unwrap();
        second.insert("b", 0).unwrap();

        eventually(|| text(&first) == "bats!" && text(&second) == "bats!").await;
        assert_eq!(second.parked(), 0);
    }

    #[tokio::test]
    async fn test_announcement_resent_after_connect() {
        let hub = MemoryHub::new();
        let first_bus = connected_bus(&hub).await;
        let first = LiveEditSession::open(&first_bus, "alice", key(), StringTarget::new("cat"));
        first.insert("s", 3).unwrap();

        let second_bus = MessageBus::new(
            hub.transport(),
            BusConfig {
                channel: Some("alice".into()),
                join_timeout: Duration::from_secs(2),
                request_timeout: Duration::from_secs(2),
            },
        );
        let second = LiveEditSession::open(&second_bus, "alice", key(), StringTarget::new("cat"));
        assert_eq!(text(&second), "cat");

        second_bus.connect().unwrap();
        second_bus.wait_ready().await.unwrap();

        eventually(|| text(&second) == "cats").await;
    }

    #[test]
    fn test_state_answer_round_trips_through_seed() {
        let bus = MessageBus::new(MemoryHub::new().transport(), BusConfig::default());
        let first = LiveEditSession::open(&bus, "alice", key(), StringTarget::new("cat"));
        let second = LiveEditSession::open(&bus, "bob", key(), StringTarget::new("dog"));
        assert!(first.shared.answer("someone", 0).unwrap().is_none());

        first.insert("s", 3).unwrap();
        let answer = first
            .shared
            .answer(second.participant().as_str(), 0)
            .unwrap()
            .unwrap();
        assert_eq!(answer.get_str(fields::LIVE_CONTENT), Some("cats"));
        assert_eq!(answer.get_str(fields::LIVE_BASE), Some("cat"));

        let handler = StartedResponseHandler {
            shared: Arc::downgrade(&second.shared),
            key: key(),
            participant: second.participant(),
        };
        assert!(handler.can_handle(types::LIVE_RESOURCE_STARTED_RESPONSE, &answer));
        handler
            .handle(types::LIVE_RESOURCE_STARTED_RESPONSE, &answer)
            .unwrap();
        assert_eq!(text(&second), "cats");

        let other = StartedResponseHandler {
            shared: Arc::downgrade(&first.shared),
            key: key(),
            participant: first.participant(),
        };
        assert!(!other.can_handle(types::LIVE_RESOURCE_STARTED_RESPONSE, &answer));
    }
}
