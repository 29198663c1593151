//! Keeping local projects and the other participants of a channel in sync.
//!
//! Local changes seen by the watcher are announced on the bus. Announcements
//! from others are compared with the local copy: a remote resource wins only
//! when it is strictly newer and differs in content, and its content is then
//! fetched with a `getResourceRequest`.

use std::sync::{Arc, Weak};

use flux_common::transport::{
    BusError, ChannelListener, HandlerError, HandlerResult, MessageBus, MessageHandler, Payload,
    PayloadExt, WeakBus, fields, types,
};
use serde_json::Value;
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::{
    EventBus, ListenerError, Project, Repository, RepositoryEvent, RepositoryEventType,
    RepositoryListener, Resource, ResourceType, WatcherError,
};

/// `String.hashCode` of a tag, so callback ids match other flux clients.
const fn callback_id(tag: &str) -> i64 {
    let bytes = tag.as_bytes();
    let mut hash: i32 = 0;
    let mut i = 0;
    while i < bytes.len() {
        hash = hash.wrapping_mul(31).wrapping_add(bytes[i] as i32);
        i += 1;
    }
    hash as i64
}

/// Callback id of the project listings this participant requests.
pub const GET_PROJECT_CALLBACK: i64 = callback_id("Repository - getProjectCallback");
/// Callback id of the resource contents this participant requests.
pub const GET_RESOURCE_CALLBACK: i64 = callback_id("Repository - getResourceCallback");

/// What the synchronization handlers need from their host.
pub trait RepositoryCallback: Send + Sync {
    fn send_message(&self, message_type: &str, payload: Payload) -> Result<(), BusError>;

    fn project(&self, id: &str) -> Option<Arc<Project>>;

    fn synchronized_projects(&self) -> Vec<Arc<Project>>;

    fn username(&self) -> &str;
}

struct BusCallback {
    username: SmolStr,
    repository: Arc<Repository>,
    bus: WeakBus,
}

impl RepositoryCallback for BusCallback {
    fn send_message(&self, message_type: &str, payload: Payload) -> Result<(), BusError> {
        self.bus
            .upgrade()
            .ok_or(BusError::Disposed)?
            .send(message_type, payload)
    }

    fn project(&self, id: &str) -> Option<Arc<Project>> {
        self.repository.project(id)
    }

    fn synchronized_projects(&self) -> Vec<Arc<Project>> {
        self.repository.synchronized_projects()
    }

    fn username(&self) -> &str {
        &self.username
    }
}

fn base(callback: &dyn RepositoryCallback, project: &str) -> Payload {
    Payload::new()
        .with(fields::USERNAME, callback.username())
        .with(fields::PROJECT, project)
}

fn required<'a>(payload: &'a Payload, message_type: &str, field: &'static str) -> Result<&'a str, HandlerError> {
    payload
        .get_str(field)
        .ok_or_else(|| HandlerError::malformed(message_type, field))
}

fn required_i64(payload: &Payload, message_type: &str, field: &'static str) -> Result<i64, HandlerError> {
    payload
        .get_i64(field)
        .ok_or_else(|| HandlerError::malformed(message_type, field))
}

fn resource_type(payload: &Payload) -> ResourceType {
    payload
        .get_str(fields::TYPE)
        .map_or(ResourceType::Unknown, ResourceType::parse)
}

fn fs(error: WatcherError) -> HandlerError {
    HandlerError::other(error)
}

/// Forwards one kind of local change to the bus.
struct LocalChange {
    types: [RepositoryEventType; 1],
    callback: Weak<dyn RepositoryCallback>,
}

impl RepositoryListener for LocalChange {
    fn event_types(&self) -> &[RepositoryEventType] {
        &self.types
    }

    fn on_event(&self, event: &RepositoryEvent) -> Result<(), ListenerError> {
        let Some(callback) = self.callback.upgrade() else {
            return Ok(());
        };
        announce(callback.as_ref(), event)
    }
}

/// Announce a local change: created and modified resources are also
/// reported as stored.
pub fn announce(callback: &dyn RepositoryCallback, event: &RepositoryEvent) -> Result<(), ListenerError> {
    let resource = &event.resource;
    let mut payload = base(callback, &event.project)
        .with(fields::RESOURCE, resource.path())
        .with(fields::TIMESTAMP, resource.timestamp());
    match event.kind {
        RepositoryEventType::Created => {
            payload = payload
                .with(fields::HASH, resource.hash())
                .with(fields::TYPE, resource.kind().as_str());
            callback.send_message(types::RESOURCE_CREATED, payload.clone())?;
            callback.send_message(types::RESOURCE_STORED, payload)?;
        }
        RepositoryEventType::Modified => {
            payload = payload.with(fields::HASH, resource.hash());
            callback.send_message(types::RESOURCE_CHANGED, payload.clone())?;
            callback.send_message(types::RESOURCE_STORED, payload)?;
        }
        RepositoryEventType::Deleted => {
            callback.send_message(types::RESOURCE_DELETED, payload)?;
        }
    }
    debug!(kind = ?event.kind, project = %event.project, resource = resource.path(), "announced local change");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inbound {
    ProjectRequest,
    ProjectResponse,
    ResourceRequest,
    ResourceResponse,
    ResourceCreated,
    ResourceChanged,
    ResourceDeleted,
}

impl Inbound {
    const ALL: [Inbound; 7] = [
        Inbound::ProjectRequest,
        Inbound::ProjectResponse,
        Inbound::ResourceRequest,
        Inbound::ResourceResponse,
        Inbound::ResourceCreated,
        Inbound::ResourceChanged,
        Inbound::ResourceDeleted,
    ];

    fn message_type(self) -> &'static str {
        match self {
            Inbound::ProjectRequest => types::GET_PROJECT_REQUEST,
            Inbound::ProjectResponse => types::GET_PROJECT_RESPONSE,
            Inbound::ResourceRequest => types::GET_RESOURCE_REQUEST,
            Inbound::ResourceResponse => types::GET_RESOURCE_RESPONSE,
            Inbound::ResourceCreated => types::RESOURCE_CREATED,
            Inbound::ResourceChanged => types::RESOURCE_CHANGED,
            Inbound::ResourceDeleted => types::RESOURCE_DELETED,
        }
    }
}

struct InboundHandler {
    kind: Inbound,
    callback: Arc<dyn RepositoryCallback>,
}

impl MessageHandler for InboundHandler {
    fn message_type(&self) -> &str {
        self.kind.message_type()
    }

    fn can_handle(&self, _message_type: &str, payload: &Payload) -> bool {
        if payload.get_str(fields::USERNAME) != Some(self.callback.username()) {
            return false;
        }
        match self.kind {
            Inbound::ProjectResponse => payload.get_i64(fields::CALLBACK_ID) == Some(GET_PROJECT_CALLBACK),
            Inbound::ResourceResponse => payload.get_i64(fields::CALLBACK_ID) == Some(GET_RESOURCE_CALLBACK),
            _ => true,
        }
    }

    fn handle(&self, message_type: &str, payload: &Payload) -> HandlerResult {
        let callback = self.callback.as_ref();
        match self.kind {
            Inbound::ProjectRequest => project_request(callback, message_type, payload),
            Inbound::ProjectResponse => project_response(callback, message_type, payload),
            Inbound::ResourceRequest => resource_request(callback, message_type, payload),
            Inbound::ResourceResponse => resource_response(callback, message_type, payload),
            Inbound::ResourceCreated => resource_created(callback, message_type, payload),
            Inbound::ResourceChanged => resource_changed(callback, message_type, payload),
            Inbound::ResourceDeleted => resource_deleted(callback, message_type, payload),
        }
    }
}

/// Answer with the listing of a project we hold.
fn project_request(callback: &dyn RepositoryCallback, message_type: &str, payload: &Payload) -> HandlerResult {
    let name = required(payload, message_type, fields::PROJECT)?;
    let Some(project) = callback.project(name) else {
        return Ok(());
    };
    let files: Vec<Value> = project
        .resources()
        .iter()
        .map(|resource| {
            Value::Object(
                Payload::new()
                    .with(fields::PATH, resource.path())
                    .with(fields::TIMESTAMP, resource.timestamp())
                    .with(fields::HASH, resource.hash())
                    .with(fields::TYPE, resource.kind().as_str()),
            )
        })
        .collect();
    let response = payload.clone().with(fields::FILES, files);
    callback.send_message(types::GET_PROJECT_RESPONSE, response).map_err(HandlerError::other)?;
    Ok(())
}

/// Fetch files that are missing or outdated locally, create missing
/// folders and apply newer deletions.
fn project_response(callback: &dyn RepositoryCallback, message_type: &str, payload: &Payload) -> HandlerResult {
    let name = required(payload, message_type, fields::PROJECT)?;
    let Some(project) = callback.project(name) else {
        return Ok(());
    };
    let files = payload
        .get(fields::FILES)
        .and_then(Value::as_array)
        .ok_or_else(|| HandlerError::malformed(message_type, fields::FILES))?;

    for file in files.iter().filter_map(Value::as_object) {
        let path = required(file, message_type, fields::PATH)?;
        let timestamp = required_i64(file, message_type, fields::TIMESTAMP)?;
        let hash = file.get_str(fields::HASH).unwrap_or(crate::NULL_CONTENT_HASH);
        let local = project.resource(path).map_err(fs)?;
        match resource_type(file) {
            ResourceType::File => {
                if local.is_none_or(|local| local.is_outdated_by(hash, timestamp)) {
                    let request = base(callback, name)
                        .with(fields::RESOURCE, path)
                        .with(fields::TIMESTAMP, timestamp)
                        .with(fields::HASH, hash)
                        .with(fields::CALLBACK_ID, GET_RESOURCE_CALLBACK);
                    callback.send_message(types::GET_RESOURCE_REQUEST, request).map_err(HandlerError::other)?;
                }
            }
            ResourceType::Folder if local.is_none() => {
                project
                    .create_resource(&Resource::folder(path, timestamp))
                    .map_err(fs)?;
            }
            _ => {}
        }
    }

    let deleted = payload.get(fields::DELETED).and_then(Value::as_array);
    for entry in deleted.into_iter().flatten().filter_map(Value::as_object) {
        let path = required(entry, message_type, fields::PATH)?;
        let timestamp = required_i64(entry, message_type, fields::TIMESTAMP)?;
        let local = project.resource(path).map_err(fs)?;
        if local.is_some_and(|local| local.timestamp() < timestamp) {
            project.delete_resource(path).map_err(fs)?;
        }
    }
    Ok(())
}

/// Answer with the content of a resource we hold, as long as it is the
/// version that was asked for.
fn resource_request(callback: &dyn RepositoryCallback, message_type: &str, payload: &Payload) -> HandlerResult {
    let name = required(payload, message_type, fields::PROJECT)?;
    let path = required(payload, message_type, fields::RESOURCE)?;
    let Some(project) = callback.project(name) else {
        return Ok(());
    };
    let Some(resource) = project.resource(path).map_err(fs)? else {
        return Ok(());
    };
    if payload
        .get_i64(fields::TIMESTAMP)
        .is_some_and(|wanted| wanted != resource.timestamp())
    {
        return Ok(());
    }

    let mut response = payload
        .clone()
        .with(fields::TIMESTAMP, resource.timestamp())
        .with(fields::HASH, resource.hash())
        .with(fields::TYPE, resource.kind().as_str());
    if resource.kind() == ResourceType::File {
        if payload
            .get_str(fields::HASH)
            .is_some_and(|wanted| wanted != resource.hash())
        {
            return Ok(());
        }
        let content = resource.content_str().unwrap_or_default().into_owned();
        response = response.with(fields::CONTENT, content);
    }
    callback.send_message(types::GET_RESOURCE_RESPONSE, response).map_err(HandlerError::other)?;
    Ok(())
}

/// Store fetched content when the file is missing or outdated, and
/// report it stored.
fn resource_response(callback: &dyn RepositoryCallback, message_type: &str, payload: &Payload) -> HandlerResult {
    let name = required(payload, message_type, fields::PROJECT)?;
    let path = required(payload, message_type, fields::RESOURCE)?;
    let timestamp = required_i64(payload, message_type, fields::TIMESTAMP)?;
    let hash = required(payload, message_type, fields::HASH)?;
    let content = required(payload, message_type, fields::CONTENT)?;
    let Some(project) = callback.project(name) else {
        return Ok(());
    };
    if !matches!(resource_type(payload), ResourceType::File | ResourceType::Unknown) {
        return Ok(());
    }

    let incoming = Resource::file(path, timestamp, content);
    let stored = match project.resource(path).map_err(fs)? {
        Some(local) if local.kind() == ResourceType::File => {
            local.is_outdated_by(hash, timestamp) && project.update_resource(&incoming).map_err(fs)?
        }
        Some(_) => false,
        None => project.create_resource(&incoming).map_err(fs)?,
    };
    if stored {
        info!(project = name, resource = path, "stored remote resource");
        let report = base(callback, name)
            .with(fields::RESOURCE, path)
            .with(fields::TIMESTAMP, timestamp)
            .with(fields::HASH, hash)
            .with(fields::TYPE, ResourceType::File.as_str());
        callback.send_message(types::RESOURCE_STORED, report).map_err(HandlerError::other)?;
    }
    Ok(())
}

/// Create announced folders directly; request announced files.
fn resource_created(callback: &dyn RepositoryCallback, message_type: &str, payload: &Payload) -> HandlerResult {
    let name = required(payload, message_type, fields::PROJECT)?;
    let path = required(payload, message_type, fields::RESOURCE)?;
    let timestamp = required_i64(payload, message_type, fields::TIMESTAMP)?;
    let hash = payload.get_str(fields::HASH).unwrap_or(crate::NULL_CONTENT_HASH);
    let Some(project) = callback.project(name) else {
        return Ok(());
    };
    if project.has_resource(path) {
        return Ok(());
    }

    let kind = resource_type(payload);
    let content = base(callback, name)
        .with(fields::RESOURCE, path)
        .with(fields::TIMESTAMP, timestamp)
        .with(fields::HASH, hash)
        .with(fields::TYPE, kind.as_str());
    match kind {
        ResourceType::File => {
            let request = content.with(fields::CALLBACK_ID, GET_RESOURCE_CALLBACK);
            callback.send_message(types::GET_RESOURCE_REQUEST, request).map_err(HandlerError::other)?;
        }
        ResourceType::Folder => {
            project
                .create_resource(&Resource::folder(path, timestamp))
                .map_err(fs)?;
            callback.send_message(types::RESOURCE_STORED, content).map_err(HandlerError::other)?;
        }
        ResourceType::Unknown => {}
    }
    Ok(())
}

/// Request the new content of a file when the announced version wins.
fn resource_changed(callback: &dyn RepositoryCallback, message_type: &str, payload: &Payload) -> HandlerResult {
    let name = required(payload, message_type, fields::PROJECT)?;
    let path = required(payload, message_type, fields::RESOURCE)?;
    let timestamp = required_i64(payload, message_type, fields::TIMESTAMP)?;
    let hash = required(payload, message_type, fields::HASH)?;
    let Some(project) = callback.project(name) else {
        return Ok(());
    };
    let Some(local) = project.resource(path).map_err(fs)? else {
        return Ok(());
    };
    if local.is_outdated_by(hash, timestamp) {
        let request = base(callback, name)
            .with(fields::RESOURCE, path)
            .with(fields::TIMESTAMP, timestamp)
            .with(fields::HASH, hash)
            .with(fields::CALLBACK_ID, GET_RESOURCE_CALLBACK);
        callback.send_message(types::GET_RESOURCE_REQUEST, request).map_err(HandlerError::other)?;
    }
    Ok(())
}

/// Delete a resource when the deletion is newer than the local copy.
fn resource_deleted(callback: &dyn RepositoryCallback, message_type: &str, payload: &Payload) -> HandlerResult {
    let name = required(payload, message_type, fields::PROJECT)?;
    let path = required(payload, message_type, fields::RESOURCE)?;
    let timestamp = required_i64(payload, message_type, fields::TIMESTAMP)?;
    let Some(project) = callback.project(name) else {
        return Ok(());
    };
    let local = project.resource(path).map_err(fs)?;
    if local.is_some_and(|local| local.timestamp() < timestamp) {
        project.delete_resource(path).map_err(fs)?;
    }
    Ok(())
}

/// Announce a project and ask the channel for its current state.
fn connect_project(callback: &dyn RepositoryCallback, project: &str) -> Result<(), BusError> {
    callback.send_message(types::PROJECT_CONNECTED, base(callback, project))?;
    let request = base(callback, project)
        .with(fields::INCLUDE_DELETED, true)
        .with(fields::CALLBACK_ID, GET_PROJECT_CALLBACK);
    callback.send_message(types::GET_PROJECT_REQUEST, request)
}

/// Re-announces every project whenever the user's channel is joined.
struct Resync {
    callback: Weak<dyn RepositoryCallback>,
}

impl ChannelListener for Resync {
    fn connected(&self, channel: &str) {
        let Some(callback) = self.callback.upgrade() else {
            return;
        };
        for project in callback.synchronized_projects() {
            if let Err(err) = connect_project(callback.as_ref(), project.id()) {
                warn!(channel, project = project.id(), error = %err, "failed to announce project");
            }
        }
    }

    fn disconnected(&self, _channel: &str) {}
}

/// Synchronizes the projects of a [`Repository`] over a [`MessageBus`].
pub struct SystemSync {
    callback: Arc<dyn RepositoryCallback>,
    repository: Arc<Repository>,
    bus: MessageBus,
    handlers: Vec<Arc<dyn MessageHandler>>,
    listeners: Vec<Arc<dyn RepositoryListener>>,
    channel_listener: Arc<dyn ChannelListener>,
}

impl SystemSync {
    pub fn new(bus: &MessageBus, repository: Arc<Repository>, username: impl Into<SmolStr>) -> Self {
        let callback: Arc<dyn RepositoryCallback> = Arc::new(BusCallback {
            username: username.into(),
            repository: repository.clone(),
            bus: bus.downgrade(),
        });

        let handlers: Vec<Arc<dyn MessageHandler>> = Inbound::ALL
            .into_iter()
            .map(|kind| {
                Arc::new(InboundHandler {
                    kind,
                    callback: callback.clone(),
                }) as Arc<dyn MessageHandler>
            })
            .collect();
        for handler in &handlers {
            bus.add_message_handler(handler.clone());
        }

        let listeners: Vec<Arc<dyn RepositoryListener>> = [
            RepositoryEventType::Created,
            RepositoryEventType::Modified,
            RepositoryEventType::Deleted,
        ]
        .into_iter()
        .map(|kind| {
            Arc::new(LocalChange {
                types: [kind],
                callback: Arc::downgrade(&callback),
            }) as Arc<dyn RepositoryListener>
        })
        .collect();
        let events: &EventBus = repository.events();
        for listener in &listeners {
            events.add_listener(listener.clone());
        }

        let channel_listener: Arc<dyn ChannelListener> = Arc::new(Resync {
            callback: Arc::downgrade(&callback),
        });
        bus.add_channel_listener(channel_listener.clone());

        Self {
            callback,
            repository,
            bus: bus.clone(),
            handlers,
            listeners,
            channel_listener,
        }
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    pub fn username(&self) -> &str {
        self.callback.username()
    }

    /// Start synchronizing project `id`. When the bus is not connected the
    /// announcement is sent once the channel is joined.
    pub fn add_project(
        &self,
        id: impl Into<SmolStr>,
        root: impl AsRef<std::path::Path>,
    ) -> Result<Arc<Project>, WatcherError> {
        let project = self.repository.add_project(id, root)?;
        if let Err(err) = connect_project(self.callback.as_ref(), project.id()) {
            debug!(project = project.id(), error = %err, "project announced after reconnect");
        }
        Ok(project)
    }

    /// Stop synchronizing project `id`.
    pub fn remove_project(&self, id: &str) -> Option<Arc<Project>> {
        let project = self.repository.remove_project(id)?;
        let payload = base(self.callback.as_ref(), id);
        if let Err(err) = self.callback.send_message(types::PROJECT_DISCONNECTED, payload) {
            debug!(project = id, error = %err, "could not announce disconnect");
        }
        Some(project)
    }

    pub fn is_project_connected(&self, id: &str) -> bool {
        self.repository.project(id).is_some()
    }

    /// Deregister every handler and listener. Also done on drop.
    pub fn dispose(&self) {
        for handler in &self.handlers {
            self.bus.remove_message_handler(handler);
        }
        for listener in &self.listeners {
            self.repository.events().remove_listener(listener);
        }
        self.bus.remove_channel_listener(&self.channel_listener);
    }
}

impl Drop for SystemSync {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl RepositoryCallback for SystemSync {
    fn send_message(&self, message_type: &str, payload: Payload) -> Result<(), BusError> {
        self.callback.send_message(message_type, payload)
    }

    fn project(&self, id: &str) -> Option<Arc<Project>> {
        self.callback.project(id)
    }

    fn synchronized_projects(&self) -> Vec<Arc<Project>> {
        self.callback.synchronized_projects()
    }

    fn username(&self) -> &str {
        self.callback.username()
    }
}
