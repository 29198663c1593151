//! Wire protocol for flux messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;

/// Message body: a JSON object keyed by the names in [`fields`].
pub type Payload = serde_json::Map<String, Value>;

/// Message type names.
pub mod types {
    pub const CONNECT_TO_CHANNEL: &str = "connectToChannel";
    pub const DISCONNECT_FROM_CHANNEL: &str = "disconnectFromChannel";

    pub const PROJECT_CONNECTED: &str = "projectConnected";
    pub const PROJECT_DISCONNECTED: &str = "projectDisconnected";

    pub const GET_PROJECT_REQUEST: &str = "getProjectRequest";
    pub const GET_PROJECT_RESPONSE: &str = "getProjectResponse";
    pub const GET_RESOURCE_REQUEST: &str = "getResourceRequest";
    pub const GET_RESOURCE_RESPONSE: &str = "getResourceResponse";

    pub const RESOURCE_CREATED: &str = "resourceCreated";
    pub const RESOURCE_CHANGED: &str = "resourceChanged";
    pub const RESOURCE_DELETED: &str = "resourceDeleted";
    pub const RESOURCE_STORED: &str = "resourceStored";

    pub const LIVE_OPERATION: &str = "liveOperation";
    pub const LIVE_RESOURCE_STARTED: &str = "liveResourceStarted";
    pub const LIVE_RESOURCE_STARTED_RESPONSE: &str = "liveResourceStartedResponse";
}

/// Payload field names.
pub mod fields {
    pub const USERNAME: &str = "username";
    pub const PROJECT: &str = "project";
    pub const RESOURCE: &str = "resource";
    pub const PATH: &str = "path";
    pub const TIMESTAMP: &str = "timestamp";
    pub const HASH: &str = "hash";
    pub const TYPE: &str = "type";
    pub const CONTENT: &str = "content";
    pub const FILES: &str = "files";
    pub const DELETED: &str = "deleted";
    pub const INCLUDE_DELETED: &str = "includeDeleted";
    pub const CALLBACK_ID: &str = "callback_id";
    pub const REQUEST_SENDER_ID: &str = "requestSenderID";
    pub const CHANNEL: &str = "channel";
    pub const CONNECTED_TO_CHANNEL: &str = "connectedToChannel";
    pub const DISCONNECTED_FROM_CHANNEL: &str = "disconnectedFromChannel";
    pub const ERROR: &str = "error";
    pub const ERROR_DETAILS: &str = "errorDetails";
    pub const OPERATION: &str = "operation";
    pub const SAVE_POINT_HASH: &str = "savePointHash";
    pub const SAVE_POINT_TIMESTAMP: &str = "savePointTimestamp";
    pub const LIVE_CONTENT: &str = "liveContent";
    pub const LIVE_BASE: &str = "liveBase";
    pub const LIVE_HISTORY: &str = "liveHistory";
}

/// A unit on the wire.
///
/// `Message` carries a typed payload; when `ack` is set the receiver answers
/// with an `Ack` frame holding the same number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "camelCase")]
pub enum Frame {
    Message {
        #[serde(rename = "type")]
        message_type: SmolStr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<u64>,
        #[serde(default)]
        data: Payload,
    },
    Ack {
        ack: u64,
        #[serde(default)]
        data: Payload,
    },
}

impl Frame {
    /// A message frame that expects no acknowledgment.
    pub fn message(message_type: impl Into<SmolStr>, data: Payload) -> Self {
        Frame::Message {
            message_type: message_type.into(),
            ack: None,
            data,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Typed accessors over a [`Payload`].
pub trait PayloadExt {
    fn get_str(&self, key: &str) -> Option<&str>;
    fn get_i64(&self, key: &str) -> Option<i64>;
    fn get_u64(&self, key: &str) -> Option<u64>;
    fn get_bool(&self, key: &str) -> Option<bool>;

    /// Chainable insert for building payloads.
    fn with(self, key: &str, value: impl Into<Value>) -> Self;
}

impl PayloadExt for Payload {
    fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key.to_string(), value.into());
        self
    }
}
