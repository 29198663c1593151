//! Project storage, filesystem watching and resource synchronization for
//! flux participants.
//!
//! A [`Repository`] holds the projects this participant synchronizes and
//! watches their directories. Changes are published as
//! [`RepositoryEvent`]s on an [`EventBus`]; [`SystemSync`] announces them
//! on the message bus and applies what other participants announce.

mod error;
mod event;
mod event_bus;
mod project;
mod repository;
mod resource;
mod sync;
mod watcher;

pub use error::{ListenerError, WatcherError};
pub use event::{RepositoryEvent, RepositoryEventType};
pub use event_bus::{EventBus, RepositoryListener};
pub use project::Project;
pub use repository::Repository;
pub use resource::{NULL_CONTENT_HASH, Resource, ResourceType, sha1_hex};
pub use sync::{GET_PROJECT_CALLBACK, GET_RESOURCE_CALLBACK, RepositoryCallback, SystemSync, announce};
pub use watcher::ResourceWatcher;
