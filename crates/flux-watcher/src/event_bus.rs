//! Delivery of repository events to interested listeners.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{error, trace, warn};

use crate::{ListenerError, RepositoryEvent, RepositoryEventType};

/// Receives the repository events it declares interest in.
pub trait RepositoryListener: Send + Sync {
    /// Event types this listener receives. Read once, at registration.
    fn event_types(&self) -> &[RepositoryEventType];

    /// Listeners with a lower priority run first. Read once, at
    /// registration.
    fn priority(&self) -> i32 {
        0
    }

    fn on_event(&self, event: &RepositoryEvent) -> Result<(), ListenerError>;
}

#[derive(Clone)]
struct Registration {
    listener: Arc<dyn RepositoryListener>,
    types: Arc<[RepositoryEventType]>,
    priority: i32,
    seq: u64,
}

/// Ordered, copy-on-write list of listeners.
///
/// Listeners run by priority, then in registration order. A listener that
/// fails or panics is logged and does not stop the others.
pub struct EventBus {
    listeners: RwLock<Arc<[Registration]>>,
    next_seq: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Arc::from(Vec::new())),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn RepositoryListener>) {
        let registration = Registration {
            types: Arc::from(listener.event_types()),
            priority: listener.priority(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            listener,
        };
        let mut listeners = self.listeners.write();
        let mut list = listeners.to_vec();
        list.push(registration);
        list.sort_by_key(|r| (r.priority, r.seq));
        *listeners = Arc::from(list);
    }

    /// Remove `listener`, compared by identity. Returns whether it was
    /// registered.
    pub fn remove_listener(&self, listener: &Arc<dyn RepositoryListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        let list: Vec<_> = listeners
            .iter()
            .filter(|r| !std::ptr::addr_eq(Arc::as_ptr(&r.listener), Arc::as_ptr(listener)))
            .cloned()
            .collect();
        let removed = list.len() != before;
        *listeners = Arc::from(list);
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver `event` to every interested listener. Returns how many
    /// listeners handled it without error.
    pub fn fire(&self, event: &RepositoryEvent) -> usize {
        let snapshot = self.listeners.read().clone();
        let mut delivered = 0;
        for registration in snapshot.iter() {
            if !registration.types.contains(&event.kind) {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| registration.listener.on_event(event)));
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => warn!(
                    error = %err,
                    kind = ?event.kind,
                    resource = event.resource.path(),
                    "repository listener failed"
                ),
                Err(_) => error!(
                    kind = ?event.kind,
                    resource = event.resource.path(),
                    "repository listener panicked"
                ),
            }
        }
        trace!(kind = ?event.kind, delivered, "fired repository event");
        delivered
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
