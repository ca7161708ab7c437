//! Mutation events
//!
//! One process-wide callback is notified of every committed mutation, whether it came from an
//! API call or from an external edit picked up by the watcher.

use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owned form of a committed mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreEvent {
    pub kind: EventKind,
    pub store: String,
    pub id: String,
}

impl StoreEvent {
    pub fn new(kind: EventKind, store: &str, id: &str) -> Self {
        Self {
            kind,
            store: store.to_string(),
            id: id.to_string(),
        }
    }
}

/// Callback receiving `(kind, store, id)`
pub type EventHandler = Arc<dyn Fn(EventKind, &str, &str) + Send + Sync>;

/// Holder for the registered callback
///
/// Emission is synchronous: a slow handler blocks the API caller or the watch thread.
#[derive(Clone)]
pub struct EventEmitter {
    handler: Arc<RwLock<EventHandler>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            handler: Arc::new(RwLock::new(Arc::new(|_, _, _| {}))),
        }
    }

    pub fn set_handler(&self, handler: EventHandler) {
        *self.handler.write() = handler;
    }

    pub fn emit(&self, kind: EventKind, store: &str, id: &str) {
        trace!(kind = %kind, store, id, "Emitting store event");
        // Clone out so the handler may replace itself without deadlocking.
        let handler = Arc::clone(&*self.handler.read());
        handler(kind, store, id);
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
