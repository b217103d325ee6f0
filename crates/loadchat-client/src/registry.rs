//! Event handler registry.
//!
//! One handler per [`EventKind`]; registering again replaces the previous
//! handler. The registry is owned by a channel (or shared between channels
//! explicitly by cloning it), never global.

use loadchat_core::{EventKind, InboundEvent, NormalizedEvent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A registered event callback.
pub type Handler = Arc<dyn Fn(&NormalizedEvent) + Send + Sync>;

/// Handlers keyed by inbound event kind. Clones share one table.
#[derive(Clone, Default)]
pub struct DispatchRegistry {
    handlers: Arc<Mutex<HashMap<EventKind, Handler>>>,
}

impl DispatchRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any previous one.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&NormalizedEvent) + Send + Sync + 'static,
    {
        self.handlers.lock().insert(kind, Arc::new(handler));
    }

    /// Remove the handler for `kind`. Returns whether one was registered.
    pub fn remove(&self, kind: EventKind) -> bool {
        self.handlers.lock().remove(&kind).is_some()
    }

    /// Drop every registration.
    pub fn reset(&self) {
        self.handlers.lock().clear();
    }

    /// Whether `kind` has a handler.
    pub fn is_registered(&self, kind: EventKind) -> bool {
        self.handlers.lock().contains_key(&kind)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }

    /// Deliver `event` to the handler for its envelope tag.
    ///
    /// Returns `false` when the tag is unknown or has no handler. The lock
    /// is released before the handler runs, so handlers may register or
    /// reset; those changes apply from the next event on.
    pub fn dispatch(&self, event: &InboundEvent) -> bool {
        let Some(kind) = event.kind() else {
            return false;
        };
        let handler = self.handlers.lock().get(&kind).cloned();
        match handler {
            Some(handler) => {
                handler(&event.event);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for DispatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<EventKind> = self.handlers.lock().keys().copied().collect();
        f.debug_struct("DispatchRegistry")
            .field("registered", &kinds)
            .finish()
    }
}
