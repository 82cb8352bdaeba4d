//! Inbound client event routing.
//!
//! An explicit event-name → handler registry. Feature modules register the
//! event names they handle at session construction (`router.on(...)`);
//! dispatch is a plain map lookup, so registration order carries no
//! meaning. Unknown events are logged and counted, never faulted.

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::actors::session::SessionActor;
use crate::errors::SessionError;
use crate::types::AttendeeId;

/// A dispatched client event, resolved to its sending attendee.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub connection_id: String,
    pub attendee_id: AttendeeId,
    pub name: String,
    pub payload: Value,
}

/// Future type returned by event handlers.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SessionError>> + Send + 'a>>;

/// An event handler: a plain function pointer into the session actor.
pub type EventHandler = for<'a> fn(&'a mut SessionActor, EventEnvelope) -> HandlerFuture<'a>;

/// Event-name → handler registry for one session.
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<&'static str, EventHandler>,
}

impl EventRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event name. Last registration wins.
    pub fn on(&mut self, name: &'static str, handler: EventHandler) {
        self.handlers.insert(name, handler);
    }

    /// Look up the handler for an event name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<EventHandler> {
        self.handlers.get(name).copied()
    }

    /// Registered event names, for diagnostics.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn noop(_actor: &mut SessionActor, _env: EventEnvelope) -> HandlerFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    #[test]
    fn test_register_and_lookup() {
        let mut router = EventRouter::new();
        assert!(router.is_empty());

        router.on("media.toggle", noop);
        router.on("presence.away", noop);

        assert_eq!(router.len(), 2);
        assert!(router.lookup("media.toggle").is_some());
        assert!(router.lookup("media.unknown").is_none());
    }

    #[test]
    fn test_last_registration_wins() {
        let mut router = EventRouter::new();
        router.on("media.toggle", noop);
        router.on("media.toggle", noop);
        assert_eq!(router.len(), 1);
    }
}
