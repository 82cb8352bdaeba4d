//! Attendee ↔ transport-connection bindings.
//!
//! At most one non-duplicate binding exists per attendee. A forced
//! reconnect supersedes the prior binding by marking it duplicate; the
//! superseded connection is then closed by the session actor.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::types::AttendeeId;

/// One attendee ↔ connection binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub connection_id: String,
    pub attendee_id: AttendeeId,
    /// Stable id for one client process run.
    pub client_run_id: String,
    /// Superseded by a newer binding; pending close.
    pub duplicate: bool,
    pub bound_at: DateTime<Utc>,
}

/// Connection binding registry for one session.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_connection: HashMap<String, Binding>,
    /// Active (non-duplicate) connection id per attendee.
    active: HashMap<AttendeeId, String>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection as the attendee's active connection.
    ///
    /// Returns `false` without binding when the attendee already has a live
    /// active connection; callers decide between rejection and supersession.
    pub fn bind(
        &mut self,
        attendee_id: impl Into<AttendeeId>,
        connection_id: impl Into<String>,
        client_run_id: impl Into<String>,
    ) -> bool {
        let attendee_id = attendee_id.into();
        if self.active.contains_key(&attendee_id) {
            return false;
        }
        let connection_id = connection_id.into();
        self.active
            .insert(attendee_id.clone(), connection_id.clone());
        self.by_connection.insert(
            connection_id.clone(),
            Binding {
                connection_id,
                attendee_id,
                client_run_id: client_run_id.into(),
                duplicate: false,
                bound_at: Utc::now(),
            },
        );
        true
    }

    /// Supersede the attendee's live binding with a new connection.
    ///
    /// The prior binding is retained, flagged duplicate, and its connection
    /// id returned so the caller can close it.
    pub fn supersede(
        &mut self,
        attendee_id: &str,
        connection_id: impl Into<String>,
        client_run_id: impl Into<String>,
    ) -> Option<String> {
        let prior = self.active.remove(attendee_id)?;
        if let Some(binding) = self.by_connection.get_mut(&prior) {
            binding.duplicate = true;
        }
        self.bind(attendee_id.to_string(), connection_id, client_run_id);
        Some(prior)
    }

    /// Remove a binding by connection id.
    pub fn unbind(&mut self, connection_id: &str) -> Option<Binding> {
        let binding = self.by_connection.remove(connection_id)?;
        if !binding.duplicate {
            self.active.remove(&binding.attendee_id);
        }
        Some(binding)
    }

    /// Look up a binding by connection id.
    #[must_use]
    pub fn by_connection(&self, connection_id: &str) -> Option<&Binding> {
        self.by_connection.get(connection_id)
    }

    /// The attendee's active (non-duplicate) binding.
    #[must_use]
    pub fn active_binding(&self, attendee_id: &str) -> Option<&Binding> {
        let connection_id = self.active.get(attendee_id)?;
        self.by_connection.get(connection_id)
    }

    /// Active connection id for an attendee.
    #[must_use]
    pub fn connection_of(&self, attendee_id: &str) -> Option<&str> {
        self.active.get(attendee_id).map(String::as_str)
    }

    /// Whether the attendee has a live active connection.
    #[must_use]
    pub fn is_connected(&self, attendee_id: &str) -> bool {
        self.active.contains_key(attendee_id)
    }

    /// Iterate over all active (non-duplicate) bindings.
    pub fn active_bindings(&self) -> impl Iterator<Item = &Binding> {
        self.by_connection.values().filter(|b| !b.duplicate)
    }

    /// Number of active bindings.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn clear(&mut self) {
        self.by_connection.clear();
        self.active.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_rejects_second_live_binding() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.bind("a-1", "conn-1", "run-1"));
        assert!(!registry.bind("a-1", "conn-2", "run-2"));

        assert_eq!(registry.connection_of("a-1"), Some("conn-1"));
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_supersede_marks_prior_duplicate() {
        let mut registry = ConnectionRegistry::new();
        registry.bind("a-1", "conn-1", "run-1");

        let prior = registry.supersede("a-1", "conn-2", "run-2");
        assert_eq!(prior.as_deref(), Some("conn-1"));

        // exactly the newest connection is active
        assert_eq!(registry.connection_of("a-1"), Some("conn-2"));
        assert!(registry.by_connection("conn-1").unwrap().duplicate);
        assert!(!registry.by_connection("conn-2").unwrap().duplicate);
        assert_eq!(registry.active_bindings().count(), 1);
    }

    #[test]
    fn test_unbind_duplicate_keeps_active() {
        let mut registry = ConnectionRegistry::new();
        registry.bind("a-1", "conn-1", "run-1");
        registry.supersede("a-1", "conn-2", "run-2");

        // closing the superseded connection must not evict the new binding
        let unbound = registry.unbind("conn-1").unwrap();
        assert!(unbound.duplicate);
        assert_eq!(registry.connection_of("a-1"), Some("conn-2"));
    }

    #[test]
    fn test_unbind_active_clears_attendee() {
        let mut registry = ConnectionRegistry::new();
        registry.bind("a-1", "conn-1", "run-1");

        let unbound = registry.unbind("conn-1").unwrap();
        assert_eq!(unbound.attendee_id, "a-1");
        assert!(!registry.is_connected("a-1"));
        assert!(registry.bind("a-1", "conn-3", "run-1"));
    }

    #[test]
    fn test_same_client_run_detection() {
        let mut registry = ConnectionRegistry::new();
        registry.bind("a-1", "conn-1", "run-1");

        let binding = registry.active_binding("a-1").unwrap();
        assert_eq!(binding.client_run_id, "run-1");
    }
}
