//! Canonical attendee registry.
//!
//! The map is the single source of truth for attendee records. Insertion,
//! patch application, and removal are crate-private so that every write
//! outside this crate goes through the mutation pipeline.

use std::collections::HashMap;

use crate::types::{Attendee, AttendeeId, AttendeePatch};

/// Attendee-id → record map.
#[derive(Debug, Default)]
pub struct AttendeeRegistry {
    attendees: HashMap<AttendeeId, Attendee>,
}

impl AttendeeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an attendee by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Attendee> {
        self.attendees.get(id)
    }

    /// Whether the id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.attendees.contains_key(id)
    }

    /// Number of registered attendees (including retained-while-left).
    #[must_use]
    pub fn len(&self) -> usize {
        self.attendees.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attendees.is_empty()
    }

    /// Iterate over all attendees.
    pub fn iter(&self) -> impl Iterator<Item = &Attendee> {
        self.attendees.values()
    }

    /// Iterate over the attendees currently seated in `room`.
    pub fn in_room<'a>(&'a self, room: &'a str) -> impl Iterator<Item = &'a Attendee> {
        self.attendees.values().filter(move |a| a.room == room)
    }

    /// Number of attendees present (not retained-while-left).
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.attendees.values().filter(|a| !a.left).count()
    }

    pub(crate) fn insert(&mut self, attendee: Attendee) {
        self.attendees.insert(attendee.id.clone(), attendee);
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Attendee> {
        self.attendees.remove(id)
    }

    /// Apply a committed patch. Returns false when the id is unknown.
    pub(crate) fn apply(&mut self, id: &str, patch: &AttendeePatch) -> bool {
        match self.attendees.get_mut(id) {
            Some(attendee) => {
                patch.apply_to(attendee);
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.attendees.clear();
    }

    /// Serialize hook for graceful-restart transfer.
    #[must_use]
    pub fn serialize_all(&self) -> Vec<Attendee> {
        let mut all: Vec<Attendee> = self.attendees.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Populate hook for graceful-restart transfer.
    pub(crate) fn populate(&mut self, attendees: Vec<Attendee>) {
        self.attendees = attendees.into_iter().map(|a| (a.id.clone(), a)).collect();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn test_insert_and_lookup() {
        let mut registry = AttendeeRegistry::new();
        registry.insert(Attendee::new("a-1", "ext-1", Role::Host));

        assert!(registry.contains("a-1"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a-1").unwrap().role, Role::Host);
        assert!(registry.get("a-2").is_none());
    }

    #[test]
    fn test_in_room_filter() {
        let mut registry = AttendeeRegistry::new();
        registry.insert(Attendee::new("a-1", "ext-1", Role::Host));
        let mut b = Attendee::new("a-2", "ext-2", Role::Attendee);
        b.room = "breakout-1".to_string();
        registry.insert(b);

        assert_eq!(registry.in_room("").count(), 1);
        assert_eq!(registry.in_room("breakout-1").count(), 1);
        assert_eq!(registry.in_room("breakout-9").count(), 0);
    }

    #[test]
    fn test_present_count_excludes_left() {
        let mut registry = AttendeeRegistry::new();
        registry.insert(Attendee::new("a-1", "ext-1", Role::Host));
        let mut gone = Attendee::new("a-2", "ext-2", Role::Attendee);
        gone.left = true;
        registry.insert(gone);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.present_count(), 1);
    }

    #[test]
    fn test_serialize_populate_round_trip() {
        let mut registry = AttendeeRegistry::new();
        registry.insert(Attendee::new("b-1", "ext-1", Role::Host));
        registry.insert(Attendee::new("a-1", "ext-2", Role::Attendee));

        let serialized = registry.serialize_all();
        assert_eq!(serialized.len(), 2);
        // deterministic order
        assert_eq!(serialized[0].id, "a-1");

        let mut restored = AttendeeRegistry::new();
        restored.populate(serialized);
        assert!(restored.contains("a-1"));
        assert!(restored.contains("b-1"));
    }
}
