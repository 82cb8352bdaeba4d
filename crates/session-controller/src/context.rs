//! The session context: every component receives this explicitly.
//!
//! Holds the canonical registries and the settings snapshot for exactly one
//! session run. Nothing here is global; independent sessions own
//! independent contexts with no shared mutable state.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::registry::{AttendeeRegistry, ConnectionRegistry};
use crate::rooms::RoomRegistry;
use crate::types::{SessionSettings, SessionSnapshot};

/// Canonical state for one session run.
pub struct SessionContext {
    /// Meeting id, stable across restarts.
    pub session_id: String,
    /// Unique per lifecycle instance; stale async results are fenced on it.
    pub run_id: Uuid,
    /// Settings snapshot from the directory.
    pub settings: SessionSettings,
    /// Canonical attendee records.
    pub attendees: AttendeeRegistry,
    /// Room index; always contains the main room once normalized.
    pub rooms: RoomRegistry,
    /// Attendee ↔ connection bindings.
    pub connections: ConnectionRegistry,
    /// Max concurrent present attendees seen this run.
    pub peak_attendance: usize,
    /// Init timestamp.
    pub started_at: DateTime<Utc>,
}

impl SessionContext {
    /// Create a fresh context for a new session run.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            run_id: Uuid::new_v4(),
            settings: SessionSettings::default(),
            attendees: AttendeeRegistry::new(),
            rooms: RoomRegistry::new(),
            connections: ConnectionRegistry::new(),
            peak_attendance: 0,
            started_at: Utc::now(),
        }
    }

    /// Record the current present-attendee count into the high-water mark.
    pub fn update_peak(&mut self) {
        let present = self.attendees.present_count();
        if present > self.peak_attendance {
            self.peak_attendance = present;
        }
    }

    /// Serialize hook for graceful-restart transfer.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            run_id: self.run_id,
            settings: self.settings.clone(),
            attendees: self.attendees.serialize_all(),
            rooms: self.rooms.serialize_all(),
            peak_attendance: self.peak_attendance,
            started_at: self.started_at,
        }
    }

    /// Populate hook for graceful-restart transfer.
    ///
    /// Connections never transfer; clients re-admit against the new run.
    pub fn populate(&mut self, snapshot: SessionSnapshot) {
        self.settings = snapshot.settings;
        self.attendees.populate(snapshot.attendees);
        self.rooms.populate(snapshot.rooms);
        self.peak_attendance = snapshot.peak_attendance;
        self.started_at = snapshot.started_at;
    }
}
