//! External collaborator seams.
//!
//! The session controller owns in-memory consistency only; everything that
//! crosses a process boundary (admin/auth directory, snapshot store, audit
//! bus, export jobs) sits behind the traits here. All of them are
//! fire-and-forget relative to committed state: a collaborator failure is
//! logged and counted, never rolled back into the session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::errors::SessionError;
use crate::types::{AttendeeId, Role, Room, SessionSettings, SessionSnapshot};

/// A directory-resolved identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Session-local attendee id assigned by the directory.
    pub attendee_id: AttendeeId,
    /// Role the identity joins with.
    pub role: Role,
    /// Banned identities are rejected at admission.
    pub banned: bool,
}

/// Admin/auth service queried at init and on demand.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Load the session settings snapshot.
    async fn load_settings(&self, session_id: &str) -> Result<SessionSettings, SessionError>;

    /// Load the room list.
    async fn load_rooms(&self, session_id: &str) -> Result<Vec<Room>, SessionError>;

    /// Resolve an identity token for an external attendee id.
    async fn authorize(
        &self,
        session_id: &str,
        external_id: &str,
        token: &str,
    ) -> Result<Identity, SessionError>;
}

/// Durable per-session snapshot store for graceful-restart transfer.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot. Best effort.
    async fn persist(&self, snapshot: &SessionSnapshot) -> Result<(), SessionError>;

    /// Load the most recent snapshot, if one exists.
    async fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>, SessionError>;
}

/// Audit/event-bus record. Publication is fire-and-forget and never retried.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    SessionStarted { session_id: String },
    SessionBroken { session_id: String, detail: String },
    SessionClosed { session_id: String },
    AttendeeJoined { session_id: String, attendee_id: AttendeeId },
    AttendeeLeft { session_id: String, attendee_id: AttendeeId },
    AttendeeKicked { session_id: String, attendee_id: AttendeeId },
    RoomRemoved { session_id: String, room_id: String },
    ExportFailed { session_id: String, room_id: String },
    WatchdogExpired { session_id: String },
}

/// Fire-and-forget audit bus.
#[async_trait]
pub trait AuditBus: Send + Sync {
    /// Publish one record. Failures are the bus's problem; no retry.
    async fn publish(&self, at: DateTime<Utc>, event: AuditEvent);
}

/// Best-effort room content export, invoked when rooms close.
#[async_trait]
pub trait RoomExporter: Send + Sync {
    /// Export one room's content. Retried with a bounded attempt count.
    async fn export(&self, session_id: &str, room: &Room) -> Result<(), SessionError>;
}

/// The collaborator bundle handed to a session at spawn.
#[derive(Clone)]
pub struct SessionServices {
    pub directory: Arc<dyn Directory>,
    pub exporter: Arc<dyn RoomExporter>,
    pub audit: Arc<dyn AuditBus>,
    /// Optional; when present, shutdown persists a final snapshot.
    pub snapshot_store: Option<Arc<dyn SnapshotStore>>,
}

impl SessionServices {
    /// Publish an audit record stamped now. Fire-and-forget.
    pub async fn audit_now(&self, event: AuditEvent) {
        self.audit.publish(Utc::now(), event).await;
    }
}
