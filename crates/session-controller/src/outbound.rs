//! Outbound client surface.
//!
//! Transport framing is out of scope; the session addresses clients through
//! the [`Outbound`] trait with typed [`SessionEvent`] payloads and resolves
//! attendees to transport connections via the connection registry. Sends are
//! fire-and-forget: a failed delivery never affects committed state.

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::RejectCode;
use crate::registry::{AttendeeRegistry, ConnectionRegistry};
use crate::types::{Attendee, AttendeeId, AttendeePatch, KickReason, Room};

/// Why an attendee's departure was announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    /// Explicit leave or clean disconnect finalization.
    Voluntary,
    /// Disconnect grace period expired.
    GraceExpired,
    /// Ejected from the session.
    Kicked(KickReason),
    /// The whole session ended.
    SessionEnded,
}

/// One attendee's committed field delta inside a roster broadcast.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosterChange {
    pub attendee_id: AttendeeId,
    pub fields: AttendeePatch,
}

/// Events delivered to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum SessionEvent {
    /// A new attendee entered the session.
    #[serde(rename = "roster.joined")]
    RosterJoined { attendee: Attendee },

    /// A retained attendee reconnected.
    #[serde(rename = "roster.rejoined")]
    RosterRejoined { attendee_id: AttendeeId },

    /// Committed attendee field changes (one message per pipeline commit).
    #[serde(rename = "roster.delta")]
    RosterDelta { changes: Vec<RosterChange> },

    /// An attendee left for good.
    #[serde(rename = "roster.left")]
    RosterLeft {
        attendee_id: AttendeeId,
        reason: LeaveReason,
    },

    /// Full room list after an admin push or normalization.
    #[serde(rename = "room.list")]
    RoomList { rooms: Vec<Room> },

    /// A room finished its removal drain and is gone.
    #[serde(rename = "room.removed")]
    RoomRemoved { room_id: String },

    /// Main-room presenter presence changed.
    #[serde(rename = "presenter.state")]
    PresenterState { has_any_presenter: bool },

    /// The server is force-closing this client's connection.
    #[serde(rename = "session.terminated")]
    SessionTerminated { reason: RejectCode },

    /// The session has shut down.
    #[serde(rename = "session.closed")]
    SessionClosed,
}

impl SessionEvent {
    /// Wire event name, for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            SessionEvent::RosterJoined { .. } => "roster.joined",
            SessionEvent::RosterRejoined { .. } => "roster.rejoined",
            SessionEvent::RosterDelta { .. } => "roster.delta",
            SessionEvent::RosterLeft { .. } => "roster.left",
            SessionEvent::RoomList { .. } => "room.list",
            SessionEvent::RoomRemoved { .. } => "room.removed",
            SessionEvent::PresenterState { .. } => "presenter.state",
            SessionEvent::SessionTerminated { .. } => "session.terminated",
            SessionEvent::SessionClosed => "session.closed",
        }
    }
}

/// Admission status envelope returned to a connecting client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdmissionDecision {
    /// Admission is pending (initialization or authentication).
    Waiting,
    /// Admitted; the roster and room list seed the client's local state.
    Accept {
        attendee_id: AttendeeId,
        rejoin: bool,
        roster: Vec<Attendee>,
        rooms: Vec<Room>,
    },
    /// Terminally rejected.
    Reject { code: RejectCode },
}

impl AdmissionDecision {
    /// Build a rejection envelope.
    #[must_use]
    pub const fn reject(code: RejectCode) -> Self {
        AdmissionDecision::Reject { code }
    }

    /// Whether this decision is final.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        !matches!(self, AdmissionDecision::Waiting)
    }
}

/// Transport adapter for one session's outbound traffic.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Deliver an event to one connection. Best effort.
    async fn send(&self, connection_id: &str, event: &SessionEvent);

    /// Close a connection with a reason code. Best effort.
    async fn close(&self, connection_id: &str, code: RejectCode);
}

/// Deliver an event to every active connection.
pub async fn broadcast_all(
    outbound: &dyn Outbound,
    connections: &ConnectionRegistry,
    event: &SessionEvent,
) {
    for binding in connections.active_bindings() {
        outbound.send(&binding.connection_id, event).await;
    }
}

/// Deliver an event to one attendee's active connection, if any.
pub async fn send_to_attendee(
    outbound: &dyn Outbound,
    connections: &ConnectionRegistry,
    attendee_id: &str,
    event: &SessionEvent,
) -> bool {
    match connections.connection_of(attendee_id) {
        Some(connection_id) => {
            outbound.send(connection_id, event).await;
            true
        }
        None => false,
    }
}

/// Deliver an event to every connected attendee seated in `room`.
pub async fn send_to_room(
    outbound: &dyn Outbound,
    connections: &ConnectionRegistry,
    attendees: &AttendeeRegistry,
    room: &str,
    event: &SessionEvent,
) {
    for attendee in attendees.in_room(room) {
        if let Some(connection_id) = connections.connection_of(&attendee.id) {
            outbound.send(connection_id, event).await;
        }
    }
}
