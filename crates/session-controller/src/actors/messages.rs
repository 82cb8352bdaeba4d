//! Message types for the session actor mailbox.
//!
//! All interaction with a session goes through strongly-typed messages over
//! `tokio::sync::mpsc`; request-reply uses `tokio::sync::oneshot`. The
//! mailbox is what serializes mutation proposals: one message (including any
//! async sub-work its handler awaits) runs to completion before the next.

use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::errors::SessionError;
use crate::outbound::{AdmissionDecision, RosterChange};
use crate::timers::TimerKey;
use crate::types::{
    AttendeeId, AttendeePatch, JoinRequest, KickReason, Room, SessionSettings, SessionSnapshot,
    SessionStateView,
};

/// Messages sent to the session actor.
#[derive(Debug)]
pub enum SessionMessage {
    /// A transport connection requests admission.
    Connect {
        connection_id: String,
        request: JoinRequest,
        /// First decision for this connection; may be `Waiting`.
        respond_to: oneshot::Sender<AdmissionDecision>,
    },

    /// A waiting connection presents its identity token.
    Authenticate {
        connection_id: String,
        token: String,
        respond_to: oneshot::Sender<AdmissionDecision>,
    },

    /// A transport connection dropped.
    Disconnect { connection_id: String },

    /// A client event, routed through the event registry.
    ClientEvent {
        connection_id: String,
        name: String,
        payload: Value,
    },

    /// Propose an attendee change through the pipeline.
    Propose {
        requester: Option<AttendeeId>,
        attendee_id: AttendeeId,
        patch: AttendeePatch,
        respond_to: oneshot::Sender<Result<Option<AttendeePatch>, SessionError>>,
    },

    /// Move attendees into a room.
    MoveAttendees {
        requester: Option<AttendeeId>,
        ids: Vec<AttendeeId>,
        target_room: String,
        respond_to: oneshot::Sender<Result<Vec<RosterChange>, SessionError>>,
    },

    /// Begin the removal drain for rooms.
    RemoveRooms {
        ids: Vec<String>,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Admin push of the room list.
    RoomsPushed { rooms: Vec<Room> },

    /// Eject an attendee.
    Kick {
        requester: Option<AttendeeId>,
        attendee_id: AttendeeId,
        reason: KickReason,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Result of the sequential settings/rooms load.
    ///
    /// Carries the run-id it was started for; a mismatch is a stale result.
    InitLoaded {
        run_id: Uuid,
        result: Result<(SessionSettings, Vec<Room>), SessionError>,
    },

    /// A room's export drain resolved (success or exhausted retries).
    ExportResolved { room_id: String, success: bool },

    /// A keyed timer expired.
    TimerFired { key: TimerKey },

    /// Introspection view.
    GetState {
        respond_to: oneshot::Sender<SessionStateView>,
    },

    /// Serialize hook for graceful-restart transfer.
    Snapshot {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },

    /// Populate hook for graceful-restart transfer.
    Restore {
        snapshot: SessionSnapshot,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Ordered, idempotent shutdown.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
}
