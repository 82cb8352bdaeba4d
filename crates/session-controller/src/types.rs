//! Core session data model: attendees, rooms, roles, and field patches.
//!
//! All attendee mutation flows through [`AttendeePatch`] values submitted to
//! the mutation pipeline; the structs here carry no behavior beyond
//! derivation helpers and patch application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attendee identifier within one session.
pub type AttendeeId = String;

/// The main room's id. Every session has exactly one main room.
pub const MAIN_ROOM: &str = "";

/// Dynamic attendee role.
///
/// `static_role` on [`Attendee`] records the role the attendee joined with;
/// `role` is the current, mutable role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Meeting owner.
    Host,
    /// Co-host with host-equivalent floor rights.
    Cohost,
    /// Breakout room lead.
    Lead,
    /// Active presenter.
    Presenter,
    /// Ordinary participant.
    Attendee,
    /// Phone-bridge participant (audio only).
    Phone,
    /// Synthetic service participant (admin viewer, mixer, recorder).
    Ghost,
}

impl Role {
    /// Roles that must hold the baton within their room.
    #[must_use]
    pub const fn holds_baton(self) -> bool {
        matches!(self, Role::Host | Role::Cohost | Role::Lead)
    }

    /// Roles that count as a main-room presenter for the watchdog.
    #[must_use]
    pub const fn counts_as_presenter(self) -> bool {
        matches!(self, Role::Host | Role::Cohost | Role::Presenter)
    }

    /// Whether this is a synthetic, non-human role.
    #[must_use]
    pub const fn is_service(self) -> bool {
        matches!(self, Role::Ghost)
    }

    /// Stable string form used in logs and wire payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Host => "HOST",
            Role::Cohost => "COHOST",
            Role::Lead => "LEAD",
            Role::Presenter => "PRESENTER",
            Role::Attendee => "ATTENDEE",
            Role::Phone => "PHONE",
            Role::Ghost => "GHOST",
        }
    }
}

/// Non-human connection modes admitted without normal authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAgentKind {
    /// Admin console viewer.
    Admin,
    /// Audio mixer.
    Mixer,
    /// Server-side recorder.
    Ssr,
    /// Live transcription agent.
    Transcribe,
}

impl ServiceAgentKind {
    /// Stable string form used in synthesized attendee ids.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ServiceAgentKind::Admin => "admin",
            ServiceAgentKind::Mixer => "mixer",
            ServiceAgentKind::Ssr => "ssr",
            ServiceAgentKind::Transcribe => "transcribe",
        }
    }
}

/// Reason an attendee was ejected from the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KickReason {
    /// Removed by a host or cohost.
    ByHost,
    /// Banned by the admin service.
    Banned,
    /// Removed after idling disconnected past every grace window.
    Expired,
}

/// Derived microphone state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicState {
    /// Open floor.
    Open,
    /// Transmit only while the talk key is held.
    PushToTalk,
    /// Muted but unmutable by the attendee.
    Muted,
    /// Listen-only; the attendee cannot transmit.
    Blocked,
}

/// Derived camera state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CamState {
    /// Video may be published.
    Open,
    /// Video publication is blocked.
    Blocked,
}

/// A session attendee. Mutated exclusively through the mutation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendee {
    /// Session-local attendee id.
    pub id: AttendeeId,
    /// Identity in the external directory (opaque here).
    pub external_id: String,
    /// Current role.
    pub role: Role,
    /// Role the attendee joined with; never changes.
    pub static_role: Role,
    /// Current room id; [`MAIN_ROOM`] for the main room.
    pub room: String,
    /// True while disconnected but retained for the grace window.
    pub left: bool,
    /// Floor-control flag, derived from role and room membership.
    pub has_baton: bool,
    /// Set when the attendee was ejected; forces immediate removal on disconnect.
    pub kicked_out: Option<KickReason>,
    /// Derived microphone state.
    pub mic: MicState,
    /// Derived camera state.
    pub cam: CamState,
    /// Microphone hardware reported available by the client.
    pub mic_hardware: bool,
    /// Camera hardware reported available by the client.
    pub cam_hardware: bool,
    /// Host-applied microphone denial.
    pub mic_denied: bool,
    /// Host-applied camera denial.
    pub cam_denied: bool,
    /// Hand-raise presence flag.
    pub hand_raised: bool,
    /// Away presence flag.
    pub away: bool,
    /// Join timestamp.
    pub joined_at: DateTime<Utc>,
}

impl Attendee {
    /// Create an attendee with derivable fields at their defaults.
    #[must_use]
    pub fn new(id: impl Into<AttendeeId>, external_id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            external_id: external_id.into(),
            role,
            static_role: role,
            room: MAIN_ROOM.to_string(),
            left: false,
            has_baton: role.holds_baton(),
            kicked_out: None,
            mic: MicState::Blocked,
            cam: CamState::Blocked,
            mic_hardware: false,
            cam_hardware: false,
            mic_denied: false,
            cam_denied: false,
            hand_raised: false,
            away: false,
            joined_at: Utc::now(),
        }
    }

    /// Whether the attendee is in the main room.
    #[must_use]
    pub fn in_main_room(&self) -> bool {
        self.room == MAIN_ROOM
    }

    /// Connected (not retained-while-disconnected) main-room presenter.
    #[must_use]
    pub fn is_active_presenter(&self) -> bool {
        !self.left && self.in_main_room() && self.role.counts_as_presenter()
    }
}

/// Per-room feature locks pushed by the admin service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomLocks {
    /// Chat disabled for non-baton holders.
    pub chat: bool,
    /// Whiteboard disabled for non-baton holders.
    pub whiteboard: bool,
    /// Audio locked for non-baton holders.
    pub audio: bool,
    /// Video locked for non-baton holders.
    pub video: bool,
}

/// A room. The main room has the empty-string id and always exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// Room id; [`MAIN_ROOM`] for the main room.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Feature locks.
    pub locks: RoomLocks,
    /// Push-to-talk enforced for non-baton holders.
    pub push_to_talk: bool,
    /// Planned breakout membership, by attendee id.
    pub roster: Vec<AttendeeId>,
    /// Set once removal starts; no new work is scheduled against the room.
    pub removing: bool,
    /// Auto-close the room this many minutes after the first entry.
    pub auto_close_minutes: Option<u32>,
    /// Lead currently seated in the room.
    pub current_lead_id: Option<AttendeeId>,
    /// Lead assigned by the admin service.
    pub assigned_lead_id: Option<AttendeeId>,
    /// Test rooms force listen-in for non-baton holders.
    pub is_test_room: bool,
    /// Whether closing the room requires a content export drain.
    pub has_export_content: bool,
}

impl Room {
    /// Create a room with defaults suitable for an admin push.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            locks: RoomLocks::default(),
            push_to_talk: false,
            roster: Vec::new(),
            removing: false,
            auto_close_minutes: None,
            current_lead_id: None,
            assigned_lead_id: None,
            is_test_room: false,
            has_export_content: false,
        }
    }

    /// The main room as created during normalization.
    #[must_use]
    pub fn main() -> Self {
        Self::new(MAIN_ROOM, "Main room")
    }

    /// Whether this is the main room.
    #[must_use]
    pub fn is_main(&self) -> bool {
        self.id == MAIN_ROOM
    }
}

/// Partial attendee field change proposed to the mutation pipeline.
///
/// Every field is optional; approvers may fill, rewrite, or clear fields
/// before commit. An all-`None` patch commits nothing and broadcasts nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttendeePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_baton: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kicked_out: Option<KickReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mic: Option<MicState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cam: Option<CamState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mic_hardware: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cam_hardware: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mic_denied: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cam_denied: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hand_raised: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub away: Option<bool>,
}

impl AttendeePatch {
    /// Whether the patch carries no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Builder: set the role field.
    #[must_use]
    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Builder: set the room field.
    #[must_use]
    pub fn room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    /// Builder: set the presence flag.
    #[must_use]
    pub fn left(mut self, left: bool) -> Self {
        self.left = Some(left);
        self
    }

    /// Builder: set the baton flag.
    #[must_use]
    pub fn has_baton(mut self, has_baton: bool) -> Self {
        self.has_baton = Some(has_baton);
        self
    }

    /// Builder: mark the attendee as kicked.
    #[must_use]
    pub fn kicked_out(mut self, reason: KickReason) -> Self {
        self.kicked_out = Some(reason);
        self
    }

    /// Clear fields whose value already matches `current`.
    ///
    /// Keeps broadcasts free of no-op deltas.
    pub fn strip_noops(&mut self, current: &Attendee) {
        if self.role == Some(current.role) {
            self.role = None;
        }
        if self.room.as_deref() == Some(current.room.as_str()) {
            self.room = None;
        }
        if self.left == Some(current.left) {
            self.left = None;
        }
        if self.has_baton == Some(current.has_baton) {
            self.has_baton = None;
        }
        if self.kicked_out.is_some() && self.kicked_out == current.kicked_out {
            self.kicked_out = None;
        }
        if self.mic == Some(current.mic) {
            self.mic = None;
        }
        if self.cam == Some(current.cam) {
            self.cam = None;
        }
        if self.mic_hardware == Some(current.mic_hardware) {
            self.mic_hardware = None;
        }
        if self.cam_hardware == Some(current.cam_hardware) {
            self.cam_hardware = None;
        }
        if self.mic_denied == Some(current.mic_denied) {
            self.mic_denied = None;
        }
        if self.cam_denied == Some(current.cam_denied) {
            self.cam_denied = None;
        }
        if self.hand_raised == Some(current.hand_raised) {
            self.hand_raised = None;
        }
        if self.away == Some(current.away) {
            self.away = None;
        }
    }

    /// Apply the patch to an attendee record.
    pub fn apply_to(&self, attendee: &mut Attendee) {
        if let Some(role) = self.role {
            attendee.role = role;
        }
        if let Some(room) = &self.room {
            attendee.room.clone_from(room);
        }
        if let Some(left) = self.left {
            attendee.left = left;
        }
        if let Some(has_baton) = self.has_baton {
            attendee.has_baton = has_baton;
        }
        if let Some(reason) = self.kicked_out {
            attendee.kicked_out = Some(reason);
        }
        if let Some(mic) = self.mic {
            attendee.mic = mic;
        }
        if let Some(cam) = self.cam {
            attendee.cam = cam;
        }
        if let Some(v) = self.mic_hardware {
            attendee.mic_hardware = v;
        }
        if let Some(v) = self.cam_hardware {
            attendee.cam_hardware = v;
        }
        if let Some(v) = self.mic_denied {
            attendee.mic_denied = v;
        }
        if let Some(v) = self.cam_denied {
            attendee.cam_denied = v;
        }
        if let Some(v) = self.hand_raised {
            attendee.hand_raised = v;
        }
        if let Some(v) = self.away {
            attendee.away = v;
        }
    }
}

/// Settings snapshot loaded from the admin service at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Display title.
    pub title: String,
    /// Maximum concurrent attendees; joins beyond this are rejected.
    pub max_attendees: u32,
    /// Default locks applied to rooms that omit their own.
    pub default_locks: RoomLocks,
    /// Push-to-talk enforced session-wide for non-baton holders.
    pub push_to_talk: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            title: String::new(),
            max_attendees: 500,
            default_locks: RoomLocks::default(),
            push_to_talk: false,
        }
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Loading settings and rooms; admissions queue.
    Initializing,
    /// Serving traffic.
    Running,
    /// Initialization failed; admissions are rejected as transient.
    Broken,
    /// Terminal; teardown in progress or complete.
    ShuttingDown,
}

/// Per-connection admission states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionState {
    /// Parked until the session leaves `Initializing`.
    WaitingInit,
    /// Waiting for the client to present an identity token.
    WaitingAuth,
    /// Authorization in flight.
    Pending,
    /// Admitted and bound.
    Active,
    /// Terminally rejected.
    Rejected,
}

/// A connection's request to join the session.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinRequest {
    /// A human client carrying an external identity.
    Human {
        /// Identity in the external directory; empty is rejected outright.
        external_id: String,
        /// Opaque token resolved by the directory; `None` waits for auth.
        identity_token: Option<String>,
        /// Stable id for one client process run; used to spot reconnects.
        client_run_id: String,
        /// Client requests supersession of a still-live prior connection.
        force_reconnect: bool,
    },
    /// A synthetic service participant; bypasses normal authentication.
    ServiceAgent {
        kind: ServiceAgentKind,
        /// Room the agent should be seated in; main room when `None`.
        room_hint: Option<String>,
    },
}

/// Introspection view of a running session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStateView {
    pub session_id: String,
    pub run_id: uuid::Uuid,
    pub lifecycle: LifecycleState,
    pub attendee_count: usize,
    pub connected_count: usize,
    pub room_count: usize,
    pub peak_attendance: usize,
    pub has_presenter: bool,
    pub pending_exports: usize,
}

/// Serialized session state for graceful-restart transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub run_id: uuid::Uuid,
    pub settings: SessionSettings,
    pub attendees: Vec<Attendee>,
    pub rooms: Vec<Room>,
    pub peak_attendance: usize,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_role_baton_set() {
        assert!(Role::Host.holds_baton());
        assert!(Role::Cohost.holds_baton());
        assert!(Role::Lead.holds_baton());
        assert!(!Role::Presenter.holds_baton());
        assert!(!Role::Attendee.holds_baton());
        assert!(!Role::Phone.holds_baton());
        assert!(!Role::Ghost.holds_baton());
    }

    #[test]
    fn test_role_presenter_set() {
        assert!(Role::Host.counts_as_presenter());
        assert!(Role::Cohost.counts_as_presenter());
        assert!(Role::Presenter.counts_as_presenter());
        assert!(!Role::Lead.counts_as_presenter());
        assert!(!Role::Attendee.counts_as_presenter());
    }

    #[test]
    fn test_patch_strip_noops() {
        let attendee = Attendee::new("a-1", "ext-1", Role::Attendee);
        let mut patch = AttendeePatch::default()
            .role(Role::Attendee)
            .room("breakout-1")
            .left(false);

        patch.strip_noops(&attendee);

        assert_eq!(patch.role, None);
        assert_eq!(patch.left, None);
        assert_eq!(patch.room.as_deref(), Some("breakout-1"));
    }

    #[test]
    fn test_patch_apply() {
        let mut attendee = Attendee::new("a-1", "ext-1", Role::Attendee);
        let patch = AttendeePatch::default()
            .role(Role::Cohost)
            .room("breakout-2")
            .has_baton(true);

        patch.apply_to(&mut attendee);

        assert_eq!(attendee.role, Role::Cohost);
        assert_eq!(attendee.room, "breakout-2");
        assert!(attendee.has_baton);
        // static role never moves
        assert_eq!(attendee.static_role, Role::Attendee);
    }

    #[test]
    fn test_empty_patch_serializes_empty() {
        let patch = AttendeePatch::default();
        assert!(patch.is_empty());
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn test_main_room_constants() {
        let room = Room::main();
        assert!(room.is_main());
        assert_eq!(room.id, MAIN_ROOM);

        let attendee = Attendee::new("a-1", "ext-1", Role::Attendee);
        assert!(attendee.in_main_room());
    }
}
