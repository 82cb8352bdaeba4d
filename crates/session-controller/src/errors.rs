//! Session controller error types.
//!
//! Error types map to wire `RejectCode` values for client responses.
//! Internal details are logged server-side but not exposed to clients.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejection reason codes carried in admission and disconnect envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectCode {
    /// Missing or malformed identity.
    BadIdentity,
    /// Identity is banned by the directory.
    Banned,
    /// A live, non-forced second join for the same attendee.
    DoubleJoin,
    /// Directory refused the identity token.
    AuthFailed,
    /// Session failed initialization; the client may retry.
    SessionBroken,
    /// Session has been shut down.
    SessionEnded,
    /// Session is at its attendee capacity.
    SessionFull,
    /// Every client was disconnected after the presenter watchdog expired.
    NoPresenterTimeout,
    /// The attendee was ejected.
    Kicked,
    /// This connection was superseded by a forced reconnect.
    Superseded,
    /// Unclassified server fault.
    Internal,
}

impl RejectCode {
    /// Stable string form used in envelopes and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RejectCode::BadIdentity => "BAD_IDENTITY",
            RejectCode::Banned => "BANNED",
            RejectCode::DoubleJoin => "DOUBLE_JOIN",
            RejectCode::AuthFailed => "AUTH_FAILED",
            RejectCode::SessionBroken => "SESSION_BROKEN",
            RejectCode::SessionEnded => "SESSION_ENDED",
            RejectCode::SessionFull => "SESSION_FULL",
            RejectCode::NoPresenterTimeout => "NO_PRESENTER_TIMEOUT",
            RejectCode::Kicked => "KICKED",
            RejectCode::Superseded => "SUPERSEDED",
            RejectCode::Internal => "INTERNAL",
        }
    }

    /// Whether the client may retry the same request later.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, RejectCode::SessionBroken)
    }
}

/// Session controller error type.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Directory (admin/auth service) call failed.
    #[error("directory error: {0}")]
    Directory(String),

    /// Identity token was refused by the directory.
    #[error("authorization refused")]
    AuthRefused,

    /// Identity is banned.
    #[error("identity banned")]
    Banned,

    /// Room content export failed.
    #[error("export error: {0}")]
    Export(String),

    /// Snapshot store call failed.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// Restore payload did not fit this session.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Attendee id is not in the registry.
    #[error("attendee not found")]
    AttendeeNotFound,

    /// Room id is not in the registry.
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// Room is already draining toward removal.
    #[error("room is being removed: {0}")]
    RoomRemoving(String),

    /// Operation requires the session to be running.
    #[error("session is not running")]
    NotRunning,

    /// Session is in terminal teardown.
    #[error("session is shutting down")]
    ShuttingDown,

    /// Actor mailbox send failed.
    #[error("mailbox send failed: {0}")]
    Mailbox(String),

    /// Actor dropped the response channel.
    #[error("response channel dropped: {0}")]
    ResponseDropped(String),

    /// A client event payload failed to parse.
    #[error("malformed payload: {0}")]
    Payload(String),

    /// Admission was resolved as a client rejection.
    #[error("rejected: {}", .0.as_str())]
    Rejected(RejectCode),

    /// The approver chain vetoed the proposal.
    #[error("proposal vetoed")]
    Vetoed,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// The `RejectCode` a client should see for this error.
    #[must_use]
    pub const fn reject_code(&self) -> RejectCode {
        match self {
            SessionError::Rejected(code) => *code,
            SessionError::AuthRefused => RejectCode::AuthFailed,
            SessionError::Banned => RejectCode::Banned,
            SessionError::NotRunning => RejectCode::SessionBroken,
            SessionError::ShuttingDown => RejectCode::SessionEnded,
            SessionError::Directory(_)
            | SessionError::Export(_)
            | SessionError::Snapshot(_)
            | SessionError::InvalidSnapshot(_)
            | SessionError::AttendeeNotFound
            | SessionError::RoomNotFound(_)
            | SessionError::RoomRemoving(_)
            | SessionError::Mailbox(_)
            | SessionError::ResponseDropped(_)
            | SessionError::Payload(_)
            | SessionError::Vetoed
            | SessionError::Config(_) => RejectCode::Internal,
        }
    }

    /// Client-safe message; never leaks internal details.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SessionError::Directory(_)
            | SessionError::Export(_)
            | SessionError::Snapshot(_)
            | SessionError::InvalidSnapshot(_)
            | SessionError::Mailbox(_)
            | SessionError::ResponseDropped(_)
            | SessionError::Payload(_)
            | SessionError::Config(_) => "An internal error occurred".to_string(),
            SessionError::AuthRefused => "Invalid or expired identity token".to_string(),
            SessionError::Banned => "This identity is not allowed to join".to_string(),
            SessionError::AttendeeNotFound => "Attendee not found".to_string(),
            SessionError::RoomNotFound(_) => "Room not found".to_string(),
            SessionError::RoomRemoving(_) => "Room is closing".to_string(),
            SessionError::NotRunning => "Session is not available, please retry".to_string(),
            SessionError::ShuttingDown => "Session has ended".to_string(),
            SessionError::Vetoed => "The requested change was not allowed".to_string(),
            SessionError::Rejected(code) => code.as_str().to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_code_mapping() {
        assert_eq!(
            SessionError::AuthRefused.reject_code(),
            RejectCode::AuthFailed
        );
        assert_eq!(SessionError::Banned.reject_code(), RejectCode::Banned);
        assert_eq!(
            SessionError::NotRunning.reject_code(),
            RejectCode::SessionBroken
        );
        assert_eq!(
            SessionError::ShuttingDown.reject_code(),
            RejectCode::SessionEnded
        );
        assert_eq!(
            SessionError::Directory("conn refused".to_string()).reject_code(),
            RejectCode::Internal
        );
        assert_eq!(
            SessionError::Rejected(RejectCode::DoubleJoin).reject_code(),
            RejectCode::DoubleJoin
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = SessionError::Directory("connect refused at 10.1.2.3:8443".to_string());
        assert!(!err.client_message().contains("10.1"));
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = SessionError::Export("s3 bucket meeting-exports-prod".to_string());
        assert!(!err.client_message().contains("s3"));
    }

    #[test]
    fn test_transient_codes() {
        assert!(RejectCode::SessionBroken.is_transient());
        assert!(!RejectCode::DoubleJoin.is_transient());
        assert!(!RejectCode::Banned.is_transient());
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", SessionError::RoomNotFound("b-1".to_string())),
            "room not found: b-1"
        );
        assert_eq!(
            format!("{}", SessionError::Rejected(RejectCode::DoubleJoin)),
            "rejected: DOUBLE_JOIN"
        );
    }
}
