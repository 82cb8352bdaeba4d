//! Pre-configured test data: identities, join requests, settings.

use session_controller::services::Identity;
use session_controller::types::{JoinRequest, Role, ServiceAgentKind, SessionSettings};

/// A directory identity resolving to the given attendee id and role.
#[must_use]
pub fn identity(attendee_id: &str, role: Role) -> Identity {
    Identity {
        attendee_id: attendee_id.to_string(),
        role,
        banned: false,
    }
}

/// A human join request carrying a valid-looking token.
#[must_use]
pub fn human_join(external_id: &str, client_run_id: &str) -> JoinRequest {
    JoinRequest::Human {
        external_id: external_id.to_string(),
        identity_token: Some(format!("token-{external_id}")),
        client_run_id: client_run_id.to_string(),
        force_reconnect: false,
    }
}

/// A service-agent join request.
#[must_use]
pub fn service_join(kind: ServiceAgentKind) -> JoinRequest {
    JoinRequest::ServiceAgent {
        kind,
        room_hint: None,
    }
}

/// Settings with a given attendee capacity.
#[must_use]
pub fn settings_with_capacity(max_attendees: u32) -> SessionSettings {
    SessionSettings {
        max_attendees,
        ..SessionSettings::default()
    }
}
