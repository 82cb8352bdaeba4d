//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::time::Duration;

use sc_test_utils::{identity, services, MockDirectory, RecordingTransport};
use session_controller::actors::session::SessionActorHandle;
use session_controller::actors::SessionActor;
use session_controller::config::Config;
use session_controller::outbound::AdmissionDecision;
use session_controller::types::{JoinRequest, LifecycleState, Role};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Initialize test logging once; respects `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_controller=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Poll the state view until the lifecycle leaves `Initializing`.
pub async fn wait_settled(handle: &SessionActorHandle) -> LifecycleState {
    for _ in 0..100 {
        if let Ok(state) = handle.state().await {
            if state.lifecycle != LifecycleState::Initializing {
                return state.lifecycle;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session never left Initializing");
}

/// Spawn a session with the given directory and a recording transport.
pub fn spawn_session(
    session_id: &str,
    directory: MockDirectory,
) -> (
    SessionActorHandle,
    JoinHandle<()>,
    Arc<RecordingTransport>,
) {
    init_tracing();
    let transport = RecordingTransport::shared();
    let (handle, task) = SessionActor::spawn(
        session_id,
        Config::default(),
        services(directory),
        transport.clone(),
    );
    (handle, task, transport)
}

/// A directory resolving a host, a cohost, and two plain attendees.
pub fn populated_directory() -> MockDirectory {
    MockDirectory::new()
        .identity("ext-host", identity("host-1", Role::Host))
        .identity("ext-cohost", identity("cohost-1", Role::Cohost))
        .identity("ext-alice", identity("alice", Role::Attendee))
        .identity("ext-bob", identity("bob", Role::Attendee))
}

/// Join a human attendee, asserting acceptance.
pub async fn join(
    handle: &SessionActorHandle,
    connection_id: &str,
    external_id: &str,
) -> String {
    let decision = handle
        .connect(
            connection_id.to_string(),
            JoinRequest::Human {
                external_id: external_id.to_string(),
                identity_token: Some(format!("token-{external_id}")),
                client_run_id: format!("run-{connection_id}"),
                force_reconnect: false,
            },
        )
        .await
        .expect("connect failed");
    match decision {
        AdmissionDecision::Accept { attendee_id, .. } => attendee_id,
        other => panic!("expected acceptance, got {other:?}"),
    }
}
