//! Room engine and baton integration tests: moves, baton recomputation
//! ordering, breakout auto-close, removal drains, and pipeline vetoes.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{join, populated_directory, spawn_session, wait_settled};
use sc_test_utils::{services_with_exporter, FlakyExporter, RecordingTransport};
use session_controller::actors::SessionActor;
use session_controller::config::Config;
use session_controller::outbound::SessionEvent;
use session_controller::types::{AttendeePatch, MicState, Role, Room};

fn breakout(id: &str) -> Room {
    Room::new(id, format!("Breakout {id}"))
}

#[tokio::test]
async fn test_role_change_commits_then_recomputes_baton() {
    let (handle, _task, transport) = spawn_session("s-baton", populated_directory());
    wait_settled(&handle).await;

    join(&handle, "conn-host", "ext-host").await;
    join(&handle, "conn-alice", "ext-alice").await;

    handle
        .propose(
            None,
            "alice".to_string(),
            AttendeePatch::default().role(Role::Lead),
        )
        .await
        .unwrap()
        .expect("role change should commit");

    let snapshot = handle.snapshot().await.unwrap();
    let alice = snapshot
        .attendees
        .iter()
        .find(|a| a.id == "alice")
        .unwrap();
    assert_eq!(alice.role, Role::Lead);
    assert!(alice.has_baton);

    // the role delta is broadcast before the baton correction
    let deltas: Vec<_> = transport
        .sent_to("conn-host")
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::RosterDelta { changes } => changes
                .into_iter()
                .find(|c| c.attendee_id == "alice")
                .map(|c| c.fields),
            _ => None,
        })
        .collect();
    let role_at = deltas.iter().position(|f| f.role == Some(Role::Lead));
    let baton_at = deltas.iter().position(|f| f.has_baton == Some(true));
    assert!(role_at.is_some());
    assert!(baton_at.is_some());
    assert!(role_at < baton_at, "role commit must precede baton grant");

    // demotion revokes the baton the same way
    handle
        .propose(
            None,
            "alice".to_string(),
            AttendeePatch::default().role(Role::Attendee),
        )
        .await
        .unwrap()
        .expect("demotion should commit");
    let snapshot = handle.snapshot().await.unwrap();
    let alice = snapshot
        .attendees
        .iter()
        .find(|a| a.id == "alice")
        .unwrap();
    assert!(!alice.has_baton);
}

#[tokio::test]
async fn test_move_broadcasts_membership_before_baton() {
    let (handle, _task, transport) = spawn_session("s-move", populated_directory());
    wait_settled(&handle).await;

    join(&handle, "conn-host", "ext-host").await;
    join(&handle, "conn-alice", "ext-alice").await;
    handle.push_rooms(vec![breakout("b-1")]).await.unwrap();

    let moved = handle
        .move_attendees(
            Some("host-1".to_string()),
            vec!["alice".to_string(), "alice".to_string(), "host-1".to_string()],
            "b-1".to_string(),
        )
        .await
        .unwrap();

    // duplicates collapse; both unique ids move
    assert_eq!(moved.len(), 2);

    let snapshot = handle.snapshot().await.unwrap();
    for id in ["alice", "host-1"] {
        let attendee = snapshot.attendees.iter().find(|a| a.id == id).unwrap();
        assert_eq!(attendee.room, "b-1");
        assert_eq!(attendee.has_baton, attendee.role.holds_baton());
    }

    // exactly one membership broadcast carries both room changes
    let membership = transport
        .sent_to("conn-alice")
        .into_iter()
        .find_map(|event| match event {
            SessionEvent::RosterDelta { changes }
                if changes.iter().any(|c| c.fields.room.is_some()) =>
            {
                Some(changes)
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(
        membership
            .iter()
            .filter(|c| c.fields.room.as_deref() == Some("b-1"))
            .count(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_auto_close_arms_once_and_fires() {
    let (handle, _task, transport) = spawn_session("s-autoclose", populated_directory());
    wait_settled(&handle).await;

    join(&handle, "conn-host", "ext-host").await;
    join(&handle, "conn-alice", "ext-alice").await;
    join(&handle, "conn-bob", "ext-bob").await;

    let mut room = breakout("b-1");
    room.auto_close_minutes = Some(5);
    handle.push_rooms(vec![room]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // first entry arms the timer
    handle
        .move_attendees(None, vec!["alice".to_string()], "b-1".to_string())
        .await
        .unwrap();

    // a second entry shortly after must not re-arm it
    tokio::time::advance(Duration::from_secs(10)).await;
    handle
        .move_attendees(None, vec!["bob".to_string()], "b-1".to_string())
        .await
        .unwrap();

    // just before the original deadline: still open
    tokio::time::advance(Duration::from_secs(289)).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(handle
        .snapshot()
        .await
        .unwrap()
        .rooms
        .iter()
        .any(|r| r.id == "b-1"));

    // at the original deadline the close flow fires
    tokio::time::advance(Duration::from_secs(2)).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let snapshot = handle.snapshot().await.unwrap();
    assert!(!snapshot.rooms.iter().any(|r| r.id == "b-1"));
    // evacuated members are back in the main room
    for id in ["alice", "bob"] {
        let attendee = snapshot.attendees.iter().find(|a| a.id == id).unwrap();
        assert_eq!(attendee.room, "");
    }
    assert!(transport
        .sent_to("conn-host")
        .into_iter()
        .any(|event| event
            == SessionEvent::RoomRemoved {
                room_id: "b-1".to_string()
            }));
}

#[tokio::test(start_paused = true)]
async fn test_room_removal_drains_exports_per_room() {
    let exporter = Arc::new(FlakyExporter::failing_first(1));
    let directory = populated_directory();
    let transport = RecordingTransport::shared();
    let (handle, _task) = SessionActor::spawn(
        "s-export",
        Config::default(),
        services_with_exporter(directory, Arc::clone(&exporter)),
        transport.clone(),
    );
    wait_settled(&handle).await;

    join(&handle, "conn-host", "ext-host").await;

    let mut exportable = breakout("b-1");
    exportable.has_export_content = true;
    handle
        .push_rooms(vec![exportable, breakout("b-2")])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    handle
        .remove_rooms(vec!["b-1".to_string(), "b-2".to_string()])
        .await
        .unwrap();

    // b-2 needs no drain and is removed at once
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!handle
        .snapshot()
        .await
        .unwrap()
        .rooms
        .iter()
        .any(|r| r.id == "b-2"));

    // b-1 resolves after the retry backoff
    tokio::time::advance(Duration::from_secs(5)).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(exporter.attempts(), 2);
    assert!(exporter.saw_removing_set());
    let snapshot = handle.snapshot().await.unwrap();
    assert!(!snapshot.rooms.iter().any(|r| r.id == "b-1"));
    assert_eq!(handle.state().await.unwrap().pending_exports, 0);

    let removed: Vec<String> = transport
        .sent_to("conn-host")
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::RoomRemoved { room_id } => Some(room_id),
            _ => None,
        })
        .collect();
    assert!(removed.contains(&"b-1".to_string()));
    assert!(removed.contains(&"b-2".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_export_retries_still_remove_the_room() {
    let exporter = Arc::new(FlakyExporter::always_failing());
    let transport = RecordingTransport::shared();
    let (handle, _task) = SessionActor::spawn(
        "s-export-fail",
        Config::default(),
        services_with_exporter(populated_directory(), Arc::clone(&exporter)),
        transport,
    );
    wait_settled(&handle).await;

    let mut exportable = breakout("b-1");
    exportable.has_export_content = true;
    handle.push_rooms(vec![exportable]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    handle.remove_rooms(vec!["b-1".to_string()]).await.unwrap();

    tokio::time::advance(Duration::from_secs(10)).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    // bounded attempts, then the drain resolves as failed and the room goes
    assert_eq!(exporter.attempts(), 3);
    assert!(!handle
        .snapshot()
        .await
        .unwrap()
        .rooms
        .iter()
        .any(|r| r.id == "b-1"));
}

#[tokio::test]
async fn test_vetoed_proposal_commits_and_broadcasts_nothing() {
    let (handle, _task, transport) = spawn_session("s-veto", populated_directory());
    wait_settled(&handle).await;

    join(&handle, "conn-host", "ext-host").await;
    join(&handle, "conn-alice", "ext-alice").await;
    let before = transport.sent_to("conn-host").len();

    // nobody becomes a ghost after the fact
    let vetoed = handle
        .propose(
            None,
            "alice".to_string(),
            AttendeePatch::default().role(Role::Ghost),
        )
        .await
        .unwrap();
    assert!(vetoed.is_none());
    assert_eq!(transport.sent_to("conn-host").len(), before);

    // an agreed change commits its fields
    let committed = handle
        .propose(
            None,
            "alice".to_string(),
            AttendeePatch::default().role(Role::Cohost),
        )
        .await
        .unwrap();
    assert!(committed.is_some());
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(
        snapshot
            .attendees
            .iter()
            .find(|a| a.id == "alice")
            .unwrap()
            .role,
        Role::Cohost
    );
}

#[tokio::test(start_paused = true)]
async fn test_room_push_rederives_media_state() {
    let (handle, _task, _transport) = spawn_session("s-media", populated_directory());
    wait_settled(&handle).await;

    join(&handle, "conn-alice", "ext-alice").await;

    // alice reports working hardware through the event registry
    handle
        .client_event(
            "conn-alice".to_string(),
            "media.hardware".to_string(),
            serde_json::json!({ "mic": true, "cam": true }),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let snapshot = handle.snapshot().await.unwrap();
    let alice = snapshot
        .attendees
        .iter()
        .find(|a| a.id == "alice")
        .unwrap();
    assert_eq!(alice.mic, MicState::Open);

    // the admin locks main-room audio; derived state follows the push
    let mut main = Room::new("", "Main room");
    main.locks.audio = true;
    handle.push_rooms(vec![main]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let snapshot = handle.snapshot().await.unwrap();
    let alice = snapshot
        .attendees
        .iter()
        .find(|a| a.id == "alice")
        .unwrap();
    assert_eq!(alice.mic, MicState::Blocked);
}

#[tokio::test]
async fn test_move_by_plain_attendee_is_vetoed_per_item() {
    let (handle, _task, _transport) = spawn_session("s-move-veto", populated_directory());
    wait_settled(&handle).await;

    join(&handle, "conn-alice", "ext-alice").await;
    join(&handle, "conn-bob", "ext-bob").await;
    handle.push_rooms(vec![breakout("b-1")]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // bob may move himself but not alice
    let moved = handle
        .move_attendees(
            Some("bob".to_string()),
            vec!["alice".to_string(), "bob".to_string()],
            "b-1".to_string(),
        )
        .await
        .unwrap();
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].attendee_id, "bob");

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(
        snapshot.attendees.iter().find(|a| a.id == "alice").unwrap().room,
        ""
    );
    assert_eq!(
        snapshot.attendees.iter().find(|a| a.id == "bob").unwrap().room,
        "b-1"
    );
}
