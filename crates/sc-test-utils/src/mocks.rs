//! Mock implementations of the external collaborator traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use session_controller::errors::{RejectCode, SessionError};
use session_controller::outbound::{Outbound, SessionEvent};
use session_controller::services::{
    AuditBus, AuditEvent, Directory, Identity, RoomExporter, SnapshotStore,
};
use session_controller::types::{Room, SessionSettings, SessionSnapshot};

/// In-memory directory with static settings, rooms, and identities.
#[derive(Default)]
pub struct MockDirectory {
    settings: SessionSettings,
    rooms: Vec<Room>,
    identities: HashMap<String, Identity>,
    fail_settings: bool,
    fail_rooms: bool,
    load_delay: Option<Duration>,
}

impl MockDirectory {
    /// Empty directory resolving no identities.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the settings snapshot served at init.
    #[must_use]
    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Add a room served at init.
    #[must_use]
    pub fn room(mut self, room: Room) -> Self {
        self.rooms.push(room);
        self
    }

    /// Resolve `external_id` to the given identity.
    #[must_use]
    pub fn identity(mut self, external_id: &str, identity: Identity) -> Self {
        self.identities.insert(external_id.to_string(), identity);
        self
    }

    /// Fail the settings load; the session lands in `Broken`.
    #[must_use]
    pub fn failing_settings(mut self) -> Self {
        self.fail_settings = true;
        self
    }

    /// Fail the rooms load; the session lands in `Broken`.
    #[must_use]
    pub fn failing_rooms(mut self) -> Self {
        self.fail_rooms = true;
        self
    }

    /// Delay each load; keeps the session in `Initializing` long enough
    /// for tests to queue admissions behind it.
    #[must_use]
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }
}

#[async_trait]
impl Directory for MockDirectory {
    async fn load_settings(&self, _session_id: &str) -> Result<SessionSettings, SessionError> {
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_settings {
            return Err(SessionError::Directory("settings unavailable".to_string()));
        }
        Ok(self.settings.clone())
    }

    async fn load_rooms(&self, _session_id: &str) -> Result<Vec<Room>, SessionError> {
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_rooms {
            return Err(SessionError::Directory("rooms unavailable".to_string()));
        }
        Ok(self.rooms.clone())
    }

    async fn authorize(
        &self,
        _session_id: &str,
        external_id: &str,
        token: &str,
    ) -> Result<Identity, SessionError> {
        if token == "expired" {
            return Err(SessionError::AuthRefused);
        }
        self.identities
            .get(external_id)
            .cloned()
            .ok_or(SessionError::AuthRefused)
    }
}

/// Outbound transport that records every delivery and close.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, SessionEvent)>>,
    closed: Mutex<Vec<(String, RejectCode)>>,
}

impl RecordingTransport {
    /// Shared handle suitable for `SessionActor::spawn`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Everything sent so far, in delivery order.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, SessionEvent)> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Events delivered to one connection, in order.
    #[must_use]
    pub fn sent_to(&self, connection_id: &str) -> Vec<SessionEvent> {
        self.sent()
            .into_iter()
            .filter(|(conn, _)| conn == connection_id)
            .map(|(_, event)| event)
            .collect()
    }

    /// Event names delivered to one connection, in order.
    #[must_use]
    pub fn event_names_for(&self, connection_id: &str) -> Vec<&'static str> {
        self.sent_to(connection_id)
            .iter()
            .map(SessionEvent::name)
            .collect()
    }

    /// Connections closed so far, with reason codes.
    #[must_use]
    pub fn closed(&self) -> Vec<(String, RejectCode)> {
        self.closed.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Outbound for RecordingTransport {
    async fn send(&self, connection_id: &str, event: &SessionEvent) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((connection_id.to_string(), event.clone()));
        }
    }

    async fn close(&self, connection_id: &str, code: RejectCode) {
        if let Ok(mut closed) = self.closed.lock() {
            closed.push((connection_id.to_string(), code));
        }
    }
}

/// Exporter that fails a scripted number of times before succeeding.
pub struct FlakyExporter {
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
    always_fail: bool,
    saw_removing: AtomicBool,
}

impl FlakyExporter {
    /// Succeeds on the first attempt.
    #[must_use]
    pub fn always_ok() -> Self {
        Self {
            failures_remaining: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
            always_fail: false,
            saw_removing: AtomicBool::new(true),
        }
    }

    /// Fails the first `n` attempts, then succeeds.
    #[must_use]
    pub fn failing_first(n: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(n),
            attempts: AtomicU32::new(0),
            always_fail: false,
            saw_removing: AtomicBool::new(true),
        }
    }

    /// Never succeeds.
    #[must_use]
    pub fn always_failing() -> Self {
        Self {
            failures_remaining: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
            always_fail: true,
            saw_removing: AtomicBool::new(true),
        }
    }

    /// Number of export attempts observed.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Whether every exported room had `removing` already set.
    #[must_use]
    pub fn saw_removing_set(&self) -> bool {
        self.saw_removing.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RoomExporter for FlakyExporter {
    async fn export(&self, _session_id: &str, room: &Room) -> Result<(), SessionError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if !room.removing {
            self.saw_removing.store(false, Ordering::Relaxed);
        }
        if self.always_fail {
            return Err(SessionError::Export("export backend down".to_string()));
        }
        let remaining = self.failures_remaining.load(Ordering::Relaxed);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::Relaxed);
            return Err(SessionError::Export("transient export failure".to_string()));
        }
        Ok(())
    }
}

/// In-memory snapshot store keyed by session id.
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<String, SessionSnapshot>>,
}

impl MemorySnapshotStore {
    /// Shared handle suitable for `SessionServices`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of persisted snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether nothing has been persisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn persist(&self, snapshot: &SessionSnapshot) -> Result<(), SessionError> {
        if let Ok(mut snapshots) = self.snapshots.lock() {
            snapshots.insert(snapshot.session_id.clone(), snapshot.clone());
        }
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>, SessionError> {
        Ok(self
            .snapshots
            .lock()
            .ok()
            .and_then(|m| m.get(session_id).cloned()))
    }
}

/// Audit bus that records every published event.
#[derive(Default)]
pub struct RecordingAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAudit {
    /// Shared handle suitable for `SessionServices`.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All events published so far.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuditBus for RecordingAudit {
    async fn publish(&self, _at: DateTime<Utc>, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
