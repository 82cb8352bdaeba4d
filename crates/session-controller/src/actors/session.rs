//! `SessionActor` - per-session actor that owns all session state.
//!
//! Each `SessionActor`:
//! - Owns one session's registries, pipeline, engines, and timers
//! - Serializes every mutation through its mailbox
//! - Gates admission through the lifecycle state machine
//! - Runs the disconnect grace and no-presenter watchdog timers
//!
//! # Lifecycle
//!
//! `Initializing → Running | Broken`, with terminal `ShuttingDown`
//! reachable from any state. Initialization loads settings then rooms from
//! the directory **sequentially** (room normalization depends on settings
//! already applied); while it runs, admissions queue FIFO and are released
//! in order once the state resolves.
//!
//! # Disconnect handling
//!
//! When a connection drops:
//! 1. Ghosts tear down immediately; kicked attendees are removed at once
//! 2. Everyone else is marked `left` but retained for the grace window
//! 3. Reconnecting first cancels finalization; otherwise the grace timer
//!    finalizes the departure (baton recompute, presenter re-election,
//!    buffered departure notice flush)

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::actors::messages::SessionMessage;
use crate::baton;
use crate::config::Config;
use crate::context::SessionContext;
use crate::errors::{RejectCode, SessionError};
use crate::events::{EventEnvelope, EventRouter, HandlerFuture};
use crate::media;
use crate::metrics::SessionMetrics;
use crate::outbound::{
    broadcast_all, AdmissionDecision, LeaveReason, Outbound, RosterChange, SessionEvent,
};
use crate::pipeline::MutationPipeline;
use crate::rooms::{self, RoomEngine};
use crate::services::{AuditEvent, SessionServices};
use crate::timers::{TimerKey, TimerRegistry};
use crate::types::{
    AdmissionState, Attendee, AttendeeId, AttendeePatch, JoinRequest, KickReason, LifecycleState,
    Role, Room, ServiceAgentKind, SessionSnapshot, SessionStateView, MAIN_ROOM,
};

/// Handle to a `SessionActor`.
#[derive(Clone)]
pub struct SessionActorHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    session_id: String,
}

impl SessionActorHandle {
    /// Get the session ID.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Request admission for a transport connection.
    ///
    /// The returned decision may be `Waiting` (initialization in progress
    /// or authentication pending); further resolution arrives through
    /// [`authenticate`](Self::authenticate) or the outbound surface.
    pub async fn connect(
        &self,
        connection_id: String,
        request: JoinRequest,
    ) -> Result<AdmissionDecision, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Connect {
                connection_id,
                request,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Mailbox(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| SessionError::ResponseDropped(format!("response receive failed: {e}")))
    }

    /// Present an identity token for a waiting connection.
    pub async fn authenticate(
        &self,
        connection_id: String,
        token: String,
    ) -> Result<AdmissionDecision, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Authenticate {
                connection_id,
                token,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Mailbox(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| SessionError::ResponseDropped(format!("response receive failed: {e}")))
    }

    /// Notify of a dropped transport connection.
    pub async fn disconnect(&self, connection_id: String) -> Result<(), SessionError> {
        self.sender
            .send(SessionMessage::Disconnect { connection_id })
            .await
            .map_err(|e| SessionError::Mailbox(format!("channel send failed: {e}")))
    }

    /// Forward a client event into the routing registry.
    pub async fn client_event(
        &self,
        connection_id: String,
        name: String,
        payload: serde_json::Value,
    ) -> Result<(), SessionError> {
        self.sender
            .send(SessionMessage::ClientEvent {
                connection_id,
                name,
                payload,
            })
            .await
            .map_err(|e| SessionError::Mailbox(format!("channel send failed: {e}")))
    }

    /// Propose an attendee change through the pipeline.
    pub async fn propose(
        &self,
        requester: Option<AttendeeId>,
        attendee_id: AttendeeId,
        patch: AttendeePatch,
    ) -> Result<Option<AttendeePatch>, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Propose {
                requester,
                attendee_id,
                patch,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Mailbox(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| SessionError::ResponseDropped(format!("response receive failed: {e}")))?
    }

    /// Move attendees into a room.
    pub async fn move_attendees(
        &self,
        requester: Option<AttendeeId>,
        ids: Vec<AttendeeId>,
        target_room: String,
    ) -> Result<Vec<RosterChange>, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::MoveAttendees {
                requester,
                ids,
                target_room,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Mailbox(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| SessionError::ResponseDropped(format!("response receive failed: {e}")))?
    }

    /// Begin the removal drain for rooms.
    pub async fn remove_rooms(&self, ids: Vec<String>) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::RemoveRooms {
                ids,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Mailbox(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| SessionError::ResponseDropped(format!("response receive failed: {e}")))?
    }

    /// Push a room list from the admin service.
    pub async fn push_rooms(&self, rooms: Vec<Room>) -> Result<(), SessionError> {
        self.sender
            .send(SessionMessage::RoomsPushed { rooms })
            .await
            .map_err(|e| SessionError::Mailbox(format!("channel send failed: {e}")))
    }

    /// Eject an attendee.
    pub async fn kick(
        &self,
        requester: Option<AttendeeId>,
        attendee_id: AttendeeId,
        reason: KickReason,
    ) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Kick {
                requester,
                attendee_id,
                reason,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Mailbox(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| SessionError::ResponseDropped(format!("response receive failed: {e}")))?
    }

    /// Get the current session state view.
    pub async fn state(&self) -> Result<SessionStateView, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| SessionError::Mailbox(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| SessionError::ResponseDropped(format!("response receive failed: {e}")))
    }

    /// Serialize the session for graceful-restart transfer.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Snapshot { respond_to: tx })
            .await
            .map_err(|e| SessionError::Mailbox(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| SessionError::ResponseDropped(format!("response receive failed: {e}")))
    }

    /// Populate the session from a graceful-restart snapshot.
    pub async fn restore(&self, snapshot: SessionSnapshot) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Restore {
                snapshot,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Mailbox(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| SessionError::ResponseDropped(format!("response receive failed: {e}")))?
    }

    /// Ordered, idempotent shutdown. Safe to invoke more than once.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        if self.cancel_token.is_cancelled() {
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(SessionMessage::Shutdown { respond_to: tx })
            .await
            .is_err()
        {
            // actor already gone; shutdown is complete by definition
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    /// Cancel the actor immediately.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// A connection parked between admission states.
struct PendingAdmission {
    state: AdmissionState,
    request: JoinRequest,
    respond_to: Option<oneshot::Sender<AdmissionDecision>>,
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    ctx: SessionContext,
    lifecycle: LifecycleState,
    receiver: mpsc::Receiver<SessionMessage>,
    /// For export jobs and timers posting back into the mailbox.
    self_sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    config: Config,
    services: SessionServices,
    outbound: Arc<dyn Outbound>,
    pipeline: MutationPipeline,
    room_engine: RoomEngine,
    timers: TimerRegistry,
    router: EventRouter,
    metrics: Arc<SessionMetrics>,
    /// Connections parked in `WaitingInit` or `WaitingAuth`.
    pending_admissions: HashMap<String, PendingAdmission>,
    /// FIFO release order for connections queued during initialization.
    init_queue: VecDeque<String>,
    /// Departure notices held back until grace finalization.
    buffered_departures: HashMap<AttendeeId, LeaveReason>,
    /// Whether `hasAnyPresenter=false` has been announced.
    presenter_absent_announced: bool,
}

impl SessionActor {
    /// Spawn a session actor and kick off initialization.
    ///
    /// Returns a handle and the task join handle. Settings and rooms load
    /// sequentially in a background task; the result is fenced on the
    /// run-id so a stale response can never corrupt a resolved state.
    pub fn spawn(
        session_id: impl Into<String>,
        config: Config,
        services: SessionServices,
        outbound: Arc<dyn Outbound>,
    ) -> (SessionActorHandle, JoinHandle<()>) {
        let session_id = session_id.into();
        let (sender, receiver) = mpsc::channel(config.mailbox_buffer);
        let cancel_token = CancellationToken::new();

        let ctx = SessionContext::new(session_id.clone());
        let metrics = SessionMetrics::new();
        let pipeline = MutationPipeline::standard(Arc::clone(&metrics));

        let mut router = EventRouter::new();
        media::register_events(&mut router);
        rooms::register_events(&mut router);
        register_session_events(&mut router);

        let run_id = ctx.run_id;
        let init_sender = sender.clone();
        let directory = Arc::clone(&services.directory);
        let init_session_id = session_id.clone();
        tokio::spawn(async move {
            // sequential: room normalization depends on settings
            let result = async {
                let settings = directory.load_settings(&init_session_id).await?;
                let rooms = directory.load_rooms(&init_session_id).await?;
                Ok((settings, rooms))
            }
            .await;
            let _ = init_sender
                .send(SessionMessage::InitLoaded { run_id, result })
                .await;
        });

        let actor = Self {
            ctx,
            lifecycle: LifecycleState::Initializing,
            receiver,
            self_sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            config,
            services,
            outbound,
            pipeline,
            room_engine: RoomEngine::new(),
            timers: TimerRegistry::new(sender.clone()),
            router,
            metrics,
            pending_admissions: HashMap::new(),
            init_queue: VecDeque::new(),
            buffered_departures: HashMap::new(),
            presenter_absent_announced: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionActorHandle {
            sender,
            cancel_token,
            session_id,
        };
        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "sc.actor.session", fields(session_id = %self.ctx.session_id))]
    async fn run(mut self) {
        info!(
            target: "sc.actor.session",
            session_id = %self.ctx.session_id,
            run_id = %self.ctx.run_id,
            "SessionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    let _ = self.graceful_shutdown().await;
                    break;
                }
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => break,
                    }
                }
            }
        }

        info!(
            target: "sc.actor.session",
            session_id = %self.ctx.session_id,
            peak_attendance = self.ctx.peak_attendance,
            "SessionActor stopped"
        );
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Connect {
                connection_id,
                request,
                respond_to,
            } => {
                self.handle_connect(connection_id, request, respond_to).await;
            }
            SessionMessage::Authenticate {
                connection_id,
                token,
                respond_to,
            } => {
                self.handle_authenticate(connection_id, token, respond_to)
                    .await;
            }
            SessionMessage::Disconnect { connection_id } => {
                self.handle_disconnect(&connection_id).await;
            }
            SessionMessage::ClientEvent {
                connection_id,
                name,
                payload,
            } => {
                self.handle_client_event(connection_id, name, payload).await;
            }
            SessionMessage::Propose {
                requester,
                attendee_id,
                patch,
                respond_to,
            } => {
                let result = self.handle_propose(requester, &attendee_id, patch).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::MoveAttendees {
                requester,
                ids,
                target_room,
                respond_to,
            } => {
                let result = self.do_move(requester, &ids, &target_room).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::RemoveRooms { ids, respond_to } => {
                let result = self.do_remove_rooms(&ids).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::RoomsPushed { rooms } => {
                self.handle_rooms_pushed(rooms).await;
            }
            SessionMessage::Kick {
                requester,
                attendee_id,
                reason,
                respond_to,
            } => {
                let result = self.handle_kick(requester, &attendee_id, reason).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::InitLoaded { run_id, result } => {
                self.handle_init_loaded(run_id, result).await;
            }
            SessionMessage::ExportResolved { room_id, success } => {
                self.handle_export_resolved(&room_id, success).await;
            }
            SessionMessage::TimerFired { key } => {
                self.handle_timer_fired(key).await;
            }
            SessionMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state_view());
            }
            SessionMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.ctx.snapshot());
            }
            SessionMessage::Restore {
                snapshot,
                respond_to,
            } => {
                let result = self.handle_restore(snapshot).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::Shutdown { respond_to } => {
                let result = self.graceful_shutdown().await;
                let _ = respond_to.send(result);
                self.cancel_token.cancel();
            }
        }
    }

    // ------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------

    async fn handle_init_loaded(
        &mut self,
        run_id: uuid::Uuid,
        result: Result<(crate::types::SessionSettings, Vec<Room>), SessionError>,
    ) {
        if self.lifecycle != LifecycleState::Initializing {
            // the state already resolved; a late response must not corrupt it
            debug!(
                target: "sc.actor.session",
                session_id = %self.ctx.session_id,
                lifecycle = ?self.lifecycle,
                "stale init result discarded"
            );
            return;
        }
        if run_id != self.ctx.run_id {
            self.mark_broken("init result carries a stale run id").await;
            return;
        }

        match result {
            Err(e) => {
                self.mark_broken(&format!("init load failed: {e}")).await;
            }
            Ok((settings, rooms)) => {
                self.ctx.settings = settings;
                for room in rooms {
                    self.ctx.rooms.upsert(room);
                }
                self.ctx.rooms.normalize(&self.ctx.settings);
                self.reconcile_leads();

                self.lifecycle = LifecycleState::Running;
                info!(
                    target: "sc.actor.session",
                    session_id = %self.ctx.session_id,
                    rooms = self.ctx.rooms.len(),
                    queued = self.init_queue.len(),
                    "session running"
                );
                self.services
                    .audit_now(AuditEvent::SessionStarted {
                        session_id: self.ctx.session_id.clone(),
                    })
                    .await;
                self.release_queue().await;
            }
        }
    }

    async fn mark_broken(&mut self, detail: &str) {
        error!(
            target: "sc.actor.session",
            session_id = %self.ctx.session_id,
            detail,
            "session broken"
        );
        self.lifecycle = LifecycleState::Broken;
        self.services
            .audit_now(AuditEvent::SessionBroken {
                session_id: self.ctx.session_id.clone(),
                detail: detail.to_string(),
            })
            .await;
        self.release_queue().await;
    }

    /// Release connections queued during initialization, in FIFO order.
    async fn release_queue(&mut self) {
        while let Some(connection_id) = self.init_queue.pop_front() {
            let Some(pending) = self.pending_admissions.remove(&connection_id) else {
                continue;
            };
            let Some(respond_to) = pending.respond_to else {
                continue;
            };
            if self.lifecycle == LifecycleState::Running {
                self.admit_connection(connection_id, pending.request, respond_to)
                    .await;
            } else {
                self.reject(respond_to, RejectCode::SessionBroken);
            }
        }
    }

    /// Seat assigned leads that are actually online.
    fn reconcile_leads(&mut self) {
        let mut online = HashSet::new();
        for attendee in self.ctx.attendees.iter() {
            if !attendee.left {
                online.insert(attendee.id.clone());
            }
        }
        for room in self.ctx.rooms.iter_mut() {
            if room.is_main() {
                continue;
            }
            room.current_lead_id = room
                .assigned_lead_id
                .clone()
                .filter(|id| online.contains(id));
        }
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    async fn handle_connect(
        &mut self,
        connection_id: String,
        request: JoinRequest,
        respond_to: oneshot::Sender<AdmissionDecision>,
    ) {
        if let JoinRequest::Human { external_id, .. } = &request {
            if external_id.is_empty() {
                self.reject(respond_to, RejectCode::BadIdentity);
                return;
            }
        }

        match self.lifecycle {
            LifecycleState::ShuttingDown => self.reject(respond_to, RejectCode::SessionEnded),
            LifecycleState::Broken => self.reject(respond_to, RejectCode::SessionBroken),
            LifecycleState::Initializing => {
                self.pending_admissions.insert(
                    connection_id.clone(),
                    PendingAdmission {
                        state: AdmissionState::WaitingInit,
                        request,
                        respond_to: Some(respond_to),
                    },
                );
                self.init_queue.push_back(connection_id);
            }
            LifecycleState::Running => {
                self.admit_connection(connection_id, request, respond_to)
                    .await;
            }
        }
    }

    async fn admit_connection(
        &mut self,
        connection_id: String,
        request: JoinRequest,
        respond_to: oneshot::Sender<AdmissionDecision>,
    ) {
        match request {
            JoinRequest::ServiceAgent { kind, room_hint } => {
                let decision = self.join_ghost(&connection_id, kind, room_hint).await;
                self.respond(respond_to, decision);
            }
            JoinRequest::Human {
                identity_token: None,
                ..
            } => {
                // identity is present but unproven; hold for authentication
                self.pending_admissions.insert(
                    connection_id,
                    PendingAdmission {
                        state: AdmissionState::WaitingAuth,
                        request,
                        respond_to: None,
                    },
                );
                let _ = respond_to.send(AdmissionDecision::Waiting);
            }
            JoinRequest::Human {
                external_id,
                identity_token: Some(token),
                client_run_id,
                force_reconnect,
            } => {
                let decision = self
                    .resolve_human_join(
                        &connection_id,
                        &external_id,
                        &token,
                        &client_run_id,
                        force_reconnect,
                    )
                    .await;
                self.respond(respond_to, decision);
            }
        }
    }

    async fn handle_authenticate(
        &mut self,
        connection_id: String,
        token: String,
        respond_to: oneshot::Sender<AdmissionDecision>,
    ) {
        if self.lifecycle == LifecycleState::Broken {
            self.reject(respond_to, RejectCode::SessionBroken);
            return;
        }
        if self.lifecycle == LifecycleState::ShuttingDown {
            self.reject(respond_to, RejectCode::SessionEnded);
            return;
        }

        let Some(pending) = self.pending_admissions.remove(&connection_id) else {
            self.reject(respond_to, RejectCode::BadIdentity);
            return;
        };
        if pending.state != AdmissionState::WaitingAuth {
            self.pending_admissions.insert(connection_id, pending);
            self.reject(respond_to, RejectCode::BadIdentity);
            return;
        }
        let JoinRequest::Human {
            external_id,
            client_run_id,
            force_reconnect,
            ..
        } = pending.request
        else {
            self.reject(respond_to, RejectCode::BadIdentity);
            return;
        };

        let decision = self
            .resolve_human_join(
                &connection_id,
                &external_id,
                &token,
                &client_run_id,
                force_reconnect,
            )
            .await;
        self.respond(respond_to, decision);
    }

    async fn resolve_human_join(
        &mut self,
        connection_id: &str,
        external_id: &str,
        token: &str,
        client_run_id: &str,
        force_reconnect: bool,
    ) -> AdmissionDecision {
        let identity = match self
            .services
            .directory
            .authorize(&self.ctx.session_id, external_id, token)
            .await
        {
            Ok(identity) => identity,
            Err(e) => {
                warn!(
                    target: "sc.admission",
                    session_id = %self.ctx.session_id,
                    error = %e,
                    "authorization failed"
                );
                return self.rejection(e.reject_code());
            }
        };
        if identity.banned {
            return self.rejection(RejectCode::Banned);
        }

        if let Some(existing) = self.ctx.attendees.get(&identity.attendee_id).cloned() {
            return self
                .resolve_rejoin(connection_id, &existing, client_run_id, force_reconnect)
                .await;
        }

        let present = self.ctx.attendees.present_count();
        if present >= self.ctx.settings.max_attendees as usize {
            return self.rejection(RejectCode::SessionFull);
        }

        // fresh join
        let mut attendee = Attendee::new(identity.attendee_id.clone(), external_id, identity.role);
        attendee.has_baton = identity.role.holds_baton();
        attendee.room = self.breakout_seat(&attendee.id);
        self.apply_initial_media(&mut attendee);

        let outbound = Arc::clone(&self.outbound);
        self.pipeline
            .admit(&mut self.ctx, outbound.as_ref(), attendee.clone())
            .await;
        self.ctx
            .connections
            .bind(attendee.id.clone(), connection_id, client_run_id);
        self.ctx.update_peak();
        self.metrics.record_admission_accepted();
        self.metrics
            .set_present_attendees(self.ctx.attendees.present_count());

        if let Some(minutes) = self.room_engine.claim_auto_close(&self.ctx, &attendee.room) {
            self.timers.arm(
                TimerKey::RoomAutoClose(attendee.room.clone()),
                Duration::from_secs(u64::from(minutes) * 60),
            );
        }

        self.services
            .audit_now(AuditEvent::AttendeeJoined {
                session_id: self.ctx.session_id.clone(),
                attendee_id: attendee.id.clone(),
            })
            .await;

        info!(
            target: "sc.admission",
            session_id = %self.ctx.session_id,
            attendee_id = %attendee.id,
            role = attendee.role.as_str(),
            "attendee joined"
        );

        self.check_presenter().await;

        AdmissionDecision::Accept {
            attendee_id: attendee.id,
            rejoin: false,
            roster: self.ctx.attendees.serialize_all(),
            rooms: self.ctx.rooms.serialize_all(),
        }
    }

    /// Rejoin/duplicate resolution for an already-known attendee.
    async fn resolve_rejoin(
        &mut self,
        connection_id: &str,
        existing: &Attendee,
        client_run_id: &str,
        force_reconnect: bool,
    ) -> AdmissionDecision {
        let same_run = self
            .ctx
            .connections
            .active_binding(&existing.id)
            .is_some_and(|b| b.client_run_id == client_run_id);
        let prior_live = self.ctx.connections.is_connected(&existing.id);

        if existing.left || existing.role == Role::Phone || same_run {
            // ordinary reconnection: rebind, clear `left`, restore state
            if prior_live {
                if let Some(prior) = self.ctx.connections.supersede(
                    &existing.id,
                    connection_id,
                    client_run_id,
                ) {
                    self.outbound.close(&prior, RejectCode::Superseded).await;
                }
            } else {
                self.ctx
                    .connections
                    .bind(existing.id.clone(), connection_id, client_run_id);
            }
            self.timers
                .cancel(&TimerKey::DisconnectGrace(existing.id.clone()));
            self.buffered_departures.remove(&existing.id);

            if existing.left {
                let outbound = Arc::clone(&self.outbound);
                let result = self
                    .pipeline
                    .propose(
                        &mut self.ctx,
                        outbound.as_ref(),
                        None,
                        &existing.id,
                        AttendeePatch::default().left(false),
                    )
                    .await;
                if let Err(e) = result {
                    warn!(
                        target: "sc.admission",
                        attendee_id = %existing.id,
                        error = %e,
                        "presence restore failed"
                    );
                }
            }

            let outbound = Arc::clone(&self.outbound);
            broadcast_all(
                outbound.as_ref(),
                &self.ctx.connections,
                &SessionEvent::RosterRejoined {
                    attendee_id: existing.id.clone(),
                },
            )
            .await;
            self.metrics.record_admission_accepted();
            self.check_presenter().await;

            info!(
                target: "sc.admission",
                session_id = %self.ctx.session_id,
                attendee_id = %existing.id,
                "attendee reconnected"
            );
            return AdmissionDecision::Accept {
                attendee_id: existing.id.clone(),
                rejoin: true,
                roster: self.ctx.attendees.serialize_all(),
                rooms: self.ctx.rooms.serialize_all(),
            };
        }

        if force_reconnect && prior_live {
            // supersede the prior connection and force media renegotiation
            if let Some(prior) =
                self.ctx
                    .connections
                    .supersede(&existing.id, connection_id, client_run_id)
            {
                self.outbound.close(&prior, RejectCode::Superseded).await;
            }
            let outbound = Arc::clone(&self.outbound);
            let mut reset = AttendeePatch::default();
            reset.mic_hardware = Some(false);
            reset.cam_hardware = Some(false);
            let result = self
                .pipeline
                .propose(&mut self.ctx, outbound.as_ref(), None, &existing.id, reset)
                .await;
            if let Err(e) = result {
                warn!(
                    target: "sc.admission",
                    attendee_id = %existing.id,
                    error = %e,
                    "media capability reset failed"
                );
            }
            self.metrics.record_admission_accepted();

            info!(
                target: "sc.admission",
                session_id = %self.ctx.session_id,
                attendee_id = %existing.id,
                "forced reconnect superseded prior connection"
            );
            return AdmissionDecision::Accept {
                attendee_id: existing.id.clone(),
                rejoin: true,
                roster: self.ctx.attendees.serialize_all(),
                rooms: self.ctx.rooms.serialize_all(),
            };
        }

        // second live attempt without force: the existing session wins
        self.rejection(RejectCode::DoubleJoin)
    }

    async fn join_ghost(
        &mut self,
        connection_id: &str,
        kind: ServiceAgentKind,
        room_hint: Option<String>,
    ) -> AdmissionDecision {
        let suffix = uuid::Uuid::new_v4().to_string();
        let short = suffix.get(..8).unwrap_or("00000000");
        let id = format!("ghost-{}-{short}", kind.as_str());

        let mut attendee = Attendee::new(id.clone(), kind.as_str(), Role::Ghost);
        attendee.room = room_hint
            .filter(|r| self.ctx.rooms.get(r).is_some_and(|room| !room.removing))
            .unwrap_or_else(|| MAIN_ROOM.to_string());

        let outbound = Arc::clone(&self.outbound);
        self.pipeline
            .admit(&mut self.ctx, outbound.as_ref(), attendee)
            .await;
        self.ctx.connections.bind(id.clone(), connection_id, "ghost");
        self.metrics.record_admission_accepted();

        debug!(
            target: "sc.admission",
            session_id = %self.ctx.session_id,
            attendee_id = %id,
            kind = kind.as_str(),
            "service agent admitted"
        );

        AdmissionDecision::Accept {
            attendee_id: id,
            rejoin: false,
            roster: self.ctx.attendees.serialize_all(),
            rooms: self.ctx.rooms.serialize_all(),
        }
    }

    /// Seat a joining attendee per breakout rosters, defaulting to main.
    fn breakout_seat(&self, attendee_id: &str) -> String {
        self.ctx
            .rooms
            .iter()
            .find(|room| {
                !room.is_main() && !room.removing && room.roster.iter().any(|id| id == attendee_id)
            })
            .map_or_else(|| MAIN_ROOM.to_string(), |room| room.id.clone())
    }

    fn apply_initial_media(&self, attendee: &mut Attendee) {
        let main = Room::main();
        let room = self.ctx.rooms.get(&attendee.room).unwrap_or(&main);
        let decision = media::derive(media::MediaInputs::gather(attendee, room, &self.ctx.settings));
        attendee.mic = decision.mic;
        attendee.cam = decision.cam;
    }

    fn reject(&self, respond_to: oneshot::Sender<AdmissionDecision>, code: RejectCode) {
        self.metrics.record_admission_rejected(code.as_str());
        let _ = respond_to.send(AdmissionDecision::reject(code));
    }

    fn rejection(&self, code: RejectCode) -> AdmissionDecision {
        self.metrics.record_admission_rejected(code.as_str());
        AdmissionDecision::reject(code)
    }

    fn respond(&self, respond_to: oneshot::Sender<AdmissionDecision>, decision: AdmissionDecision) {
        let _ = respond_to.send(decision);
    }

    // ------------------------------------------------------------------
    // Disconnect and departure
    // ------------------------------------------------------------------

    async fn handle_disconnect(&mut self, connection_id: &str) {
        self.pending_admissions.remove(connection_id);
        self.init_queue.retain(|c| c != connection_id);

        let Some(binding) = self.ctx.connections.unbind(connection_id) else {
            return;
        };
        if binding.duplicate {
            debug!(
                target: "sc.actor.session",
                connection_id,
                "superseded connection closed"
            );
            return;
        }

        let Some(attendee) = self.ctx.attendees.get(&binding.attendee_id).cloned() else {
            return;
        };

        if attendee.role.is_service() {
            // ghosts have no grace window
            self.pipeline.withdraw(&mut self.ctx, &attendee.id);
            let outbound = Arc::clone(&self.outbound);
            broadcast_all(
                outbound.as_ref(),
                &self.ctx.connections,
                &SessionEvent::RosterLeft {
                    attendee_id: attendee.id.clone(),
                    reason: LeaveReason::Voluntary,
                },
            )
            .await;
            return;
        }

        if let Some(reason) = attendee.kicked_out {
            self.finalize_departure(&attendee.id, LeaveReason::Kicked(reason))
                .await;
            return;
        }

        // grace path: retain the record, buffer the departure notice
        let outbound = Arc::clone(&self.outbound);
        let result = self
            .pipeline
            .propose(
                &mut self.ctx,
                outbound.as_ref(),
                None,
                &attendee.id,
                AttendeePatch::default().left(true),
            )
            .await;
        if let Err(e) = result {
            warn!(
                target: "sc.actor.session",
                attendee_id = %attendee.id,
                error = %e,
                "presence mark failed"
            );
        }
        self.buffered_departures
            .insert(attendee.id.clone(), LeaveReason::GraceExpired);
        self.timers.arm(
            TimerKey::DisconnectGrace(attendee.id.clone()),
            self.config.disconnect_grace,
        );
        self.metrics
            .set_present_attendees(self.ctx.attendees.present_count());

        info!(
            target: "sc.actor.session",
            session_id = %self.ctx.session_id,
            attendee_id = %attendee.id,
            "attendee disconnected, grace period started"
        );

        self.check_presenter().await;
    }

    /// Remove an attendee for good: baton recompute, presenter re-election,
    /// buffered departure notice flush.
    async fn finalize_departure(&mut self, attendee_id: &str, fallback: LeaveReason) {
        self.timers
            .cancel(&TimerKey::DisconnectGrace(attendee_id.to_string()));
        let Some(attendee) = self.pipeline.withdraw(&mut self.ctx, attendee_id) else {
            return;
        };
        let room = attendee.room.clone();
        let outbound = Arc::clone(&self.outbound);

        if let Err(e) =
            baton::recompute_room(&mut self.ctx, &self.pipeline, outbound.as_ref(), &room).await
        {
            warn!(
                target: "sc.actor.session",
                room_id = %room,
                error = %e,
                "baton recompute failed during departure"
            );
        }

        let reason = self
            .buffered_departures
            .remove(attendee_id)
            .unwrap_or(fallback);
        broadcast_all(
            outbound.as_ref(),
            &self.ctx.connections,
            &SessionEvent::RosterLeft {
                attendee_id: attendee_id.to_string(),
                reason,
            },
        )
        .await;
        self.services
            .audit_now(AuditEvent::AttendeeLeft {
                session_id: self.ctx.session_id.clone(),
                attendee_id: attendee_id.to_string(),
            })
            .await;
        self.metrics
            .set_present_attendees(self.ctx.attendees.present_count());

        // presenter re-election before the watchdog chain gets a say
        if !self.room_engine.has_presenter(&self.ctx) {
            self.promote_presenter_candidate().await;
        }
        self.check_presenter().await;
    }

    /// Promote the best candidate per the documented priority table:
    /// cohost in main, cohost in breakout, presenter-origin demotee in
    /// main, presenter-origin demotee in breakout.
    async fn promote_presenter_candidate(&mut self) {
        let mut best: Option<(u8, AttendeeId, String)> = None;
        for a in self.ctx.attendees.iter() {
            if a.left || a.role.is_service() {
                continue;
            }
            let rank = if a.role == Role::Cohost && a.in_main_room() {
                0
            } else if a.role == Role::Cohost {
                1
            } else if a.static_role == Role::Presenter
                && a.role != Role::Presenter
                && a.in_main_room()
            {
                2
            } else if a.static_role == Role::Presenter && a.role != Role::Presenter {
                3
            } else {
                continue;
            };
            let better = match &best {
                None => true,
                Some((r, _, _)) => rank < *r,
            };
            if better {
                best = Some((rank, a.id.clone(), a.room.clone()));
            }
        }

        let Some((_, candidate_id, old_room)) = best else {
            return;
        };

        let outbound = Arc::clone(&self.outbound);
        let result = self
            .pipeline
            .propose(
                &mut self.ctx,
                outbound.as_ref(),
                None,
                &candidate_id,
                AttendeePatch::default().role(Role::Presenter).room(MAIN_ROOM),
            )
            .await;
        match result {
            Ok(Some(_)) => {
                for room_id in [old_room.as_str(), MAIN_ROOM] {
                    if let Err(e) = baton::recompute_room(
                        &mut self.ctx,
                        &self.pipeline,
                        outbound.as_ref(),
                        room_id,
                    )
                    .await
                    {
                        warn!(
                            target: "sc.actor.session",
                            room_id,
                            error = %e,
                            "baton recompute failed after promotion"
                        );
                    }
                }
                info!(
                    target: "sc.actor.session",
                    session_id = %self.ctx.session_id,
                    attendee_id = %candidate_id,
                    "presenter candidate promoted"
                );
            }
            Ok(None) => {
                debug!(
                    target: "sc.actor.session",
                    attendee_id = %candidate_id,
                    "presenter promotion vetoed"
                );
            }
            Err(e) => {
                warn!(
                    target: "sc.actor.session",
                    attendee_id = %candidate_id,
                    error = %e,
                    "presenter promotion failed"
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Presenter watchdog
    // ------------------------------------------------------------------

    /// Reconcile the watchdog chain with the current presenter set.
    async fn check_presenter(&mut self) {
        if self.lifecycle != LifecycleState::Running {
            return;
        }
        if self.room_engine.has_presenter(&self.ctx) {
            self.timers.cancel(&TimerKey::PresenterProbe);
            self.timers.cancel(&TimerKey::PresenterWatchdog);
            if self.presenter_absent_announced {
                self.presenter_absent_announced = false;
                let outbound = Arc::clone(&self.outbound);
                broadcast_all(
                    outbound.as_ref(),
                    &self.ctx.connections,
                    &SessionEvent::PresenterState {
                        has_any_presenter: true,
                    },
                )
                .await;
            }
        } else if self.ctx.connections.active_count() > 0
            && !self.timers.is_armed(&TimerKey::PresenterProbe)
            && !self.timers.is_armed(&TimerKey::PresenterWatchdog)
        {
            self.timers
                .arm(TimerKey::PresenterProbe, self.config.presenter_probe_delay);
        }
    }

    /// Force-disconnect every connected client.
    async fn terminate_all(&mut self, code: RejectCode) {
        let outbound = Arc::clone(&self.outbound);
        broadcast_all(
            outbound.as_ref(),
            &self.ctx.connections,
            &SessionEvent::SessionTerminated { reason: code },
        )
        .await;

        let connections: Vec<String> = self
            .ctx
            .connections
            .active_bindings()
            .map(|b| b.connection_id.clone())
            .collect();
        for connection_id in connections {
            outbound.close(&connection_id, code).await;
        }

        let attendee_ids: Vec<AttendeeId> =
            self.ctx.attendees.iter().map(|a| a.id.clone()).collect();
        for id in attendee_ids {
            self.timers.cancel(&TimerKey::DisconnectGrace(id.clone()));
            self.pipeline.withdraw(&mut self.ctx, &id);
        }
        self.ctx.connections.clear();
        self.buffered_departures.clear();
        self.presenter_absent_announced = false;
        self.metrics.set_present_attendees(0);

        warn!(
            target: "sc.actor.session",
            session_id = %self.ctx.session_id,
            code = code.as_str(),
            "all clients force-disconnected"
        );
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    async fn handle_timer_fired(&mut self, key: TimerKey) {
        if !self.timers.acknowledge(&key) {
            // the fire raced with a cancel
            return;
        }
        self.metrics.record_timer_fire();

        match key {
            TimerKey::DisconnectGrace(attendee_id) => {
                self.finalize_departure(&attendee_id, LeaveReason::GraceExpired)
                    .await;
            }
            TimerKey::PresenterProbe => {
                if !self.room_engine.has_presenter(&self.ctx) {
                    self.presenter_absent_announced = true;
                    let outbound = Arc::clone(&self.outbound);
                    broadcast_all(
                        outbound.as_ref(),
                        &self.ctx.connections,
                        &SessionEvent::PresenterState {
                            has_any_presenter: false,
                        },
                    )
                    .await;
                    self.timers
                        .arm(TimerKey::PresenterWatchdog, self.config.presenter_watchdog);
                }
            }
            TimerKey::PresenterWatchdog => {
                if !self.room_engine.has_presenter(&self.ctx) {
                    self.services
                        .audit_now(AuditEvent::WatchdogExpired {
                            session_id: self.ctx.session_id.clone(),
                        })
                        .await;
                    self.terminate_all(RejectCode::NoPresenterTimeout).await;
                }
            }
            TimerKey::RoomAutoClose(room_id) => {
                info!(
                    target: "sc.rooms",
                    session_id = %self.ctx.session_id,
                    room_id = %room_id,
                    "breakout auto-close fired"
                );
                if let Err(e) = self.do_remove_rooms(&[room_id]).await {
                    warn!(target: "sc.rooms", error = %e, "auto-close removal failed");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Pipeline, rooms, kicks
    // ------------------------------------------------------------------

    async fn handle_propose(
        &mut self,
        requester: Option<AttendeeId>,
        attendee_id: &str,
        patch: AttendeePatch,
    ) -> Result<Option<AttendeePatch>, SessionError> {
        if self.lifecycle != LifecycleState::Running {
            return Err(SessionError::NotRunning);
        }
        let outbound = Arc::clone(&self.outbound);
        let result = self
            .pipeline
            .propose(
                &mut self.ctx,
                outbound.as_ref(),
                requester.as_deref(),
                attendee_id,
                patch,
            )
            .await;

        // baton derives from role; recompute the seat room after a commit
        if let Ok(Some(applied)) = &result {
            if applied.role.is_some() {
                let room = self
                    .ctx
                    .attendees
                    .get(attendee_id)
                    .map(|a| a.room.clone())
                    .unwrap_or_else(|| MAIN_ROOM.to_string());
                if let Err(e) = baton::recompute_room(
                    &mut self.ctx,
                    &self.pipeline,
                    outbound.as_ref(),
                    &room,
                )
                .await
                {
                    warn!(
                        target: "sc.actor.session",
                        room_id = %room,
                        error = %e,
                        "baton recompute failed after role change"
                    );
                }
            }
        }

        // role changes shift the presenter set
        self.check_presenter().await;
        result
    }

    async fn do_move(
        &mut self,
        requester: Option<AttendeeId>,
        ids: &[AttendeeId],
        target_room: &str,
    ) -> Result<Vec<RosterChange>, SessionError> {
        if self.lifecycle != LifecycleState::Running {
            return Err(SessionError::NotRunning);
        }
        let outbound = Arc::clone(&self.outbound);
        let committed = self
            .room_engine
            .move_attendees(
                &mut self.ctx,
                &self.pipeline,
                outbound.as_ref(),
                requester.as_deref(),
                ids,
                target_room,
            )
            .await?;

        if !committed.is_empty() {
            if let Some(minutes) = self.room_engine.claim_auto_close(&self.ctx, target_room) {
                self.timers.arm(
                    TimerKey::RoomAutoClose(target_room.to_string()),
                    Duration::from_secs(u64::from(minutes) * 60),
                );
            }
        }

        // moves can vacate or refill the main room
        self.check_presenter().await;
        Ok(committed)
    }

    async fn do_remove_rooms(&mut self, ids: &[String]) -> Result<(), SessionError> {
        if self.lifecycle != LifecycleState::Running {
            return Err(SessionError::NotRunning);
        }
        let staged = self.room_engine.begin_removals(&mut self.ctx, ids);
        let outbound = Arc::clone(&self.outbound);

        for removal in staged {
            self.timers
                .cancel(&TimerKey::RoomAutoClose(removal.room_id.clone()));

            // evacuate members back to the main room
            let members: Vec<AttendeeId> = self
                .ctx
                .attendees
                .in_room(&removal.room_id)
                .filter(|a| !a.role.is_service())
                .map(|a| a.id.clone())
                .collect();
            if !members.is_empty() {
                if let Err(e) = self
                    .room_engine
                    .move_attendees(
                        &mut self.ctx,
                        &self.pipeline,
                        outbound.as_ref(),
                        None,
                        &members,
                        MAIN_ROOM,
                    )
                    .await
                {
                    warn!(
                        target: "sc.rooms",
                        room_id = %removal.room_id,
                        error = %e,
                        "member evacuation failed"
                    );
                }
            }
            // ghosts are reseated without ceremony
            let ghosts: Vec<AttendeeId> = self
                .ctx
                .attendees
                .in_room(&removal.room_id)
                .map(|a| a.id.clone())
                .collect();
            for ghost_id in ghosts {
                let _ = self
                    .pipeline
                    .commit_unchecked(
                        &mut self.ctx,
                        outbound.as_ref(),
                        &ghost_id,
                        AttendeePatch::default().room(MAIN_ROOM),
                    )
                    .await;
            }

            if removal.needs_export {
                self.spawn_export(&removal.room_id);
            } else {
                self.finish_room_removal(&removal.room_id).await;
            }
        }
        self.check_presenter().await;
        Ok(())
    }

    /// Dispatch a bounded-retry export job for a draining room.
    fn spawn_export(&self, room_id: &str) {
        let Some(room) = self.ctx.rooms.get(room_id).cloned() else {
            return;
        };
        let exporter = Arc::clone(&self.services.exporter);
        let mailbox = self.self_sender.clone();
        let session_id = self.ctx.session_id.clone();
        let attempts = self.config.export_attempts;
        let backoff = self.config.export_backoff;
        let room_id = room_id.to_string();

        tokio::spawn(async move {
            let mut success = false;
            for attempt in 1..=attempts {
                match exporter.export(&session_id, &room).await {
                    Ok(()) => {
                        success = true;
                        break;
                    }
                    Err(e) => {
                        warn!(
                            target: "sc.export",
                            session_id = %session_id,
                            room_id = %room.id,
                            attempt,
                            error = %e,
                            "room export attempt failed"
                        );
                        if attempt < attempts {
                            tokio::time::sleep(backoff).await;
                        }
                    }
                }
            }
            let _ = mailbox
                .send(SessionMessage::ExportResolved { room_id, success })
                .await;
        });
    }

    async fn handle_export_resolved(&mut self, room_id: &str, success: bool) {
        if !self.room_engine.resolve_export(room_id) {
            debug!(target: "sc.export", room_id, "stale export resolution ignored");
            return;
        }
        self.metrics.record_export(success);
        if !success {
            // best effort: the failure is audited, the removal proceeds
            self.services
                .audit_now(AuditEvent::ExportFailed {
                    session_id: self.ctx.session_id.clone(),
                    room_id: room_id.to_string(),
                })
                .await;
        }
        self.finish_room_removal(room_id).await;
    }

    async fn finish_room_removal(&mut self, room_id: &str) {
        if self.room_engine.delete_room(&mut self.ctx, room_id).is_none() {
            return;
        }
        let outbound = Arc::clone(&self.outbound);
        broadcast_all(
            outbound.as_ref(),
            &self.ctx.connections,
            &SessionEvent::RoomRemoved {
                room_id: room_id.to_string(),
            },
        )
        .await;
        self.services
            .audit_now(AuditEvent::RoomRemoved {
                session_id: self.ctx.session_id.clone(),
                room_id: room_id.to_string(),
            })
            .await;
        info!(
            target: "sc.rooms",
            session_id = %self.ctx.session_id,
            room_id,
            "room removed"
        );
    }

    async fn handle_rooms_pushed(&mut self, rooms: Vec<Room>) {
        if self.lifecycle != LifecycleState::Running {
            debug!(target: "sc.rooms", "room push ignored outside Running");
            return;
        }
        for room in rooms {
            self.ctx.rooms.upsert(room);
        }
        self.ctx.rooms.normalize(&self.ctx.settings.clone());
        self.reconcile_leads();

        let outbound = Arc::clone(&self.outbound);
        broadcast_all(
            outbound.as_ref(),
            &self.ctx.connections,
            &SessionEvent::RoomList {
                rooms: self.ctx.rooms.serialize_all(),
            },
        )
        .await;

        // room settings feed the media table; refresh every seat
        let items: Vec<(AttendeeId, AttendeePatch)> = self
            .ctx
            .attendees
            .iter()
            .map(|a| (a.id.clone(), AttendeePatch::default().room(a.room.clone())))
            .collect();
        if let Err(e) = self
            .pipeline
            .propose_batch(&mut self.ctx, outbound.as_ref(), None, items)
            .await
        {
            warn!(target: "sc.rooms", error = %e, "media refresh after room push failed");
        }
    }

    async fn handle_kick(
        &mut self,
        requester: Option<AttendeeId>,
        attendee_id: &str,
        reason: KickReason,
    ) -> Result<(), SessionError> {
        if self.lifecycle != LifecycleState::Running {
            return Err(SessionError::NotRunning);
        }
        if !self.ctx.attendees.contains(attendee_id) {
            return Err(SessionError::AttendeeNotFound);
        }

        let outbound = Arc::clone(&self.outbound);
        let committed = self
            .pipeline
            .propose(
                &mut self.ctx,
                outbound.as_ref(),
                requester.as_deref(),
                attendee_id,
                AttendeePatch::default().kicked_out(reason),
            )
            .await?;
        if committed.is_none() {
            return Err(SessionError::Vetoed);
        }

        self.services
            .audit_now(AuditEvent::AttendeeKicked {
                session_id: self.ctx.session_id.clone(),
                attendee_id: attendee_id.to_string(),
            })
            .await;

        if let Some(connection_id) = self
            .ctx
            .connections
            .connection_of(attendee_id)
            .map(String::from)
        {
            outbound
                .send(
                    &connection_id,
                    &SessionEvent::SessionTerminated {
                        reason: RejectCode::Kicked,
                    },
                )
                .await;
            outbound.close(&connection_id, RejectCode::Kicked).await;
            // the transport-level disconnect takes the kicked fast path
            self.handle_disconnect(&connection_id).await;
        } else {
            // offline (grace window): finalize immediately
            self.finalize_departure(attendee_id, LeaveReason::Kicked(reason))
                .await;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Client events
    // ------------------------------------------------------------------

    async fn handle_client_event(
        &mut self,
        connection_id: String,
        name: String,
        payload: serde_json::Value,
    ) {
        let Some(binding) = self.ctx.connections.by_connection(&connection_id) else {
            warn!(
                target: "sc.events",
                connection_id = %connection_id,
                event = %name,
                "event from unbound connection dropped"
            );
            return;
        };
        if binding.duplicate {
            return;
        }
        let attendee_id = binding.attendee_id.clone();

        let Some(handler) = self.router.lookup(&name) else {
            debug!(
                target: "sc.events",
                event = %name,
                "unhandled event"
            );
            metrics::counter!("sc_unhandled_events_total").increment(1);
            return;
        };

        let envelope = EventEnvelope {
            connection_id,
            attendee_id,
            name: name.clone(),
            payload,
        };
        if let Err(e) = handler(self, envelope).await {
            warn!(
                target: "sc.events",
                event = %name,
                error = %e,
                "event handler failed"
            );
        }
    }

    pub(crate) async fn on_media_toggle(&mut self, env: EventEnvelope) -> Result<(), SessionError> {
        #[derive(Deserialize)]
        struct Payload {
            #[serde(default)]
            mic_muted: Option<bool>,
            #[serde(default)]
            cam_off: Option<bool>,
        }
        let payload: Payload = parse(env.payload)?;

        let mut patch = AttendeePatch::default();
        patch.mic = payload.mic_muted.map(|muted| {
            if muted {
                crate::types::MicState::Muted
            } else {
                crate::types::MicState::Open
            }
        });
        patch.cam = payload.cam_off.map(|off| {
            if off {
                crate::types::CamState::Blocked
            } else {
                crate::types::CamState::Open
            }
        });

        let requester = Some(env.attendee_id.clone());
        self.handle_propose(requester, &env.attendee_id, patch)
            .await
            .map(|_| ())
    }

    pub(crate) async fn on_media_hardware(
        &mut self,
        env: EventEnvelope,
    ) -> Result<(), SessionError> {
        #[derive(Deserialize)]
        struct Payload {
            mic: bool,
            cam: bool,
        }
        let payload: Payload = parse(env.payload)?;

        let mut patch = AttendeePatch::default();
        patch.mic_hardware = Some(payload.mic);
        patch.cam_hardware = Some(payload.cam);

        let requester = Some(env.attendee_id.clone());
        self.handle_propose(requester, &env.attendee_id, patch)
            .await
            .map(|_| ())
    }

    pub(crate) async fn on_media_deny(&mut self, env: EventEnvelope) -> Result<(), SessionError> {
        #[derive(Deserialize)]
        struct Payload {
            attendee_id: String,
            #[serde(default)]
            mic_denied: Option<bool>,
            #[serde(default)]
            cam_denied: Option<bool>,
        }
        let payload: Payload = parse(env.payload)?;

        let mut patch = AttendeePatch::default();
        patch.mic_denied = payload.mic_denied;
        patch.cam_denied = payload.cam_denied;

        self.handle_propose(Some(env.attendee_id), &payload.attendee_id, patch)
            .await
            .map(|_| ())
    }

    pub(crate) async fn on_presence_away(
        &mut self,
        env: EventEnvelope,
    ) -> Result<(), SessionError> {
        #[derive(Deserialize)]
        struct Payload {
            away: bool,
        }
        let payload: Payload = parse(env.payload)?;

        let mut patch = AttendeePatch::default();
        patch.away = Some(payload.away);
        let requester = Some(env.attendee_id.clone());
        self.handle_propose(requester, &env.attendee_id, patch)
            .await
            .map(|_| ())
    }

    pub(crate) async fn on_presence_hand(
        &mut self,
        env: EventEnvelope,
    ) -> Result<(), SessionError> {
        #[derive(Deserialize)]
        struct Payload {
            raised: bool,
        }
        let payload: Payload = parse(env.payload)?;

        let mut patch = AttendeePatch::default();
        patch.hand_raised = Some(payload.raised);
        let requester = Some(env.attendee_id.clone());
        self.handle_propose(requester, &env.attendee_id, patch)
            .await
            .map(|_| ())
    }

    pub(crate) async fn on_room_move(&mut self, env: EventEnvelope) -> Result<(), SessionError> {
        #[derive(Deserialize)]
        struct Payload {
            ids: Vec<String>,
            target: String,
        }
        let payload: Payload = parse(env.payload)?;
        self.do_move(Some(env.attendee_id), &payload.ids, &payload.target)
            .await
            .map(|_| ())
    }

    pub(crate) async fn on_room_close(&mut self, env: EventEnvelope) -> Result<(), SessionError> {
        #[derive(Deserialize)]
        struct Payload {
            ids: Vec<String>,
        }
        let payload: Payload = parse(env.payload)?;

        let privileged = self
            .ctx
            .attendees
            .get(&env.attendee_id)
            .is_some_and(|a| matches!(a.role, Role::Host | Role::Cohost));
        if !privileged {
            return Err(SessionError::Vetoed);
        }
        self.do_remove_rooms(&payload.ids).await
    }

    pub(crate) async fn on_session_leave(
        &mut self,
        env: EventEnvelope,
    ) -> Result<(), SessionError> {
        // explicit leave skips the grace window
        self.ctx.connections.unbind(&env.connection_id);
        self.finalize_departure(&env.attendee_id, LeaveReason::Voluntary)
            .await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // State view, restore, shutdown
    // ------------------------------------------------------------------

    fn state_view(&mut self) -> SessionStateView {
        let has_presenter = self.room_engine.has_presenter(&self.ctx);
        SessionStateView {
            session_id: self.ctx.session_id.clone(),
            run_id: self.ctx.run_id,
            lifecycle: self.lifecycle,
            attendee_count: self.ctx.attendees.len(),
            connected_count: self.ctx.connections.active_count(),
            room_count: self.ctx.rooms.len(),
            peak_attendance: self.ctx.peak_attendance,
            has_presenter,
            pending_exports: self.room_engine.pending_export_count(),
        }
    }

    async fn handle_restore(&mut self, snapshot: SessionSnapshot) -> Result<(), SessionError> {
        if self.lifecycle == LifecycleState::ShuttingDown {
            return Err(SessionError::ShuttingDown);
        }
        if snapshot.session_id != self.ctx.session_id {
            return Err(SessionError::InvalidSnapshot(format!(
                "snapshot belongs to {}",
                snapshot.session_id
            )));
        }
        self.ctx.populate(snapshot);
        self.ctx.rooms.normalize(&self.ctx.settings.clone());
        self.reconcile_leads();
        self.lifecycle = LifecycleState::Running;
        info!(
            target: "sc.actor.session",
            session_id = %self.ctx.session_id,
            attendees = self.ctx.attendees.len(),
            "session populated from snapshot"
        );
        self.release_queue().await;
        Ok(())
    }

    /// Ordered, idempotent teardown.
    ///
    /// Cancel timers → flush departures and the close event → per-subsystem
    /// teardown with failure isolation → clear state. A second invocation
    /// returns without re-emitting anything.
    async fn graceful_shutdown(&mut self) -> Result<(), SessionError> {
        if self.lifecycle == LifecycleState::ShuttingDown {
            return Ok(());
        }
        self.lifecycle = LifecycleState::ShuttingDown;
        info!(
            target: "sc.actor.session",
            session_id = %self.ctx.session_id,
            attendees = self.ctx.attendees.len(),
            "session shutting down"
        );

        // 1. timers
        self.timers.cancel_all();

        // 2. flush departures, emit the close event exactly once
        let outbound = Arc::clone(&self.outbound);
        let departures = std::mem::take(&mut self.buffered_departures);
        for (attendee_id, reason) in departures {
            broadcast_all(
                outbound.as_ref(),
                &self.ctx.connections,
                &SessionEvent::RosterLeft {
                    attendee_id,
                    reason,
                },
            )
            .await;
        }
        broadcast_all(
            outbound.as_ref(),
            &self.ctx.connections,
            &SessionEvent::SessionClosed,
        )
        .await;
        self.services
            .audit_now(AuditEvent::SessionClosed {
                session_id: self.ctx.session_id.clone(),
            })
            .await;

        // 3. per-subsystem teardown; one failure never blocks the rest
        if let Some(store) = self.services.snapshot_store.clone() {
            if let Err(e) = store.persist(&self.ctx.snapshot()).await {
                warn!(
                    target: "sc.actor.session",
                    error = %e,
                    "snapshot persist failed during shutdown"
                );
            }
        }
        let connections: Vec<String> = self
            .ctx
            .connections
            .active_bindings()
            .map(|b| b.connection_id.clone())
            .collect();
        for connection_id in connections {
            outbound.close(&connection_id, RejectCode::SessionEnded).await;
        }
        for pending in self.pending_admissions.drain() {
            if let Some(respond_to) = pending.1.respond_to {
                let _ = respond_to.send(AdmissionDecision::reject(RejectCode::SessionEnded));
            }
        }
        self.init_queue.clear();

        // 4. clear shared state
        self.room_engine.clear();
        self.ctx.connections.clear();
        self.ctx.attendees.clear();
        self.ctx.rooms.clear();
        self.metrics.set_present_attendees(0);

        Ok(())
    }
}

fn parse<T: serde::de::DeserializeOwned>(payload: serde_json::Value) -> Result<T, SessionError> {
    serde_json::from_value(payload).map_err(|e| SessionError::Payload(e.to_string()))
}

fn ev_session_leave(actor: &mut SessionActor, env: EventEnvelope) -> HandlerFuture<'_> {
    Box::pin(actor.on_session_leave(env))
}

/// Session-level event registrations.
fn register_session_events(router: &mut EventRouter) {
    router.on("session.leave", ev_session_leave);
}
