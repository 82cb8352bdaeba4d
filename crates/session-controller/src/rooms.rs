//! Room registry and the room consistency engine.
//!
//! Rooms are created from admin pushes, mutated only here, and removed
//! through a drain: `removing` is set first, members are moved back to the
//! main room, exportable content is drained best-effort, and only resolved
//! rooms are deleted and broadcast as removed. Baton recomputation after a
//! move always runs against post-move membership.

use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::actors::session::SessionActor;
use crate::baton;
use crate::context::SessionContext;
use crate::errors::SessionError;
use crate::events::{EventEnvelope, EventRouter, HandlerFuture};
use crate::outbound::{Outbound, RosterChange};
use crate::pipeline::MutationPipeline;
use crate::types::{Attendee, AttendeeId, AttendeePatch, Room, RoomLocks, SessionSettings, MAIN_ROOM};

/// Room-id → room map with the main-room guarantee.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
}

impl RoomRegistry {
    /// Create an empty registry. Call [`normalize`](Self::normalize) before
    /// serving; the main room is installed there.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a room.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    /// Whether the id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.rooms.contains_key(id)
    }

    /// Number of rooms, main room included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether the registry is empty (pre-normalization only).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Iterate over all rooms.
    pub fn iter(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    /// Insert or replace a room from an admin push.
    ///
    /// Updates against a draining room are dropped; the drain wins.
    pub fn upsert(&mut self, room: Room) -> bool {
        if self
            .rooms
            .get(&room.id)
            .is_some_and(|existing| existing.removing)
        {
            debug!(
                target: "sc.rooms",
                room_id = %room.id,
                "upsert dropped, room is draining"
            );
            return false;
        }
        self.rooms.insert(room.id.clone(), room);
        true
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(id)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Room> {
        self.rooms.values_mut()
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Room> {
        self.rooms.remove(id)
    }

    pub(crate) fn clear(&mut self) {
        self.rooms.clear();
    }

    /// Normalize after a settings/rooms load or an admin push.
    ///
    /// Installs the main room, strips drain/auto-close flags from it, fills
    /// omitted locks from the session defaults, clamps auto-close minutes,
    /// and dedupes breakout rosters.
    pub fn normalize(&mut self, settings: &SessionSettings) {
        let main = self
            .rooms
            .entry(MAIN_ROOM.to_string())
            .or_insert_with(Room::main);
        main.removing = false;
        main.auto_close_minutes = None;
        main.is_test_room = false;

        for room in self.rooms.values_mut() {
            if room.locks == RoomLocks::default() {
                room.locks = settings.default_locks;
            }
            if let Some(minutes) = room.auto_close_minutes {
                room.auto_close_minutes = Some(minutes.max(1));
            }
            let mut seen = HashSet::new();
            room.roster.retain(|id| seen.insert(id.clone()));
        }
    }

    /// Serialize hook for graceful-restart transfer.
    #[must_use]
    pub fn serialize_all(&self) -> Vec<Room> {
        let mut all: Vec<Room> = self.rooms.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Populate hook for graceful-restart transfer.
    pub(crate) fn populate(&mut self, rooms: Vec<Room>) {
        self.rooms = rooms.into_iter().map(|r| (r.id.clone(), r)).collect();
    }
}

/// One room's removal as staged by [`RoomEngine::begin_removals`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRemoval {
    pub room_id: String,
    /// Whether the room must drain a content export before deletion.
    pub needs_export: bool,
}

/// Room consistency engine: moves, removal drains, presenter cache,
/// breakout auto-close bookkeeping.
#[derive(Debug, Default)]
pub struct RoomEngine {
    /// Last known main-room presenter, for O(1) revalidation.
    presenter_cache: Option<AttendeeId>,
    /// Rooms with an export drain in flight.
    pending_exports: HashSet<String>,
    /// Rooms whose auto-close timer has already been armed once.
    auto_close_armed: HashSet<String>,
}

impl RoomEngine {
    /// Create an engine with cold caches.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current main-room presenter, if any.
    ///
    /// The cached id is revalidated first; role and presence change
    /// independently of the cache, so a stale entry falls back to a scan.
    pub fn find_presenter(&mut self, ctx: &SessionContext) -> Option<AttendeeId> {
        if let Some(id) = &self.presenter_cache {
            if ctx
                .attendees
                .get(id)
                .is_some_and(Attendee::is_active_presenter)
            {
                return Some(id.clone());
            }
        }
        let found = ctx
            .attendees
            .iter()
            .find(|a| a.is_active_presenter())
            .map(|a| a.id.clone());
        self.presenter_cache.clone_from(&found);
        found
    }

    /// Whether any main-room presenter is online.
    pub fn has_presenter(&mut self, ctx: &SessionContext) -> bool {
        self.find_presenter(ctx).is_some()
    }

    /// Move attendees into `target`, as one pipeline batch.
    ///
    /// Ids already in the target room, ghosts, unknown ids, and duplicates
    /// are dropped up front. Baton recomputation for the source and target
    /// rooms runs only after the batch commits, so it observes post-move
    /// membership. Returns the committed membership changes.
    pub async fn move_attendees(
        &mut self,
        ctx: &mut SessionContext,
        pipeline: &MutationPipeline,
        outbound: &dyn Outbound,
        requester: Option<&str>,
        ids: &[AttendeeId],
        target: &str,
    ) -> Result<Vec<RosterChange>, SessionError> {
        match ctx.rooms.get(target) {
            None => return Err(SessionError::RoomNotFound(target.to_string())),
            Some(room) if room.removing => {
                return Err(SessionError::RoomRemoving(target.to_string()))
            }
            Some(_) => {}
        }

        let mut seen = HashSet::new();
        let mut source_rooms = HashSet::new();
        let mut items = Vec::new();
        for id in ids {
            if !seen.insert(id.clone()) {
                continue;
            }
            let Some(attendee) = ctx.attendees.get(id) else {
                continue;
            };
            if attendee.role.is_service() || attendee.room == target {
                continue;
            }
            source_rooms.insert(attendee.room.clone());
            items.push((id.clone(), AttendeePatch::default().room(target)));
        }

        if items.is_empty() {
            return Ok(Vec::new());
        }

        let committed = pipeline
            .propose_batch(ctx, outbound, requester, items)
            .await?;

        // membership is broadcast above; recompute observes the new seats
        source_rooms.insert(target.to_string());
        for room_id in &source_rooms {
            baton::recompute_room(ctx, pipeline, outbound, room_id).await?;
        }

        info!(
            target: "sc.rooms",
            session_id = %ctx.session_id,
            target_room = %target,
            moved = committed.len(),
            "attendees moved"
        );
        Ok(committed)
    }

    /// Whether moving into `room_id` should arm the auto-close timer now.
    ///
    /// Arms at most once per room; later entries never re-arm.
    pub fn claim_auto_close(&mut self, ctx: &SessionContext, room_id: &str) -> Option<u32> {
        let room = ctx.rooms.get(room_id)?;
        if room.removing || self.auto_close_armed.contains(room_id) {
            return None;
        }
        let minutes = room.auto_close_minutes?;
        self.auto_close_armed.insert(room_id.to_string());
        Some(minutes)
    }

    /// Stage room removals: set `removing` and classify the drain.
    ///
    /// The main room, unknown ids, and rooms already draining are skipped.
    /// `removing` is set here, before any export dispatch and before
    /// deletion, so no new work is scheduled against the room.
    pub fn begin_removals(&mut self, ctx: &mut SessionContext, ids: &[String]) -> Vec<RoomRemoval> {
        let mut staged = Vec::new();
        let mut seen = HashSet::new();
        for id in ids {
            if id == MAIN_ROOM || !seen.insert(id.clone()) {
                continue;
            }
            let Some(room) = ctx.rooms.get_mut(id) else {
                warn!(target: "sc.rooms", room_id = %id, "removal of unknown room ignored");
                continue;
            };
            if room.removing {
                continue;
            }
            room.removing = true;
            let needs_export = room.has_export_content;
            if needs_export {
                self.pending_exports.insert(id.clone());
            }
            self.auto_close_armed.remove(id);
            staged.push(RoomRemoval {
                room_id: id.clone(),
                needs_export,
            });
        }
        staged
    }

    /// Mark an export drain resolved. Returns false for stale resolutions.
    pub fn resolve_export(&mut self, room_id: &str) -> bool {
        self.pending_exports.remove(room_id)
    }

    /// Delete a resolved room from the registry.
    pub fn delete_room(&mut self, ctx: &mut SessionContext, room_id: &str) -> Option<Room> {
        self.auto_close_armed.remove(room_id);
        ctx.rooms.remove(room_id)
    }

    /// Number of export drains in flight.
    #[must_use]
    pub fn pending_export_count(&self) -> usize {
        self.pending_exports.len()
    }

    /// Drop all drain/arm bookkeeping at teardown.
    pub fn clear(&mut self) {
        self.presenter_cache = None;
        self.pending_exports.clear();
        self.auto_close_armed.clear();
    }
}

fn ev_room_move(actor: &mut SessionActor, env: EventEnvelope) -> HandlerFuture<'_> {
    Box::pin(actor.on_room_move(env))
}

fn ev_room_close(actor: &mut SessionActor, env: EventEnvelope) -> HandlerFuture<'_> {
    Box::pin(actor.on_room_close(env))
}

/// Register the room event names this module handles.
pub fn register_events(router: &mut EventRouter) {
    router.on("room.move", ev_room_move);
    router.on("room.close", ev_room_close);
}
