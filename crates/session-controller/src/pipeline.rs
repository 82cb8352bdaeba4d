//! The mutation-approval pipeline.
//!
//! Every attendee field change is proposed here, passed through a
//! **statically ordered** approver chain, and only committed to the
//! canonical registry once every approver agrees. Approvers may rewrite the
//! proposed fields in place; a veto short-circuits the chain and nothing is
//! committed or broadcast. An approver failure vetoes the proposal (fail
//! closed); the policy is uniform across every call site.
//!
//! Ordering is semantically load-bearing, so the chain is an explicit list
//! built at session construction; the unordered [`AttendeeChange`]
//! fan-out below is for notification only and never participates in
//! approval.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::context::SessionContext;
use crate::errors::SessionError;
use crate::metrics::SessionMetrics;
use crate::outbound::{broadcast_all, Outbound, RosterChange, SessionEvent};
use crate::types::{Attendee, AttendeeId, AttendeePatch, Role};

/// Capacity of the internal change-notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Internal change notification, fired after commit and broadcast.
///
/// Unordered; subscribers must not rely on delivery order across attendees.
#[derive(Debug, Clone)]
pub enum AttendeeChange {
    Joined {
        attendee: Attendee,
    },
    Updated {
        attendee_id: AttendeeId,
        fields: AttendeePatch,
    },
    Removed {
        attendee_id: AttendeeId,
    },
}

/// Verdict returned by an approver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    /// The (possibly rewritten) patch may proceed.
    Approved,
    /// Reject the whole proposal; the reason lands in logs only.
    Vetoed(&'static str),
}

/// An approver fault. Treated as a veto.
#[derive(Debug, Error)]
#[error("approver {approver} failed: {message}")]
pub struct ApproverError {
    pub approver: &'static str,
    pub message: String,
}

/// A component with a say over proposed attendee changes.
#[async_trait]
pub trait Approver: Send + Sync {
    /// Name used in logs and metrics labels.
    fn name(&self) -> &'static str;

    /// Validate and/or rewrite the proposed patch.
    ///
    /// `target` is the attendee's state before the proposal; `requester` is
    /// the attendee asking for the change, `None` for internal callers.
    async fn review(
        &self,
        ctx: &SessionContext,
        requester: Option<&Attendee>,
        target: &Attendee,
        patch: &mut AttendeePatch,
    ) -> Result<Approval, ApproverError>;
}

/// The ordered approval chain plus commit/broadcast plumbing.
pub struct MutationPipeline {
    approvers: Vec<Box<dyn Approver>>,
    changes: broadcast::Sender<AttendeeChange>,
    metrics: Arc<SessionMetrics>,
}

impl MutationPipeline {
    /// Build a pipeline with an explicit approver order.
    #[must_use]
    pub fn new(approvers: Vec<Box<dyn Approver>>, metrics: Arc<SessionMetrics>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            approvers,
            changes,
            metrics,
        }
    }

    /// The standard chain: role guard → room guard → media derivation.
    #[must_use]
    pub fn standard(metrics: Arc<SessionMetrics>) -> Self {
        Self::new(
            vec![
                Box::new(RoleGuardApprover),
                Box::new(RoomGuardApprover),
                Box::new(crate::media::MediaStateApprover),
            ],
            metrics,
        )
    }

    /// Subscribe to post-commit change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AttendeeChange> {
        self.changes.subscribe()
    }

    /// Propose a change to one attendee.
    ///
    /// Returns `Ok(Some(applied))` with the approver-final delta on commit,
    /// `Ok(None)` on veto. An empty post-approval patch is a successful
    /// no-op: nothing is committed or broadcast.
    pub async fn propose(
        &self,
        ctx: &mut SessionContext,
        outbound: &dyn Outbound,
        requester: Option<&str>,
        attendee_id: &str,
        patch: AttendeePatch,
    ) -> Result<Option<AttendeePatch>, SessionError> {
        let target = ctx
            .attendees
            .get(attendee_id)
            .cloned()
            .ok_or(SessionError::AttendeeNotFound)?;
        let requester = requester.and_then(|id| ctx.attendees.get(id).cloned());

        let Some(agreed) = self.approve(ctx, requester.as_ref(), &target, patch).await else {
            return Ok(None);
        };
        if agreed.is_empty() {
            return Ok(Some(agreed));
        }

        ctx.attendees.apply(attendee_id, &agreed);
        self.metrics.record_proposal_committed();

        let change = RosterChange {
            attendee_id: attendee_id.to_string(),
            fields: agreed.clone(),
        };
        broadcast_all(
            outbound,
            &ctx.connections,
            &SessionEvent::RosterDelta {
                changes: vec![change],
            },
        )
        .await;

        let _ = self.changes.send(AttendeeChange::Updated {
            attendee_id: attendee_id.to_string(),
            fields: agreed.clone(),
        });

        Ok(Some(agreed))
    }

    /// Propose a batch of changes, one broadcast for all commits.
    ///
    /// Each item's approval runs independently; a vetoed or unknown item is
    /// dropped without rolling back its siblings. Returns the committed
    /// changes in submission order.
    pub async fn propose_batch(
        &self,
        ctx: &mut SessionContext,
        outbound: &dyn Outbound,
        requester: Option<&str>,
        items: Vec<(AttendeeId, AttendeePatch)>,
    ) -> Result<Vec<RosterChange>, SessionError> {
        let requester = requester.and_then(|id| ctx.attendees.get(id).cloned());
        let mut committed = Vec::new();

        for (attendee_id, patch) in items {
            let Some(target) = ctx.attendees.get(&attendee_id).cloned() else {
                debug!(
                    target: "sc.pipeline",
                    attendee_id = %attendee_id,
                    "batch item dropped, unknown attendee"
                );
                continue;
            };

            let Some(agreed) = self.approve(ctx, requester.as_ref(), &target, patch).await else {
                continue;
            };
            if agreed.is_empty() {
                continue;
            }

            ctx.attendees.apply(&attendee_id, &agreed);
            self.metrics.record_proposal_committed();
            committed.push(RosterChange {
                attendee_id,
                fields: agreed,
            });
        }

        if !committed.is_empty() {
            broadcast_all(
                outbound,
                &ctx.connections,
                &SessionEvent::RosterDelta {
                    changes: committed.clone(),
                },
            )
            .await;
            for change in &committed {
                let _ = self.changes.send(AttendeeChange::Updated {
                    attendee_id: change.attendee_id.clone(),
                    fields: change.fields.clone(),
                });
            }
        }

        Ok(committed)
    }

    /// Trusted bypass: commit without approval.
    ///
    /// An explicit escape hatch for internal callers that already hold the
    /// invariant (grace finalization, shutdown). Not the default path.
    pub async fn commit_unchecked(
        &self,
        ctx: &mut SessionContext,
        outbound: &dyn Outbound,
        attendee_id: &str,
        mut patch: AttendeePatch,
    ) -> Result<Option<AttendeePatch>, SessionError> {
        let target = ctx
            .attendees
            .get(attendee_id)
            .cloned()
            .ok_or(SessionError::AttendeeNotFound)?;
        patch.strip_noops(&target);
        if patch.is_empty() {
            return Ok(Some(patch));
        }

        ctx.attendees.apply(attendee_id, &patch);
        self.metrics.record_proposal_committed();

        broadcast_all(
            outbound,
            &ctx.connections,
            &SessionEvent::RosterDelta {
                changes: vec![RosterChange {
                    attendee_id: attendee_id.to_string(),
                    fields: patch.clone(),
                }],
            },
        )
        .await;
        let _ = self.changes.send(AttendeeChange::Updated {
            attendee_id: attendee_id.to_string(),
            fields: patch.clone(),
        });
        Ok(Some(patch))
    }

    /// Register a new attendee and announce the join.
    pub async fn admit(&self, ctx: &mut SessionContext, outbound: &dyn Outbound, attendee: Attendee) {
        ctx.attendees.insert(attendee.clone());
        broadcast_all(
            outbound,
            &ctx.connections,
            &SessionEvent::RosterJoined {
                attendee: attendee.clone(),
            },
        )
        .await;
        let _ = self.changes.send(AttendeeChange::Joined { attendee });
    }

    /// Remove an attendee from the registry.
    ///
    /// The departure notice is the caller's responsibility; disconnect
    /// handling buffers it until grace finalization.
    pub fn withdraw(&self, ctx: &mut SessionContext, attendee_id: &str) -> Option<Attendee> {
        let attendee = ctx.attendees.remove(attendee_id)?;
        let _ = self.changes.send(AttendeeChange::Removed {
            attendee_id: attendee_id.to_string(),
        });
        Some(attendee)
    }

    /// Run the approver chain over one proposal.
    async fn approve(
        &self,
        ctx: &SessionContext,
        requester: Option<&Attendee>,
        target: &Attendee,
        mut patch: AttendeePatch,
    ) -> Option<AttendeePatch> {
        for approver in &self.approvers {
            match approver.review(ctx, requester, target, &mut patch).await {
                Ok(Approval::Approved) => {}
                Ok(Approval::Vetoed(reason)) => {
                    debug!(
                        target: "sc.pipeline",
                        approver = approver.name(),
                        attendee_id = %target.id,
                        reason,
                        "proposal vetoed"
                    );
                    self.metrics.record_proposal_vetoed(approver.name());
                    return None;
                }
                Err(err) => {
                    warn!(
                        target: "sc.pipeline",
                        approver = approver.name(),
                        attendee_id = %target.id,
                        error = %err,
                        "approver failed, proposal vetoed"
                    );
                    self.metrics.record_proposal_vetoed(approver.name());
                    return None;
                }
            }
        }
        patch.strip_noops(target);
        Some(patch)
    }
}

/// Validates role and ejection changes.
///
/// Ghost roles are fixed, nobody becomes a ghost after the fact, and
/// role/ejection changes proposed by another attendee require host-grade
/// privileges. Internal proposals (`requester == None`) are trusted.
pub struct RoleGuardApprover;

#[async_trait]
impl Approver for RoleGuardApprover {
    fn name(&self) -> &'static str {
        "role-guard"
    }

    async fn review(
        &self,
        _ctx: &SessionContext,
        requester: Option<&Attendee>,
        target: &Attendee,
        patch: &mut AttendeePatch,
    ) -> Result<Approval, ApproverError> {
        if let Some(role) = patch.role {
            if target.role == Role::Ghost && role != Role::Ghost {
                return Ok(Approval::Vetoed("ghost role is fixed"));
            }
            if role == Role::Ghost && target.role != Role::Ghost {
                return Ok(Approval::Vetoed("cannot become a ghost"));
            }
            if role != target.role {
                if let Some(req) = requester {
                    let self_change = req.id == target.id;
                    let privileged = matches!(req.role, Role::Host | Role::Cohost);
                    if !privileged && !(self_change && role == Role::Attendee) {
                        return Ok(Approval::Vetoed("role change requires host privileges"));
                    }
                }
            }
        }

        if patch.kicked_out.is_some() {
            if let Some(req) = requester {
                if !matches!(req.role, Role::Host | Role::Cohost) {
                    return Ok(Approval::Vetoed("ejection requires host privileges"));
                }
            }
        }

        if patch.mic_denied.is_some() || patch.cam_denied.is_some() {
            if let Some(req) = requester {
                if !matches!(req.role, Role::Host | Role::Cohost) {
                    return Ok(Approval::Vetoed("media deny requires host privileges"));
                }
            }
        }

        if let Some(room) = &patch.room {
            if *room != target.room {
                if let Some(req) = requester {
                    let self_move = req.id == target.id;
                    let privileged = matches!(req.role, Role::Host | Role::Cohost | Role::Lead);
                    if !self_move && !privileged {
                        return Ok(Approval::Vetoed("moving others requires host privileges"));
                    }
                }
            }
        }

        Ok(Approval::Approved)
    }
}

/// Rejects moves into rooms that don't exist or are draining.
pub struct RoomGuardApprover;

#[async_trait]
impl Approver for RoomGuardApprover {
    fn name(&self) -> &'static str {
        "room-guard"
    }

    async fn review(
        &self,
        ctx: &SessionContext,
        _requester: Option<&Attendee>,
        _target: &Attendee,
        patch: &mut AttendeePatch,
    ) -> Result<Approval, ApproverError> {
        if let Some(room_id) = &patch.room {
            match ctx.rooms.get(room_id) {
                None => return Ok(Approval::Vetoed("unknown room")),
                Some(room) if room.removing => return Ok(Approval::Vetoed("room is closing")),
                Some(_) => {}
            }
        }
        Ok(Approval::Approved)
    }
}
