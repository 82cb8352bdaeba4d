//! Baton (floor control) derivation.
//!
//! The baton is not stored state of its own: within a room, every attendee
//! whose role is HOST, COHOST, or LEAD must hold it and nobody else may.
//! Recomputation always goes through the pipeline as a single batch so
//! clients never observe a partially updated room.

use crate::context::SessionContext;
use crate::errors::SessionError;
use crate::outbound::{Outbound, RosterChange};
use crate::pipeline::MutationPipeline;
use crate::types::AttendeePatch;

/// Recompute baton ownership for one room.
///
/// Returns the committed corrections; an already-converged room commits
/// nothing and broadcasts nothing.
pub async fn recompute_room(
    ctx: &mut SessionContext,
    pipeline: &MutationPipeline,
    outbound: &dyn Outbound,
    room_id: &str,
) -> Result<Vec<RosterChange>, SessionError> {
    let items: Vec<_> = ctx
        .attendees
        .in_room(room_id)
        .filter(|a| a.has_baton != a.role.holds_baton())
        .map(|a| {
            (
                a.id.clone(),
                AttendeePatch::default().has_baton(a.role.holds_baton()),
            )
        })
        .collect();

    if items.is_empty() {
        return Ok(Vec::new());
    }
    pipeline.propose_batch(ctx, outbound, None, items).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::metrics::SessionMetrics;
    use crate::test_support::{ctx_with_main_room, NullOutbound};
    use crate::types::{Attendee, Role, MAIN_ROOM};

    fn seat(ctx: &mut SessionContext, id: &str, role: Role, has_baton: bool) {
        let mut attendee = Attendee::new(id, format!("ext-{id}"), role);
        attendee.has_baton = has_baton;
        ctx.attendees.insert(attendee);
    }

    #[tokio::test]
    async fn test_recompute_converges_to_role_set() {
        let mut ctx = ctx_with_main_room("s-1");
        seat(&mut ctx, "host-1", Role::Host, false); // must gain
        seat(&mut ctx, "lead-1", Role::Lead, false); // must gain
        seat(&mut ctx, "att-1", Role::Attendee, true); // must lose
        seat(&mut ctx, "pres-1", Role::Presenter, false); // stays without

        let pipeline = MutationPipeline::standard(SessionMetrics::new());
        let changes = recompute_room(&mut ctx, &pipeline, &NullOutbound, MAIN_ROOM)
            .await
            .unwrap();
        assert_eq!(changes.len(), 3);

        for attendee in ctx.attendees.iter() {
            assert_eq!(
                attendee.has_baton,
                attendee.role.holds_baton(),
                "baton invariant violated for {}",
                attendee.id
            );
        }
    }

    #[tokio::test]
    async fn test_converged_room_commits_nothing() {
        let mut ctx = ctx_with_main_room("s-1");
        seat(&mut ctx, "host-1", Role::Host, true);
        seat(&mut ctx, "att-1", Role::Attendee, false);

        let pipeline = MutationPipeline::standard(SessionMetrics::new());
        let changes = recompute_room(&mut ctx, &pipeline, &NullOutbound, MAIN_ROOM)
            .await
            .unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn test_recompute_scopes_to_room() {
        let mut ctx = ctx_with_main_room("s-1");
        seat(&mut ctx, "host-1", Role::Host, false);
        let mut other = Attendee::new("lead-2", "ext-lead-2", Role::Lead);
        other.room = "b-1".to_string();
        other.has_baton = false;
        ctx.attendees.insert(other);

        let pipeline = MutationPipeline::standard(SessionMetrics::new());
        recompute_room(&mut ctx, &pipeline, &NullOutbound, MAIN_ROOM)
            .await
            .unwrap();

        assert!(ctx.attendees.get("host-1").unwrap().has_baton);
        // the other room is untouched until its own recomputation
        assert!(!ctx.attendees.get("lead-2").unwrap().has_baton);
    }
}
