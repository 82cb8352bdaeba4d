//! Derived mic/cam state.
//!
//! Media state is a pure function of the inputs below, written out as an
//! explicit decision table. The [`MediaStateApprover`] re-evaluates it
//! inside the pipeline on every relevant mutation (role change, room move,
//! explicit toggle, hardware update, away change, join) so the derived
//! fields can never go stale.
//!
//! Mic precedence, first match wins:
//!
//! | # | Condition                                   | Mic          |
//! |---|---------------------------------------------|--------------|
//! | 1 | no mic hardware (and not on the phone bridge)| Blocked     |
//! | 2 | host denied the mic                         | Blocked      |
//! | 3 | phone-bridge attendee                       | Open         |
//! | 4 | test room and no baton                      | Blocked      |
//! | 5 | room audio locked and no baton              | Blocked      |
//! | 6 | away                                        | Muted        |
//! | 7 | push-to-talk (room or session) and no baton | PushToTalk   |
//! | 8 | otherwise                                   | Open         |
//!
//! Cam precedence, first match wins: no hardware → denied → phone →
//! test room without baton → room video locked without baton → Open.

use async_trait::async_trait;

use crate::actors::session::SessionActor;
use crate::context::SessionContext;
use crate::events::{EventEnvelope, EventRouter, HandlerFuture};
use crate::pipeline::{Approval, Approver, ApproverError};
use crate::types::{Attendee, AttendeePatch, CamState, MicState, Role, Room, SessionSettings};

/// Inputs to the media decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaInputs {
    pub mic_hardware: bool,
    pub cam_hardware: bool,
    pub mic_denied: bool,
    pub cam_denied: bool,
    pub has_baton: bool,
    pub away: bool,
    pub on_phone_bridge: bool,
    pub room_audio_locked: bool,
    pub room_video_locked: bool,
    pub push_to_talk: bool,
    pub is_test_room: bool,
}

impl MediaInputs {
    /// Gather inputs for an attendee as seated in `room`.
    #[must_use]
    pub fn gather(attendee: &Attendee, room: &Room, settings: &SessionSettings) -> Self {
        Self {
            mic_hardware: attendee.mic_hardware,
            cam_hardware: attendee.cam_hardware,
            mic_denied: attendee.mic_denied,
            cam_denied: attendee.cam_denied,
            has_baton: attendee.has_baton,
            away: attendee.away,
            on_phone_bridge: attendee.role == Role::Phone,
            room_audio_locked: room.locks.audio,
            room_video_locked: room.locks.video,
            push_to_talk: room.push_to_talk || settings.push_to_talk,
            is_test_room: room.is_test_room,
        }
    }
}

/// Derived mic/cam pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaDecision {
    pub mic: MicState,
    pub cam: CamState,
}

/// Evaluate the decision table.
#[must_use]
pub fn derive(inputs: MediaInputs) -> MediaDecision {
    let mic = if !inputs.mic_hardware && !inputs.on_phone_bridge {
        MicState::Blocked
    } else if inputs.mic_denied {
        MicState::Blocked
    } else if inputs.on_phone_bridge {
        MicState::Open
    } else if inputs.is_test_room && !inputs.has_baton {
        // test rooms force listen-in for non-baton holders
        MicState::Blocked
    } else if inputs.room_audio_locked && !inputs.has_baton {
        MicState::Blocked
    } else if inputs.away {
        MicState::Muted
    } else if inputs.push_to_talk && !inputs.has_baton {
        MicState::PushToTalk
    } else {
        MicState::Open
    };

    let cam = if !inputs.cam_hardware
        || inputs.cam_denied
        || inputs.on_phone_bridge
        || (inputs.is_test_room && !inputs.has_baton)
        || (inputs.room_video_locked && !inputs.has_baton)
    {
        CamState::Blocked
    } else {
        CamState::Open
    };

    MediaDecision { mic, cam }
}

/// Whether a patch touches any decision-table input.
fn touches_media_inputs(patch: &AttendeePatch) -> bool {
    patch.role.is_some()
        || patch.room.is_some()
        || patch.has_baton.is_some()
        || patch.left.is_some()
        || patch.mic.is_some()
        || patch.cam.is_some()
        || patch.mic_hardware.is_some()
        || patch.cam_hardware.is_some()
        || patch.mic_denied.is_some()
        || patch.cam_denied.is_some()
        || patch.away.is_some()
}

/// Pipeline approver that keeps derived mic/cam state current.
///
/// Runs last in the standard chain so it observes the final role/room
/// values. A client's explicit self-mute (mic `Muted`, cam `Blocked`) is
/// honored when the table would otherwise open the track; every other
/// proposed media value is overwritten by the derivation.
pub struct MediaStateApprover;

#[async_trait]
impl Approver for MediaStateApprover {
    fn name(&self) -> &'static str {
        "media-state"
    }

    async fn review(
        &self,
        ctx: &SessionContext,
        _requester: Option<&Attendee>,
        target: &Attendee,
        patch: &mut AttendeePatch,
    ) -> Result<Approval, ApproverError> {
        if !touches_media_inputs(patch) {
            return Ok(Approval::Approved);
        }

        let mut next = target.clone();
        patch.apply_to(&mut next);

        let main = Room::main();
        let room = ctx.rooms.get(&next.room).unwrap_or(&main);
        let decision = derive(MediaInputs::gather(&next, room, &ctx.settings));

        let mic = match patch.mic {
            Some(MicState::Muted) if decision.mic == MicState::Open => MicState::Muted,
            _ => decision.mic,
        };
        let cam = match patch.cam {
            Some(CamState::Blocked) => CamState::Blocked,
            _ => decision.cam,
        };

        patch.mic = Some(mic);
        patch.cam = Some(cam);
        Ok(Approval::Approved)
    }
}

fn ev_media_toggle(actor: &mut SessionActor, env: EventEnvelope) -> HandlerFuture<'_> {
    Box::pin(actor.on_media_toggle(env))
}

fn ev_media_hardware(actor: &mut SessionActor, env: EventEnvelope) -> HandlerFuture<'_> {
    Box::pin(actor.on_media_hardware(env))
}

fn ev_media_deny(actor: &mut SessionActor, env: EventEnvelope) -> HandlerFuture<'_> {
    Box::pin(actor.on_media_deny(env))
}

fn ev_presence_away(actor: &mut SessionActor, env: EventEnvelope) -> HandlerFuture<'_> {
    Box::pin(actor.on_presence_away(env))
}

fn ev_presence_hand(actor: &mut SessionActor, env: EventEnvelope) -> HandlerFuture<'_> {
    Box::pin(actor.on_presence_hand(env))
}

/// Register the media/presence event names this module handles.
pub fn register_events(router: &mut EventRouter) {
    router.on("media.toggle", ev_media_toggle);
    router.on("media.hardware", ev_media_hardware);
    router.on("media.deny", ev_media_deny);
    router.on("presence.away", ev_presence_away);
    router.on("presence.hand", ev_presence_hand);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn open_inputs() -> MediaInputs {
        MediaInputs {
            mic_hardware: true,
            cam_hardware: true,
            mic_denied: false,
            cam_denied: false,
            has_baton: false,
            away: false,
            on_phone_bridge: false,
            room_audio_locked: false,
            room_video_locked: false,
            push_to_talk: false,
            is_test_room: false,
        }
    }

    #[test]
    fn test_open_floor() {
        let d = derive(open_inputs());
        assert_eq!(d.mic, MicState::Open);
        assert_eq!(d.cam, CamState::Open);
    }

    #[test]
    fn test_no_hardware_blocks() {
        let d = derive(MediaInputs {
            mic_hardware: false,
            cam_hardware: false,
            ..open_inputs()
        });
        assert_eq!(d.mic, MicState::Blocked);
        assert_eq!(d.cam, CamState::Blocked);
    }

    #[test]
    fn test_deny_beats_everything_but_hardware() {
        let d = derive(MediaInputs {
            mic_denied: true,
            cam_denied: true,
            has_baton: true,
            ..open_inputs()
        });
        assert_eq!(d.mic, MicState::Blocked);
        assert_eq!(d.cam, CamState::Blocked);
    }

    #[test]
    fn test_phone_bridge_is_audio_only() {
        let d = derive(MediaInputs {
            on_phone_bridge: true,
            mic_hardware: false,
            ..open_inputs()
        });
        assert_eq!(d.mic, MicState::Open);
        assert_eq!(d.cam, CamState::Blocked);
    }

    #[test]
    fn test_test_room_forces_listen_in_without_baton() {
        let d = derive(MediaInputs {
            is_test_room: true,
            ..open_inputs()
        });
        assert_eq!(d.mic, MicState::Blocked);
        assert_eq!(d.cam, CamState::Blocked);
    }

    #[test]
    fn test_test_room_open_with_baton() {
        let d = derive(MediaInputs {
            is_test_room: true,
            has_baton: true,
            ..open_inputs()
        });
        assert_eq!(d.mic, MicState::Open);
        assert_eq!(d.cam, CamState::Open);
    }

    #[test]
    fn test_audio_lock_spares_baton_holder() {
        let locked = MediaInputs {
            room_audio_locked: true,
            ..open_inputs()
        };
        assert_eq!(derive(locked).mic, MicState::Blocked);

        let with_baton = MediaInputs {
            has_baton: true,
            ..locked
        };
        assert_eq!(derive(with_baton).mic, MicState::Open);
    }

    #[test]
    fn test_away_mutes() {
        let d = derive(MediaInputs {
            away: true,
            ..open_inputs()
        });
        assert_eq!(d.mic, MicState::Muted);
    }

    #[tokio::test]
    async fn test_approver_rederives_on_room_move() {
        use crate::test_support::ctx_with_main_room;

        let mut ctx = ctx_with_main_room("s-1");
        let mut locked = Room::new("b-1", "Breakout 1");
        locked.locks.audio = true;
        ctx.rooms.upsert(locked);

        let mut attendee = Attendee::new("a-1", "e-1", Role::Attendee);
        attendee.mic_hardware = true;
        attendee.cam_hardware = true;
        attendee.mic = MicState::Open;
        ctx.attendees.insert(attendee.clone());

        let approver = MediaStateApprover;
        let mut patch = AttendeePatch::default().room("b-1");
        let verdict = approver
            .review(&ctx, None, &attendee, &mut patch)
            .await
            .unwrap();

        assert_eq!(verdict, Approval::Approved);
        // moving into an audio-locked room closes the mic in the same delta
        assert_eq!(patch.mic, Some(MicState::Blocked));
    }

    #[tokio::test]
    async fn test_self_mute_honored_when_floor_open() {
        use crate::test_support::ctx_with_main_room;

        let ctx = ctx_with_main_room("s-1");
        let mut attendee = Attendee::new("a-1", "e-1", Role::Attendee);
        attendee.mic_hardware = true;
        ctx.rooms.get("").unwrap();

        let approver = MediaStateApprover;
        let mut patch = AttendeePatch::default();
        patch.mic = Some(MicState::Muted);
        let verdict = approver
            .review(&ctx, None, &attendee, &mut patch)
            .await
            .unwrap();

        assert_eq!(verdict, Approval::Approved);
        assert_eq!(patch.mic, Some(MicState::Muted));
    }

    #[test]
    fn test_push_to_talk_without_baton() {
        let d = derive(MediaInputs {
            push_to_talk: true,
            ..open_inputs()
        });
        assert_eq!(d.mic, MicState::PushToTalk);

        let d = derive(MediaInputs {
            push_to_talk: true,
            has_baton: true,
            ..open_inputs()
        });
        assert_eq!(d.mic, MicState::Open);
    }
}
