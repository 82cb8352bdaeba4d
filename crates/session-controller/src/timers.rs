//! Keyed, cancelable one-shot timers.
//!
//! Every deferred action in a session (disconnect grace, presenter probe
//! and watchdog, breakout auto-close) is armed here, keyed per attendee or
//! per room. Arming an already-armed key cancels the old timer first, so
//! cancel-before-rearm is structural rather than a call-site convention.
//! Expiry posts a [`SessionMessage::TimerFired`] back into the session
//! mailbox; a fire that raced with a cancel is dropped by
//! [`TimerRegistry::acknowledge`] on receipt.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::actors::messages::SessionMessage;
use crate::types::AttendeeId;

/// Timer identity. One live timer exists per key at most.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Disconnect grace period for one attendee.
    DisconnectGrace(AttendeeId),
    /// Short confirmation delay before announcing presenter absence.
    PresenterProbe,
    /// No-presenter watchdog.
    PresenterWatchdog,
    /// Breakout auto-close for one room.
    RoomAutoClose(String),
}

/// Keyed one-shot timer registry for one session.
pub struct TimerRegistry {
    mailbox: mpsc::Sender<SessionMessage>,
    armed: HashMap<TimerKey, CancellationToken>,
}

impl TimerRegistry {
    /// Create a registry posting expiries into the given mailbox.
    #[must_use]
    pub fn new(mailbox: mpsc::Sender<SessionMessage>) -> Self {
        Self {
            mailbox,
            armed: HashMap::new(),
        }
    }

    /// Arm a one-shot timer, cancelling any live timer under the same key.
    pub fn arm(&mut self, key: TimerKey, delay: Duration) {
        self.cancel(&key);

        let token = CancellationToken::new();
        self.armed.insert(key.clone(), token.clone());
        let mailbox = self.mailbox.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = mailbox.send(SessionMessage::TimerFired { key }).await;
                }
            }
        });
    }

    /// Cancel a timer. Returns whether one was armed.
    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        match self.armed.remove(key) {
            Some(token) => {
                token.cancel();
                debug!(target: "sc.timers", ?key, "timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Whether a timer is armed under the key.
    #[must_use]
    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.armed.contains_key(key)
    }

    /// Accept a fire notification.
    ///
    /// Returns false when the key is no longer armed: the fire raced with
    /// a cancel and must be ignored.
    pub fn acknowledge(&mut self, key: &TimerKey) -> bool {
        self.armed.remove(key).is_some()
    }

    /// Cancel everything. Used at teardown.
    pub fn cancel_all(&mut self) {
        for (_, token) in self.armed.drain() {
            token.cancel();
        }
    }

    /// Number of armed timers.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }
}
