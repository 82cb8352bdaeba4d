//! Session metrics.
//!
//! Counters are tracked twice: as shared atomics for the state view, and
//! through the `metrics` facade (prefix `sc_`) for whatever recorder the
//! host process installs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared counters for one session.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    admissions_accepted: AtomicU64,
    admissions_rejected: AtomicU64,
    proposals_committed: AtomicU64,
    proposals_vetoed: AtomicU64,
    timer_fires: AtomicU64,
    exports_succeeded: AtomicU64,
    exports_failed: AtomicU64,
}

/// Point-in-time counter snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub admissions_accepted: u64,
    pub admissions_rejected: u64,
    pub proposals_committed: u64,
    pub proposals_vetoed: u64,
    pub timer_fires: u64,
    pub exports_succeeded: u64,
    pub exports_failed: u64,
}

impl SessionMetrics {
    /// Create shared metrics.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_admission_accepted(&self) {
        self.admissions_accepted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sc_admissions_total", "outcome" => "accepted").increment(1);
    }

    pub fn record_admission_rejected(&self, code: &'static str) {
        self.admissions_rejected.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sc_admissions_total", "outcome" => "rejected", "code" => code)
            .increment(1);
    }

    pub fn record_proposal_committed(&self) {
        self.proposals_committed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sc_proposals_total", "outcome" => "committed").increment(1);
    }

    pub fn record_proposal_vetoed(&self, approver: &'static str) {
        self.proposals_vetoed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sc_proposals_total", "outcome" => "vetoed", "approver" => approver)
            .increment(1);
    }

    pub fn record_timer_fire(&self) {
        self.timer_fires.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sc_timer_fires_total").increment(1);
    }

    pub fn record_export(&self, success: bool) {
        if success {
            self.exports_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.exports_failed.fetch_add(1, Ordering::Relaxed);
        }
        let outcome = if success { "success" } else { "failure" };
        metrics::counter!("sc_exports_total", "outcome" => outcome).increment(1);
    }

    /// Report the present-attendee gauge.
    pub fn set_present_attendees(&self, count: usize) {
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("sc_present_attendees").set(count as f64);
    }

    /// Snapshot every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admissions_accepted: self.admissions_accepted.load(Ordering::Relaxed),
            admissions_rejected: self.admissions_rejected.load(Ordering::Relaxed),
            proposals_committed: self.proposals_committed.load(Ordering::Relaxed),
            proposals_vetoed: self.proposals_vetoed.load(Ordering::Relaxed),
            timer_fires: self.timer_fires.load(Ordering::Relaxed),
            exports_succeeded: self.exports_succeeded.load(Ordering::Relaxed),
            exports_failed: self.exports_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let m = SessionMetrics::new();
        m.record_admission_accepted();
        m.record_admission_accepted();
        m.record_admission_rejected("DOUBLE_JOIN");
        m.record_proposal_committed();
        m.record_proposal_vetoed("role-guard");
        m.record_export(true);
        m.record_export(false);

        let snap = m.snapshot();
        assert_eq!(snap.admissions_accepted, 2);
        assert_eq!(snap.admissions_rejected, 1);
        assert_eq!(snap.proposals_committed, 1);
        assert_eq!(snap.proposals_vetoed, 1);
        assert_eq!(snap.exports_succeeded, 1);
        assert_eq!(snap.exports_failed, 1);
    }
}
