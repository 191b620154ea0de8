//! Tracks how long checks have been temporarily unavailable.
//!
//! A `TemporarilyUnavailable` outcome is expected during maintenance or a
//! dependency restart. It only becomes a problem once it has lasted longer
//! than the grace period.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use probe_core::{CheckId, CompletionListener, Outcome, Severity};

/// Records since when each check has been continuously unavailable.
#[derive(Debug)]
pub struct SustainedUnavailableTracker {
    grace_period: Duration,
    since: Mutex<HashMap<CheckId, DateTime<Utc>>>,
}

impl SustainedUnavailableTracker {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            grace_period,
            since: Mutex::new(HashMap::new()),
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Finish time of the first outcome of the current unavailable streak.
    pub fn unavailable_since(&self, id: &CheckId) -> Option<DateTime<Utc>> {
        self.lock().get(id).copied()
    }

    /// True once the check has been unavailable for the whole grace period.
    pub fn exceeds_grace(&self, id: &CheckId) -> bool {
        self.exceeds_grace_at(id, Utc::now())
    }

    /// Checks past their grace period, sorted by id.
    pub fn beyond_grace(&self) -> Vec<CheckId> {
        let now = Utc::now();
        let mut ids: Vec<CheckId> = self
            .lock()
            .iter()
            .filter(|(_, since)| self.outlasted(**since, now))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn forget(&self, id: &CheckId) {
        self.lock().remove(id);
    }

    fn exceeds_grace_at(&self, id: &CheckId, now: DateTime<Utc>) -> bool {
        self.lock()
            .get(id)
            .is_some_and(|since| self.outlasted(*since, now))
    }

    fn outlasted(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - since)
            .to_std()
            .is_ok_and(|streak| streak >= self.grace_period)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CheckId, DateTime<Utc>>> {
        self.since.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CompletionListener for SustainedUnavailableTracker {
    fn on_completed(&self, outcome: &Outcome) {
        let mut since = self.lock();
        if outcome.severity == Severity::TemporarilyUnavailable {
            let started = since
                .entry(outcome.check_id().clone())
                .or_insert(outcome.finished_at);
            // Events may arrive out of order.
            if outcome.finished_at < *started {
                *started = outcome.finished_at;
            }
        } else if since.remove(outcome.check_id()).is_some() {
            tracing::info!(
                check = %outcome.check_id(),
                severity = %outcome.severity,
                "Check available again"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_core::{CheckDescriptor, FnProbe, ProbeLog};
    use std::sync::Arc;

    fn check(id: &str) -> CheckDescriptor {
        CheckDescriptor::new(
            id,
            id,
            Arc::new(FnProbe::new(|| async { Ok(ProbeLog::new()) })),
        )
    }

    fn outcome_at(d: &CheckDescriptor, unavailable: bool, finished_at: DateTime<Utc>) -> Outcome {
        let mut log = ProbeLog::new();
        if unavailable {
            log.temporarily_unavailable("restarting");
        } else {
            log.info("up");
        }
        let mut outcome = Outcome::from_log(d.clone(), log, Duration::from_millis(1));
        outcome.finished_at = finished_at;
        outcome
    }

    #[test]
    fn test_streak_starts_at_first_unavailable_outcome() {
        let tracker = SustainedUnavailableTracker::new(Duration::from_secs(600));
        let d = check("search");
        let t0 = Utc::now() - chrono::Duration::minutes(20);

        tracker.on_completed(&outcome_at(&d, true, t0));
        tracker.on_completed(&outcome_at(&d, true, t0 + chrono::Duration::minutes(5)));

        assert_eq!(tracker.unavailable_since(d.id()), Some(t0));
        assert!(tracker.exceeds_grace(d.id()));
        assert_eq!(tracker.beyond_grace(), vec![d.id().clone()]);
    }

    #[test]
    fn test_within_grace_period() {
        let tracker = SustainedUnavailableTracker::new(Duration::from_secs(600));
        let d = check("search");
        let t0 = Utc::now();

        tracker.on_completed(&outcome_at(&d, true, t0));

        assert!(!tracker.exceeds_grace_at(d.id(), t0 + chrono::Duration::minutes(9)));
        assert!(tracker.exceeds_grace_at(d.id(), t0 + chrono::Duration::minutes(10)));
    }

    #[test]
    fn test_recovery_ends_streak() {
        let tracker = SustainedUnavailableTracker::new(Duration::from_secs(60));
        let d = check("search");
        let t0 = Utc::now() - chrono::Duration::minutes(5);

        tracker.on_completed(&outcome_at(&d, true, t0));
        tracker.on_completed(&outcome_at(&d, false, Utc::now()));

        assert_eq!(tracker.unavailable_since(d.id()), None);
        assert!(!tracker.exceeds_grace(d.id()));
        assert!(tracker.beyond_grace().is_empty());
    }

    #[test]
    fn test_out_of_order_events_keep_earliest_start() {
        let tracker = SustainedUnavailableTracker::new(Duration::from_secs(60));
        let d = check("search");
        let t0 = Utc::now() - chrono::Duration::minutes(5);

        tracker.on_completed(&outcome_at(&d, true, t0 + chrono::Duration::minutes(1)));
        tracker.on_completed(&outcome_at(&d, true, t0));

        assert_eq!(tracker.unavailable_since(d.id()), Some(t0));
    }

    #[test]
    fn test_forget() {
        let tracker = SustainedUnavailableTracker::new(Duration::ZERO);
        let d = check("search");
        tracker.on_completed(&outcome_at(&d, true, Utc::now()));

        tracker.forget(d.id());

        assert_eq!(tracker.unavailable_since(d.id()), None);
    }
}
