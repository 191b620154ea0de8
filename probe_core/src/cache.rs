//! Result caching with TTL expiry and sticky non-OK history.
//!
//! The cache keeps two views of past outcomes:
//!
//! - the latest outcome per check, served while younger than the effective TTL
//!   and otherwise kept around as a fallback for timeout reports;
//! - the latest *non-OK* outcome per check and severity, used to keep a
//!   recently failing check visible after it recovers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::types::{CheckDescriptor, CheckId, LogEntry, Outcome, Severity};

/// Thread-safe store of finished outcomes.
///
/// Both maps are concurrent maps with per-shard locking; no operation needs
/// atomicity across keys.
///
/// # Examples
///
/// ```
/// use probe_core::cache::ResultCache;
///
/// let cache = ResultCache::new();
/// assert!(cache.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct ResultCache {
    latest: DashMap<CheckId, Outcome>,
    non_ok: DashMap<Severity, DashMap<CheckId, Outcome>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// TTL for a descriptor: its own override, else the global value.
    pub fn effective_ttl(descriptor: &CheckDescriptor, global_ttl: Duration) -> Duration {
        descriptor.cache_ttl().unwrap_or(global_ttl)
    }

    /// Returns the latest outcome if it finished less than `ttl` ago.
    ///
    /// Expired entries stay in place.
    pub fn get(&self, descriptor: &CheckDescriptor, ttl: Duration) -> Option<Outcome> {
        let entry = self.latest.get(descriptor.id())?;
        if age(entry.finished_at, Utc::now()) < ttl {
            Some(entry.value().clone())
        } else {
            None
        }
    }

    /// Latest outcome of every check, in no particular order.
    pub fn latest_outcomes(&self) -> Vec<Outcome> {
        self.latest.iter().map(|e| e.value().clone()).collect()
    }

    /// Returns the latest outcome regardless of its age.
    pub fn get_stale(&self, descriptor: &CheckDescriptor) -> Option<Outcome> {
        self.latest.get(descriptor.id()).map(|e| e.value().clone())
    }

    /// Stores a finished outcome.
    ///
    /// An outcome older than the one already stored is ignored. Non-OK
    /// outcomes are also recorded under their severity.
    pub fn publish(&self, outcome: Outcome) {
        if !outcome.severity.is_ok() {
            let slot = self.non_ok.entry(outcome.severity).or_default();
            store_if_newer(&slot, outcome.clone());
        }
        store_if_newer(&self.latest, outcome);
    }

    /// Adds recent non-OK history to an outcome's log.
    ///
    /// Returns the outcome unchanged when `sticky_for` is zero or when no
    /// other non-OK outcome of the same check finished within `sticky_for`.
    /// The returned outcome keeps the current severity, finish time and
    /// elapsed time.
    pub fn with_sticky_history(&self, outcome: Outcome, sticky_for: Duration) -> Outcome {
        self.with_sticky_history_at(outcome, sticky_for, Utc::now())
    }

    fn with_sticky_history_at(
        &self,
        outcome: Outcome,
        sticky_for: Duration,
        now: DateTime<Utc>,
    ) -> Outcome {
        if sticky_for.is_zero() {
            return outcome;
        }

        let history: Vec<Outcome> = Severity::non_ok()
            .filter_map(|severity| {
                let slot = self.non_ok.get(&severity)?;
                let past = slot.get(outcome.check_id())?.value().clone();
                if past.id != outcome.id && age(past.finished_at, now) <= sticky_for {
                    Some(past)
                } else {
                    None
                }
            })
            .collect();

        if history.is_empty() {
            return outcome;
        }

        let mut log = Vec::with_capacity(
            1 + outcome.log.len() + history.iter().map(|h| h.log.len() + 1).sum::<usize>(),
        );
        log.push(LogEntry::info(format!(
            "*** Current result: {} ***",
            outcome.severity
        )));
        log.extend(outcome.log.iter().cloned());
        for past in history {
            log.push(LogEntry::info(format!(
                "*** Sticky result: {} from {} ***",
                past.severity,
                past.finished_at.to_rfc3339()
            )));
            log.extend(past.log);
        }

        Outcome { log, ..outcome }
    }

    /// Drops every entry of one check.
    pub fn evict(&self, id: &CheckId) {
        self.latest.remove(id);
        for slot in self.non_ok.iter() {
            slot.remove(id);
        }
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.latest.clear();
        self.non_ok.clear();
    }

    /// Number of checks with a latest outcome.
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

fn store_if_newer(map: &DashMap<CheckId, Outcome>, outcome: Outcome) {
    match map.entry(outcome.check_id().clone()) {
        Entry::Occupied(mut existing) => {
            if existing.get().finished_at <= outcome.finished_at {
                existing.insert(outcome);
            }
        }
        Entry::Vacant(slot) => {
            slot.insert(outcome);
        }
    }
}

/// Age of a timestamp; clock skew into the future counts as zero.
pub(crate) fn age(finished_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - finished_at).to_std().unwrap_or(Duration::ZERO)
}
