//! In-memory store answering asynchronous checks.
//!
//! Checks marked asynchronous are answered from the latest outcome the
//! executor handed to the store. The first request for such a check finds
//! nothing and runs it synchronously; that run fills the store. Later
//! requests get the stored outcome, and the executor refreshes it in the
//! background once it is older than the check's cache TTL.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use probe_core::{AsyncResults, CheckDescriptor, CheckId, CompletionListener, Outcome};

/// Latest outcome per asynchronous check.
#[derive(Debug, Default)]
pub struct AsyncResultStore {
    results: DashMap<CheckId, Outcome>,
    max_age: Option<Duration>,
}

impl AsyncResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops answering with outcomes older than `max_age`.
    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            results: DashMap::new(),
            max_age: Some(max_age),
        }
    }

    pub fn get(&self, id: &CheckId) -> Option<Outcome> {
        self.results.get(id).map(|entry| entry.value().clone())
    }

    pub fn forget(&self, id: &CheckId) {
        self.results.remove(id);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    fn is_fresh(&self, outcome: &Outcome) -> bool {
        match self.max_age {
            None => true,
            Some(max_age) => (Utc::now() - outcome.finished_at)
                .to_std()
                .map_or(true, |age| age < max_age),
        }
    }
}

impl CompletionListener for AsyncResultStore {
    fn on_completed(&self, outcome: &Outcome) {
        if !outcome.descriptor.is_asynchronous() {
            return;
        }

        self.results
            .entry(outcome.check_id().clone())
            .and_modify(|current| {
                if outcome.finished_at >= current.finished_at {
                    *current = outcome.clone();
                }
            })
            .or_insert_with(|| outcome.clone());
    }
}

impl AsyncResults for AsyncResultStore {
    fn claim(&self, descriptors: &[CheckDescriptor]) -> HashMap<CheckId, Outcome> {
        descriptors
            .iter()
            .filter(|d| d.is_asynchronous())
            .filter_map(|d| {
                let outcome = self.get(d.id())?;
                self.is_fresh(&outcome).then(|| (d.id().clone(), outcome))
            })
            .collect()
    }
}
