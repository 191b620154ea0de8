//! Registry of executions currently in flight.
//!
//! Guarantees at most one live [`ExecutionUnit`] per check. Callers that ask
//! for a check while it is running share the existing unit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::types::{CheckDescriptor, CheckId};
use crate::unit::ExecutionUnit;

/// Map from check id to the unit running for it, plus the completion signal
/// shared by every waiting caller.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    units: Mutex<HashMap<CheckId, Arc<ExecutionUnit>>>,
    completed: Notify,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the running unit for `descriptor`, or registers a new one.
    ///
    /// The flag is true when the unit was created by this call; only the
    /// creator submits it for execution.
    pub fn get_or_create(&self, descriptor: &CheckDescriptor) -> (Arc<ExecutionUnit>, bool) {
        let mut units = self.lock();
        Self::get_or_create_locked(&mut units, descriptor)
    }

    /// Batch form of [`get_or_create`](Self::get_or_create) under a single
    /// lock acquisition.
    pub fn get_or_create_all(
        &self,
        descriptors: &[CheckDescriptor],
    ) -> Vec<(Arc<ExecutionUnit>, bool)> {
        let mut units = self.lock();
        descriptors
            .iter()
            .map(|d| Self::get_or_create_locked(&mut units, d))
            .collect()
    }

    fn get_or_create_locked(
        units: &mut HashMap<CheckId, Arc<ExecutionUnit>>,
        descriptor: &CheckDescriptor,
    ) -> (Arc<ExecutionUnit>, bool) {
        if let Some(existing) = units.get(descriptor.id()) {
            if !existing.is_done() {
                tracing::debug!(check = %descriptor.id(), "Joining execution in flight");
                return (Arc::clone(existing), false);
            }
        }

        let unit = Arc::new(ExecutionUnit::new(descriptor.clone()));
        units.insert(descriptor.id().clone(), Arc::clone(&unit));
        (unit, true)
    }

    /// Unregisters `unit` if it is still the registered unit for its check.
    pub fn remove(&self, unit: &ExecutionUnit) {
        let mut units = self.lock();
        let id = unit.descriptor().id();
        if units
            .get(id)
            .is_some_and(|registered| registered.run_id() == unit.run_id())
        {
            units.remove(id);
        }
    }

    /// Wakes every caller currently waiting for completions.
    pub fn notify_completed(&self) {
        self.completed.notify_waiters();
    }

    /// Waits until some unit completes or `max_wait` elapses.
    ///
    /// Returns true when woken by a completion. Wake-ups are not tied to a
    /// particular unit; callers re-check their own units afterwards.
    pub async fn wait_for_completion(&self, max_wait: Duration) -> bool {
        tokio::time::timeout(max_wait, self.completed.notified())
            .await
            .is_ok()
    }

    /// Number of units in flight.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forgets every unit. Units already running still finish and publish.
    pub fn clear(&self) {
        self.lock().clear();
        self.completed.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CheckId, Arc<ExecutionUnit>>> {
        self.units.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
