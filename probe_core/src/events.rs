//! Completion events and the collaborators that consume them.
//!
//! Every finished execution unit broadcasts a [`CompletionEvent`]. The async
//! results collaborator and the grace-period tracker subscribe to the channel
//! rather than being called back from inside the unit.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::types::{CheckDescriptor, CheckId, Outcome};

/// Published once per finished execution, after the outcome reached the cache.
#[derive(Clone, Debug)]
pub struct CompletionEvent {
    /// Run id of the execution unit that produced the outcome.
    pub run_id: Uuid,
    pub outcome: Outcome,
}

/// Receives finished outcomes.
pub trait CompletionListener: Send + Sync {
    fn on_completed(&self, outcome: &Outcome);
}

/// Source of outcomes that do not require a synchronous execution.
///
/// Consulted before the cache on every non-forced `execute` call.
pub trait AsyncResults: CompletionListener {
    /// Returns the outcomes it can answer right now, keyed by check id.
    fn claim(&self, descriptors: &[CheckDescriptor]) -> HashMap<CheckId, Outcome>;
}

/// Async results collaborator that never claims anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAsyncResults;

impl CompletionListener for NoAsyncResults {
    fn on_completed(&self, _outcome: &Outcome) {}
}

impl AsyncResults for NoAsyncResults {
    fn claim(&self, _descriptors: &[CheckDescriptor]) -> HashMap<CheckId, Outcome> {
        HashMap::new()
    }
}

/// Forwards completion events to listeners until the channel closes.
///
/// Listeners are called in order for each event. When the receiver lags,
/// the missed events are gone; listeners are instead replayed the latest
/// outcome of every check in `cache`, which the missed events were
/// published to first. Listeners must therefore tolerate repeated and
/// out-of-order outcomes.
pub async fn dispatch_completions(
    mut events: broadcast::Receiver<CompletionEvent>,
    listeners: Vec<Arc<dyn CompletionListener>>,
    cache: Arc<ResultCache>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                for listener in &listeners {
                    listener.on_completed(&event.outcome);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                let latest = cache.latest_outcomes();
                tracing::warn!(
                    "Completion dispatch lagged, skipped {} events, replaying {} cached outcomes",
                    skipped,
                    latest.len()
                );
                for outcome in &latest {
                    for listener in &listeners {
                        listener.on_completed(outcome);
                    }
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::debug!("Completion channel closed, stopping dispatch");
                break;
            }
        }
    }
}
