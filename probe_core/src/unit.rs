//! One execution of one check.
//!
//! An [`ExecutionUnit`] is created by the in-flight registry, run once by the
//! worker pool, and shared by every caller waiting for that check. It never
//! gets cancelled: a caller that stops waiting leaves the unit running, and
//! its outcome still lands in the cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::error::{ProbeError, Result};
use crate::events::{AsyncResults, CompletionEvent};
use crate::inflight::InFlightRegistry;
use crate::metrics::{ExecutorMetrics, MetricKind};
use crate::probe::panic_message;
use crate::types::{CheckDescriptor, Outcome};

/// State an execution unit touches when it completes.
///
/// Owned by the executor and handed to each unit it runs.
pub(crate) struct UnitContext {
    pub(crate) cache: Arc<ResultCache>,
    pub(crate) async_results: Arc<dyn AsyncResults>,
    pub(crate) registry: Arc<InFlightRegistry>,
    pub(crate) events: broadcast::Sender<CompletionEvent>,
    pub(crate) metrics: ExecutorMetrics,
    /// Set on shutdown; outcomes finishing afterwards are not published.
    pub(crate) closed: AtomicBool,
}

impl UnitContext {
    pub(crate) fn new(
        cache: Arc<ResultCache>,
        async_results: Arc<dyn AsyncResults>,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            cache,
            async_results,
            registry: Arc::new(InFlightRegistry::new()),
            events,
            metrics: ExecutorMetrics::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A single run of a check's probe.
#[derive(Debug)]
pub struct ExecutionUnit {
    run_id: Uuid,
    descriptor: CheckDescriptor,
    created_at: DateTime<Utc>,
    started: Instant,
    done: AtomicBool,
    outcome: Mutex<Option<Outcome>>,
}

impl ExecutionUnit {
    pub fn new(descriptor: CheckDescriptor) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            descriptor,
            created_at: Utc::now(),
            started: Instant::now(),
            done: AtomicBool::new(false),
            outcome: Mutex::new(None),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn descriptor(&self) -> &CheckDescriptor {
        &self.descriptor
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time since the unit was created, including any time spent queued.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// The published outcome of a finished unit.
    pub fn outcome(&self) -> Result<Outcome> {
        let slot = self.outcome.lock().map_err(|_| ProbeError::Retrieval {
            check: self.descriptor.id().clone(),
            reason: "outcome slot poisoned".to_string(),
        })?;
        slot.clone().ok_or_else(|| ProbeError::Retrieval {
            check: self.descriptor.id().clone(),
            reason: "no outcome published".to_string(),
        })
    }

    /// Invokes the probe and publishes its outcome.
    ///
    /// Probe errors and panics become `ExecutionError` outcomes.
    pub(crate) async fn run(&self, ctx: &UnitContext) -> Outcome {
        let probe = self.descriptor.probe();
        let result = tokio::spawn(async move { probe.invoke().await }).await;
        let elapsed = self.elapsed();

        let outcome = match result {
            Ok(Ok(log)) => Outcome::from_log(self.descriptor.clone(), log, elapsed),
            Ok(Err(err)) => {
                tracing::warn!(check = %self.descriptor.id(), "Probe failed: {:#}", err);
                ctx.metrics.record(MetricKind::ExecutionError);
                Outcome::execution_error(
                    self.descriptor.clone(),
                    format!("Exception during execution of '{}': {}", self.descriptor.title(), err),
                    Some(format!("{:#}", err)),
                    elapsed,
                )
            }
            Err(err) => {
                let cause = if err.is_panic() {
                    panic_message(err.into_panic().as_ref())
                } else {
                    err.to_string()
                };
                tracing::warn!(check = %self.descriptor.id(), "Probe panicked: {}", cause);
                ctx.metrics.record(MetricKind::ExecutionError);
                Outcome::execution_error(
                    self.descriptor.clone(),
                    format!("Panic during execution of '{}'", self.descriptor.title()),
                    Some(cause),
                    elapsed,
                )
            }
        };

        ctx.metrics.record_execution(elapsed);
        tracing::debug!(
            check = %self.descriptor.id(),
            severity = %outcome.severity,
            elapsed_ms = elapsed.as_millis() as u64,
            "Probe finished"
        );
        self.complete(outcome.clone(), ctx);
        outcome
    }

    /// Completes the unit without running it.
    pub(crate) fn abandon(&self, ctx: &UnitContext, reason: &ProbeError) {
        tracing::warn!(check = %self.descriptor.id(), "Probe not started: {}", reason);
        ctx.metrics.record(MetricKind::ExecutionError);
        let outcome = Outcome::execution_error(
            self.descriptor.clone(),
            format!("Execution of '{}' could not be started", self.descriptor.title()),
            Some(reason.to_string()),
            self.elapsed(),
        );
        self.complete(outcome, ctx);
    }

    /// Publishes to the cache, hands the outcome to the async results
    /// collaborator, announces the completion, leaves the registry, then
    /// marks the unit done and wakes waiters. The order matters: a waiter
    /// that sees `done` must also find the outcome in the cache.
    ///
    /// After shutdown nothing is published; waiters still get the outcome.
    fn complete(&self, outcome: Outcome, ctx: &UnitContext) {
        if ctx.is_closed() {
            tracing::debug!(check = %self.descriptor.id(), "Executor closed, outcome not published");
        } else {
            ctx.cache.publish(outcome.clone());
            ctx.async_results.on_completed(&outcome);

            // No subscribers is fine.
            let _ = ctx.events.send(CompletionEvent {
                run_id: self.run_id,
                outcome: outcome.clone(),
            });
        }

        ctx.registry.remove(self);

        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        self.done.store(true, Ordering::Release);
        ctx.registry.notify_completed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoAsyncResults;
    use crate::probe::FnProbe;
    use crate::types::{ProbeLog, Severity};

    fn context() -> UnitContext {
        UnitContext::new(Arc::new(ResultCache::new()), Arc::new(NoAsyncResults), 16)
    }

    fn descriptor<F, Fut>(id: &str, f: F) -> CheckDescriptor
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<ProbeLog>> + Send + 'static,
    {
        CheckDescriptor::new(id, id, Arc::new(FnProbe::new(f)))
    }

    #[tokio::test]
    async fn test_run_publishes_outcome() {
        let ctx = context();
        let mut events = ctx.events.subscribe();
        let d = descriptor("ok", || async {
            let mut log = ProbeLog::new();
            log.info("fine");
            Ok(log)
        });
        let (unit, _) = ctx.registry.get_or_create(&d);

        let outcome = unit.run(&ctx).await;

        assert_eq!(outcome.severity, Severity::Ok);
        assert!(unit.is_done());
        assert_eq!(unit.outcome().unwrap().id, outcome.id);
        assert_eq!(ctx.cache.get_stale(&d).unwrap().id, outcome.id);
        assert!(ctx.registry.is_empty());
        assert_eq!(events.recv().await.unwrap().run_id, unit.run_id());
        assert_eq!(ctx.metrics.count(MetricKind::Execution), 1);
    }

    #[tokio::test]
    async fn test_probe_error_becomes_execution_error() {
        let ctx = context();
        let d = descriptor("err", || async { Err(anyhow::anyhow!("connection refused")) });
        let unit = ExecutionUnit::new(d);

        let outcome = unit.run(&ctx).await;

        assert_eq!(outcome.severity, Severity::ExecutionError);
        assert_eq!(outcome.log[0].cause.as_deref(), Some("connection refused"));
        assert_eq!(ctx.metrics.count(MetricKind::ExecutionError), 1);
    }

    #[tokio::test]
    async fn test_probe_panic_becomes_execution_error() {
        let ctx = context();
        let d = descriptor("panic", || async {
            if true {
                panic!("probe exploded");
            }
            Ok(ProbeLog::new())
        });
        let unit = ExecutionUnit::new(d);

        let outcome = unit.run(&ctx).await;

        assert_eq!(outcome.severity, Severity::ExecutionError);
        assert_eq!(outcome.log[0].cause.as_deref(), Some("probe exploded"));
        assert!(unit.is_done());
    }

    #[tokio::test]
    async fn test_elapsed_counts_from_creation() {
        let ctx = context();
        let d = descriptor("queued", || async { Ok(ProbeLog::new()) });
        let unit = ExecutionUnit::new(d);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let outcome = unit.run(&ctx).await;

        assert!(outcome.elapsed >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_abandon_completes_unit() {
        let ctx = context();
        let d = descriptor("never", || async { Ok(ProbeLog::new()) });
        let (unit, _) = ctx.registry.get_or_create(&d);

        unit.abandon(&ctx, &ProbeError::PoolClosed);

        assert!(unit.is_done());
        assert!(ctx.registry.is_empty());
        let outcome = unit.outcome().unwrap();
        assert_eq!(outcome.severity, Severity::ExecutionError);
        assert_eq!(outcome.log[0].cause.as_deref(), Some("Worker pool is closed"));
    }

    #[tokio::test]
    async fn test_closed_context_does_not_publish() {
        let ctx = context();
        let mut events = ctx.events.subscribe();
        let d = descriptor("late", || async { Ok(ProbeLog::new()) });
        let unit = ExecutionUnit::new(d.clone());

        ctx.close();
        let outcome = unit.run(&ctx).await;

        assert!(unit.is_done());
        assert_eq!(unit.outcome().unwrap().id, outcome.id);
        assert!(ctx.cache.get_stale(&d).is_none());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_outcome_before_completion_is_retrieval_error() {
        let d = descriptor("pending", || async { Ok(ProbeLog::new()) });
        let unit = ExecutionUnit::new(d);

        assert!(!unit.is_done());
        assert!(matches!(unit.outcome(), Err(ProbeError::Retrieval { .. })));
    }
}
