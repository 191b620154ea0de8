//! Batch execution of checks.
//!
//! [`Executor::execute`] answers a batch of checks from, in order, the async
//! results collaborator, the result cache, and live executions. Live
//! executions are coalesced per check through the in-flight registry and run
//! on the worker pool; the caller waits for them up to a bounded budget.
//!
//! # Execution Model
//!
//! For each call the executor:
//! 1. Claims outcomes from the async results collaborator (unless forced),
//!    refreshing those older than their cache TTL in the background
//! 2. Serves fresh cache hits (unless forced)
//! 3. Joins or starts an execution for every remaining check
//! 4. Waits until all of those finish or the budget runs out
//! 5. Reports unfinished checks as timeouts
//! 6. Adds sticky non-OK history to every outcome
//! 7. Sorts the outcomes by severity, then title

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::cache::{self, ResultCache};
use crate::config::{ExecutionOptions, ExecutorConfig};
use crate::error::{ProbeError, Result};
use crate::events::{AsyncResults, CompletionEvent, NoAsyncResults};
use crate::metrics::{ExecutorMetrics, MetricKind};
use crate::pool::WorkerPool;
use crate::types::{CheckDescriptor, CheckId, LogEntry, Outcome, Severity};
use crate::unit::{ExecutionUnit, UnitContext};

/// Runs batches of checks with caching, coalescing and bounded waiting.
///
/// # Examples
///
/// ```no_run
/// use probe_core::config::{ExecutionOptions, ExecutorConfig};
/// use probe_core::executor::Executor;
/// use probe_core::probe::FnProbe;
/// use probe_core::types::{CheckDescriptor, ProbeLog};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let executor = Executor::new(ExecutorConfig::default())?;
/// let check = CheckDescriptor::new(
///     "disk",
///     "Disk space",
///     Arc::new(FnProbe::new(|| async {
///         let mut log = ProbeLog::new();
///         log.info("42% used");
///         Ok(log)
///     })),
/// );
///
/// let outcomes = executor.execute(&[check], &ExecutionOptions::new()).await;
/// println!("{}: {}", outcomes[0].descriptor.title(), outcomes[0].severity);
/// # Ok(())
/// # }
/// ```
pub struct Executor {
    config: RwLock<Arc<ExecutorConfig>>,
    pool: WorkerPool,
    ctx: Arc<UnitContext>,
}

impl Executor {
    /// Creates an executor without an async results collaborator.
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        Self::with_async_results(config, Arc::new(NoAsyncResults))
    }

    /// Creates an executor that consults `async_results` before the cache.
    ///
    /// The collaborator is handed every published outcome before the unit
    /// that produced it completes.
    pub fn with_async_results(
        config: ExecutorConfig,
        async_results: Arc<dyn AsyncResults>,
    ) -> Result<Self> {
        config.validate()?;

        let ctx = Arc::new(UnitContext::new(
            Arc::new(ResultCache::new()),
            async_results,
            config.event_capacity,
        ));

        Ok(Self {
            pool: WorkerPool::new(config.max_workers),
            config: RwLock::new(Arc::new(config)),
            ctx,
        })
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<ExecutorConfig> {
        let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*config)
    }

    /// Replaces the configuration for subsequent `execute` calls.
    ///
    /// `max_workers` and `event_capacity` are fixed when the executor is
    /// created; changing them here has no effect on the running pool.
    pub fn reconfigure(&self, config: ExecutorConfig) -> Result<()> {
        config.validate()?;
        tracing::info!(
            timeout_ms = config.timeout_ms,
            result_cache_ttl_ms = config.result_cache_ttl_ms,
            critical_timeout_ms = config.critical_timeout_ms,
            "Executor reconfigured"
        );
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        Ok(())
    }

    /// Subscribes to completion events.
    pub fn subscribe(&self) -> broadcast::Receiver<CompletionEvent> {
        self.ctx.events.subscribe()
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.ctx.cache
    }

    pub fn metrics(&self) -> &ExecutorMetrics {
        &self.ctx.metrics
    }

    /// Number of executions currently in flight.
    pub fn in_flight(&self) -> usize {
        self.ctx.registry.len()
    }

    /// Drops cached outcomes of a withdrawn check.
    pub fn evict(&self, id: &CheckId) {
        self.ctx.cache.evict(id);
    }

    /// Stops accepting work and drops all cached and in-flight state.
    ///
    /// Probes already running are not interrupted, but their outcomes are no
    /// longer published. Queued executions complete with an `ExecutionError`.
    pub fn shutdown(&self) {
        tracing::info!("Executor shutting down");
        self.ctx.close();
        self.pool.close();
        self.ctx.registry.clear();
        self.ctx.cache.clear();
    }

    /// Runs a batch of checks and returns one outcome per distinct check.
    ///
    /// Never fails: probe errors, panics and timeouts are reported as
    /// outcomes. Returns within roughly the wait budget plus one poll interval.
    pub async fn execute(
        &self,
        descriptors: &[CheckDescriptor],
        options: &ExecutionOptions,
    ) -> Vec<Outcome> {
        let started = Instant::now();
        let config = self.config();
        let budget = options.effective_timeout(config.timeout());

        let mut seen = HashSet::new();
        let mut pending: Vec<CheckDescriptor> = descriptors
            .iter()
            .filter(|d| seen.insert(d.id().clone()))
            .cloned()
            .collect();
        let mut outcomes = Vec::with_capacity(pending.len());

        if !options.force_sync {
            self.take_async_results(&mut pending, &mut outcomes, &config);
            self.take_cached(&mut pending, &mut outcomes, &config);
        }

        if !pending.is_empty() {
            let units = self.start_units(&pending);
            self.wait_for_units(&units, started, budget, config.poll_interval())
                .await;
            outcomes.extend(
                units
                    .iter()
                    .map(|unit| self.collect_outcome(unit, budget, &config)),
            );
        }

        let mut outcomes: Vec<Outcome> = outcomes
            .into_iter()
            .map(|outcome| {
                let sticky_for = outcome.descriptor.sticky_for();
                self.ctx.cache.with_sticky_history(outcome, sticky_for)
            })
            .collect();
        outcomes.sort_by(Outcome::report_cmp);

        let spent = started.elapsed();
        if spent > budget {
            tracing::warn!(
                spent_ms = spent.as_millis() as u64,
                budget_ms = budget.as_millis() as u64,
                checks = outcomes.len(),
                "Check execution took longer than the configured timeout"
            );
        }

        outcomes
    }

    fn take_async_results(
        &self,
        pending: &mut Vec<CheckDescriptor>,
        outcomes: &mut Vec<Outcome>,
        config: &ExecutorConfig,
    ) {
        let mut claimed = self.ctx.async_results.claim(pending);
        if claimed.is_empty() {
            return;
        }

        let now = Utc::now();
        let mut expired = Vec::new();
        pending.retain(|d| match claimed.remove(d.id()) {
            Some(outcome) => {
                self.ctx.metrics.record(MetricKind::AsyncHit);
                let ttl = ResultCache::effective_ttl(d, config.result_cache_ttl());
                if cache::age(outcome.finished_at, now) >= ttl {
                    expired.push(d.clone());
                }
                outcomes.push(outcome);
                false
            }
            None => true,
        });

        if !expired.is_empty() {
            self.refresh(&expired);
        }
    }

    /// Starts executions for expired asynchronous outcomes without waiting
    /// for them. Their completions replace the claimed outcomes.
    fn refresh(&self, descriptors: &[CheckDescriptor]) {
        for (unit, is_new) in self.ctx.registry.get_or_create_all(descriptors) {
            if is_new {
                tracing::debug!(check = %unit.descriptor().id(), "Refreshing asynchronous result");
                self.submit(&unit);
            }
        }
    }

    fn take_cached(
        &self,
        pending: &mut Vec<CheckDescriptor>,
        outcomes: &mut Vec<Outcome>,
        config: &ExecutorConfig,
    ) {
        pending.retain(|d| {
            let ttl = ResultCache::effective_ttl(d, config.result_cache_ttl());
            match self.ctx.cache.get(d, ttl) {
                Some(outcome) => {
                    tracing::debug!(check = %d.id(), "Using cached result");
                    self.ctx.metrics.record_cache_access(true);
                    outcomes.push(outcome);
                    false
                }
                None => {
                    self.ctx.metrics.record_cache_access(false);
                    true
                }
            }
        });
    }

    /// Joins running executions and submits new ones to the pool.
    fn start_units(&self, pending: &[CheckDescriptor]) -> Vec<Arc<ExecutionUnit>> {
        self.ctx
            .registry
            .get_or_create_all(pending)
            .into_iter()
            .map(|(unit, is_new)| {
                if is_new {
                    self.submit(&unit);
                } else {
                    self.ctx.metrics.record(MetricKind::Coalesced);
                }
                unit
            })
            .collect()
    }

    fn submit(&self, unit: &Arc<ExecutionUnit>) {
        let span = tracing::info_span!(
            "probe",
            check = %unit.descriptor().id(),
            run_id = %unit.run_id()
        );
        let task_unit = Arc::clone(unit);
        let ctx = Arc::clone(&self.ctx);
        let task = async move {
            task_unit.run(&ctx).await;
        }
        .instrument(span);

        let rejected_unit = Arc::clone(unit);
        let rejected_ctx = Arc::clone(&self.ctx);
        let on_rejected = move || rejected_unit.abandon(&rejected_ctx, &ProbeError::PoolClosed);

        if let Err(err) = self.pool.submit(task, on_rejected) {
            unit.abandon(&self.ctx, &err);
        }
    }

    /// Waits until every unit is done or the budget measured from `started`
    /// runs out, re-checking at least every `poll_interval`.
    async fn wait_for_units(
        &self,
        units: &[Arc<ExecutionUnit>],
        started: Instant,
        budget: Duration,
        poll_interval: Duration,
    ) {
        let deadline = started + budget;
        loop {
            if units.iter().all(|unit| unit.is_done()) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let step = poll_interval.min(deadline - now);
            self.ctx.registry.wait_for_completion(step).await;
        }
    }

    fn collect_outcome(
        &self,
        unit: &ExecutionUnit,
        budget: Duration,
        config: &ExecutorConfig,
    ) -> Outcome {
        if !unit.is_done() {
            return self.timeout_outcome(unit, budget, config);
        }

        match unit.outcome() {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(check = %unit.descriptor().id(), "Could not retrieve result: {}", err);
                self.ctx.metrics.record(MetricKind::ExecutionError);
                Outcome::execution_error(
                    unit.descriptor().clone(),
                    format!("Unable to get result for '{}'", unit.descriptor().title()),
                    Some(err.to_string()),
                    unit.elapsed(),
                )
            }
        }
    }

    /// Reports a unit that is still running.
    ///
    /// `Warn` until the unit has run for the critical threshold, `Critical`
    /// afterwards. The last known outcome, however old, is replayed so the
    /// report still carries diagnostic detail.
    fn timeout_outcome(
        &self,
        unit: &ExecutionUnit,
        budget: Duration,
        config: &ExecutorConfig,
    ) -> Outcome {
        let elapsed = unit.elapsed();
        let severity = if elapsed < config.critical_timeout() {
            Severity::Warn
        } else {
            Severity::Critical
        };
        let descriptor = unit.descriptor();
        self.ctx.metrics.record(MetricKind::Timeout);
        tracing::warn!(
            check = %descriptor.id(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Check still running after timeout, reporting {}",
            severity
        );

        let mut log = vec![LogEntry::new(
            severity,
            format!(
                "Timeout: check still running after {} ms (waited {} ms, critical after {} ms)",
                elapsed.as_millis(),
                budget.as_millis(),
                config.critical_timeout().as_millis()
            ),
        )];
        if let Some(last) = self.ctx.cache.get_stale(descriptor) {
            log.push(LogEntry::info(format!(
                "*** Result of last execution finished at {} after {} ms ***",
                last.finished_at.to_rfc3339(),
                last.elapsed.as_millis()
            )));
            log.extend(last.log);
        }

        Outcome::timed_out(descriptor.clone(), severity, log, elapsed)
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config())
            .field("pool", &self.pool)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::FnProbe;
    use crate::types::ProbeLog;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(id: &str, delay: Duration, calls: Arc<AtomicUsize>) -> CheckDescriptor {
        CheckDescriptor::new(
            id,
            id,
            Arc::new(FnProbe::new(move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    let mut log = ProbeLog::new();
                    log.info("done");
                    Ok(log)
                }
            })),
        )
    }

    #[tokio::test]
    async fn test_execute_empty_batch() {
        let executor = Executor::new(ExecutorConfig::default()).unwrap();
        let outcomes = executor.execute(&[], &ExecutionOptions::new()).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_descriptors_run_once() {
        let executor = Executor::new(ExecutorConfig::default()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let d = counting("db", Duration::ZERO, calls.clone());

        let outcomes = executor
            .execute(&[d.clone(), d], &ExecutionOptions::new())
            .await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconfigure_swaps_snapshot() {
        let executor = Executor::new(ExecutorConfig::default()).unwrap();
        let before = executor.config();

        let updated = ExecutorConfig::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        executor.reconfigure(updated).unwrap();

        assert_eq!(before.timeout_ms, 2_000);
        assert_eq!(executor.config().timeout_ms, 100);
    }

    #[tokio::test]
    async fn test_reconfigure_rejects_invalid() {
        let executor = Executor::new(ExecutorConfig::default()).unwrap();
        let invalid = ExecutorConfig {
            poll_interval_ms: 0,
            ..ExecutorConfig::default()
        };

        assert!(executor.reconfigure(invalid).is_err());
        assert_eq!(executor.config().poll_interval_ms, 50);
    }

    #[tokio::test]
    async fn test_execute_after_shutdown_reports_error() {
        let executor = Executor::new(ExecutorConfig::default()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        executor.shutdown();

        let outcomes = executor
            .execute(
                &[counting("db", Duration::ZERO, calls.clone())],
                &ExecutionOptions::new(),
            )
            .await;

        assert_eq!(outcomes[0].severity, Severity::ExecutionError);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(executor.in_flight(), 0);
    }
}
