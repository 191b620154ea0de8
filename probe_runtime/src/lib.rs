//! ProbeKit runtime layer - Registry, async results and completion dispatch.
//!
//! This crate wires the probe execution engine into a ready-to-use service:
//!
//! - An in-memory registry of checks with id and tag selection
//! - An async results store for checks marked asynchronous
//! - A tracker for checks that stay temporarily unavailable
//! - A background task feeding completion events to the tracker
//!
//! # Examples
//!
//! ```rust,no_run
//! use probe_core::{CheckDescriptor, ExecutionOptions, FnProbe, ProbeLog};
//! use probe_runtime::{CheckQuery, HealthRuntime, RuntimeConfig};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let runtime = HealthRuntime::new(RuntimeConfig::default()).await?;
//! runtime.register(
//!     CheckDescriptor::new(
//!         "db",
//!         "Database",
//!         Arc::new(FnProbe::new(|| async {
//!             let mut log = ProbeLog::new();
//!             log.info("connected");
//!             Ok(log)
//!         })),
//!     )
//!     .with_tags(["storage"]),
//! )?;
//!
//! let outcomes = runtime
//!     .execute_query(&CheckQuery::tags(["storage"]), &ExecutionOptions::new())
//!     .await?;
//! # let _ = outcomes;
//! # Ok(())
//! # }
//! ```

pub mod async_results;
pub mod grace;
pub mod registry;

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use probe_core::events::dispatch_completions;
use probe_core::{
    CheckDescriptor, CheckId, CompletionListener, ExecutionOptions, Executor, ExecutorConfig,
    MetricsSummary, Outcome, Result,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

pub use async_results::AsyncResultStore;
pub use grace::SustainedUnavailableTracker;
pub use registry::{CheckQuery, ProbeRegistry};

/// Runtime configuration.
///
/// # Examples
///
/// ```
/// use probe_runtime::RuntimeConfig;
///
/// let config = RuntimeConfig::from_json_str(
///     r#"{ "executor": { "timeout_ms": 500 }, "grace_period_ms": 60000 }"#,
/// ).unwrap();
/// assert_eq!(config.executor.timeout_ms, 500);
/// assert_eq!(config.executor.result_cache_ttl_ms, 2_000);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Execution engine settings
    pub executor: ExecutorConfig,
    /// How long a check may stay temporarily unavailable before it is
    /// reported by [`HealthRuntime::beyond_grace`]
    pub grace_period_ms: u64,
    /// Outcomes older than this are not served to asynchronous checks; the
    /// check runs synchronously instead. Unset means any age. Outcomes past
    /// their cache TTL are served but refreshed in the background either way.
    pub async_max_age_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            grace_period_ms: 600_000,
            async_max_age_ms: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.executor.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Runtime statistics.
#[derive(Clone, Debug)]
pub struct RuntimeStats {
    /// Number of registered checks
    pub registered: usize,
    /// Executions currently running
    pub in_flight: usize,
    /// Checks with a cached outcome
    pub cached: usize,
    /// Outcomes held for asynchronous checks
    pub async_results: usize,
    /// Checks unavailable for longer than the grace period
    pub beyond_grace: usize,
    /// Executor counters
    pub metrics: MetricsSummary,
    pub started_at: DateTime<Utc>,
}

/// Health check service: registered checks plus the engine that runs them.
///
/// Must be created inside a tokio runtime; it spawns the task that forwards
/// completion events to the grace tracker. The async results store is fed
/// by the executor directly.
pub struct HealthRuntime {
    registry: ProbeRegistry,
    executor: Arc<Executor>,
    async_results: Arc<AsyncResultStore>,
    grace: Arc<SustainedUnavailableTracker>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    started_at: DateTime<Utc>,
}

impl HealthRuntime {
    /// Creates a runtime and starts completion dispatch.
    pub async fn new(config: RuntimeConfig) -> Result<Self> {
        let async_results = Arc::new(match config.async_max_age_ms {
            Some(ms) => AsyncResultStore::with_max_age(Duration::from_millis(ms)),
            None => AsyncResultStore::new(),
        });
        let grace = Arc::new(SustainedUnavailableTracker::new(config.grace_period()));
        let executor = Arc::new(Executor::with_async_results(
            config.executor,
            async_results.clone(),
        )?);

        let listeners: Vec<Arc<dyn CompletionListener>> = vec![grace.clone()];
        let dispatcher = tokio::spawn(dispatch_completions(
            executor.subscribe(),
            listeners,
            Arc::clone(executor.cache()),
        ));

        tracing::info!(
            grace_period_ms = config.grace_period_ms,
            "Health runtime started"
        );

        Ok(Self {
            registry: ProbeRegistry::new(),
            executor,
            async_results,
            grace,
            dispatcher: Mutex::new(Some(dispatcher)),
            started_at: Utc::now(),
        })
    }

    /// Creates a runtime from a JSON configuration file.
    pub async fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(RuntimeConfig::load(path)?).await
    }

    pub fn registry(&self) -> &ProbeRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn async_results(&self) -> &AsyncResultStore {
        &self.async_results
    }

    pub fn grace(&self) -> &SustainedUnavailableTracker {
        &self.grace
    }

    pub fn register(&self, descriptor: CheckDescriptor) -> Result<()> {
        self.registry.register(descriptor)
    }

    /// Unregisters a check and drops everything remembered about it.
    pub fn withdraw(&self, id: &CheckId) -> Result<CheckDescriptor> {
        let descriptor = self.registry.withdraw(id)?;
        self.executor.evict(id);
        self.async_results.forget(id);
        self.grace.forget(id);
        tracing::info!(check = %id, "Check withdrawn");
        Ok(descriptor)
    }

    /// Runs the registered checks a query selects.
    ///
    /// Fails only if the query names an unregistered check.
    pub async fn execute_query(
        &self,
        query: &CheckQuery,
        options: &ExecutionOptions,
    ) -> Result<Vec<Outcome>> {
        let config = self.executor.config();
        let descriptors = self.registry.select(query, &config.default_tags)?;
        tracing::debug!(checks = descriptors.len(), "Executing query");
        Ok(self.executor.execute(&descriptors, options).await)
    }

    /// Runs the given descriptors, registered or not.
    pub async fn execute(
        &self,
        descriptors: &[CheckDescriptor],
        options: &ExecutionOptions,
    ) -> Vec<Outcome> {
        self.executor.execute(descriptors, options).await
    }

    /// Applies new executor settings to subsequent executions.
    pub fn reconfigure(&self, config: ExecutorConfig) -> Result<()> {
        self.executor.reconfigure(config)
    }

    /// Checks unavailable for longer than the grace period.
    pub fn beyond_grace(&self) -> Vec<CheckId> {
        self.grace.beyond_grace()
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            registered: self.registry.len(),
            in_flight: self.executor.in_flight(),
            cached: self.executor.cache().len(),
            async_results: self.async_results.len(),
            beyond_grace: self.grace.beyond_grace().len(),
            metrics: self.executor.metrics().summary(),
            started_at: self.started_at,
        }
    }

    /// Stops the executor and completion dispatch. Calling it again is a no-op.
    ///
    /// Probes already running are left to finish, but their outcomes are
    /// no longer published. Queued executions complete with an error.
    pub async fn shutdown(&self) {
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(dispatcher) = dispatcher else {
            return;
        };

        self.executor.shutdown();
        dispatcher.abort();
        // Cancellation is the expected outcome here.
        let _ = dispatcher.await;
        tracing::info!("Health runtime stopped");
    }
}

impl std::fmt::Debug for HealthRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthRuntime")
            .field("registered", &self.registry.len())
            .field("executor", &self.executor)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl Drop for HealthRuntime {
    fn drop(&mut self) {
        if let Some(dispatcher) = self
            .dispatcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            dispatcher.abort();
        }
    }
}
