//! ProbeKit - Probe execution engine
//!
//! This crate runs diagnostic probes ("checks") on demand and combines their
//! outcomes into one report.
//!
//! # Overview
//!
//! For each batch of requested checks the [`Executor`] decides which checks
//! must run now, which can be answered from cache, and how concurrent
//! requests for the same check share one execution. Slow checks are reported
//! as timeouts without being cancelled; their results still reach the cache.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use probe_core::{CheckDescriptor, ExecutionOptions, Executor, ExecutorConfig, FnProbe, ProbeLog};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let executor = Executor::new(ExecutorConfig::default())?;
//!     let check = CheckDescriptor::new(
//!         "db",
//!         "Database connection",
//!         Arc::new(FnProbe::new(|| async {
//!             let mut log = ProbeLog::new();
//!             log.info("connected");
//!             Ok(log)
//!         })),
//!     );
//!
//!     for outcome in executor.execute(&[check], &ExecutionOptions::new()).await {
//!         println!("{}: {}", outcome.descriptor.title(), outcome.severity);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`types`]: Check descriptors, severities, log entries and outcomes
//! - [`error`]: Error types
//! - [`probe`]: The probe capability and closure adapters
//! - [`config`]: Executor configuration and per-call options
//! - [`cache`]: Result cache with sticky non-OK history
//! - [`unit`]: A single probe execution
//! - [`inflight`]: Coalescing of concurrent executions
//! - [`pool`]: Bounded worker pool
//! - [`events`]: Completion events and collaborator traits
//! - [`metrics`]: Executor counters
//! - [`executor`]: Batch orchestration

pub mod error;
pub mod types;

pub mod probe;
pub mod config;
pub mod cache;
pub mod unit;
pub mod inflight;
pub mod pool;
pub mod events;
pub mod metrics;
pub mod executor;

// Re-export commonly used types
pub use cache::ResultCache;
pub use config::{ExecutionOptions, ExecutorConfig, ExecutorConfigBuilder};
pub use error::{ProbeError, Result};
pub use events::{AsyncResults, CompletionEvent, CompletionListener, NoAsyncResults};
pub use executor::Executor;
pub use metrics::{ExecutorMetrics, MetricKind, MetricsSummary};
pub use probe::{BlockingProbe, FnProbe, Probe};
pub use types::{CheckDescriptor, CheckId, LogEntry, Outcome, ProbeLog, Severity};
