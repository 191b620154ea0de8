//! Executor configuration and per-call options.
//!
//! [`ExecutorConfig`] is an immutable snapshot. The executor keeps it behind
//! an `Arc` and swaps the whole snapshot on reconfiguration, so a running
//! `execute` call always sees one consistent set of values.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProbeError, Result};

/// Engine-wide settings.
///
/// Durations are stored in milliseconds so the type maps directly onto
/// configuration files.
///
/// # Examples
///
/// ```
/// use probe_core::config::ExecutorConfig;
/// use std::time::Duration;
///
/// let config = ExecutorConfig::builder()
///     .timeout(Duration::from_secs(5))
///     .result_cache_ttl(Duration::from_secs(10))
///     .build()
///     .unwrap();
/// assert_eq!(config.timeout(), Duration::from_secs(5));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// How long a caller waits for running checks.
    pub timeout_ms: u64,
    /// How long a finished outcome is served from cache.
    pub result_cache_ttl_ms: u64,
    /// Run time after which a still-running check is reported `Critical`
    /// instead of `Warn`.
    pub critical_timeout_ms: u64,
    /// Granularity at which waiting callers re-check their units.
    pub poll_interval_ms: u64,
    /// Maximum number of probes running at once.
    pub max_workers: usize,
    /// Tags selected when a query names none.
    pub default_tags: Vec<String>,
    /// Buffer size of the completion event channel. A subscriber that
    /// falls further behind than this misses events.
    pub event_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            result_cache_ttl_ms: 2_000,
            critical_timeout_ms: 300_000,
            poll_interval_ms: 50,
            max_workers: 25,
            default_tags: Vec::new(),
            event_capacity: 256,
        }
    }
}

impl ExecutorConfig {
    /// Creates a builder starting from the defaults.
    pub fn builder() -> ExecutorConfigBuilder {
        ExecutorConfigBuilder::default()
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// Rejects values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(ProbeError::InvalidConfig(
                "max_workers must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ProbeError::InvalidConfig(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ProbeError::InvalidConfig(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn result_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.result_cache_ttl_ms)
    }

    pub fn critical_timeout(&self) -> Duration {
        Duration::from_millis(self.critical_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Builder for [`ExecutorConfig`].
#[derive(Clone, Debug, Default)]
pub struct ExecutorConfigBuilder {
    config: ExecutorConfig,
}

impl ExecutorConfigBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = duration_ms(timeout);
        self
    }

    pub fn result_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.result_cache_ttl_ms = duration_ms(ttl);
        self
    }

    pub fn critical_timeout(mut self, threshold: Duration) -> Self {
        self.config.critical_timeout_ms = duration_ms(threshold);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = duration_ms(interval);
        self
    }

    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.config.max_workers = max_workers;
        self
    }

    pub fn default_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.default_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<ExecutorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Options for a single `execute` call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Overrides the configured wait budget when set and non-zero.
    pub timeout: Option<Duration>,
    /// Skip async results and the cache; always wait on a live execution.
    pub force_sync: bool,
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn force_sync(mut self) -> Self {
        self.force_sync = true;
        self
    }

    /// The wait budget for this call given the configured default.
    pub fn effective_timeout(&self, configured: Duration) -> Duration {
        match self.timeout {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => configured,
        }
    }
}
