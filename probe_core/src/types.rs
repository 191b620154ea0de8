//! Core types for ProbeKit.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::probe::Probe;

/// Stable identifier of a check.
///
/// Assigned by whoever registers the check and used as the key of every
/// per-check map in the engine.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckId(pub String);

impl CheckId {
    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CheckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CheckId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CheckId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Health classification, ordered from best to worst.
///
/// The ordering is load-bearing: an outcome's overall severity is the
/// maximum of its log entries, and reports are sorted by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Ok,
    Warn,
    TemporarilyUnavailable,
    Critical,
    ExecutionError,
}

impl Severity {
    /// All severities in ascending order.
    pub const ALL: [Severity; 5] = [
        Severity::Ok,
        Severity::Warn,
        Severity::TemporarilyUnavailable,
        Severity::Critical,
        Severity::ExecutionError,
    ];

    /// Returns true for [`Severity::Ok`].
    pub fn is_ok(self) -> bool {
        self == Severity::Ok
    }

    /// Iterates the non-passing severities in ascending order.
    pub fn non_ok() -> impl Iterator<Item = Severity> {
        Self::ALL.into_iter().filter(|s| !s.is_ok())
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Severity::Ok => "OK",
            Severity::Warn => "WARN",
            Severity::TemporarilyUnavailable => "TEMPORARILY_UNAVAILABLE",
            Severity::Critical => "CRITICAL",
            Severity::ExecutionError => "HEALTH_CHECK_ERROR",
        };
        f.write_str(name)
    }
}

/// One line of diagnostic output produced by a probe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub severity: Severity,
    pub message: String,
    /// Debug lines are detail for humans, not part of the verdict.
    pub debug: bool,
    pub cause: Option<String>,
}

impl LogEntry {
    /// Creates an entry with the given severity.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            debug: false,
            cause: None,
        }
    }

    /// Creates an informational (`Ok`) entry.
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Ok, message)
    }

    /// Creates a debug entry.
    pub fn debug(message: impl Into<String>) -> Self {
        Self {
            debug: true,
            ..Self::new(Severity::Ok, message)
        }
    }

    /// Attaches a cause to this entry.
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

/// Ordered log returned by a probe invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeLog {
    entries: Vec<LogEntry>,
}

impl ProbeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LogEntry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    pub fn info(&mut self, message: impl Into<String>) -> &mut Self {
        self.push(LogEntry::info(message))
    }

    pub fn debug(&mut self, message: impl Into<String>) -> &mut Self {
        self.push(LogEntry::debug(message))
    }

    pub fn warn(&mut self, message: impl Into<String>) -> &mut Self {
        self.push(LogEntry::new(Severity::Warn, message))
    }

    pub fn temporarily_unavailable(&mut self, message: impl Into<String>) -> &mut Self {
        self.push(LogEntry::new(Severity::TemporarilyUnavailable, message))
    }

    pub fn critical(&mut self, message: impl Into<String>) -> &mut Self {
        self.push(LogEntry::new(Severity::Critical, message))
    }

    /// Overall severity: the worst entry, or `Ok` for an empty log.
    pub fn severity(&self) -> Severity {
        self.entries
            .iter()
            .map(|e| e.severity)
            .max()
            .unwrap_or(Severity::Ok)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }
}

impl From<Vec<LogEntry>> for ProbeLog {
    fn from(entries: Vec<LogEntry>) -> Self {
        Self { entries }
    }
}

/// Identity and settings of a registered check.
///
/// Equality and hashing only consider the id, so a descriptor can be used
/// directly as a map key. The probe is resolved once, when the descriptor is
/// built, and shared by every execution.
#[derive(Clone)]
pub struct CheckDescriptor {
    id: CheckId,
    title: String,
    tags: Vec<String>,
    cache_ttl: Option<Duration>,
    sticky_for: Option<Duration>,
    asynchronous: bool,
    probe: Arc<dyn Probe>,
}

impl CheckDescriptor {
    /// Creates a descriptor for the given probe.
    pub fn new(id: impl Into<CheckId>, title: impl Into<String>, probe: Arc<dyn Probe>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            tags: Vec::new(),
            cache_ttl: None,
            sticky_for: None,
            asynchronous: false,
            probe,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the globally configured result cache TTL for this check.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Keeps non-passing results visible in reports for this long.
    pub fn with_sticky_for(mut self, duration: Duration) -> Self {
        self.sticky_for = Some(duration);
        self
    }

    /// Marks the check as answered by the async results collaborator.
    pub fn asynchronous(mut self) -> Self {
        self.asynchronous = true;
        self
    }

    pub fn id(&self) -> &CheckId {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }

    /// Sticky duration, zero when not configured.
    pub fn sticky_for(&self) -> Duration {
        self.sticky_for.unwrap_or(Duration::ZERO)
    }

    pub fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    pub fn probe(&self) -> Arc<dyn Probe> {
        Arc::clone(&self.probe)
    }
}

impl PartialEq for CheckDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CheckDescriptor {}

impl std::hash::Hash for CheckDescriptor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Debug for CheckDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckDescriptor")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("tags", &self.tags)
            .field("cache_ttl", &self.cache_ttl)
            .field("sticky_for", &self.sticky_for)
            .field("asynchronous", &self.asynchronous)
            .finish_non_exhaustive()
    }
}

/// Result of one execution of one check.
///
/// Produced once per execution and never modified afterwards; derived
/// outcomes (sticky history) are new values that keep the same `id`.
#[derive(Clone, Debug)]
pub struct Outcome {
    /// Identity of the execution that produced this outcome.
    pub id: Uuid,
    pub descriptor: CheckDescriptor,
    pub severity: Severity,
    pub log: Vec<LogEntry>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub timed_out: bool,
}

impl Outcome {
    /// Builds the outcome of a completed probe invocation.
    pub fn from_log(descriptor: CheckDescriptor, log: ProbeLog, elapsed: Duration) -> Self {
        let severity = log.severity();
        Self {
            id: Uuid::new_v4(),
            descriptor,
            severity,
            log: log.into_entries(),
            finished_at: Utc::now(),
            elapsed,
            timed_out: false,
        }
    }

    /// Builds an `ExecutionError` outcome for a probe that could not produce a result.
    pub fn execution_error(
        descriptor: CheckDescriptor,
        message: impl Into<String>,
        cause: Option<String>,
        elapsed: Duration,
    ) -> Self {
        let mut entry = LogEntry::new(Severity::ExecutionError, message);
        entry.cause = cause;
        Self::from_log(descriptor, ProbeLog::from(vec![entry]), elapsed)
    }

    /// Builds the outcome reported for a check that is still running.
    pub fn timed_out(
        descriptor: CheckDescriptor,
        severity: Severity,
        log: Vec<LogEntry>,
        elapsed: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            descriptor,
            severity,
            log,
            finished_at: Utc::now(),
            elapsed,
            timed_out: true,
        }
    }

    pub fn check_id(&self) -> &CheckId {
        self.descriptor.id()
    }

    /// Report order: severity, then title, then id.
    pub fn report_cmp(&self, other: &Self) -> Ordering {
        self.severity
            .cmp(&other.severity)
            .then_with(|| self.descriptor.title().cmp(other.descriptor.title()))
            .then_with(|| self.descriptor.id().cmp(other.descriptor.id()))
    }
}
