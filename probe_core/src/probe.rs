//! The probe capability and its adapters.
//!
//! Every check body is a [`Probe`]. Closures are wrapped once, when the check
//! is registered: [`FnProbe`] for async code and [`BlockingProbe`] for
//! synchronous code that may block a thread.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::types::ProbeLog;

/// A unit of diagnostic logic.
///
/// Implementations may fail, panic, block or run for a long time; the engine
/// contains all of it. An `Err` is reported as an `ExecutionError` outcome.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Runs the probe once and returns its log.
    async fn invoke(&self) -> anyhow::Result<ProbeLog>;
}

/// Probe backed by an async closure.
///
/// # Examples
///
/// ```
/// use probe_core::probe::FnProbe;
/// use probe_core::types::ProbeLog;
///
/// let probe = FnProbe::new(|| async {
///     let mut log = ProbeLog::new();
///     log.info("reachable");
///     Ok(log)
/// });
/// # let _ = probe;
/// ```
pub struct FnProbe<F> {
    f: F,
}

impl<F, Fut> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ProbeLog>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Probe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ProbeLog>> + Send + 'static,
{
    async fn invoke(&self) -> anyhow::Result<ProbeLog> {
        (self.f)().await
    }
}

/// Probe backed by a synchronous closure.
///
/// The closure runs on tokio's blocking thread pool so it cannot stall the
/// async workers. A panic inside it is turned into an error.
pub struct BlockingProbe<F> {
    f: Arc<F>,
}

impl<F> BlockingProbe<F>
where
    F: Fn() -> anyhow::Result<ProbeLog> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

#[async_trait]
impl<F> Probe for BlockingProbe<F>
where
    F: Fn() -> anyhow::Result<ProbeLog> + Send + Sync + 'static,
{
    async fn invoke(&self) -> anyhow::Result<ProbeLog> {
        let f = Arc::clone(&self.f);
        match tokio::task::spawn_blocking(move || f()).await {
            Ok(result) => result,
            Err(err) if err.is_panic() => Err(anyhow::anyhow!(
                "blocking probe panicked: {}",
                panic_message(err.into_panic().as_ref())
            )),
            Err(err) => Err(anyhow::anyhow!("blocking probe was cancelled: {}", err)),
        }
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    #[tokio::test]
    async fn test_fn_probe_invokes_closure() {
        let probe = FnProbe::new(|| async {
            let mut log = ProbeLog::new();
            log.warn("slow");
            Ok(log)
        });

        let log = probe.invoke().await.unwrap();
        assert_eq!(log.severity(), Severity::Warn);
    }

    #[tokio::test]
    async fn test_blocking_probe_runs_off_thread() {
        let probe = BlockingProbe::new(|| {
            std::thread::sleep(std::time::Duration::from_millis(10));
            let mut log = ProbeLog::new();
            log.info("done");
            Ok(log)
        });

        let log = probe.invoke().await.unwrap();
        assert_eq!(log.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_blocking_probe_panic_becomes_error() {
        let probe = BlockingProbe::new(|| -> anyhow::Result<ProbeLog> { panic!("index corrupt") });

        let err = probe.invoke().await.unwrap_err();
        assert!(err.to_string().contains("index corrupt"));
    }

    #[test]
    fn test_panic_message_variants() {
        let owned: Box<dyn Any + Send> = Box::new("static".to_string());
        assert_eq!(panic_message(owned.as_ref()), "static");

        let borrowed: Box<dyn Any + Send> = Box::new("literal");
        assert_eq!(panic_message(borrowed.as_ref()), "literal");

        let other: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }
}
