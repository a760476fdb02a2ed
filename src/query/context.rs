//! Cancellable execution context shared by every query in a batch
//!
//! A [`CancelHandle`] owns the signal; any number of cloned
//! [`ExecutionContext`]s observe it. A context may also carry a deadline,
//! which is observed like cancellation but reported as a timeout.

use crate::query::error::QueryError;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a context stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The caller cancelled
    Cancelled,
    /// The deadline elapsed
    DeadlineExceeded,
}

/// Sender side of the cancellation signal
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel every context created from this handle
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Check whether cancel has been called
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Create another context observing this handle
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext {
            rx: self.tx.subscribe(),
            deadline: None,
        }
    }
}

/// Cancellable execution context
///
/// Cheap to clone; each query task gets its own clone.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl ExecutionContext {
    /// Create a context and the handle that cancels it
    pub fn new() -> (CancelHandle, ExecutionContext) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, ExecutionContext { rx, deadline: None })
    }

    /// Context that is never cancelled
    pub fn background() -> ExecutionContext {
        let (tx, rx) = watch::channel(false);
        // A dropped sender never cancels.
        drop(tx);
        ExecutionContext { rx, deadline: None }
    }

    /// Derive a context that also stops after `timeout`
    ///
    /// An existing earlier deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> ExecutionContext {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing <= candidate => existing,
            _ => candidate,
        };
        ExecutionContext {
            rx: self.rx.clone(),
            deadline: Some(deadline),
        }
    }

    /// Deadline, if one is set
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check of the stop condition
    pub fn stop_reason(&self) -> Option<StopReason> {
        if *self.rx.borrow() {
            return Some(StopReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(StopReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// True once the context is cancelled or past its deadline
    pub fn is_done(&self) -> bool {
        self.stop_reason().is_some()
    }

    /// Fail fast if the context has already stopped
    pub fn check(&self, step: &str) -> Result<(), QueryError> {
        match self.stop_reason() {
            Some(reason) => Err(stop_error(reason, step)),
            None => Ok(()),
        }
    }

    /// Resolve when the context stops
    ///
    /// Pends forever for a context that can no longer be cancelled and has
    /// no deadline.
    pub async fn done(&self) -> StopReason {
        let mut rx = self.rx.clone();
        let cancelled = async move {
            if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                // Sender gone without cancelling.
                std::future::pending::<()>().await;
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = cancelled => StopReason::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => StopReason::DeadlineExceeded,
                }
            },
            None => {
                cancelled.await;
                StopReason::Cancelled
            },
        }
    }

    /// Run `fut` until it completes or the context stops
    ///
    /// `step` names the blocking step for the error message.
    pub async fn run<F, T>(&self, step: &str, fut: F) -> Result<T, QueryError>
    where
        F: Future<Output = T>,
    {
        self.check(step)?;
        tokio::select! {
            biased;
            reason = self.done() => Err(stop_error(reason, step)),
            out = fut => Ok(out),
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::background()
    }
}

fn stop_error(reason: StopReason, step: &str) -> QueryError {
    match reason {
        StopReason::Cancelled => QueryError::cancelled(format!("context cancelled during {}", step)),
        StopReason::DeadlineExceeded => {
            QueryError::timeout(format!("deadline exceeded during {}", step))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::QueryErrorKind;

    #[tokio::test]
    async fn test_cancel_reaches_all_clones() {
        let (handle, ctx) = ExecutionContext::new();
        let other = ctx.clone();
        let late = handle.context();
        assert!(!ctx.is_done());

        handle.cancel();

        assert!(handle.is_cancelled());
        for c in [&ctx, &other, &late] {
            assert_eq!(c.stop_reason(), Some(StopReason::Cancelled));
            assert_eq!(c.done().await, StopReason::Cancelled);
        }
    }

    #[tokio::test]
    async fn test_run_interrupted_by_cancel() {
        let (handle, ctx) = ExecutionContext::new();
        let task = tokio::spawn(async move {
            ctx.run("job wait", tokio::time::sleep(Duration::from_secs(60)))
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Cancelled);
        assert!(err.message.contains("job wait"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_reports_timeout() {
        let ctx = ExecutionContext::background().with_timeout(Duration::from_millis(50));
        let err = ctx
            .run("row iteration", tokio::time::sleep(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_run_completes_when_not_cancelled() {
        let (_handle, ctx) = ExecutionContext::new();
        let out = ctx.run("submission", async { 7 }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn test_background_never_stops() {
        let ctx = ExecutionContext::background();
        assert!(ctx.check("anything").is_ok());
        let out = ctx.run("anything", async { "ok" }).await.unwrap();
        assert_eq!(out, "ok");
    }

    #[tokio::test]
    async fn test_with_timeout_keeps_earlier_deadline() {
        let short = ExecutionContext::background().with_timeout(Duration::from_secs(1));
        let longer = short.with_timeout(Duration::from_secs(30));
        assert_eq!(short.deadline(), longer.deadline());
    }
}
