//! Post-decision sequencing for a queued request.
//!
//! A [`QueuedFinisher`] waits for the request's decision, then either runs the
//! timeout cleanup or runs the caller's work bracketed by the post-execution
//! cleanup. Each cleanup runs at most once, including when the work panics,
//! when the `finish` future is dropped, or when the finisher is dropped
//! without `finish` ever being called.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;

use crate::clock::Clock;
use crate::promise::Decision;
use crate::request::Request;

/// A cleanup action that runs at most once.
#[derive(Default)]
pub struct Disposer(Option<Box<dyn FnOnce() + Send>>);

impl Disposer {
    /// Wraps `f`.
    #[must_use]
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    /// Creates a disposer that does nothing.
    #[must_use]
    pub const fn noop() -> Self {
        Self(None)
    }

    /// Runs the action if it has not run yet.
    pub fn dispose(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }

    /// Returns whether the action has already run (or never existed).
    #[must_use]
    pub const fn is_disposed(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Disposer")
            .field(&if self.is_disposed() { "disposed" } else { "pending" })
            .finish()
    }
}

/// The two cleanups handed out for every enqueued request. Exactly one of
/// them is meant to run, matching the request's decision.
#[derive(Debug, Default)]
pub struct QueueCleanupCallbacks {
    /// Releases the request's seats after it executed.
    pub post_execution: Disposer,
    /// Removes the request from its queue after it timed out.
    pub post_timeout: Disposer,
}

/// Result of [`QueuedFinisher::finish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishOutcome<T> {
    /// The request was dispatched and the work returned `T`.
    Executed(T),
    /// The request timed out, or its caller cancelled, while waiting. The
    /// work did not run.
    TimedOut,
    /// `finish` had already been called.
    AlreadyFinished,
}

impl<T> FinishOutcome<T> {
    /// Returns whether the work ran.
    #[must_use]
    pub const fn is_executed(&self) -> bool {
        matches!(self, Self::Executed(_))
    }
}

/// Runs the post-execution cleanup when dropped.
struct ReleaseOnDrop<'a>(&'a mut Disposer);

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

/// Caller-side handle for a request waiting in a queue set.
pub struct QueuedFinisher {
    request: Arc<Request>,
    wait_deadline: Instant,
    cleanup: QueueCleanupCallbacks,
    clock: Arc<dyn Clock>,
    finished: bool,
}

impl QueuedFinisher {
    pub(crate) fn new(
        request: Arc<Request>,
        wait_deadline: Instant,
        cleanup: QueueCleanupCallbacks,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            request,
            wait_deadline,
            cleanup,
            clock,
            finished: false,
        }
    }

    /// The request this finisher belongs to.
    #[must_use]
    pub const fn request(&self) -> &Arc<Request> {
        &self.request
    }

    /// Instant at which the request stops waiting for dispatch.
    #[must_use]
    pub const fn wait_deadline(&self) -> Instant {
        self.wait_deadline
    }

    /// Waits for the decision and acts on it.
    ///
    /// On `Execute`, runs `execute` exactly once and then releases the
    /// request's seats, even if the work panics or this future is dropped
    /// while the work is running. On `Timeout`, runs the timeout cleanup and
    /// never calls `execute`. A second call returns
    /// [`FinishOutcome::AlreadyFinished`].
    pub async fn finish<F, Fut, T>(&mut self, execute: F) -> FinishOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if self.finished {
            return FinishOutcome::AlreadyFinished;
        }
        self.finished = true;

        let request = Arc::clone(&self.request);
        let latency = request.latency();
        let decision = request
            .decision()
            .wait_for_decision(self.wait_deadline, &request.context().cancellation)
            .await;

        let outcome = if decision == Decision::Execute {
            let started = self.clock.now();
            latency.post_decision_wait.finish(started);
            let release = ReleaseOnDrop(&mut self.cleanup.post_execution);

            latency.execution.start(started);
            let output = execute().await;
            latency.execution.finish(self.clock.now());

            drop(release);
            FinishOutcome::Executed(output)
        } else {
            self.cleanup.post_timeout.dispose();
            FinishOutcome::TimedOut
        };

        latency.total.finish(self.clock.now());
        outcome
    }
}

impl Drop for QueuedFinisher {
    fn drop(&mut self) {
        // A still-open decision can no longer be waited on.
        self.request.decision().set_decision(Decision::Timeout);
        match self.request.decision().decision() {
            Decision::Execute => self.cleanup.post_execution.dispose(),
            _ => self.cleanup.post_timeout.dispose(),
        }
    }
}

impl fmt::Debug for QueuedFinisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedFinisher")
            .field("request", &self.request.label())
            .field("wait_deadline", &self.wait_deadline)
            .field("cleanup", &self.cleanup)
            .field("finished", &self.finished)
            .finish()
    }
}
