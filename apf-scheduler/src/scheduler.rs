//! The scheduler abstraction shared by the no-wait and queued policies.

use std::future::Future;
use std::sync::Arc;

use apf_fairqueue::{FinishOutcome, QueuedFinisher, Request};

use crate::error::SchedulerResult;
use crate::nowait::ImmediateFinisher;

/// Admits requests and hands back a [`Finisher`] for the ones it accepts.
pub trait Scheduler: Send + Sync {
    /// Schedules `request`.
    ///
    /// # Errors
    ///
    /// Returns an accommodation error (see
    /// [`SchedulerError::is_accommodation`](crate::SchedulerError::is_accommodation))
    /// when the request must be rejected now, or another error on
    /// misconfiguration.
    fn schedule(&self, request: Arc<Request>) -> SchedulerResult<Finisher>;

    /// Short policy name for logs.
    fn name(&self) -> &str;
}

/// Caller-side handle for an admitted request.
#[derive(Debug)]
pub enum Finisher {
    /// Admitted by a no-wait scheduler: runs at once.
    Immediate(ImmediateFinisher),
    /// Admitted into a queue set: waits for a decision first.
    Queued(QueuedFinisher),
}

impl Finisher {
    /// Runs `execute` once the request may execute, then releases its seats.
    /// Returns [`FinishOutcome::TimedOut`] without running `execute` if the
    /// request gave up waiting.
    pub async fn finish<F, Fut, T>(&mut self, execute: F) -> FinishOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self {
            Self::Immediate(finisher) => finisher.finish(execute).await,
            Self::Queued(finisher) => finisher.finish(execute).await,
        }
    }

    /// The request this finisher belongs to.
    #[must_use]
    pub const fn request(&self) -> &Arc<Request> {
        match self {
            Self::Immediate(finisher) => finisher.request(),
            Self::Queued(finisher) => finisher.request(),
        }
    }
}
