//! The admission gate.
//!
//! A `Gate` is the front door callers use:
//!
//! ```text
//!   exempt? ──yes──▶ run handler ──▶ Outcome::Exempt
//!     │no
//!     ▼
//!   estimate ─▶ flow ─▶ schedule ──rejected──▶ Outcome::Rejected(Accommodation)
//!                          │
//!                          ▼
//!                        finish ──timed out──▶ Outcome::Rejected(QueueWaitExpired)
//!                          │
//!                          ▼
//!                   Outcome::Served
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use apf_fairqueue::{Clock, FinishOutcome, Request, RequestContext, SchedulingEvents};

use crate::error::SchedulerResult;
use crate::estimator::CostEstimator;
use crate::exempt::Exemption;
use crate::flow::{compute_flow, FlowDistinguisher};
use crate::scheduler::Scheduler;

/// Produces a human-readable label for a request.
pub type Labeler<Req> = Arc<dyn Fn(&Req) -> String + Send + Sync>;

/// Why a request was not served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No free seat and no room to wait.
    Accommodation,
    /// The request waited in its queue until its budget ran out, or its
    /// caller cancelled.
    QueueWaitExpired,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accommodation => f.write_str("cannot accommodate"),
            Self::QueueWaitExpired => f.write_str("queue wait expired"),
        }
    }
}

/// Result of [`Gate::serve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The handler ran under scheduling and returned `T`.
    Served(T),
    /// The request was exempt; the handler ran unscheduled and returned `T`.
    Exempt(T),
    /// The handler did not run.
    Rejected(RejectReason),
}

impl<T> Outcome<T> {
    /// Returns whether the handler ran.
    #[must_use]
    pub const fn is_served(&self) -> bool {
        matches!(self, Self::Served(_) | Self::Exempt(_))
    }

    /// Returns the rejection reason, if rejected.
    #[must_use]
    pub const fn rejection(&self) -> Option<RejectReason> {
        match self {
            Self::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Admission gate in front of a handler.
///
/// Built with [`GateBuilder`](crate::GateBuilder).
pub struct Gate<Req: ?Sized> {
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) estimator: Arc<dyn CostEstimator<Req>>,
    pub(crate) exemption: Arc<dyn Exemption<Req>>,
    pub(crate) distinguisher: Option<FlowDistinguisher<Req>>,
    pub(crate) labeler: Option<Labeler<Req>>,
    pub(crate) events: Arc<dyn SchedulingEvents>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) sequence: AtomicU64,
}

impl<Req: ?Sized> Gate<Req> {
    /// Returns the scheduler behind the gate.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Admits `request` and, if allowed, runs `handler`.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Estimate` if cost estimation fails, or a
    /// fair-queuing error other than accommodation (a misconfigured queue
    /// selector). Rejections are not errors; they come back as
    /// [`Outcome::Rejected`].
    pub async fn serve<F, Fut, T>(
        &self,
        request: &Req,
        context: RequestContext,
        handler: F,
    ) -> SchedulerResult<Outcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if self.exemption.is_exempt(request) {
            return Ok(Outcome::Exempt(handler().await));
        }

        let arrived_at = self.clock.now();
        let cost = self.estimator.estimate(request)?;
        let flow_id = self
            .distinguisher
            .as_ref()
            .map_or_else(Default::default, |distinguish| {
                compute_flow(distinguish(request).as_slice())
            });
        let label = match &self.labeler {
            Some(labeler) => labeler(request),
            None => format!("request-{}", self.sequence.fetch_add(1, Ordering::Relaxed)),
        };

        let tracked = Arc::new(Request::new(label, flow_id, cost, context, arrived_at));
        self.events.arrived(&tracked);

        let mut finisher = match self.scheduler.schedule(Arc::clone(&tracked)) {
            Ok(finisher) => finisher,
            Err(err) if err.is_accommodation() => {
                tracked.latency().total.finish(self.clock.now());
                return Ok(Outcome::Rejected(RejectReason::Accommodation));
            }
            Err(err) => return Err(err),
        };

        let events = &self.events;
        let running = &tracked;
        let outcome = finisher
            .finish(|| async move {
                events.execution_starting(running);
                let output = handler().await;
                events.execution_ended(running);
                output
            })
            .await;

        Ok(match outcome {
            FinishOutcome::Executed(output) => Outcome::Served(output),
            // A fresh finisher never reports AlreadyFinished.
            FinishOutcome::TimedOut | FinishOutcome::AlreadyFinished => {
                Outcome::Rejected(RejectReason::QueueWaitExpired)
            }
        })
    }
}

impl<Req: ?Sized> fmt::Debug for Gate<Req> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("scheduler", &self.scheduler.name())
            .field("flows", &self.distinguisher.is_some())
            .finish_non_exhaustive()
    }
}
