//! Queued scheduling on top of a [`QueueSet`].

use std::sync::Arc;

use apf_fairqueue::{QueueSet, QueueSetStats, Request};
use tracing::debug;

use crate::error::SchedulerResult;
use crate::scheduler::{Finisher, Scheduler};

/// Enqueues each request, then dispatches eagerly.
#[derive(Debug, Clone)]
pub struct QueuedScheduler {
    queue_set: QueueSet,
}

impl QueuedScheduler {
    /// Wraps `queue_set`.
    #[must_use]
    pub const fn new(queue_set: QueueSet) -> Self {
        Self { queue_set }
    }

    /// Returns the underlying queue set.
    #[must_use]
    pub const fn queue_set(&self) -> &QueueSet {
        &self.queue_set
    }

    /// Returns the queue set's counters.
    #[must_use]
    pub fn stats(&self) -> QueueSetStats {
        self.queue_set.stats()
    }
}

impl Scheduler for QueuedScheduler {
    fn schedule(&self, request: Arc<Request>) -> SchedulerResult<Finisher> {
        let finisher = self.queue_set.enqueue(request)?;

        // A head that does not fit yet stays queued; a later completion
        // dispatches it.
        if let Err(err) = self.queue_set.dispatch() {
            debug!(queue_set = %self.queue_set.name(), error = %err, "Dispatch after enqueue deferred");
        }

        Ok(Finisher::Queued(finisher))
    }

    fn name(&self) -> &str {
        self.queue_set.name()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use apf_fairqueue::{
        CostEstimate, Decision, FinishOutcome, FlowId, NoEvents, QueueSetConfig, RequestContext,
        SelectorConfig,
    };
    use tokio::time::Instant;

    use super::*;

    fn scheduler(config: QueueSetConfig) -> QueuedScheduler {
        let selector = SelectorConfig::RoundRobin.build(config.queue_count).unwrap();
        QueuedScheduler::new(QueueSet::new(config, selector, Arc::new(NoEvents)).unwrap())
    }

    fn request(label: &str, seats: u32) -> Arc<Request> {
        Arc::new(Request::new(
            label,
            FlowId::new(3),
            CostEstimate::new(seats, Duration::from_secs(1)),
            RequestContext::new(),
            Instant::now(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_dispatches_eagerly() {
        let scheduler = scheduler(QueueSetConfig::for_testing());
        let finisher = scheduler.schedule(request("a", 1)).unwrap();

        assert_eq!(finisher.request().decision().decision(), Decision::Execute);
        assert_eq!(scheduler.stats().seats.in_use, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_head_that_does_not_fit_stays_queued() {
        let scheduler = scheduler(QueueSetConfig::for_testing().with_total_seats(2));
        let mut small = scheduler.schedule(request("small", 1)).unwrap();
        let mut wide = scheduler.schedule(request("wide", 2)).unwrap();

        assert_eq!(wide.request().decision().decision(), Decision::None);
        assert_eq!(scheduler.stats().requests.waiting, 1);

        // Releasing the small request's seat lets the wide one through.
        assert!(small.finish(|| async {}).await.is_executed());
        assert_eq!(wide.finish(|| async { 2 }).await, FinishOutcome::Executed(2));
        assert_eq!(scheduler.stats().seats.in_use, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_when_seats_and_queue_exhausted() {
        let scheduler = scheduler(QueueSetConfig::for_testing().with_queue_max_length(0));
        let _running = scheduler.schedule(request("a", 1)).unwrap();
        let err = scheduler.schedule(request("b", 1)).unwrap_err();
        assert!(err.is_accommodation());
    }
}
