//! Gate construction.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use apf_fairqueue::dealer::{required_entropy_bits, MAX_HASH_BITS};
use apf_fairqueue::{
    Clock, NoEvents, QueueSet, QueueSetConfig, QueueWaitConfig, SchedulingEvents, SelectorConfig,
    TokioClock,
};
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};
use crate::estimator::{CostEstimator, UniformEstimator};
use crate::exempt::{Exemption, NoExemption};
use crate::flow::FlowDistinguisher;
use crate::gate::{Gate, Labeler};
use crate::nowait::NoWaitScheduler;
use crate::queued::QueuedScheduler;
use crate::scheduler::Scheduler;

/// Largest hand dealt by the default shuffle-sharding selector.
const DEFAULT_HAND_SIZE: u32 = 8;

/// Returns the largest hand of at most [`DEFAULT_HAND_SIZE`] cards that
/// `queue_count` queues can deal within [`MAX_HASH_BITS`]. Never below 1.
fn default_hand_size(queue_count: u32) -> u32 {
    (1..=queue_count.min(DEFAULT_HAND_SIZE))
        .rev()
        .find(|&hand_size| required_entropy_bits(queue_count, hand_size) <= MAX_HASH_BITS)
        .unwrap_or(1)
}

#[derive(Debug, Clone, Copy)]
struct Queuing {
    queue_max_length: usize,
    queue_count: u32,
}

/// Builds a [`Gate`].
///
/// Without [`with_queuing`](Self::with_queuing) the gate uses a no-wait
/// scheduler: a request either fits in the free seats or is rejected.
pub struct GateBuilder<Req: ?Sized> {
    name: String,
    server_concurrency: u32,
    queuing: Option<Queuing>,
    selector: Option<SelectorConfig>,
    queue_wait: QueueWaitConfig,
    dispatch_on_completion: bool,
    estimator: Arc<dyn CostEstimator<Req>>,
    exemption: Arc<dyn Exemption<Req>>,
    distinguisher: Option<FlowDistinguisher<Req>>,
    labeler: Option<Labeler<Req>>,
    events: Arc<dyn SchedulingEvents>,
    clock: Arc<dyn Clock>,
}

impl<Req: ?Sized> GateBuilder<Req> {
    /// Creates a builder for a gate with `server_concurrency` seats.
    #[must_use]
    pub fn new(server_concurrency: u32) -> Self {
        Self {
            name: "gate".to_string(),
            server_concurrency,
            queuing: None,
            selector: None,
            queue_wait: QueueWaitConfig::default(),
            dispatch_on_completion: true,
            estimator: Arc::new(UniformEstimator),
            exemption: Arc::new(NoExemption),
            distinguisher: None,
            labeler: None,
            events: Arc::new(NoEvents),
            clock: Arc::new(TokioClock),
        }
    }

    /// Sets the name used in logs.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the seat capacity.
    #[must_use]
    pub const fn with_server_concurrency(mut self, server_concurrency: u32) -> Self {
        self.server_concurrency = server_concurrency;
        self
    }

    /// Enables queuing with `queue_count` queues, each admitting up to
    /// `queue_max_length` waiters while all seats are busy.
    #[must_use]
    pub const fn with_queuing(mut self, queue_max_length: usize, queue_count: u32) -> Self {
        self.queuing = Some(Queuing {
            queue_max_length,
            queue_count,
        });
        self
    }

    /// Sets the queue selection policy. Defaults to shuffle sharding with the
    /// largest hand of at most 8 queues that the hash can deal.
    #[must_use]
    pub const fn with_selector(mut self, selector: SelectorConfig) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Sets the queue wait budget.
    #[must_use]
    pub const fn with_queue_wait(mut self, queue_wait: QueueWaitConfig) -> Self {
        self.queue_wait = queue_wait;
        self
    }

    /// Sets whether releasing seats dispatches waiting requests at once.
    #[must_use]
    pub const fn with_dispatch_on_completion(mut self, enabled: bool) -> Self {
        self.dispatch_on_completion = enabled;
        self
    }

    /// Sets the cost estimator.
    #[must_use]
    pub fn with_estimator(mut self, estimator: impl CostEstimator<Req> + 'static) -> Self {
        self.estimator = Arc::new(estimator);
        self
    }

    /// Sets the exemption predicate.
    #[must_use]
    pub fn with_exemption(mut self, exemption: impl Exemption<Req> + 'static) -> Self {
        self.exemption = Arc::new(exemption);
        self
    }

    /// Sets the flow distinguisher. Without one every request is in flow 0.
    #[must_use]
    pub fn with_flow_distinguisher(
        mut self,
        distinguisher: impl Fn(&Req) -> Vec<String> + Send + Sync + 'static,
    ) -> Self {
        self.distinguisher = Some(Arc::new(distinguisher));
        self
    }

    /// Sets the request labeler. Without one requests are numbered.
    #[must_use]
    pub fn with_labeler(mut self, labeler: impl Fn(&Req) -> String + Send + Sync + 'static) -> Self {
        self.labeler = Some(Arc::new(labeler));
        self
    }

    /// Sets the lifecycle event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn SchedulingEvents>) -> Self {
        self.events = events;
        self
    }

    /// Sets the wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the gate.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if the concurrency is zero, or
    /// a fair-queuing `InvalidConfig` error if the queuing settings are
    /// invalid.
    pub fn build(self) -> SchedulerResult<Gate<Req>> {
        if self.server_concurrency == 0 {
            return Err(SchedulerError::InvalidConfig {
                message: "server_concurrency must be positive".to_string(),
            });
        }

        let scheduler: Arc<dyn Scheduler> = match self.queuing {
            Some(queuing) => {
                let config = QueueSetConfig::new(self.server_concurrency)
                    .with_name(self.name.clone())
                    .with_queue_count(queuing.queue_count)
                    .with_queue_max_length(queuing.queue_max_length)
                    .with_queue_wait(self.queue_wait)
                    .with_dispatch_on_completion(self.dispatch_on_completion);
                config.validate()?;

                let selector = self.selector.unwrap_or(SelectorConfig::ShuffleSharding {
                    hand_size: default_hand_size(queuing.queue_count),
                });
                selector.validate(queuing.queue_count)?;
                let queue_set = QueueSet::with_clock(
                    config,
                    selector.build(queuing.queue_count)?,
                    Arc::clone(&self.events),
                    Arc::clone(&self.clock),
                )?;
                Arc::new(QueuedScheduler::new(queue_set))
            }
            None => Arc::new(NoWaitScheduler::with_clock(
                self.server_concurrency,
                Arc::clone(&self.events),
                Arc::clone(&self.clock),
            )?),
        };

        debug!(
            gate = %self.name,
            scheduler = %scheduler.name(),
            seats = self.server_concurrency,
            "Built gate"
        );

        Ok(Gate {
            scheduler,
            estimator: self.estimator,
            exemption: self.exemption,
            distinguisher: self.distinguisher,
            labeler: self.labeler,
            events: self.events,
            clock: self.clock,
            sequence: AtomicU64::new(0),
        })
    }
}
