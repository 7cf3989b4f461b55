//! Queue set configuration.

use std::time::Duration;

use tokio::time::Instant;

use crate::dealer::Dealer;
use crate::error::{FairQueueError, FairQueueResult};
use crate::selector::{QueueSelector, RoundRobinSelector, ShuffleShardingSelector};

/// Stand-in for a fallback too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// How long a request may wait in a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueWaitConfig {
    /// Wait budget for requests whose caller set no deadline.
    pub fallback: Duration,
    /// Share of the caller's remaining budget spent waiting, as `1 / divisor`.
    pub deadline_divisor: u32,
}

impl QueueWaitConfig {
    /// Creates a configuration for testing.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            fallback: Duration::from_millis(500),
            deadline_divisor: 4,
        }
    }

    /// Returns the instant at which a request stops waiting.
    ///
    /// With a caller deadline this is `arrived_at + (deadline - arrived_at) /
    /// divisor`, leaving the rest of the budget for execution. Without one it
    /// is `now + fallback`, clamped to about 30 years out when the sum does
    /// not fit in an `Instant`.
    #[must_use]
    pub fn deadline_for(&self, arrived_at: Instant, deadline: Option<Instant>, now: Instant) -> Instant {
        match deadline {
            Some(deadline) => {
                let budget = deadline.saturating_duration_since(arrived_at);
                arrived_at + budget / self.deadline_divisor.max(1)
            }
            None => now
                .checked_add(self.fallback)
                .or_else(|| now.checked_add(FAR_FUTURE))
                .unwrap_or(now),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `FairQueueError::InvalidConfig` if the divisor is zero.
    pub fn validate(&self) -> FairQueueResult<()> {
        if self.deadline_divisor == 0 {
            return Err(FairQueueError::InvalidConfig {
                message: "deadline_divisor must be positive".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for QueueWaitConfig {
    fn default() -> Self {
        Self {
            fallback: Duration::from_secs(3),
            deadline_divisor: 4,
        }
    }
}

/// Configuration of a [`QueueSet`](crate::QueueSet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSetConfig {
    /// Name used in logs.
    pub name: String,
    /// Seats available for concurrent execution.
    pub total_seats: u32,
    /// Number of fair queues.
    pub queue_count: u32,
    /// Depth at which a queue stops admitting while all seats are in use.
    pub queue_max_length: usize,
    /// Queue wait budget.
    pub queue_wait: QueueWaitConfig,
    /// Whether releasing seats immediately dispatches waiting requests.
    pub dispatch_on_completion: bool,
}

impl QueueSetConfig {
    /// Creates a configuration with the given capacity and default queuing.
    #[must_use]
    pub fn new(total_seats: u32) -> Self {
        Self {
            total_seats,
            ..Self::default()
        }
    }

    /// Creates a configuration for testing: one seat, one queue.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            name: "test".to_string(),
            total_seats: 1,
            queue_count: 1,
            queue_max_length: 128,
            queue_wait: QueueWaitConfig::for_testing(),
            dispatch_on_completion: true,
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the seat capacity.
    #[must_use]
    pub const fn with_total_seats(mut self, total_seats: u32) -> Self {
        self.total_seats = total_seats;
        self
    }

    /// Sets the number of queues.
    #[must_use]
    pub const fn with_queue_count(mut self, queue_count: u32) -> Self {
        self.queue_count = queue_count;
        self
    }

    /// Sets the per-queue depth cap.
    #[must_use]
    pub const fn with_queue_max_length(mut self, queue_max_length: usize) -> Self {
        self.queue_max_length = queue_max_length;
        self
    }

    /// Sets the queue wait budget.
    #[must_use]
    pub const fn with_queue_wait(mut self, queue_wait: QueueWaitConfig) -> Self {
        self.queue_wait = queue_wait;
        self
    }

    /// Sets whether completions dispatch.
    #[must_use]
    pub const fn with_dispatch_on_completion(mut self, enabled: bool) -> Self {
        self.dispatch_on_completion = enabled;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `FairQueueError::InvalidConfig` if there are no seats or no
    /// queues, or the wait budget is invalid.
    pub fn validate(&self) -> FairQueueResult<()> {
        if self.total_seats == 0 {
            return Err(FairQueueError::InvalidConfig {
                message: "total_seats must be positive".to_string(),
            });
        }
        if self.queue_count == 0 {
            return Err(FairQueueError::InvalidConfig {
                message: "queue_count must be positive".to_string(),
            });
        }
        self.queue_wait.validate()
    }
}

impl Default for QueueSetConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            total_seats: 32,
            queue_count: 64,
            queue_max_length: 128,
            queue_wait: QueueWaitConfig::default(),
            dispatch_on_completion: true,
        }
    }
}

/// Queue selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorConfig {
    /// Cycle through the queues.
    RoundRobin,
    /// Shuffle-shard flows over hands of `hand_size` queues.
    ShuffleSharding {
        /// Queues dealt to each flow.
        hand_size: u32,
    },
}

impl SelectorConfig {
    /// Validates the policy against a queue count.
    ///
    /// # Errors
    ///
    /// Returns `FairQueueError::InvalidConfig` if the hand size does not fit
    /// the deck.
    pub fn validate(&self, queue_count: u32) -> FairQueueResult<()> {
        match *self {
            Self::RoundRobin => Ok(()),
            Self::ShuffleSharding { hand_size } => Dealer::new(queue_count, hand_size).map(|_| ()),
        }
    }

    /// Builds the selector for `queue_count` queues.
    ///
    /// # Errors
    ///
    /// Returns `FairQueueError::InvalidConfig` if the hand size does not fit
    /// the deck.
    pub fn build(&self, queue_count: u32) -> FairQueueResult<Box<dyn QueueSelector>> {
        Ok(match *self {
            Self::RoundRobin => Box::new(RoundRobinSelector::new()),
            Self::ShuffleSharding { hand_size } => {
                Box::new(ShuffleShardingSelector::new(queue_count, hand_size)?)
            }
        })
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self::ShuffleSharding { hand_size: 8 }
    }
}
