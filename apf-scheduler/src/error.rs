//! Scheduler error types.

use apf_fairqueue::FairQueueError;

/// Scheduler error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// Error from the fair queuing core.
    #[error(transparent)]
    FairQueue(#[from] FairQueueError),

    /// The cost estimator failed.
    #[error("cost estimation failed: {message}")]
    Estimate {
        /// Error message.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },
}

impl SchedulerError {
    /// Returns whether the request should simply be rejected now.
    #[must_use]
    pub fn is_accommodation(&self) -> bool {
        matches!(self, Self::FairQueue(err) if err.is_accommodation())
    }
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
