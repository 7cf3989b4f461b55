//! Fair queuing error types.

use crate::types::QueueIndex;

/// Fair queuing error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FairQueueError {
    /// There is no room for the request: either the seats and the selected
    /// queue are both exhausted (enqueue), or the head request does not fit
    /// in the free seats right now (dispatch).
    #[error("cannot accommodate request: {seats_requested} seats requested, {seats_in_use} of {total_seats} in use")]
    Accommodation {
        /// Seats the request needs.
        seats_requested: u32,
        /// Seats currently occupied by executing requests.
        seats_in_use: u32,
        /// Total seat capacity.
        total_seats: u32,
    },

    /// The queue selector could not produce a usable queue.
    #[error("queue assignment failed: {message}")]
    QueueAssignment {
        /// Error message.
        message: String,
    },

    /// A queue chosen for dispatch unexpectedly had nothing to dequeue.
    #[error("{queue} should not be empty")]
    QueueEmpty {
        /// The queue that was found empty.
        queue: QueueIndex,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },
}

impl FairQueueError {
    /// Returns whether the caller should treat this error as "reject now".
    #[must_use]
    pub const fn is_accommodation(&self) -> bool {
        matches!(self, Self::Accommodation { .. })
    }
}

/// Result type for fair queuing operations.
pub type FairQueueResult<T> = Result<T, FairQueueError>;
