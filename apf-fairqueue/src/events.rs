//! Lifecycle notifications.
//!
//! Events are side-effect-only: they never influence scheduling. Some are
//! raised while the queue set lock is held, so implementations must not block
//! and must not call back into the queue set.

use tracing::debug;

use crate::promise::Decision;
use crate::request::Request;
use crate::types::QueueIndex;

/// Sink for request lifecycle transitions. Every method defaults to a no-op.
pub trait SchedulingEvents: Send + Sync {
    /// The request reached the admission point.
    fn arrived(&self, _request: &Request) {}

    /// A queue was chosen for the request.
    fn queue_selected(&self, _queue: QueueIndex, _request: &Request) {}

    /// The request was inserted into its queue.
    fn enqueued(&self, _queue: QueueIndex, _request: &Request) {}

    /// The request was removed from the head of its queue by dispatch.
    fn dequeued(&self, _queue: QueueIndex, _request: &Request) {}

    /// The request's decision was set.
    fn decision_changed(&self, _request: &Request, _decision: Decision) {}

    /// The request's work is about to run.
    fn execution_starting(&self, _request: &Request) {}

    /// The request's work returned.
    fn execution_ended(&self, _request: &Request) {}

    /// Post-execution cleanup ran.
    fn disposed(&self, _request: &Request) {}

    /// Timeout cleanup ran.
    fn timed_out(&self, _request: &Request) {}
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvents;

impl SchedulingEvents for NoEvents {}

/// Logs every event at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl SchedulingEvents for TracingEvents {
    fn arrived(&self, request: &Request) {
        debug!(request = %request.label(), flow = %request.flow_id(), "Arrived");
    }

    fn queue_selected(&self, queue: QueueIndex, request: &Request) {
        debug!(request = %request.label(), queue = queue.get(), "Queue selected");
    }

    fn enqueued(&self, queue: QueueIndex, request: &Request) {
        let times = request.virtual_times();
        debug!(
            request = %request.label(),
            queue = queue.get(),
            start_r = %times.start_r,
            finish_r = %times.finish_r,
            "Enqueued"
        );
    }

    fn dequeued(&self, queue: QueueIndex, request: &Request) {
        debug!(request = %request.label(), queue = queue.get(), "Dequeued");
    }

    fn decision_changed(&self, request: &Request, decision: Decision) {
        debug!(request = %request.label(), %decision, "Decision changed");
    }

    fn execution_starting(&self, request: &Request) {
        debug!(request = %request.label(), "Execution starting");
    }

    fn execution_ended(&self, request: &Request) {
        debug!(request = %request.label(), "Execution ended");
    }

    fn disposed(&self, request: &Request) {
        debug!(request = %request.label(), "Disposed");
    }

    fn timed_out(&self, request: &Request) {
        debug!(request = %request.label(), "Timed out in queue");
    }
}
