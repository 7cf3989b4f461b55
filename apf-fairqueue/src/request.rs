//! Request descriptor seen by the fair queuing core.
//!
//! The core only needs a flow id, a cost, the caller's deadline and
//! cancellation, four latency markers and a decision cell. Everything else
//! about the unit of work stays with the caller.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::promise::DecisionPromise;
use crate::types::{FlowId, SeatSeconds};

/// Estimated cost of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostEstimate {
    /// Concurrency units occupied while executing. Always at least 1.
    pub seats: u32,
    /// Expected service time.
    pub duration: Duration,
}

impl CostEstimate {
    /// Creates an estimate. A zero seat count is raised to 1.
    #[must_use]
    pub const fn new(seats: u32, duration: Duration) -> Self {
        Self {
            seats: if seats == 0 { 1 } else { seats },
            duration,
        }
    }

    /// Returns the virtual width, `seats × duration`.
    #[must_use]
    pub fn width(&self) -> SeatSeconds {
        SeatSeconds::seats_times(self.seats, self.duration)
    }
}

/// A latency marker: started once, finished once.
pub trait LatencyTracker: Send + Sync {
    /// Records the start instant. Later calls are ignored.
    fn start(&self, now: Instant);

    /// Records the finish instant. Ignored if not started or already finished.
    fn finish(&self, now: Instant);

    /// Returns when the marker started and, once finished, how long it ran.
    fn get(&self) -> (Option<Instant>, Option<Duration>);
}

/// Default [`LatencyTracker`].
#[derive(Debug, Default)]
pub struct Stopwatch {
    inner: Mutex<StopwatchState>,
}

#[derive(Debug, Default, Clone, Copy)]
struct StopwatchState {
    started_at: Option<Instant>,
    duration: Option<Duration>,
}

impl Stopwatch {
    /// Creates a stopwatch that has not started.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stopwatch already started at `now`.
    #[must_use]
    pub fn started_at(now: Instant) -> Self {
        let watch = Self::default();
        watch.start(now);
        watch
    }
}

impl LatencyTracker for Stopwatch {
    fn start(&self, now: Instant) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if state.started_at.is_none() {
            state.started_at = Some(now);
        }
    }

    fn finish(&self, now: Instant) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let (Some(started_at), None) = (state.started_at, state.duration) {
            state.duration = Some(now.saturating_duration_since(started_at));
        }
    }

    fn get(&self) -> (Option<Instant>, Option<Duration>) {
        let state = *self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        (state.started_at, state.duration)
    }
}

/// The four latency markers carried by every request.
#[derive(Clone)]
pub struct LatencyTrackers {
    /// Time spent waiting in a fair queue.
    pub queue_wait: Arc<dyn LatencyTracker>,
    /// Time between the execute decision and the work starting.
    pub post_decision_wait: Arc<dyn LatencyTracker>,
    /// Time spent executing the work.
    pub execution: Arc<dyn LatencyTracker>,
    /// Time from arrival to completion or rejection.
    pub total: Arc<dyn LatencyTracker>,
}

impl LatencyTrackers {
    /// Creates four fresh [`Stopwatch`]es, with `total` started at `arrived_at`.
    #[must_use]
    pub fn stopwatches(arrived_at: Instant) -> Self {
        Self {
            queue_wait: Arc::new(Stopwatch::new()),
            post_decision_wait: Arc::new(Stopwatch::new()),
            execution: Arc::new(Stopwatch::new()),
            total: Arc::new(Stopwatch::started_at(arrived_at)),
        }
    }
}

impl fmt::Debug for LatencyTrackers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencyTrackers")
            .field("queue_wait", &self.queue_wait.get())
            .field("post_decision_wait", &self.post_decision_wait.get())
            .field("execution", &self.execution.get())
            .field("total", &self.total.get())
            .finish()
    }
}

/// A request's permanent fairness record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VirtualTimes {
    /// Virtual time at enqueue.
    pub arrival_r: SeatSeconds,
    /// Virtual start time.
    pub start_r: SeatSeconds,
    /// Virtual finish time.
    pub finish_r: SeatSeconds,
    /// Virtual time at completion or timeout.
    pub done_r: Option<SeatSeconds>,
}

/// Caller-side context: an optional deadline and a cancellation token.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Overall deadline of the request, if any.
    pub deadline: Option<Instant>,
    /// Fires when the caller gives up.
    pub cancellation: CancellationToken,
}

impl RequestContext {
    /// Creates a context with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the overall deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }
}

/// A unit of work submitted for scheduling.
pub struct Request {
    label: String,
    flow_id: FlowId,
    cost: CostEstimate,
    context: RequestContext,
    arrived_at: Instant,
    latency: LatencyTrackers,
    decision: DecisionPromise,
    virtual_times: Mutex<VirtualTimes>,
}

impl Request {
    /// Creates a request with fresh stopwatches.
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        flow_id: FlowId,
        cost: CostEstimate,
        context: RequestContext,
        arrived_at: Instant,
    ) -> Self {
        Self::with_trackers(
            label,
            flow_id,
            cost,
            context,
            arrived_at,
            LatencyTrackers::stopwatches(arrived_at),
        )
    }

    /// Creates a request with caller-supplied latency markers.
    #[must_use]
    pub fn with_trackers(
        label: impl Into<String>,
        flow_id: FlowId,
        cost: CostEstimate,
        context: RequestContext,
        arrived_at: Instant,
        latency: LatencyTrackers,
    ) -> Self {
        Self {
            label: label.into(),
            flow_id,
            cost,
            context,
            arrived_at,
            latency,
            decision: DecisionPromise::new(),
            virtual_times: Mutex::new(VirtualTimes::default()),
        }
    }

    /// Human-readable label used in logs and events.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Flow this request belongs to.
    #[must_use]
    pub const fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    /// Estimated cost.
    #[must_use]
    pub const fn cost(&self) -> CostEstimate {
        self.cost
    }

    /// Caller context.
    #[must_use]
    pub const fn context(&self) -> &RequestContext {
        &self.context
    }

    /// When the request arrived.
    #[must_use]
    pub const fn arrived_at(&self) -> Instant {
        self.arrived_at
    }

    /// Latency markers.
    #[must_use]
    pub const fn latency(&self) -> &LatencyTrackers {
        &self.latency
    }

    /// Decision cell.
    #[must_use]
    pub const fn decision(&self) -> &DecisionPromise {
        &self.decision
    }

    /// Returns a copy of the fairness record.
    #[must_use]
    pub fn virtual_times(&self) -> VirtualTimes {
        *self.virtual_times.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Virtual finish time assigned at enqueue.
    #[must_use]
    pub fn finish_r(&self) -> SeatSeconds {
        self.virtual_times().finish_r
    }

    pub(crate) fn on_start(&self, arrival_r: SeatSeconds, start_r: SeatSeconds, finish_r: SeatSeconds) {
        let mut times = self.virtual_times.lock().unwrap_or_else(PoisonError::into_inner);
        times.arrival_r = arrival_r;
        times.start_r = start_r;
        times.finish_r = finish_r;
    }

    pub(crate) fn on_done(&self, done_r: SeatSeconds) {
        let mut times = self.virtual_times.lock().unwrap_or_else(PoisonError::into_inner);
        times.done_r.get_or_insert(done_r);
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("label", &self.label)
            .field("flow_id", &self.flow_id)
            .field("cost", &self.cost)
            .field("decision", &self.decision.decision())
            .field("virtual_times", &self.virtual_times())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.flow_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_estimate_minimum_seat() {
        let cost = CostEstimate::new(0, Duration::from_secs(2));
        assert_eq!(cost.seats, 1);
        assert_eq!(cost.width().units(), 2 * SeatSeconds::UNITS_PER_SEAT_SECOND);
    }

    #[test]
    fn test_stopwatch_first_finish_wins() {
        let start = Instant::now();
        let watch = Stopwatch::new();

        // Finishing before starting records nothing.
        watch.finish(start);
        assert_eq!(watch.get(), (None, None));

        watch.start(start);
        watch.start(start + Duration::from_secs(5));
        watch.finish(start + Duration::from_secs(1));
        watch.finish(start + Duration::from_secs(9));

        assert_eq!(watch.get(), (Some(start), Some(Duration::from_secs(1))));
    }

    #[test]
    fn test_done_r_written_once() {
        let request = Request::new(
            "r",
            FlowId::new(1),
            CostEstimate::new(1, Duration::from_secs(1)),
            RequestContext::new(),
            Instant::now(),
        );
        request.on_done(SeatSeconds::from_units(10));
        request.on_done(SeatSeconds::from_units(20));

        assert_eq!(request.virtual_times().done_r, Some(SeatSeconds::from_units(10)));
    }
}
