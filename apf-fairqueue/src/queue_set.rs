//! Queue set: admission, dispatch and seat accounting.
//!
//! A `QueueSet` owns a fixed array of [`FairQueue`]s, one [`VirtualClock`],
//! a [`QueueSelector`] and the global seat/request counters, all behind one
//! mutex. Every operation holds the lock for a short, non-blocking critical
//! section. Callers only ever suspend on a request's decision, which happens
//! outside the lock in [`QueuedFinisher::finish`].
//!
//! ```text
//!   enqueue ──▶ select queue ──▶ admit? ──▶ FairQueue::enqueue ──▶ QueuedFinisher
//!                                                                       │
//!   dispatch ──▶ fairest head ──▶ fits? ──▶ dequeue_for_execution ──▶ Execute
//!                                                                       │
//!   post_execution / post_timeout ◀─────────────────────────────────────┘
//! ```
//!
//! Invariant: `seats.in_use <= total_seats` whenever the lock is released.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::clock::{Clock, Demand, TokioClock, VirtualClock};
use crate::config::QueueSetConfig;
use crate::error::{FairQueueError, FairQueueResult};
use crate::events::SchedulingEvents;
use crate::fair_queue::{DequeueOutcome, FairQueue, RequestCount, SeatCount};
use crate::finisher::{Disposer, QueueCleanupCallbacks, QueuedFinisher};
use crate::fifo::FifoHandle;
use crate::promise::Decision;
use crate::request::Request;
use crate::selector::QueueSelector;
use crate::types::{QueueIndex, SeatSeconds};

/// Point-in-time view of a queue set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSetStats {
    /// Seat capacity.
    pub total_seats: u32,
    /// Global seat counters.
    pub seats: SeatCount,
    /// Global request counters.
    pub requests: RequestCount,
    /// Current virtual time.
    pub virtual_time: SeatSeconds,
    /// Waiting requests per queue.
    pub queue_lengths: Vec<usize>,
}

struct State {
    queues: Vec<FairQueue>,
    vclock: VirtualClock,
    selector: Box<dyn QueueSelector>,
    seats: SeatCount,
    requests: RequestCount,
    /// Queue that won the previous dispatch. The next scan starts after it.
    robin_index: usize,
}

impl State {
    /// Demand as seen by the virtual clock: requested seats, capped at the
    /// capacity, over the number of non-idle queues.
    fn demand(queues: &[FairQueue], total_seats: u32) -> Demand {
        let mut seats_requested = 0_u32;
        let mut active_queues = 0_u32;
        for queue in queues {
            if !queue.is_idle() {
                active_queues += 1;
            }
            seats_requested = seats_requested.saturating_add(queue.work().total());
        }
        Demand {
            seats_requested: seats_requested.min(total_seats),
            active_queues,
        }
    }

    fn tick(&mut self, now: Instant, total_seats: u32) {
        let queues = &self.queues;
        self.vclock.tick(now, || Self::demand(queues, total_seats));
    }

    /// Finds the non-empty queue whose head has the smallest virtual finish
    /// time, scanning from `robin_index + 1` and wrapping once. Ties keep the
    /// queue scanned first.
    fn fairest_head(&self) -> Option<(usize, u32)> {
        let count = self.queues.len();
        let mut best: Option<(usize, SeatSeconds, u32)> = None;
        for offset in 1..=count {
            let position = (self.robin_index + offset) % count;
            let Some(head) = self.queues[position].peek() else {
                continue;
            };
            let finish_r = head.request.finish_r();
            if best.map_or(true, |(_, least, _)| finish_r < least) {
                best = Some((position, finish_r, head.seats));
            }
        }
        best.map(|(position, _, seats)| (position, seats))
    }
}

struct Shared {
    config: QueueSetConfig,
    clock: Arc<dyn Clock>,
    events: Arc<dyn SchedulingEvents>,
    state: Mutex<State>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One dispatch attempt. A head lost to its own timeout is skipped and the
    /// scan repeats, so `Ok(false)` always means nothing is waiting.
    fn dispatch_locked(&self, state: &mut State) -> FairQueueResult<bool> {
        let total_seats = self.config.total_seats;
        loop {
            let Some((position, seats)) = state.fairest_head() else {
                return Ok(false);
            };
            state.robin_index = position;

            if state.seats.in_use.saturating_add(seats) > total_seats {
                return Err(FairQueueError::Accommodation {
                    seats_requested: seats,
                    seats_in_use: state.seats.in_use,
                    total_seats,
                });
            }

            let now = self.clock.now();
            state.tick(now, total_seats);

            let queue = &mut state.queues[position];
            let index = queue.index();
            let events = &self.events;
            let outcome = queue.dequeue_for_execution(
                |entry| {
                    entry.request.latency().queue_wait.finish(now);
                    events.dequeued(index, &entry.request);
                },
                |entry| {
                    entry.request.latency().post_decision_wait.start(now);
                    events.decision_changed(&entry.request, Decision::Execute);
                },
            );

            match outcome {
                DequeueOutcome::Empty => {
                    warn!(queue_set = %self.config.name, %index, "Fairest queue was empty");
                    return Err(FairQueueError::QueueEmpty { queue: index });
                }
                DequeueOutcome::LostRace(entry) => {
                    state.seats.waiting = state.seats.waiting.saturating_sub(entry.seats);
                    state.requests.waiting = state.requests.waiting.saturating_sub(1);
                    debug!(
                        queue_set = %self.config.name,
                        request = %entry.request.label(),
                        %index,
                        "Head timed out before dispatch, rescanning"
                    );
                }
                DequeueOutcome::Executing(entry) => {
                    state.seats.waiting = state.seats.waiting.saturating_sub(entry.seats);
                    state.requests.waiting = state.requests.waiting.saturating_sub(1);
                    state.seats.in_use += entry.seats;
                    state.requests.executing = state.requests.executing.saturating_add(1);
                    debug!(
                        queue_set = %self.config.name,
                        request = %entry.request.label(),
                        %index,
                        seats = entry.seats,
                        seats_in_use = state.seats.in_use,
                        "Dispatched"
                    );
                    return Ok(true);
                }
            }
        }
    }

    /// Dispatches until nothing is waiting or the fairest head does not fit.
    fn dispatch_all_locked(&self, state: &mut State) -> usize {
        let mut dispatched = 0;
        loop {
            match self.dispatch_locked(state) {
                Ok(true) => dispatched += 1,
                Ok(false) => return dispatched,
                Err(err) => {
                    debug!(queue_set = %self.config.name, error = %err, "Dispatch stopped");
                    return dispatched;
                }
            }
        }
    }

    fn post_execution(&self, queue: QueueIndex, request: &Request, seats: u32) {
        {
            let mut state = self.lock();
            let state = &mut *state;
            state.tick(self.clock.now(), self.config.total_seats);

            state.queues[queue.as_usize()].finish_execution(seats);
            state.seats.in_use = state.seats.in_use.saturating_sub(seats);
            state.requests.executing = state.requests.executing.saturating_sub(1);
            request.on_done(state.vclock.rt());

            if self.config.dispatch_on_completion {
                self.dispatch_all_locked(state);
            }
        }
        self.events.disposed(request);
    }

    fn post_timeout(&self, queue: QueueIndex, handle: FifoHandle, request: &Request) {
        {
            let mut state = self.lock();
            let state = &mut *state;
            let now = self.clock.now();
            state.tick(now, self.config.total_seats);

            // Absent means dispatch popped it and already fixed the counters.
            if let Some(entry) = state.queues[queue.as_usize()].remove_timed_out(handle) {
                state.seats.waiting = state.seats.waiting.saturating_sub(entry.seats);
                state.requests.waiting = state.requests.waiting.saturating_sub(1);
                request.latency().queue_wait.finish(now);

                // A new head may be fairer and fit.
                if self.config.dispatch_on_completion {
                    self.dispatch_all_locked(state);
                }
            }
            request.on_done(state.vclock.rt());
        }
        self.events.timed_out(request);
    }
}

/// A set of fair queues sharing one seat budget.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct QueueSet {
    shared: Arc<Shared>,
}

impl QueueSet {
    /// Creates a queue set on tokio's clock.
    ///
    /// # Errors
    ///
    /// Returns `FairQueueError::InvalidConfig` if the configuration is invalid.
    pub fn new(
        config: QueueSetConfig,
        selector: Box<dyn QueueSelector>,
        events: Arc<dyn SchedulingEvents>,
    ) -> FairQueueResult<Self> {
        Self::with_clock(config, selector, events, Arc::new(TokioClock))
    }

    /// Creates a queue set on the given clock.
    ///
    /// # Errors
    ///
    /// Returns `FairQueueError::InvalidConfig` if the configuration is invalid.
    pub fn with_clock(
        config: QueueSetConfig,
        selector: Box<dyn QueueSelector>,
        events: Arc<dyn SchedulingEvents>,
        clock: Arc<dyn Clock>,
    ) -> FairQueueResult<Self> {
        config.validate()?;

        let queues = (0..config.queue_count)
            .map(|i| FairQueue::new(QueueIndex::new(i)))
            .collect();
        let state = State {
            queues,
            vclock: VirtualClock::new(clock.now()),
            selector,
            seats: SeatCount::default(),
            requests: RequestCount::default(),
            robin_index: 0,
        };

        debug!(
            queue_set = %config.name,
            total_seats = config.total_seats,
            queue_count = config.queue_count,
            queue_max_length = config.queue_max_length,
            "Created queue set"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                clock,
                events,
                state: Mutex::new(state),
            }),
        })
    }

    /// Returns the configured name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &QueueSetConfig {
        &self.shared.config
    }

    /// Admits `request` into one of the queues.
    ///
    /// The request is charged `min(seats, total_seats)`. It is refused only
    /// when every seat is in use *and* its queue is at its depth cap. The
    /// caller is expected to call [`Self::dispatch`] afterwards, then
    /// [`QueuedFinisher::finish`].
    ///
    /// # Errors
    ///
    /// Returns `FairQueueError::Accommodation` if the request is refused, or
    /// `FairQueueError::QueueAssignment` if no queue could be selected.
    pub fn enqueue(&self, request: Arc<Request>) -> FairQueueResult<QueuedFinisher> {
        let shared = &self.shared;
        let config = &shared.config;
        let seats = request.cost().seats.min(config.total_seats);

        let (queue, handle, wait_deadline) = {
            let mut guard = shared.lock();
            let state = &mut *guard;

            let queue = state
                .selector
                .select_queue(&state.queues, request.flow_id())?;
            shared.events.queue_selected(queue, &request);

            let queue_len = state
                .queues
                .get(queue.as_usize())
                .ok_or_else(|| FairQueueError::QueueAssignment {
                    message: format!("selector returned {queue} out of {}", state.queues.len()),
                })?
                .len();
            if state.seats.in_use >= config.total_seats && queue_len >= config.queue_max_length {
                debug!(
                    queue_set = %config.name,
                    request = %request.label(),
                    %queue,
                    queue_len,
                    "Rejected: seats and queue exhausted"
                );
                return Err(FairQueueError::Accommodation {
                    seats_requested: seats,
                    seats_in_use: state.seats.in_use,
                    total_seats: config.total_seats,
                });
            }

            let now = shared.clock.now();
            state.tick(now, config.total_seats);
            let rt = state.vclock.rt();
            let handle = state.queues[queue.as_usize()].enqueue(Arc::clone(&request), seats, rt);
            request.latency().queue_wait.start(now);
            state.seats.waiting = state.seats.waiting.saturating_add(seats);
            state.requests.waiting = state.requests.waiting.saturating_add(1);
            shared.events.enqueued(queue, &request);

            let wait_deadline =
                config
                    .queue_wait
                    .deadline_for(request.arrived_at(), request.context().deadline, now);
            (queue, handle, wait_deadline)
        };

        let cleanup = QueueCleanupCallbacks {
            post_execution: Disposer::new({
                let shared = Arc::clone(shared);
                let request = Arc::clone(&request);
                move || shared.post_execution(queue, &request, seats)
            }),
            post_timeout: Disposer::new({
                let shared = Arc::clone(shared);
                let request = Arc::clone(&request);
                move || shared.post_timeout(queue, handle, &request)
            }),
        };

        Ok(QueuedFinisher::new(
            request,
            wait_deadline,
            cleanup,
            Arc::clone(&shared.clock),
        ))
    }

    /// Dispatches the globally fairest waiting request, if it fits.
    ///
    /// Returns `Ok(true)` if a request was given the execute decision and
    /// `Ok(false)` if nothing is waiting.
    ///
    /// # Errors
    ///
    /// Returns `FairQueueError::Accommodation` if the fairest head needs more
    /// seats than are free. Nothing changes and the request stays queued;
    /// a later completion or dispatch picks it up.
    pub fn dispatch(&self) -> FairQueueResult<bool> {
        let mut state = self.shared.lock();
        self.shared.dispatch_locked(&mut state)
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> QueueSetStats {
        let state = self.shared.lock();
        QueueSetStats {
            total_seats: self.shared.config.total_seats,
            seats: state.seats,
            requests: state.requests,
            virtual_time: state.vclock.rt(),
            queue_lengths: state.queues.iter().map(FairQueue::len).collect(),
        }
    }
}

impl fmt::Debug for QueueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSet")
            .field("name", &self.shared.config.name)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::QueueWaitConfig;
    use crate::events::NoEvents;
    use crate::finisher::FinishOutcome;
    use crate::request::{CostEstimate, RequestContext};
    use crate::selector::RoundRobinSelector;
    use crate::types::FlowId;

    fn queue_set(config: QueueSetConfig) -> QueueSet {
        QueueSet::new(config, Box::new(RoundRobinSelector::new()), Arc::new(NoEvents)).unwrap()
    }

    fn request(label: &str, seats: u32) -> Arc<Request> {
        Arc::new(Request::new(
            label,
            FlowId::new(1),
            CostEstimate::new(seats, Duration::from_secs(1)),
            RequestContext::new(),
            Instant::now(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_then_dispatch_executes() {
        let qs = queue_set(QueueSetConfig::for_testing());
        let mut finisher = qs.enqueue(request("/first", 1)).unwrap();
        assert_eq!(qs.stats().requests.waiting, 1);

        assert!(qs.dispatch().unwrap());
        assert_eq!(qs.stats().seats.in_use, 1);

        let outcome = finisher.finish(|| async { "ok" }).await;
        assert_eq!(outcome, FinishOutcome::Executed("ok"));

        let stats = qs.stats();
        assert_eq!(stats.seats, SeatCount::default());
        assert_eq!(stats.requests, RequestCount::default());
        assert!(finisher.request().virtual_times().done_r.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_idle_is_noop() {
        let qs = queue_set(QueueSetConfig::for_testing());
        assert!(!qs.dispatch().unwrap());
        assert_eq!(qs.stats().virtual_time, SeatSeconds::MIN);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_needs_both_limits_exhausted() {
        let qs = queue_set(QueueSetConfig::for_testing().with_queue_max_length(1));

        let _running = qs.enqueue(request("a", 1)).unwrap();
        assert!(qs.dispatch().unwrap());

        // Seats exhausted, queue has room.
        let _waiting = qs.enqueue(request("b", 1)).unwrap();

        // Seats exhausted and queue full.
        let err = qs.enqueue(request("c", 1)).unwrap_err();
        assert_eq!(
            err,
            FairQueueError::Accommodation {
                seats_requested: 1,
                seats_in_use: 1,
                total_seats: 1,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_full_but_seats_free_still_admits() {
        let qs = queue_set(
            QueueSetConfig::for_testing()
                .with_total_seats(2)
                .with_queue_max_length(0),
        );
        let _a = qs.enqueue(request("a", 1)).unwrap();
        let _b = qs.enqueue(request("b", 1)).unwrap();
        assert_eq!(qs.stats().requests.waiting, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_refuses_when_head_does_not_fit() {
        let qs = queue_set(QueueSetConfig::for_testing().with_total_seats(2));
        let _a = qs.enqueue(request("a", 1)).unwrap();
        assert!(qs.dispatch().unwrap());

        let _b = qs.enqueue(request("b", 2)).unwrap();
        let before = qs.stats();
        let err = qs.dispatch().unwrap_err();
        assert!(err.is_accommodation());
        assert_eq!(qs.stats(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_request_is_capped() {
        let qs = queue_set(QueueSetConfig::for_testing().with_total_seats(4));
        let _big = qs.enqueue(request("big", 100)).unwrap();
        assert_eq!(qs.stats().seats.waiting, 4);
        assert!(qs.dispatch().unwrap());
        assert_eq!(qs.stats().seats.in_use, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_picks_smallest_finish_r() {
        let qs = queue_set(
            QueueSetConfig::for_testing()
                .with_total_seats(1)
                .with_queue_count(2),
        );
        // Round-robin puts the first request on queue 1, the second on 0.
        let long = Arc::new(Request::new(
            "long",
            FlowId::new(1),
            CostEstimate::new(1, Duration::from_secs(10)),
            RequestContext::new(),
            Instant::now(),
        ));
        let _long = qs.enqueue(Arc::clone(&long)).unwrap();
        let short = request("short", 1);
        let _short = qs.enqueue(Arc::clone(&short)).unwrap();

        assert!(qs.dispatch().unwrap());
        assert_eq!(short.decision().decision(), Decision::Execute);
        assert_eq!(long.decision().decision(), Decision::None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_finish_r_alternates_between_queues() {
        let qs = queue_set(
            QueueSetConfig::for_testing()
                .with_total_seats(10)
                .with_queue_count(2)
                .with_dispatch_on_completion(false),
        );
        let mut order = Vec::new();
        let mut finishers = Vec::new();
        for label in ["q1-a", "q0-a", "q1-b", "q0-b"] {
            let r = request(label, 1);
            finishers.push(qs.enqueue(Arc::clone(&r)).unwrap());
            order.push(r);
        }

        let mut dispatched = Vec::new();
        while qs.dispatch().unwrap() {
            for r in &order {
                if r.decision().decision() == Decision::Execute
                    && !dispatched.contains(&r.label().to_string())
                {
                    dispatched.push(r.label().to_string());
                }
            }
        }

        // Heads tie on finish_r; the scan starts after the last winner.
        assert_eq!(dispatched, vec!["q1-a", "q0-a", "q1-b", "q0-b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_race_is_not_double_counted() {
        let qs = queue_set(QueueSetConfig::for_testing().with_dispatch_on_completion(false));
        let running = qs.enqueue(request("running", 1)).unwrap();
        assert!(qs.dispatch().unwrap());

        let stale = request("stale", 1);
        let stale_finisher = qs.enqueue(Arc::clone(&stale)).unwrap();
        let fresh = request("fresh", 1);
        let _fresh = qs.enqueue(Arc::clone(&fresh)).unwrap();

        // The stale request's deadline fires but its cleanup has not run yet.
        assert!(stale.decision().set_decision(Decision::Timeout));

        // Free the seat without auto-dispatch, then dispatch by hand.
        drop(running);
        assert!(qs.dispatch().unwrap());
        assert_eq!(fresh.decision().decision(), Decision::Execute);

        // The stale waiter's cleanup now finds nothing to undo.
        drop(stale_finisher);
        let stats = qs.stats();
        assert_eq!(stats.requests, RequestCount { waiting: 0, executing: 1 });
        assert_eq!(stats.seats, SeatCount { waiting: 0, in_use: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_completion_dispatches_next() {
        let qs = queue_set(QueueSetConfig::for_testing());
        let mut first = qs.enqueue(request("/first", 1)).unwrap();
        assert!(qs.dispatch().unwrap());

        let mut second = qs.enqueue(request("/second", 1)).unwrap();
        let third = request("/third", 1);
        let mut third_finisher = qs.enqueue(Arc::clone(&third)).unwrap();

        // /second times out while /first holds the only seat.
        let outcome = second.finish(|| async {}).await;
        assert_eq!(outcome, FinishOutcome::TimedOut);
        assert_eq!(qs.stats().requests.waiting, 1);

        // /first completes; its release dispatches /third.
        assert!(first.finish(|| async {}).await.is_executed());
        assert_eq!(third.decision().decision(), Decision::Execute);
        assert!(third_finisher.finish(|| async {}).await.is_executed());
        assert_eq!(qs.stats().seats, SeatCount::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_is_removed() {
        let qs = queue_set(QueueSetConfig::for_testing());
        let _running = qs.enqueue(request("running", 1)).unwrap();
        assert!(qs.dispatch().unwrap());

        let cancel = CancellationToken::new();
        let waiting = Arc::new(Request::new(
            "waiting",
            FlowId::new(2),
            CostEstimate::new(1, Duration::from_secs(1)),
            RequestContext::new().with_cancellation(cancel.clone()),
            Instant::now(),
        ));
        let mut finisher = qs.enqueue(waiting).unwrap();
        cancel.cancel();

        assert_eq!(finisher.finish(|| async {}).await, FinishOutcome::TimedOut);
        assert_eq!(qs.stats().requests.waiting, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_virtual_time_advances_with_demand() {
        let qs = queue_set(QueueSetConfig::for_testing());
        let _running = qs.enqueue(request("running", 1)).unwrap();
        assert!(qs.dispatch().unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        // Any locked operation ticks the clock.
        let _next = qs.enqueue(request("next", 1)).unwrap();

        assert_eq!(
            qs.stats().virtual_time.units(),
            2 * SeatSeconds::UNITS_PER_SEAT_SECOND
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_queue_wait_enqueues() {
        let qs = queue_set(QueueSetConfig::for_testing().with_queue_wait(QueueWaitConfig {
            fallback: Duration::MAX,
            deadline_divisor: 4,
        }));
        let _running = qs.enqueue(request("running", 1)).unwrap();
        assert!(qs.dispatch().unwrap());

        let waiting = qs.enqueue(request("waiting", 1)).unwrap();
        assert!(waiting.wait_deadline() > Instant::now() + Duration::from_secs(86_400));
        assert_eq!(qs.stats().requests.waiting, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = QueueSet::new(
            QueueSetConfig::for_testing().with_total_seats(0),
            Box::new(RoundRobinSelector::new()),
            Arc::new(NoEvents),
        );
        assert!(matches!(result, Err(FairQueueError::InvalidConfig { .. })));
    }
}
