//! No-wait scheduling: seat accounting without queues.
//!
//! A request either fits in the free seats right now or is rejected. There is
//! nothing to wait for, so admitted requests execute immediately.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use apf_fairqueue::{
    Clock, Disposer, FairQueueError, FinishOutcome, Request, SchedulingEvents, TokioClock,
};
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduler::{Finisher, Scheduler};

/// Counters of a [`NoWaitScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NoWaitStats {
    /// Seat capacity.
    pub total_seats: u32,
    /// Seats held by executing requests.
    pub seats_in_use: u32,
    /// Requests executing.
    pub requests_in_flight: u32,
}

#[derive(Debug, Default)]
struct Seats {
    in_use: u32,
    in_flight: u32,
}

struct Inner {
    total_seats: u32,
    seats: Mutex<Seats>,
    events: Arc<dyn SchedulingEvents>,
}

impl Inner {
    fn release(&self, request: &Request, seats: u32) {
        {
            let mut state = self.seats.lock().unwrap_or_else(PoisonError::into_inner);
            state.in_use = state.in_use.saturating_sub(seats);
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.events.disposed(request);
    }
}

/// Admits a request only if its seats are free right now.
#[derive(Clone)]
pub struct NoWaitScheduler {
    inner: Arc<Inner>,
    clock: Arc<dyn Clock>,
}

impl NoWaitScheduler {
    /// Creates a scheduler with `total_seats` seats.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if `total_seats` is zero.
    pub fn new(total_seats: u32, events: Arc<dyn SchedulingEvents>) -> SchedulerResult<Self> {
        Self::with_clock(total_seats, events, Arc::new(TokioClock))
    }

    /// Creates a scheduler on the given clock.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if `total_seats` is zero.
    pub fn with_clock(
        total_seats: u32,
        events: Arc<dyn SchedulingEvents>,
        clock: Arc<dyn Clock>,
    ) -> SchedulerResult<Self> {
        if total_seats == 0 {
            return Err(SchedulerError::InvalidConfig {
                message: "seats must be positive".to_string(),
            });
        }
        Ok(Self {
            inner: Arc::new(Inner {
                total_seats,
                seats: Mutex::new(Seats::default()),
                events,
            }),
            clock,
        })
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> NoWaitStats {
        let state = self.inner.seats.lock().unwrap_or_else(PoisonError::into_inner);
        NoWaitStats {
            total_seats: self.inner.total_seats,
            seats_in_use: state.in_use,
            requests_in_flight: state.in_flight,
        }
    }
}

impl Scheduler for NoWaitScheduler {
    fn schedule(&self, request: Arc<Request>) -> SchedulerResult<Finisher> {
        let total_seats = self.inner.total_seats;
        let seats = request.cost().seats.min(total_seats);
        {
            let mut state = self.inner.seats.lock().unwrap_or_else(PoisonError::into_inner);
            if state.in_use.saturating_add(seats) > total_seats {
                debug!(
                    request = %request.label(),
                    seats,
                    seats_in_use = state.in_use,
                    total_seats,
                    "Rejected: no free seats"
                );
                return Err(FairQueueError::Accommodation {
                    seats_requested: seats,
                    seats_in_use: state.in_use,
                    total_seats,
                }
                .into());
            }
            state.in_use += seats;
            state.in_flight += 1;
        }

        let release = Disposer::new({
            let inner = Arc::clone(&self.inner);
            let request = Arc::clone(&request);
            move || inner.release(&request, seats)
        });
        Ok(Finisher::Immediate(ImmediateFinisher {
            request,
            release,
            clock: Arc::clone(&self.clock),
            finished: false,
        }))
    }

    fn name(&self) -> &str {
        "no-wait"
    }
}

impl fmt::Debug for NoWaitScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoWaitScheduler")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Releases the seats when dropped, so a panic in the work cannot leak them.
struct ReleaseGuard<'a>(&'a mut Disposer);

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

/// Finisher for a request admitted without queuing.
pub struct ImmediateFinisher {
    request: Arc<Request>,
    release: Disposer,
    clock: Arc<dyn Clock>,
    finished: bool,
}

impl ImmediateFinisher {
    /// The request this finisher belongs to.
    #[must_use]
    pub const fn request(&self) -> &Arc<Request> {
        &self.request
    }

    /// Runs `execute` and releases the seats, even if it panics or this
    /// future is dropped. A second call returns
    /// [`FinishOutcome::AlreadyFinished`].
    pub async fn finish<F, Fut, T>(&mut self, execute: F) -> FinishOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if self.finished {
            return FinishOutcome::AlreadyFinished;
        }
        self.finished = true;

        let request = Arc::clone(&self.request);
        let latency = request.latency();
        let guard = ReleaseGuard(&mut self.release);

        latency.execution.start(self.clock.now());
        let output = execute().await;
        let now = self.clock.now();
        latency.execution.finish(now);

        drop(guard);
        latency.total.finish(now);
        FinishOutcome::Executed(output)
    }
}

impl Drop for ImmediateFinisher {
    fn drop(&mut self) {
        self.release.dispose();
    }
}

impl fmt::Debug for ImmediateFinisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImmediateFinisher")
            .field("request", &self.request.label())
            .field("release", &self.release)
            .field("finished", &self.finished)
            .finish()
    }
}
