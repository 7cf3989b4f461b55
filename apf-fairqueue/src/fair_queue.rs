//! Per-flow fair queue.
//!
//! A `FairQueue` is a strict FIFO of waiting requests plus the counters the
//! queue set needs for admission, virtual-clock demand, and queue selection.
//! Each request gets a virtual start and finish time when it is enqueued:
//!
//! ```text
//! start_r  = max(R, next_finish_r)
//! finish_r = start_r + seats × duration
//! ```
//!
//! `next_finish_r` is the finish time of the newest request. It restarts from
//! the current `R` whenever the queue goes from fully idle (empty, no seats in
//! use) to busy, so a flow that was quiet cannot bank credit.
//!
//! Nothing here locks. The owning queue set serializes all access.

use std::sync::Arc;

use crate::fifo::{Fifo, FifoHandle};
use crate::promise::Decision;
use crate::request::Request;
use crate::types::{QueueIndex, SeatSeconds};

/// Seat counters of a queue or queue set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeatCount {
    /// Seats charged to requests still waiting.
    pub waiting: u32,
    /// Seats held by executing requests.
    pub in_use: u32,
}

impl SeatCount {
    /// Returns `waiting + in_use`.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.waiting.saturating_add(self.in_use)
    }
}

/// Request counters of a queue or queue set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestCount {
    /// Requests waiting in a FIFO.
    pub waiting: u32,
    /// Requests currently executing.
    pub executing: u32,
}

/// A waiting request together with the seats it was charged.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    /// The request.
    pub request: Arc<Request>,
    /// Seats charged, already capped at the queue set's capacity.
    pub seats: u32,
}

/// Result of [`FairQueue::dequeue_for_execution`].
#[derive(Debug)]
pub enum DequeueOutcome {
    /// The queue had nothing waiting.
    Empty,
    /// The head was removed, but its decision had already been set to
    /// timeout. No executing counter was touched.
    LostRace(QueuedRequest),
    /// The head was removed and is now executing.
    Executing(QueuedRequest),
}

/// A FIFO of requests belonging to the flows hashed onto it.
#[derive(Debug)]
pub struct FairQueue {
    index: QueueIndex,
    fifo: Fifo<QueuedRequest>,
    seats: SeatCount,
    requests: RequestCount,
    next_finish_r: SeatSeconds,
}

impl FairQueue {
    /// Creates an empty queue.
    #[must_use]
    pub const fn new(index: QueueIndex) -> Self {
        Self {
            index,
            fifo: Fifo::new(),
            seats: SeatCount {
                waiting: 0,
                in_use: 0,
            },
            requests: RequestCount {
                waiting: 0,
                executing: 0,
            },
            next_finish_r: SeatSeconds::MIN,
        }
    }

    /// Returns this queue's position in its queue set.
    #[must_use]
    pub const fn index(&self) -> QueueIndex {
        self.index
    }

    /// Returns the number of waiting requests.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.fifo.len()
    }

    /// Returns whether nothing is waiting.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    /// Returns whether nothing is waiting and nothing is executing.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.fifo.is_empty() && self.seats.in_use == 0
    }

    /// Returns the oldest waiting request.
    #[must_use]
    pub fn peek(&self) -> Option<&QueuedRequest> {
        self.fifo.peek()
    }

    /// Returns the seat counters.
    #[must_use]
    pub const fn work(&self) -> SeatCount {
        self.seats
    }

    /// Returns the request counters.
    #[cfg(test)]
    #[must_use]
    pub const fn requests(&self) -> RequestCount {
        self.requests
    }

    /// Returns the virtual finish time of the newest request.
    #[must_use]
    pub const fn next_finish_r(&self) -> SeatSeconds {
        self.next_finish_r
    }

    /// Appends `request`, charging it `seats`, and stamps its virtual times
    /// against the current virtual time `rt`.
    ///
    /// Returns the handle [`Self::remove_timed_out`] needs later.
    pub fn enqueue(&mut self, request: Arc<Request>, seats: u32, rt: SeatSeconds) -> FifoHandle {
        if self.is_idle() {
            self.next_finish_r = rt;
        }

        let start_r = rt.max(self.next_finish_r);
        let finish_r = start_r + SeatSeconds::seats_times(seats, request.cost().duration);
        request.on_start(rt, start_r, finish_r);
        self.next_finish_r = finish_r;

        self.seats.waiting = self.seats.waiting.saturating_add(seats);
        self.requests.waiting = self.requests.waiting.saturating_add(1);
        self.fifo.push_back(QueuedRequest { request, seats })
    }

    /// Pops the head and tries to decide it for execution.
    ///
    /// Waiting counters are reversed and `on_dequeued` runs before the
    /// decision is attempted. Only if this call wins the decision are the
    /// executing counters raised and `on_decided` run.
    pub fn dequeue_for_execution(
        &mut self,
        on_dequeued: impl FnOnce(&QueuedRequest),
        on_decided: impl FnOnce(&QueuedRequest),
    ) -> DequeueOutcome {
        let Some(entry) = self.fifo.pop_front() else {
            return DequeueOutcome::Empty;
        };

        self.release_waiting(entry.seats);
        on_dequeued(&entry);

        if !entry.request.decision().set_decision(Decision::Execute) {
            return DequeueOutcome::LostRace(entry);
        }

        self.seats.in_use = self.seats.in_use.saturating_add(entry.seats);
        self.requests.executing = self.requests.executing.saturating_add(1);
        on_decided(&entry);
        DequeueOutcome::Executing(entry)
    }

    /// Removes a timed-out request if it is still waiting.
    ///
    /// Returns the removed entry, or `None` if dispatch already took it. Only
    /// a successful removal reverses the waiting counters, so calling this
    /// again, or after a lost dispatch race, changes nothing.
    pub fn remove_timed_out(&mut self, handle: FifoHandle) -> Option<QueuedRequest> {
        let entry = self.fifo.remove(handle)?;
        self.release_waiting(entry.seats);
        Some(entry)
    }

    /// Releases the seats of a request that finished executing.
    pub fn finish_execution(&mut self, seats: u32) {
        self.seats.in_use = self.seats.in_use.saturating_sub(seats);
        self.requests.executing = self.requests.executing.saturating_sub(1);
    }

    fn release_waiting(&mut self, seats: u32) {
        self.seats.waiting = self.seats.waiting.saturating_sub(seats);
        self.requests.waiting = self.requests.waiting.saturating_sub(1);
    }
}

/// Read-only view over a queue set's queues, handed to selectors.
pub trait FairQueueAccessor {
    /// Returns the number of queues.
    fn total_queues(&self) -> usize;

    /// Returns the queue at `index`, if it exists.
    fn queue(&self, index: QueueIndex) -> Option<&FairQueue>;
}

impl FairQueueAccessor for Vec<FairQueue> {
    fn total_queues(&self) -> usize {
        self.len()
    }

    fn queue(&self, index: QueueIndex) -> Option<&FairQueue> {
        self.get(index.as_usize())
    }
}
