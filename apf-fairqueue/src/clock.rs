//! Wall-clock access and the virtual clock.
//!
//! The virtual clock advances `R` the way generalized processor sharing would
//! serve the currently active queues: each tick adds
//! `(seats_requested / active_queues) × elapsed` seat-seconds. `R` never
//! decreases.
//!
//! Wall time comes from a [`Clock`] so that tests can run under tokio's
//! paused time and still observe deterministic virtual time.

use std::time::Duration;

use tokio::time::Instant;

use crate::types::SeatSeconds;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// [`Clock`] backed by `tokio::time::Instant::now`, which follows tokio's
/// paused clock in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Instantaneous demand across a queue set, used to advance virtual time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Demand {
    /// Seats requested by all queues (waiting plus in use), capped at the
    /// total seat capacity.
    pub seats_requested: u32,
    /// Number of queues that are not idle.
    pub active_queues: u32,
}

/// Virtual clock shared by every queue of a queue set.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    /// Current virtual time.
    r: SeatSeconds,
    /// Wall time of the previous tick.
    last_tick: Instant,
}

impl VirtualClock {
    /// Creates a virtual clock at `R = 0`.
    #[must_use]
    pub const fn new(now: Instant) -> Self {
        Self {
            r: SeatSeconds::MIN,
            last_tick: now,
        }
    }

    /// Returns the current virtual time without side effects.
    #[must_use]
    pub const fn rt(&self) -> SeatSeconds {
        self.r
    }

    /// Returns the wall time of the previous tick.
    #[cfg(test)]
    #[must_use]
    pub const fn last_tick(&self) -> Instant {
        self.last_tick
    }

    /// Advances virtual time for the wall time elapsed since the last tick.
    ///
    /// `demand` is queried once. When no queue is active the clock does not
    /// move, but the tick still counts as the new reference point.
    pub fn tick(&mut self, now: Instant, demand: impl FnOnce() -> Demand) {
        let elapsed = now.saturating_duration_since(self.last_tick);
        if now > self.last_tick {
            self.last_tick = now;
        }

        let demand = demand();
        if demand.active_queues == 0 {
            return;
        }

        self.r += Self::increment(demand, elapsed);
    }

    /// Returns `(seats_requested / active_queues) × elapsed`.
    fn increment(demand: Demand, elapsed: Duration) -> SeatSeconds {
        let numerator = u128::from(demand.seats_requested) * elapsed.as_nanos();
        let units = numerator / u128::from(demand.active_queues);
        SeatSeconds::from_units(u64::try_from(units).unwrap_or(u64::MAX))
    }
}
