//! Strongly-typed identifiers and the virtual-time unit.
//!
//! Explicit types keep flow ids, queue indices and seat-seconds from being
//! mixed up with each other or with raw integers.

use std::fmt;
use std::ops::{Add, AddAssign};
use std::time::Duration;

/// Identifier of a flow: a hash of caller-chosen distinguishing attributes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct FlowId(u64);

impl FlowId {
    /// Creates a flow id from a raw hash value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw hash value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow({:#018x})", self.0)
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow-{:016x}", self.0)
    }
}

impl From<u64> for FlowId {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

/// Position of a fair queue inside its queue set. Stable for the queue set's
/// lifetime.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct QueueIndex(u32);

impl QueueIndex {
    /// Creates a queue index.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns the index as a slice position.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for QueueIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue({})", self.0)
    }
}

impl fmt::Display for QueueIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue-{}", self.0)
    }
}

/// Virtual time and request width, in fixed-point seat-seconds.
///
/// One unit is a nano-seat-second, so `seats × duration` is exact for any
/// duration representable in nanoseconds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct SeatSeconds(u64);

impl SeatSeconds {
    /// Units per seat-second.
    pub const UNITS_PER_SEAT_SECOND: u64 = 1_000_000_000;

    /// Lowest representable value.
    pub const MIN: Self = Self(0);

    /// Highest representable value.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a value from raw nano-seat-seconds.
    #[inline]
    #[must_use]
    pub const fn from_units(units: u64) -> Self {
        Self(units)
    }

    /// Returns raw nano-seat-seconds.
    #[inline]
    #[must_use]
    pub const fn units(self) -> u64 {
        self.0
    }

    /// Returns `seats × duration`, saturating at [`Self::MAX`].
    #[must_use]
    pub fn seats_times(seats: u32, duration: Duration) -> Self {
        let product = u128::from(seats) * duration.as_nanos();
        Self(u64::try_from(product).unwrap_or(u64::MAX))
    }

    /// Returns the value as floating-point seat-seconds, for display.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Display only.
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / Self::UNITS_PER_SEAT_SECOND as f64
    }
}

impl Add for SeatSeconds {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for SeatSeconds {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl fmt::Debug for SeatSeconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9}ss", self.as_f64())
    }
}

impl fmt::Display for SeatSeconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}ss", self.as_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seats_times_duration() {
        let width = SeatSeconds::seats_times(2, Duration::from_millis(1500));
        assert_eq!(width.units(), 3 * SeatSeconds::UNITS_PER_SEAT_SECOND);
    }

    #[test]
    fn test_seats_times_saturates() {
        let width = SeatSeconds::seats_times(u32::MAX, Duration::MAX);
        assert_eq!(width, SeatSeconds::MAX);
    }

    #[test]
    fn test_add_saturates() {
        let sum = SeatSeconds::MAX + SeatSeconds::from_units(1);
        assert_eq!(sum, SeatSeconds::MAX);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", QueueIndex::new(3)), "queue-3");
        assert_eq!(format!("{}", FlowId::new(0xab)), "flow-00000000000000ab");
        assert_eq!(format!("{}", SeatSeconds::from_units(1_500_000_000)), "1.500000ss");
    }
}
