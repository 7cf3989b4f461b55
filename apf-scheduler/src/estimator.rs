//! Cost estimation.
//!
//! An estimator maps a caller request onto a [`CostEstimate`]: how many seats
//! it occupies and for roughly how long.

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use apf_fairqueue::CostEstimate;

use crate::error::SchedulerResult;

/// Service time assumed when an estimator reports none.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(1);

/// Estimates the cost of a caller request.
pub trait CostEstimator<Req: ?Sized>: Send + Sync {
    /// Returns the cost of `request`.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Estimate` if the cost cannot be determined.
    fn estimate(&self, request: &Req) -> SchedulerResult<CostEstimate>;
}

/// Charges every request one seat for one second.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformEstimator;

impl<Req: ?Sized> CostEstimator<Req> for UniformEstimator {
    fn estimate(&self, _request: &Req) -> SchedulerResult<CostEstimate> {
        Ok(CostEstimate::new(1, DEFAULT_DURATION))
    }
}

/// Estimator backed by a closure returning `(seats, duration)`.
///
/// Zero seats become 1 and a zero duration becomes [`DEFAULT_DURATION`].
pub struct FnEstimator<Req: ?Sized, F> {
    f: F,
    _request: PhantomData<fn(&Req)>,
}

impl<Req: ?Sized, F> FnEstimator<Req, F>
where
    F: Fn(&Req) -> (u32, Duration) + Send + Sync,
{
    /// Wraps `f`.
    pub const fn new(f: F) -> Self {
        Self {
            f,
            _request: PhantomData,
        }
    }
}

impl<Req: ?Sized, F> CostEstimator<Req> for FnEstimator<Req, F>
where
    F: Fn(&Req) -> (u32, Duration) + Send + Sync,
{
    fn estimate(&self, request: &Req) -> SchedulerResult<CostEstimate> {
        let (seats, duration) = (self.f)(request);
        let duration = if duration.is_zero() {
            DEFAULT_DURATION
        } else {
            duration
        };
        Ok(CostEstimate::new(seats, duration))
    }
}

impl<Req: ?Sized, F> fmt::Debug for FnEstimator<Req, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnEstimator").finish_non_exhaustive()
    }
}
