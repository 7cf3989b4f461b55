//! One-shot decision cell.
//!
//! A queued request is resolved exactly once, either by the dispatcher
//! (`Execute`) or by its own wait budget running out (`Timeout`). Whoever
//! writes first wins; later writes are no-ops that report `false`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome assigned to a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Decision {
    /// Not decided yet.
    #[default]
    None = 0,
    /// The request's wait budget ran out (or its caller cancelled).
    Timeout = 1,
    /// The request was chosen for execution.
    Execute = 2,
}

impl Decision {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Timeout,
            2 => Self::Execute,
            _ => Self::None,
        }
    }

    /// Returns whether the decision is final.
    #[must_use]
    pub const fn is_decided(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Timeout => f.write_str("timeout"),
            Self::Execute => f.write_str("execute"),
        }
    }
}

/// Write-once decision cell with an async wait.
#[derive(Debug, Default)]
pub struct DecisionPromise {
    value: AtomicU8,
    decided: Notify,
}

impl DecisionPromise {
    /// Creates an undecided promise.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current decision without waiting.
    #[must_use]
    pub fn decision(&self) -> Decision {
        Decision::from_u8(self.value.load(Ordering::Acquire))
    }

    /// Sets the decision if nobody has yet.
    ///
    /// Returns `true` only for the first successful write. Writing
    /// [`Decision::None`] is refused.
    pub fn set_decision(&self, decision: Decision) -> bool {
        if !decision.is_decided() {
            return false;
        }

        let won = self
            .value
            .compare_exchange(
                Decision::None as u8,
                decision as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            self.decided.notify_waiters();
        }
        won
    }

    /// Waits until the decision is set, the deadline passes, or `cancel`
    /// fires.
    ///
    /// On deadline or cancellation the promise tries to set
    /// [`Decision::Timeout`] itself, then returns whatever value won. The
    /// result is therefore never [`Decision::None`].
    pub async fn wait_for_decision(&self, deadline: Instant, cancel: &CancellationToken) -> Decision {
        loop {
            let notified = self.decided.notified();
            tokio::pin!(notified);
            // Register before reading so a write between the read and the
            // await still wakes us.
            notified.as_mut().enable();

            let current = self.decision();
            if current.is_decided() {
                return current;
            }

            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep_until(deadline) => {
                    self.set_decision(Decision::Timeout);
                    return self.decision();
                }
                () = cancel.cancelled() => {
                    self.set_decision(Decision::Timeout);
                    return self.decision();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_first_write_wins() {
        let promise = DecisionPromise::new();
        assert_eq!(promise.decision(), Decision::None);

        assert!(promise.set_decision(Decision::Execute));
        assert!(!promise.set_decision(Decision::Timeout));
        assert!(!promise.set_decision(Decision::Execute));
        assert_eq!(promise.decision(), Decision::Execute);
    }

    #[test]
    fn test_none_is_not_a_decision() {
        let promise = DecisionPromise::new();
        assert!(!promise.set_decision(Decision::None));
        assert!(promise.set_decision(Decision::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_value_set_by_another_task() {
        let promise = Arc::new(DecisionPromise::new());
        let setter = Arc::clone(&promise);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(setter.set_decision(Decision::Execute));
        });

        let deadline = Instant::now() + Duration::from_secs(1);
        let decision = promise
            .wait_for_decision(deadline, &CancellationToken::new())
            .await;
        assert_eq!(decision, Decision::Execute);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_and_sets_timeout() {
        let promise = DecisionPromise::new();
        let deadline = Instant::now() + Duration::from_secs(3);

        let decision = promise
            .wait_for_decision(deadline, &CancellationToken::new())
            .await;

        assert_eq!(decision, Decision::Timeout);
        assert!(Instant::now() >= deadline);
        // A late dispatcher loses.
        assert!(!promise.set_decision(Decision::Execute));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_resolves_to_timeout() {
        let promise = DecisionPromise::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let deadline = Instant::now() + Duration::from_secs(60);
        let decision = promise.wait_for_decision(deadline, &cancel).await;
        assert_eq!(decision, Decision::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_waits_return_same_value() {
        let promise = DecisionPromise::new();
        let cancel = CancellationToken::new();
        let deadline = Instant::now() + Duration::from_millis(5);

        let first = promise.wait_for_decision(deadline, &cancel).await;
        let second = promise.wait_for_decision(deadline, &cancel).await;
        assert_eq!(first, Decision::Timeout);
        assert_eq!(first, second);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_execute_and_deadline_single_winner() {
        for _ in 0..200 {
            let promise = Arc::new(DecisionPromise::new());
            let setter = Arc::clone(&promise);
            let deadline = Instant::now() + Duration::from_micros(50);

            let dispatcher = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_micros(50)).await;
                setter.set_decision(Decision::Execute)
            });
            let waited = promise
                .wait_for_decision(deadline, &CancellationToken::new())
                .await;
            let dispatcher_won = dispatcher.await.unwrap();

            assert!(waited.is_decided());
            assert_eq!(dispatcher_won, waited == Decision::Execute);
            assert_eq!(promise.decision(), waited);
        }
    }
}
