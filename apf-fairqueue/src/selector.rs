//! Queue selection policies.
//!
//! A selector maps an arriving flow onto one queue of the set. Selectors run
//! under the queue set lock and only read queue state.

use crate::dealer::Dealer;
use crate::error::{FairQueueError, FairQueueResult};
use crate::fair_queue::FairQueueAccessor;
use crate::types::{FlowId, QueueIndex};

/// Chooses the queue an arriving request joins.
pub trait QueueSelector: Send {
    /// Returns the queue for a request of `flow`.
    ///
    /// # Errors
    ///
    /// Returns `FairQueueError::QueueAssignment` if no usable queue exists.
    fn select_queue(
        &mut self,
        queues: &dyn FairQueueAccessor,
        flow: FlowId,
    ) -> FairQueueResult<QueueIndex>;

    /// Short policy name for logs.
    fn name(&self) -> &'static str;
}

/// Cycles through the queues regardless of flow.
#[derive(Debug, Clone, Default)]
pub struct RoundRobinSelector {
    cursor: usize,
}

impl RoundRobinSelector {
    /// Creates a selector whose first pick is queue 1 (or 0 with one queue).
    #[must_use]
    pub const fn new() -> Self {
        Self { cursor: 0 }
    }
}

impl QueueSelector for RoundRobinSelector {
    fn select_queue(
        &mut self,
        queues: &dyn FairQueueAccessor,
        _flow: FlowId,
    ) -> FairQueueResult<QueueIndex> {
        let total = queues.total_queues();
        if total == 0 {
            return Err(FairQueueError::QueueAssignment {
                message: "no queues configured".to_string(),
            });
        }

        self.cursor = (self.cursor + 1) % total;
        let index = u32::try_from(self.cursor).map_err(|_| FairQueueError::QueueAssignment {
            message: format!("queue position {} out of range", self.cursor),
        })?;
        Ok(QueueIndex::new(index))
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}

/// Deals each flow a fixed hand of queues and picks the least loaded one.
///
/// Load is the queue's projected virtual finish time. Ties go to the card
/// dealt first.
#[derive(Debug, Clone)]
pub struct ShuffleShardingSelector {
    dealer: Dealer,
    hand: Vec<u32>,
}

impl ShuffleShardingSelector {
    /// Creates a selector over `deck_size` queues with hands of `hand_size`.
    ///
    /// # Errors
    ///
    /// Returns `FairQueueError::InvalidConfig` if the dealer rejects the
    /// sizes.
    pub fn new(deck_size: u32, hand_size: u32) -> FairQueueResult<Self> {
        let dealer = Dealer::new(deck_size, hand_size)?;
        Ok(Self {
            dealer,
            hand: Vec::with_capacity(hand_size as usize),
        })
    }

    /// Returns the dealer.
    #[must_use]
    pub const fn dealer(&self) -> &Dealer {
        &self.dealer
    }
}

impl QueueSelector for ShuffleShardingSelector {
    fn select_queue(
        &mut self,
        queues: &dyn FairQueueAccessor,
        flow: FlowId,
    ) -> FairQueueResult<QueueIndex> {
        let deck = self.dealer.deck_size() as usize;
        if deck != queues.total_queues() {
            return Err(FairQueueError::QueueAssignment {
                message: format!(
                    "deck size {deck} does not match {} queues",
                    queues.total_queues()
                ),
            });
        }

        self.dealer.deal_into_hand(flow.get(), &mut self.hand);

        let mut best = None;
        for &card in &self.hand {
            let index = QueueIndex::new(card);
            let queue = queues
                .queue(index)
                .ok_or_else(|| FairQueueError::QueueAssignment {
                    message: format!("{index} missing from queue set"),
                })?;
            let load = queue.next_finish_r();
            if best.map_or(true, |(_, least)| load < least) {
                best = Some((index, load));
            }
        }

        best.map(|(index, _)| index)
            .ok_or_else(|| FairQueueError::QueueAssignment {
                message: "empty hand".to_string(),
            })
    }

    fn name(&self) -> &'static str {
        "shuffle-sharding"
    }
}
