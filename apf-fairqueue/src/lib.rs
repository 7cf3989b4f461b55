//! Fair queuing core for admission control.
//!
//! This crate decides, for each unit of work arriving at a server with a fixed
//! concurrency budget, whether it runs now, waits briefly in a queue, or is
//! rejected, without letting any one flow starve the others. It includes:
//!
//! - **Virtual clock**: a demand-weighted fairness clock `R`, in seat-seconds.
//! - **Fair queues**: per-flow FIFOs stamping each request with a virtual
//!   start and finish time (start-time fair queuing).
//! - **Queue selection**: round-robin, or shuffle sharding over a hand of
//!   queues dealt from the flow hash.
//! - **Queue set**: admission, dispatch of the globally fairest head, and seat
//!   accounting under one lock.
//! - **Decision promise and finisher**: a write-once Execute/Timeout cell and
//!   the caller-side sequencing of wait, work, and exactly-once cleanup.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────── QueueSet ───────────────────────────────┐
//! │                                                                         │
//! │  ┌──────────────┐   ┌────────────────────────────┐   ┌───────────────┐  │
//! │  │ QueueSelector│──▶│ FairQueue × N (FIFO + R)   │──▶│   dispatch    │  │
//! │  └──────────────┘   └────────────────────────────┘   └───────┬───────┘  │
//! │                          ▲  VirtualClock (shared)            │          │
//! └──────────────────────────┼───────────────────────────────────┼──────────┘
//!                            │                                   ▼
//!                      post_timeout / post_execution ◀── QueuedFinisher
//! ```
//!
//! # Deterministic Time
//!
//! Wall time is read through the [`Clock`] trait and virtual time only moves
//! on explicit ticks, so tests run under tokio's paused clock with exact,
//! repeatable virtual times.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use apf_fairqueue::{
//!     CostEstimate, FlowId, NoEvents, QueueSet, QueueSetConfig, Request, RequestContext,
//!     SelectorConfig,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), apf_fairqueue::FairQueueError> {
//! let config = QueueSetConfig::for_testing().with_queue_count(4);
//! let selector = SelectorConfig::ShuffleSharding { hand_size: 2 }.build(config.queue_count)?;
//! let queue_set = QueueSet::new(config, selector, Arc::new(NoEvents))?;
//!
//! let request = Arc::new(Request::new(
//!     "/healthz",
//!     FlowId::new(7),
//!     CostEstimate::new(1, Duration::from_millis(100)),
//!     RequestContext::new(),
//!     tokio::time::Instant::now(),
//! ));
//! let mut finisher = queue_set.enqueue(request)?;
//! queue_set.dispatch()?;
//!
//! let outcome = finisher.finish(|| async { "served" }).await;
//! assert!(outcome.is_executed());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod dealer;
pub mod error;
pub mod events;
pub mod fair_queue;
pub mod fifo;
pub mod finisher;
pub mod promise;
pub mod queue_set;
pub mod request;
pub mod selector;
pub mod types;

// Re-export main types for convenience.
pub use clock::{Clock, Demand, TokioClock, VirtualClock};
pub use config::{QueueSetConfig, QueueWaitConfig, SelectorConfig};
pub use dealer::Dealer;
pub use error::{FairQueueError, FairQueueResult};
pub use events::{NoEvents, SchedulingEvents, TracingEvents};
pub use fair_queue::{
    DequeueOutcome, FairQueue, FairQueueAccessor, QueuedRequest, RequestCount, SeatCount,
};
pub use fifo::{Fifo, FifoHandle};
pub use finisher::{Disposer, FinishOutcome, QueueCleanupCallbacks, QueuedFinisher};
pub use promise::{Decision, DecisionPromise};
pub use queue_set::{QueueSet, QueueSetStats};
pub use request::{
    CostEstimate, LatencyTracker, LatencyTrackers, Request, RequestContext, Stopwatch,
    VirtualTimes,
};
pub use selector::{QueueSelector, RoundRobinSelector, ShuffleShardingSelector};
pub use types::{FlowId, QueueIndex, SeatSeconds};
