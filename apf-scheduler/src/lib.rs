//! Admission gate and schedulers built on `apf-fairqueue`.
//!
//! The fair queuing core knows nothing about the caller's requests. This
//! crate supplies the layers around it:
//!
//! - **Estimation**: maps a caller request to seats and expected duration.
//! - **Flows**: hashes caller-chosen attributes into a flow id.
//! - **Exemption**: lets selected requests bypass scheduling.
//! - **Schedulers**: a queued scheduler over a `QueueSet`, and a no-wait
//!   scheduler that only counts seats.
//! - **Gate**: the front door that runs a handler only when admitted.
//!
//! # Example
//!
//! ```rust
//! use apf_scheduler::{GateBuilder, Outcome};
//! use apf_fairqueue::RequestContext;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), apf_scheduler::SchedulerError> {
//! let gate = GateBuilder::<str>::new(2)
//!     .with_queuing(64, 4)
//!     .with_flow_distinguisher(|path: &str| vec![path.to_string()])
//!     .build()?;
//!
//! let outcome = gate
//!     .serve("/api/items", RequestContext::new(), || async { 200 })
//!     .await?;
//! assert_eq!(outcome, Outcome::Served(200));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod builder;
pub mod error;
pub mod estimator;
pub mod exempt;
pub mod flow;
pub mod gate;
pub mod nowait;
pub mod queued;
pub mod scheduler;

pub use builder::GateBuilder;
pub use error::{SchedulerError, SchedulerResult};
pub use estimator::{CostEstimator, FnEstimator, UniformEstimator, DEFAULT_DURATION};
pub use exempt::{Exemption, NoExemption};
pub use flow::{compute_flow, FlowDistinguisher};
pub use gate::{Gate, Labeler, Outcome, RejectReason};
pub use nowait::{ImmediateFinisher, NoWaitScheduler, NoWaitStats};
pub use queued::QueuedScheduler;
pub use scheduler::{Finisher, Scheduler};
