//! Testset execution engine
//!
//! One work queue and worker pool per group, skip gates, the failure
//! boundary around each unit and the driver running a whole plan.

mod aggregator;
mod boundary;
mod driver;
mod gate;
mod pool;
mod queue;
mod worker;

pub use aggregator::{ResultAggregator, RunResults};
pub use boundary::{describe, execute, panic_message, Phase, UnitFault, FALLBACK_MESSAGE};
pub use driver::{CancelFlag, Scheduler, SchedulerOptions};
pub use gate::{evaluate, SkipReason};
pub use pool::WorkerPool;
pub use queue::{QueueClosed, WorkItem, WorkQueue};
