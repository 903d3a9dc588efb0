//! Queue module: priority index, liveness tracking, and the coordinator that
//! keeps them consistent with the task registry.

mod liveness;
mod priority;
pub(crate) mod task_queue;

pub use liveness::{Claim, LivenessTracker, Zombie};
pub use priority::PriorityIndex;
pub use task_queue::{FailOutcome, ReapReport, TaskQueue};
