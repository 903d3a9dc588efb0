//! Domain model (ids, task, state, events).

pub mod events;
pub mod ids;
pub mod state;
pub mod task;

pub use events::{Cause, TaskEvent, Transition};
pub use ids::{TaskId, WorkerId};
pub use state::TaskState;
pub use task::{Priority, Task};
