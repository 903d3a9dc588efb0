//! ferry-core
//!
//! In-process priority task queue with claim tracking and zombie recovery.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, state, events）
//! - **queue**: TaskQueue 本体（PriorityIndex, LivenessTracker）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, EventSink）
//! - **app**: 構築と長時間ループ（QueueBuilder, WorkerGroup, ReaperLoop）
//! - **config**: QueueConfig
//! - **error**: QueueError / ConfigError
//! - **observability**: QueueStats
//!
//! ```ignore
//! let queue: TaskQueue<String> = TaskQueue::new(QueueConfig::default())?;
//! let reaper = queue.spawn_reaper();
//!
//! let id = queue.enqueue(Priority::HIGH, "resize".to_string(), None)?;
//! if let Some(task) = queue.dequeue("worker-1", Some(Duration::from_secs(1))).await {
//!     queue.complete(task.id(), &WorkerId::new("worker-1"))?;
//! }
//! ```

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod ports;
pub mod queue;

pub use app::{HandlerError, QueueBuilder, ReaperHandle, TaskHandler, WorkerGroup, WorkerOptions};
pub use config::QueueConfig;
pub use domain::{Priority, Task, TaskEvent, TaskId, TaskState, WorkerId};
pub use error::{ConfigError, QueueError};
pub use observability::QueueStats;
pub use queue::{FailOutcome, ReapReport, TaskQueue};
