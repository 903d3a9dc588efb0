//! App - アプリケーション層
//!
//! TaskQueue と ports を組み合わせて、長時間動くループを提供します。
//!
//! # 主要コンポーネント
//! - **QueueBuilder**: TaskQueue の構築とワイヤリング
//! - **WorkerGroup**: タスク実行ループ（dequeue→handle→complete/fail）
//! - **ReaperLoop**: 期限切れ claim の回収

pub mod builder;
pub mod reaper_loop;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::QueueBuilder;
pub use self::reaper_loop::{ReaperHandle, ReaperLoop};
pub use self::worker_loop::{HandlerError, TaskHandler, WorkerGroup, WorkerOptions};
