//! EventSink port - 状態遷移イベントの通知先
//!
//! - NoopEventSink: 何もしない（デフォルト）
//! - TracingEventSink: tracing の構造化イベントとして出力
//!
//! キューはロックを解放してから emit を呼びます。実装は短時間で戻ること。
//! 呼び出し順は遷移順と一致しないことがあります（同じタスクでも）。順序が必要なら
//! TaskEvent::seq で並べ替えてください。

use crate::domain::{TaskEvent, Transition};

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &TaskEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &TaskEvent) {}
}

/// Emits every transition as a `tracing` event under the `ferry::events` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &TaskEvent) {
        let worker = event.worker_id.as_ref().map(|w| w.as_str()).unwrap_or("-");
        match event.transition {
            Transition::Failed => tracing::warn!(
                target: "ferry::events",
                seq = event.seq,
                task_id = %event.task_id,
                transition = ?event.transition,
                cause = ?event.cause,
                worker,
                attempts = event.attempts,
                "task transition"
            ),
            _ => tracing::info!(
                target: "ferry::events",
                seq = event.seq,
                task_id = %event.task_id,
                transition = ?event.transition,
                cause = ?event.cause,
                worker,
                attempts = event.attempts,
                "task transition"
            ),
        }
    }
}
