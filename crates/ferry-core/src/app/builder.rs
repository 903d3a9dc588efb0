//! QueueBuilder - TaskQueue の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - build() 時に QueueConfig を検証
//! - 不正な設定は ConfigError として返す（キューは作られない）

use std::marker::PhantomData;
use std::sync::Arc;

use crate::config::QueueConfig;
use crate::error::ConfigError;
use crate::ports::{Clock, EventSink, IdGenerator, NoopEventSink, SystemClock, UlidGenerator};
use crate::queue::TaskQueue;

/// QueueBuilder は TaskQueue を構築
///
/// # 使用例
/// ```ignore
/// let queue: TaskQueue<Job> = TaskQueue::builder(config)
///     .clock(ManualClock::new(start))
///     .event_sink(Arc::new(TracingEventSink))
///     .build()?;
/// ```
///
/// 指定しなかった port は SystemClock / UlidGenerator / NoopEventSink になります。
pub struct QueueBuilder<P> {
    config: QueueConfig,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    sink: Option<Arc<dyn EventSink>>,
    _payload: PhantomData<fn() -> P>,
}

impl<P> QueueBuilder<P> {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            clock: None,
            ids: None,
            sink: None,
            _payload: PhantomData,
        }
    }

    /// 時刻の取得元を差し替え（テストでは ManualClock）
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    /// 状態遷移ごとに呼ばれる通知先
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<TaskQueue<P>, ConfigError> {
        self.config.validate()?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let sink = self.sink.unwrap_or_else(|| Arc::new(NoopEventSink));

        Ok(TaskQueue::from_parts(self.config, clock, ids, sink))
    }
}
