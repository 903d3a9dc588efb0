//! ReaperLoop - 期限切れ claim の回収
//!
//! # フロー
//! 1. interval ごとに TaskQueue::reap_expired_with() を呼ぶ
//! 2. LivenessTracker::sweep() で期限切れを検出
//! 3. attempts が残っていれば Queued に戻す、なければ Failed
//!
//! ループはキューへの Weak 参照しか持たないので、キューが drop されたら止まります。

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::queue::TaskQueue;
use crate::queue::task_queue::Shared;

pub struct ReaperLoop<P> {
    queue: Weak<Shared<P>>,
    timeout: Duration,
    interval: Duration,
}

impl<P> ReaperLoop<P> {
    pub fn new(queue: &TaskQueue<P>, timeout: Duration, interval: Duration) -> Self {
        Self {
            queue: queue.downgrade(),
            timeout,
            // tokio の interval は 0 を受け付けない
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Run until `shutdown` becomes true, its sender is dropped, or the queue
    /// is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            timeout_ms = self.timeout.as_millis() as u64,
            interval_ms = self.interval.as_millis() as u64,
            "reaper started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let Some(queue) = TaskQueue::upgrade(&self.queue) else {
                tracing::debug!("queue dropped, reaper exiting");
                break;
            };
            queue.reap_expired_with(self.timeout);
        }

        tracing::info!("reaper stopped");
    }
}

/// Owner's handle on a spawned reaper.
///
/// Dropping the handle stops the reaper as well.
pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop the reaper and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.request_shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.request_shutdown();
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

impl<P> TaskQueue<P> {
    /// Long-lived reaper loop: every `interval`, recover claims older than
    /// `timeout`. Returns when `shutdown` flips to true or its sender is dropped.
    pub async fn run_reaper(
        &self,
        timeout: Duration,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) {
        ReaperLoop::new(self, timeout, interval).run(shutdown).await;
    }
}

impl<P: Send + Sync + 'static> TaskQueue<P> {
    /// Spawn the reaper with the configured timeout and interval on the
    /// current tokio runtime. One per queue is enough.
    pub fn spawn_reaper(&self) -> ReaperHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reaper = ReaperLoop::new(self, self.config().reap_timeout, self.config().reap_interval);
        let join = tokio::spawn(reaper.run(shutdown_rx));
        ReaperHandle {
            shutdown_tx,
            join: Some(join),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::domain::TaskState;

    fn fast_config() -> QueueConfig {
        QueueConfig::new(3, Duration::from_millis(40), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn spawned_reaper_requeues_abandoned_task() {
        let queue: TaskQueue<&'static str> = TaskQueue::new(fast_config()).unwrap();
        let reaper = queue.spawn_reaper();

        let id = queue.enqueue(0, "x", None).unwrap();
        queue.try_dequeue("crashed").unwrap();

        let recovered = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if queue.get(id).map(|t| t.state()) == Some(TaskState::Queued) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(recovered.is_ok(), "reaper did not recover the task");

        reaper.shutdown().await;
    }

    #[tokio::test]
    async fn run_reaper_stops_on_shutdown_signal() {
        let queue: TaskQueue<()> = TaskQueue::new(fast_config()).unwrap();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let queue = queue.clone();
            async move { queue.run_reaper(Duration::from_millis(40), Duration::from_millis(10), rx).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reaper should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn reaper_exits_when_queue_is_dropped() {
        let queue: TaskQueue<()> = TaskQueue::new(fast_config()).unwrap();
        let reaper = queue.spawn_reaper();
        drop(queue);

        tokio::time::timeout(Duration::from_secs(1), async {
            while !reaper.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("reaper should notice the queue is gone");
    }
}
