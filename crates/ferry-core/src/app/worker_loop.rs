//! WorkerLoop - タスク実行ループ
//!
//! # フロー
//! 1. TaskQueue::dequeue() で claim（shutdown と select で競合させる）
//! 2. TaskHandler を実行（heartbeat_every ごとに heartbeat）
//! 3. 結果を complete / fail_with_error で報告
//!
//! 報告が OwnershipMismatch になった場合は reaper に回収済み。警告を出して次へ進む。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::{Task, WorkerId};
use crate::error::QueueError;
use crate::queue::TaskQueue;

/// Outcome of a handler that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Worth another attempt (subject to max_attempts).
    #[error("retryable: {0}")]
    Retryable(String),

    /// Retrying won't help.
    #[error("permanent: {0}")]
    Permanent(String),
}

/// The work itself. The queue never looks at the payload; handlers do.
#[async_trait]
pub trait TaskHandler<P>: Send + Sync {
    async fn handle(&self, task: &Task<P>) -> Result<(), HandlerError>;
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub workers: usize,
    /// Worker ids are `{id_prefix}-{n}`.
    pub id_prefix: String,
    /// Refresh the claim while a handler runs. `None` = never, so the reap
    /// timeout caps total handler time.
    pub heartbeat_every: Option<Duration>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            id_prefix: "worker".to_string(),
            heartbeat_every: None,
        }
    }
}

/// Worker group handle.
/// - `request_shutdown()` で新しい claim を止める（実行中の handler は最後まで走る）
/// - `shutdown_and_join()` で全ワーカーの終了を待つ
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    pub fn spawn<P, H>(queue: TaskQueue<P>, handler: Arc<H>, options: WorkerOptions) -> Self
    where
        P: Send + Sync + 'static,
        H: TaskHandler<P> + ?Sized + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..options.workers)
            .map(|n| {
                let worker_id = WorkerId::new(format!("{}-{n}", options.id_prefix));
                let queue = queue.clone();
                let handler = Arc::clone(&handler);
                let heartbeat_every = options.heartbeat_every;
                let mut rx = shutdown_rx.clone();

                tokio::spawn(async move {
                    worker_loop(worker_id, queue, handler, heartbeat_every, &mut rx).await;
                })
            })
            .collect();

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn worker_loop<P, H>(
    worker_id: WorkerId,
    queue: TaskQueue<P>,
    handler: Arc<H>,
    heartbeat_every: Option<Duration>,
    shutdown_rx: &mut watch::Receiver<bool>,
) where
    P: Send + Sync + 'static,
    H: TaskHandler<P> + ?Sized,
{
    tracing::debug!(worker = %worker_id, "worker started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // dequeue は drop しても副作用がないので select で shutdown と競合させてよい
        let task = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            task = queue.dequeue(worker_id.clone(), None) => task,
        };
        let Some(task) = task else {
            continue;
        };

        let result =
            run_with_heartbeat(&queue, &worker_id, &task, handler.as_ref(), heartbeat_every).await;

        let reported = match result {
            Ok(()) => queue.complete(task.id(), &worker_id),
            Err(HandlerError::Retryable(msg)) => queue
                .fail_with_error(task.id(), &worker_id, false, msg)
                .map(|_| ()),
            Err(HandlerError::Permanent(msg)) => queue
                .fail_with_error(task.id(), &worker_id, true, msg)
                .map(|_| ()),
        };

        match reported {
            Ok(()) => {}
            Err(err @ QueueError::OwnershipMismatch { .. }) => {
                tracing::warn!(worker = %worker_id, task_id = %task.id(), error = %err, "result discarded: task was reclaimed");
            }
            Err(err) => {
                tracing::error!(worker = %worker_id, task_id = %task.id(), error = %err, "failed to report result");
            }
        }
    }

    tracing::debug!(worker = %worker_id, "worker stopped");
}

async fn run_with_heartbeat<P, H>(
    queue: &TaskQueue<P>,
    worker_id: &WorkerId,
    task: &Task<P>,
    handler: &H,
    heartbeat_every: Option<Duration>,
) -> Result<(), HandlerError>
where
    H: TaskHandler<P> + ?Sized,
{
    let work = handler.handle(task);
    tokio::pin!(work);

    let Some(every) = heartbeat_every else {
        return work.await;
    };

    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
    ticker.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            result = &mut work => return result,
            _ = ticker.tick() => {
                if let Err(err) = queue.heartbeat(task.id(), worker_id) {
                    // claim is gone; finish anyway, the report will be rejected
                    tracing::warn!(worker = %worker_id, task_id = %task.id(), error = %err, "heartbeat rejected");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::domain::TaskState;
    use crate::observability::QueueStats;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler<u32> for CountingHandler {
        async fn handle(&self, task: &Task<u32>) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match *task.payload() {
                0 => Err(HandlerError::Permanent("zero".into())),
                n if n % 2 == 1 && task.attempts() == 1 => {
                    Err(HandlerError::Retryable(format!("odd {n}")))
                }
                _ => Ok(()),
            }
        }
    }

    struct SlowHandler(Duration);

    #[async_trait]
    impl TaskHandler<u32> for SlowHandler {
        async fn handle(&self, _task: &Task<u32>) -> Result<(), HandlerError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    async fn wait_until_drained(queue: &TaskQueue<u32>) -> QueueStats {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let stats = queue.stats();
                if stats.outstanding() == 0 {
                    return stats;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("queue should drain")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn workers_complete_retry_and_fail_tasks() {
        let queue: TaskQueue<u32> = TaskQueue::new(QueueConfig::default()).unwrap();
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        let group = WorkerGroup::spawn(queue.clone(), handler.clone(), WorkerOptions::default());
        assert_eq!(group.len(), 4);

        let zero = queue.enqueue(0, 0u32, None).unwrap();
        for n in 1..=10u32 {
            queue.enqueue(0, n, None).unwrap();
        }

        let stats = wait_until_drained(&queue).await;
        group.shutdown_and_join().await;

        assert_eq!(stats.completed, 10);
        assert_eq!(stats.failed, 1);
        // 5 odd payloads retried once, the zero payload ran once
        assert_eq!(handler.calls.load(Ordering::SeqCst), 16);
        assert_eq!(queue.get(zero).unwrap().last_error(), Some("zero"));
    }

    #[tokio::test]
    async fn heartbeats_keep_long_handlers_alive() {
        let config = QueueConfig::new(1, Duration::from_millis(60), Duration::from_millis(10));
        let queue: TaskQueue<u32> = TaskQueue::new(config).unwrap();
        let reaper = queue.spawn_reaper();
        let group = WorkerGroup::spawn(
            queue.clone(),
            Arc::new(SlowHandler(Duration::from_millis(250))),
            WorkerOptions {
                workers: 1,
                heartbeat_every: Some(Duration::from_millis(15)),
                ..WorkerOptions::default()
            },
        );

        let id = queue.enqueue(0, 1u32, None).unwrap();
        let stats = wait_until_drained(&queue).await;
        group.shutdown_and_join().await;
        reaper.shutdown().await;

        assert_eq!(stats.completed, 1);
        assert_eq!(queue.get(id).unwrap().state(), TaskState::Completed);
        assert_eq!(queue.get(id).unwrap().attempts(), 1);
    }

    #[tokio::test]
    async fn idle_workers_shut_down_promptly() {
        let queue: TaskQueue<u32> = TaskQueue::new(QueueConfig::default()).unwrap();
        let group = WorkerGroup::spawn(
            queue,
            Arc::new(SlowHandler(Duration::ZERO)),
            WorkerOptions::default(),
        );

        tokio::time::timeout(Duration::from_secs(1), group.shutdown_and_join())
            .await
            .expect("blocked workers should observe shutdown");
    }
}
