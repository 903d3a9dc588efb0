//! Synthetic batch: submit tasks, run workers next to a stalled one, wait for
//! every task to settle.

use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use async_trait::async_trait;
use ferry_core::ports::TracingEventSink;
use ferry_core::{
    HandlerError, Priority, QueueError, QueueStats, Task, TaskHandler, TaskQueue, WorkerGroup,
    WorkerOptions,
};
use rand::Rng;
use serde::Serialize;

use crate::config::{BatchConfig, FileConfig};

/// Pause before retrying an enqueue rejected for capacity.
const BACKOFF: Duration = Duration::from_millis(10);

/// Payload of one synthetic task.
#[derive(Debug, Clone)]
pub struct Job {
    pub seq: usize,
}

/// Sleeps for `work`, then fails with probability `failure_rate`.
pub struct SimulatedHandler {
    work: Duration,
    failure_rate: f64,
}

impl SimulatedHandler {
    pub fn new(batch: &BatchConfig) -> Self {
        Self {
            work: batch.work(),
            failure_rate: batch.failure_rate,
        }
    }
}

#[async_trait]
impl TaskHandler<Job> for SimulatedHandler {
    async fn handle(&self, task: &Task<Job>) -> Result<(), HandlerError> {
        tokio::time::sleep(self.work).await;
        if rand::random::<f64>() < self.failure_rate {
            return Err(HandlerError::Retryable(format!(
                "simulated failure on job {} (attempt {})",
                task.payload().seq,
                task.attempts()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub submitted: usize,
    pub stalled_claims: usize,
    pub elapsed_ms: u64,
    pub stats: QueueStats,
}

pub async fn run(config: FileConfig) -> Result<BatchReport> {
    let FileConfig { queue: queue_config, batch } = config;
    let deadline = settle_deadline(&queue_config, &batch);

    let queue: TaskQueue<Job> = TaskQueue::builder(queue_config.clone())
        .event_sink(Arc::new(TracingEventSink))
        .build()?;
    let reaper = queue.spawn_reaper();
    let started = Instant::now();

    // claims that nobody will ever report on; the capacity bound is checked
    // to leave room for them
    let mut stalled = Vec::with_capacity(batch.stalled_claims);
    for seq in 0..batch.stalled_claims {
        queue.enqueue(random_priority(), Job { seq }, None)?;
        stalled.extend(queue.try_dequeue("stalled"));
    }
    tracing::info!(claims = stalled.len(), "stalled worker went silent");

    let workers = WorkerGroup::spawn(
        queue.clone(),
        Arc::new(SimulatedHandler::new(&batch)),
        WorkerOptions {
            workers: batch.workers,
            id_prefix: "sim".to_string(),
            heartbeat_every: Some(queue_config.reap_timeout / 3),
        },
    );

    let settled = tokio::select! {
        result = async {
            submit_with_backpressure(&queue, batch.stalled_claims..batch.tasks).await?;
            tracing::info!(tasks = batch.tasks, "batch submitted");
            Ok::<_, anyhow::Error>(wait_until_settled(&queue).await)
        } => Some(result),
        _ = tokio::time::sleep(deadline) => None,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted");
            None
        }
    };

    workers.shutdown_and_join().await;
    reaper.shutdown().await;

    let stats = match settled {
        Some(result) => result?,
        None => bail!("batch did not settle: {:?}", queue.stats()),
    };

    Ok(BatchReport {
        submitted: batch.tasks,
        stalled_claims: stalled.len(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        stats,
    })
}

fn random_priority() -> Priority {
    Priority::new(rand::thread_rng().gen_range(Priority::LOW.value()..=Priority::HIGH.value()))
}

/// Enqueue jobs `seqs`, waiting out `CapacityExceeded` until workers drain
/// enough of the queue.
async fn submit_with_backpressure(queue: &TaskQueue<Job>, seqs: Range<usize>) -> Result<()> {
    for seq in seqs {
        let job = Arc::new(Job { seq });
        loop {
            match queue.enqueue(random_priority(), Arc::clone(&job), None) {
                Ok(_) => break,
                Err(QueueError::CapacityExceeded { limit }) => {
                    tracing::debug!(limit, seq, "queue full, backing off");
                    tokio::time::sleep(BACKOFF).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
    Ok(())
}

async fn wait_until_settled(queue: &TaskQueue<Job>) -> QueueStats {
    loop {
        let stats = queue.stats();
        if stats.outstanding() == 0 {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Generous upper bound: every task may need every attempt, and stalled
/// claims need a full reap cycle first.
/// Saturates instead of overflowing on absurd inputs.
fn settle_deadline(queue: &ferry_core::QueueConfig, batch: &BatchConfig) -> Duration {
    let attempts = queue.default_max_attempts.max(1);
    let rounds = u32::try_from(batch.tasks.div_ceil(batch.workers.max(1))).unwrap_or(u32::MAX);
    let serial = batch.work().saturating_mul(attempts).saturating_mul(rounds);
    let reap_cycle = queue.reap_timeout.saturating_add(queue.reap_interval);
    serial
        .saturating_add(reap_cycle.saturating_mul(2))
        .saturating_add(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::QueueConfig;

    fn fast(batch: BatchConfig) -> FileConfig {
        FileConfig {
            queue: QueueConfig::new(5, Duration::from_millis(100), Duration::from_millis(20)),
            batch,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn clean_batch_completes_everything() {
        let report = run(fast(BatchConfig {
            tasks: 30,
            workers: 3,
            failure_rate: 0.0,
            stalled_claims: 0,
            work_ms: 1,
        }))
        .await
        .unwrap();

        assert_eq!(report.submitted, 30);
        assert_eq!(report.stats.completed, 30);
        assert_eq!(report.stats.failed, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stalled_claims_are_recovered_by_the_reaper() {
        let report = run(fast(BatchConfig {
            tasks: 10,
            workers: 2,
            failure_rate: 0.0,
            stalled_claims: 3,
            work_ms: 1,
        }))
        .await
        .unwrap();

        assert_eq!(report.stalled_claims, 3);
        assert_eq!(report.stats.completed, 10);
        assert_eq!(report.stats.outstanding(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn bounded_queue_applies_backpressure() {
        let mut config = fast(BatchConfig {
            tasks: 40,
            workers: 2,
            failure_rate: 0.0,
            stalled_claims: 2,
            work_ms: 1,
        });
        config.queue.max_outstanding = Some(5);

        let report = run(config).await.unwrap();
        assert_eq!(report.submitted, 40);
        assert_eq!(report.stats.completed, 40);
        assert_eq!(report.stats.outstanding(), 0);
    }

    #[test]
    fn deadline_saturates_on_huge_batches() {
        let batch = BatchConfig {
            tasks: usize::MAX,
            workers: 1,
            work_ms: u64::MAX,
            ..BatchConfig::default()
        };
        assert_eq!(settle_deadline(&QueueConfig::default(), &batch), Duration::MAX);

        let small = BatchConfig {
            tasks: 4,
            workers: 2,
            work_ms: 10,
            ..BatchConfig::default()
        };
        let queue = QueueConfig::new(3, Duration::from_secs(1), Duration::from_secs(1));
        // 10ms * 3 attempts * 2 rounds + 2 * 2s + 5s
        assert_eq!(settle_deadline(&queue, &small), Duration::from_millis(9_060));
    }

    #[tokio::test]
    async fn always_failing_handler_exhausts_attempts() {
        let report = run(FileConfig {
            queue: QueueConfig::new(2, Duration::from_millis(100), Duration::from_millis(20)),
            batch: BatchConfig {
                tasks: 5,
                workers: 2,
                failure_rate: 1.0,
                stalled_claims: 0,
                work_ms: 1,
            },
        })
        .await
        .unwrap();

        assert_eq!(report.stats.failed, 5);
        assert_eq!(report.stats.completed, 0);
    }
}
