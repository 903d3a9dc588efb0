//! TaskQueue: registry + priority index + in-flight set behind one lock.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::liveness::{LivenessTracker, Zombie};
use super::priority::PriorityIndex;
use crate::app::QueueBuilder;
use crate::config::QueueConfig;
use crate::domain::{Cause, Priority, Task, TaskEvent, TaskId, Transition, WorkerId};
use crate::error::{ConfigError, QueueError};
use crate::observability::QueueStats;
use crate::ports::{Clock, EventSink, IdGenerator};

const ATTEMPTS_EXHAUSTED: &str = "attempts exhausted";
const CLAIM_EXPIRED: &str = "claim expired";

/// What a failure report did to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back in the index, at the end of its priority band.
    Requeued,
    /// Terminal.
    Failed,
}

/// Result of one reaper pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub requeued: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    /// Zombies that were settled by their worker (or heartbeated) between
    /// sweep and recovery.
    pub skipped: usize,
}

impl ReapReport {
    pub fn recovered(&self) -> usize {
        self.requeued.len() + self.failed.len()
    }
}

/// Everything guarded by the queue lock.
struct QueueState<P> {
    /// All known tasks, terminal ones included until pruned.
    tasks: HashMap<TaskId, Task<P>>,
    /// Queued tasks.
    index: PriorityIndex,
    /// In-flight tasks.
    liveness: LivenessTracker,
    completed: usize,
    failed: usize,
    next_seq: u64,
    next_event_seq: u64,
}

impl<P> QueueState<P> {
    fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            index: PriorityIndex::new(),
            liveness: LivenessTracker::new(),
            completed: 0,
            failed: 0,
            next_seq: 0,
            next_event_seq: 0,
        }
    }

    fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Number events in transition order. Must run before the lock is released.
    fn stamp(&mut self, events: &mut [TaskEvent]) {
        for event in events {
            event.seq = self.next_event_seq;
            self.next_event_seq += 1;
        }
    }

    fn outstanding(&self) -> usize {
        self.index.len() + self.liveness.len()
    }

    /// Pop candidates until one can be claimed. Candidates with no attempts
    /// left are failed on the spot.
    fn claim_next(
        &mut self,
        worker_id: &WorkerId,
        now: DateTime<Utc>,
        events: &mut Vec<TaskEvent>,
    ) -> Option<Task<P>> {
        while let Some(task_id) = self.index.select_next() {
            let Some(task) = self.tasks.get_mut(&task_id) else {
                continue;
            };

            if !task.has_attempts_left() {
                task.mark_failed(Some(ATTEMPTS_EXHAUSTED.to_string()));
                self.failed += 1;
                events.push(event(task, Transition::Failed, Cause::AttemptsExhausted, None, now));
                tracing::info!(task_id = %task_id, attempts = task.attempts(), "skipped task with no attempts left");
                continue;
            }

            task.claim(worker_id.clone(), now);
            self.liveness.record_claim(task_id, worker_id.clone(), now);
            events.push(event(
                task,
                Transition::Claimed,
                Cause::Worker,
                Some(worker_id.clone()),
                now,
            ));
            return Some(task.clone());
        }
        None
    }

    /// InFlight -> Failed or Queued, depending on `permanent` and attempts.
    fn settle_failure(
        &mut self,
        task_id: TaskId,
        worker_id: &WorkerId,
        permanent: bool,
        error: Option<String>,
        cause: Cause,
        now: DateTime<Utc>,
        events: &mut Vec<TaskEvent>,
    ) -> Result<FailOutcome, QueueError> {
        let task = held_by(&mut self.tasks, task_id, worker_id)?;
        self.liveness.release(task_id);

        if permanent || !task.has_attempts_left() {
            task.mark_failed(error);
            self.failed += 1;
            events.push(event(task, Transition::Failed, cause, Some(worker_id.clone()), now));
            return Ok(FailOutcome::Failed);
        }

        task.requeue(now, error);
        let priority = task.priority();
        events.push(event(task, Transition::Requeued, cause, Some(worker_id.clone()), now));

        let seq = self.allocate_seq();
        self.index.insert(task_id, priority, now, seq);
        Ok(FailOutcome::Requeued)
    }
}

/// Look up a task and check that `worker_id` currently holds it.
fn held_by<'a, P>(
    tasks: &'a mut HashMap<TaskId, Task<P>>,
    task_id: TaskId,
    worker_id: &WorkerId,
) -> Result<&'a mut Task<P>, QueueError> {
    let task = tasks.get_mut(&task_id).ok_or(QueueError::NotFound(task_id))?;
    if !task.is_held_by(worker_id) {
        return Err(QueueError::OwnershipMismatch {
            task_id,
            worker_id: worker_id.clone(),
            owner: task.owner().cloned(),
            state: task.state(),
        });
    }
    Ok(task)
}

fn event<P>(
    task: &Task<P>,
    transition: Transition,
    cause: Cause,
    worker_id: Option<WorkerId>,
    at: DateTime<Utc>,
) -> TaskEvent {
    TaskEvent {
        seq: 0,
        task_id: task.id(),
        transition,
        cause,
        worker_id,
        attempts: task.attempts(),
        at,
    }
}

pub(crate) struct Shared<P> {
    state: Mutex<QueueState<P>>,
    notify: Notify,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    sink: Arc<dyn EventSink>,
}

impl<P> Shared<P> {
    /// Called with the lock released.
    fn emit(&self, events: &[TaskEvent]) {
        for event in events {
            self.sink.emit(event);
        }
    }
}

/// In-process priority task queue.
///
/// Cheap to clone; all clones share the same queue. Every operation is safe to
/// call from any number of threads. Only `dequeue` ever waits, and never while
/// holding the lock.
pub struct TaskQueue<P> {
    shared: Arc<Shared<P>>,
}

impl<P> Clone for TaskQueue<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P> TaskQueue<P> {
    /// Queue with the system clock, ULID ids and no event sink.
    pub fn new(config: QueueConfig) -> Result<Self, ConfigError> {
        QueueBuilder::new(config).build()
    }

    pub fn builder(config: QueueConfig) -> QueueBuilder<P> {
        QueueBuilder::new(config)
    }

    pub(crate) fn from_parts(
        config: QueueConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::new()),
                notify: Notify::new(),
                config,
                clock,
                ids,
                sink,
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<Shared<P>> {
        Arc::downgrade(&self.shared)
    }

    pub(crate) fn upgrade(weak: &Weak<Shared<P>>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Submit a task. It is visible to `dequeue` as soon as this returns.
    ///
    /// `max_attempts = None` uses the configured default.
    pub fn enqueue(
        &self,
        priority: impl Into<Priority>,
        payload: impl Into<Arc<P>>,
        max_attempts: Option<u32>,
    ) -> Result<TaskId, QueueError> {
        let priority = priority.into();
        let max_attempts = max_attempts.unwrap_or(self.shared.config.default_max_attempts);
        let task_id = self.shared.ids.generate_task_id();

        {
            let mut state = self.shared.state.lock();
            if let Some(limit) = self.shared.config.max_outstanding
                && state.outstanding() >= limit
            {
                tracing::debug!(limit, "enqueue rejected: at capacity");
                return Err(QueueError::CapacityExceeded { limit });
            }

            let now = self.shared.clock.now();
            let seq = state.allocate_seq();
            let task = Task::new(task_id, priority, payload.into(), max_attempts, now);
            state.tasks.insert(task_id, task);
            state.index.insert(task_id, priority, now, seq);
        }

        tracing::debug!(task_id = %task_id, priority = %priority, max_attempts, "enqueued");
        self.shared.notify.notify_one();
        Ok(task_id)
    }

    /// Claim the next task without waiting.
    pub fn try_dequeue(&self, worker_id: impl Into<WorkerId>) -> Option<Task<P>> {
        self.claim(&worker_id.into())
    }

    /// Claim the next task, waiting up to `timeout` for one to appear.
    ///
    /// - `Some(Duration::ZERO)`: don't wait
    /// - `None`: wait indefinitely
    ///
    /// Dropping the returned future never leaves a half-claimed task: the claim
    /// happens synchronously after the last await point.
    pub async fn dequeue(
        &self,
        worker_id: impl Into<WorkerId>,
        timeout: Option<Duration>,
    ) -> Option<Task<P>> {
        let worker_id = worker_id.into();
        // a timeout too large to represent waits forever
        let deadline = timeout.and_then(|t| tokio::time::Instant::now().checked_add(t));

        loop {
            // Register interest before looking, so an enqueue between the
            // check and the await still wakes us.
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(task) = self.claim(&worker_id) {
                return Some(task);
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::Instant::now() >= deadline {
                        return None;
                    }
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    fn claim(&self, worker_id: &WorkerId) -> Option<Task<P>> {
        let mut events = Vec::new();
        let claimed = {
            let mut state = self.shared.state.lock();
            let now = self.shared.clock.now();
            let claimed = state.claim_next(worker_id, now, &mut events);
            state.stamp(&mut events);
            claimed
        };
        self.shared.emit(&events);

        if let Some(task) = &claimed {
            tracing::debug!(task_id = %task.id(), worker = %worker_id, attempt = task.attempts(), "claimed");
        }
        claimed
    }

    /// Mark a held task as done.
    pub fn complete(&self, task_id: TaskId, worker_id: &WorkerId) -> Result<(), QueueError> {
        let event = {
            let mut state = self.shared.state.lock();
            let now = self.shared.clock.now();
            let task = held_by(&mut state.tasks, task_id, worker_id)?;
            task.mark_completed();
            let mut event = event(task, Transition::Completed, Cause::Worker, Some(worker_id.clone()), now);
            state.liveness.release(task_id);
            state.completed += 1;
            state.stamp(std::slice::from_mut(&mut event));
            event
        };
        self.shared.emit(std::slice::from_ref(&event));

        tracing::debug!(task_id = %task_id, worker = %worker_id, "completed");
        Ok(())
    }

    /// Report a failure. Requeues unless `permanent` or out of attempts.
    pub fn fail(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
        permanent: bool,
    ) -> Result<FailOutcome, QueueError> {
        self.report_failure(task_id, worker_id, permanent, None, Cause::Worker)
    }

    /// Same as `fail`, recording `error` as the task's `last_error`.
    pub fn fail_with_error(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
        permanent: bool,
        error: impl Into<String>,
    ) -> Result<FailOutcome, QueueError> {
        self.report_failure(task_id, worker_id, permanent, Some(error.into()), Cause::Worker)
    }

    fn report_failure(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
        permanent: bool,
        error: Option<String>,
        cause: Cause,
    ) -> Result<FailOutcome, QueueError> {
        let mut events = Vec::new();
        let outcome = {
            let mut state = self.shared.state.lock();
            let now = self.shared.clock.now();
            let outcome =
                state.settle_failure(task_id, worker_id, permanent, error, cause, now, &mut events)?;
            state.stamp(&mut events);
            outcome
        };
        self.shared.emit(&events);

        match outcome {
            FailOutcome::Requeued => {
                tracing::info!(task_id = %task_id, worker = %worker_id, cause = ?cause, "requeued");
                self.shared.notify.notify_one();
            }
            FailOutcome::Failed => {
                tracing::info!(task_id = %task_id, worker = %worker_id, cause = ?cause, permanent, "failed");
            }
        }
        Ok(outcome)
    }

    /// Refresh the claim on a held task so the reaper leaves it alone.
    pub fn heartbeat(&self, task_id: TaskId, worker_id: &WorkerId) -> Result<(), QueueError> {
        let mut state = self.shared.state.lock();
        let now = self.shared.clock.now();
        held_by(&mut state.tasks, task_id, worker_id)?.refresh_claim(now);
        state.liveness.heartbeat(task_id, now);
        Ok(())
    }

    /// One reaper pass with the configured `reap_timeout`.
    pub fn reap_expired(&self) -> ReapReport {
        self.reap_expired_with(self.shared.config.reap_timeout)
    }

    /// One reaper pass: sweep, then recover each zombie separately (oldest
    /// first). Workers may settle a task between the two steps; those races are
    /// logged and skipped.
    pub fn reap_expired_with(&self, timeout: Duration) -> ReapReport {
        let zombies: Vec<Zombie> = {
            let state = self.shared.state.lock();
            let now = self.shared.clock.now();
            state.liveness.sweep(now, timeout).collect()
        };
        self.recover_all(zombies)
    }

    /// Recover swept zombies one by one, oldest claim first.
    fn recover_all(&self, mut zombies: Vec<Zombie>) -> ReapReport {
        zombies.sort_by_key(|zombie| zombie.claimed_at);

        let mut report = ReapReport::default();
        for zombie in zombies {
            match self.recover(&zombie) {
                Ok(Some(FailOutcome::Requeued)) => report.requeued.push(zombie.task_id),
                Ok(Some(FailOutcome::Failed)) => report.failed.push(zombie.task_id),
                Ok(None) => {
                    tracing::debug!(task_id = %zombie.task_id, worker = %zombie.worker_id, "claim refreshed before recovery");
                    report.skipped += 1;
                }
                Err(err) => {
                    if err.is_expected_race() {
                        tracing::warn!(task_id = %zombie.task_id, worker = %zombie.worker_id, error = %err, "zombie settled before recovery");
                    } else {
                        tracing::error!(task_id = %zombie.task_id, worker = %zombie.worker_id, error = %err, "zombie recovery failed");
                    }
                    report.skipped += 1;
                }
            }
        }

        if report.recovered() > 0 {
            tracing::info!(
                requeued = report.requeued.len(),
                failed = report.failed.len(),
                skipped = report.skipped,
                "reaped expired claims"
            );
        }
        report
    }

    /// Recover one zombie on behalf of its own worker. `Ok(None)` when the
    /// claim was refreshed after the sweep.
    fn recover(&self, zombie: &Zombie) -> Result<Option<FailOutcome>, QueueError> {
        let mut events = Vec::new();
        let outcome = {
            let mut state = self.shared.state.lock();
            if let Some(claim) = state.liveness.claim(zombie.task_id)
                && claim.worker_id == zombie.worker_id
                && claim.claimed_at != zombie.claimed_at
            {
                return Ok(None);
            }
            let now = self.shared.clock.now();
            let outcome = state.settle_failure(
                zombie.task_id,
                &zombie.worker_id,
                false,
                Some(CLAIM_EXPIRED.to_string()),
                Cause::Reaper,
                now,
                &mut events,
            )?;
            state.stamp(&mut events);
            outcome
        };
        self.shared.emit(&events);

        if outcome == FailOutcome::Requeued {
            self.shared.notify.notify_one();
        }
        Ok(Some(outcome))
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.shared.state.lock();
        QueueStats {
            queued: state.index.len(),
            in_flight: state.liveness.len(),
            completed: state.completed,
            failed: state.failed,
        }
    }

    /// Snapshot of one task, terminal ones included (until pruned).
    pub fn get(&self, task_id: TaskId) -> Option<Task<P>> {
        self.shared.state.lock().tasks.get(&task_id).cloned()
    }

    /// Drop terminal records from the registry. Returns how many were removed.
    pub fn prune_terminal(&self) -> usize {
        let mut state = self.shared.state.lock();
        let before = state.tasks.len();
        state.tasks.retain(|_, task| !task.state().is_terminal());
        before - state.tasks.len()
    }
}
