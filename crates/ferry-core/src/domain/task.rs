//! Task: identity + lifecycle state.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, TaskState, WorkerId};

/// Scheduling priority. Higher values are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(i32);

impl Priority {
    pub const LOW: Priority = Priority(-10);
    pub const NORMAL: Priority = Priority(0);
    pub const HIGH: Priority = Priority(10);

    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i32 {
        self.0
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A unit of schedulable work.
///
/// The queue keeps one of these per known task as the single source of truth;
/// callers only ever see clones (snapshots). The payload is shared, never copied
/// or inspected.
pub struct Task<P> {
    id: TaskId,
    priority: Priority,
    payload: Arc<P>,
    state: TaskState,

    submitted_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    owner: Option<WorkerId>,

    /// Number of claims so far (including the current one while InFlight).
    attempts: u32,
    max_attempts: u32,

    last_error: Option<String>,
}

// Manual impls: `P` itself does not need to be Clone/Debug.
impl<P> Clone for Task<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            priority: self.priority,
            payload: Arc::clone(&self.payload),
            state: self.state,
            submitted_at: self.submitted_at,
            claimed_at: self.claimed_at,
            owner: self.owner.clone(),
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            last_error: self.last_error.clone(),
        }
    }
}

impl<P> fmt::Debug for Task<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("state", &self.state)
            .field("submitted_at", &self.submitted_at)
            .field("claimed_at", &self.claimed_at)
            .field("owner", &self.owner)
            .field("attempts", &self.attempts)
            .field("max_attempts", &self.max_attempts)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl<P> Task<P> {
    pub(crate) fn new(
        id: TaskId,
        priority: Priority,
        payload: Arc<P>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            priority,
            payload,
            state: TaskState::Queued,
            submitted_at: now,
            claimed_at: None,
            owner: None,
            attempts: 0,
            max_attempts,
            last_error: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Shared handle to the payload.
    pub fn payload_handle(&self) -> Arc<P> {
        Arc::clone(&self.payload)
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn claimed_at(&self) -> Option<DateTime<Utc>> {
        self.claimed_at
    }

    pub fn owner(&self) -> Option<&WorkerId> {
        self.owner.as_ref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Can this task be claimed (or retried) once more?
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub(crate) fn is_held_by(&self, worker_id: &WorkerId) -> bool {
        self.state == TaskState::InFlight && self.owner.as_ref() == Some(worker_id)
    }

    /// Queued -> InFlight (increments attempts).
    pub(crate) fn claim(&mut self, worker_id: WorkerId, now: DateTime<Utc>) {
        self.state = TaskState::InFlight;
        self.owner = Some(worker_id);
        self.claimed_at = Some(now);
        self.attempts += 1;
    }

    pub(crate) fn refresh_claim(&mut self, now: DateTime<Utc>) {
        self.claimed_at = Some(now);
    }

    pub(crate) fn mark_completed(&mut self) {
        self.state = TaskState::Completed;
        self.owner = None;
        self.claimed_at = None;
    }

    pub(crate) fn mark_failed(&mut self, error: Option<String>) {
        self.state = TaskState::Failed;
        self.owner = None;
        self.claimed_at = None;
        if error.is_some() {
            self.last_error = error;
        }
    }

    /// InFlight -> Queued, at the back of its priority band.
    pub(crate) fn requeue(&mut self, now: DateTime<Utc>, error: Option<String>) {
        self.state = TaskState::Queued;
        self.owner = None;
        self.claimed_at = None;
        self.submitted_at = now;
        if error.is_some() {
            self.last_error = error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn task(max_attempts: u32) -> Task<&'static str> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Task::new(
            TaskId::from_ulid(Ulid::new()),
            Priority::NORMAL,
            Arc::new("payload"),
            max_attempts,
            t0,
        )
    }

    #[test]
    fn priority_ordering_follows_value() {
        assert!(Priority::HIGH > Priority::NORMAL);
        assert!(Priority::NORMAL > Priority::LOW);
        assert_eq!(Priority::from(5), Priority::new(5));
        assert_eq!(Priority::default(), Priority::NORMAL);
    }

    #[test]
    fn claim_sets_owner_and_counts_attempt() {
        let mut t = task(2);
        let now = t.submitted_at() + chrono::TimeDelta::seconds(1);
        t.claim(WorkerId::new("w1"), now);

        assert_eq!(t.state(), TaskState::InFlight);
        assert_eq!(t.owner().map(WorkerId::as_str), Some("w1"));
        assert_eq!(t.claimed_at(), Some(now));
        assert_eq!(t.attempts(), 1);
        assert!(t.is_held_by(&WorkerId::new("w1")));
        assert!(!t.is_held_by(&WorkerId::new("w2")));
    }

    #[test]
    fn requeue_keeps_identity_and_refreshes_submission() {
        let mut t = task(3);
        let id = t.id();
        let later = t.submitted_at() + chrono::TimeDelta::seconds(5);
        t.claim(WorkerId::new("w1"), later);
        t.requeue(later, Some("boom".into()));

        assert_eq!(t.id(), id);
        assert_eq!(t.state(), TaskState::Queued);
        assert_eq!(t.owner(), None);
        assert_eq!(t.claimed_at(), None);
        assert_eq!(t.submitted_at(), later);
        assert_eq!(t.attempts(), 1);
        assert_eq!(t.last_error(), Some("boom"));
        assert_eq!(*t.payload(), "payload");
    }

    #[test]
    fn terminal_transitions_clear_claim() {
        let mut done = task(1);
        done.claim(WorkerId::new("w1"), done.submitted_at());
        done.mark_completed();
        assert_eq!(done.state(), TaskState::Completed);
        assert_eq!(done.claimed_at(), None);
        assert_eq!(done.owner(), None);

        let mut dead = task(1);
        dead.claim(WorkerId::new("w1"), dead.submitted_at());
        assert!(!dead.has_attempts_left());
        dead.mark_failed(None);
        assert_eq!(dead.state(), TaskState::Failed);
        assert_eq!(dead.last_error(), None);
    }

    #[test]
    fn snapshot_shares_payload() {
        let t = task(1);
        let snap = t.clone();
        assert!(Arc::ptr_eq(&t.payload_handle(), &snap.payload_handle()));
    }
}
