use serde::{Deserialize, Serialize};

/// Point-in-time counts. The four numbers are not read atomically with respect
/// to each other across calls; fine for dashboards, not for control decisions.
///
/// `completed` and `failed` are cumulative and survive `prune_terminal`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    /// Tasks not yet terminal.
    pub fn outstanding(&self) -> usize {
        self.queued + self.in_flight
    }
}
