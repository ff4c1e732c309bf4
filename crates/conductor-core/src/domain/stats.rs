//! Serializable snapshot views of queue state and statistics.
//!
//! All of these are owned copies; none of them borrow into the queue's
//! internal structures.

use serde::{Deserialize, Serialize};

use super::item::QueueItem;

/// Item counts by state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Aggregated statistics, maintained incrementally by the StatsTracker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_enqueued: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,

    /// Highest number of simultaneously waiting items ever observed.
    pub max_queue_depth: usize,

    /// Rolling mean of (started_at - created_at) over started items, seconds.
    pub avg_wait_secs: f64,

    /// Rolling mean of (completed_at - started_at) over terminal items, seconds.
    pub avg_run_secs: f64,
}

/// Point-in-time view of the queue contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub counts: QueueCounts,
    /// Waiting items in dequeue order (priority desc, admission asc).
    pub waiting: Vec<QueueItem>,
    pub running: Vec<QueueItem>,
}
