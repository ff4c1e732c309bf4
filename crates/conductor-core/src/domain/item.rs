//! Queue item: one pending unit of automation work.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Item state.
///
/// State transitions:
/// - Waiting -> Running -> Completed
/// - Waiting -> Running -> Failed
/// - Waiting -> Running -> Cancelled
/// - Waiting -> Cancelled (cancelled before a permit was ever acquired)
///
/// Transitions never go backward; terminal records are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemState {
    /// Admitted, waiting for a concurrency permit.
    Waiting,

    /// Holds a permit and is being executed by a consumer.
    Running,

    /// Finished successfully.
    Completed,

    /// Finished with an error.
    Failed,

    /// Cancelled while waiting or running.
    Cancelled,
}

impl ItemState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ItemState::Completed | ItemState::Failed | ItemState::Cancelled
        )
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemState::Waiting => "waiting",
            ItemState::Running => "running",
            ItemState::Completed => "completed",
            ItemState::Failed => "failed",
            ItemState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One unit of work admitted to the execution queue.
///
/// Design:
/// - This record is the single source of truth for item state.
/// - The waiting heap holds ids only; all transitions happen here, under
///   the queue's lock.
/// - Status readers only ever see clones of this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Caller-supplied id, unique among non-terminal items.
    pub id: String,

    /// Human-readable name for logs and status views.
    pub name: String,

    pub state: ItemState,

    /// Higher value = more urgent. Ties dequeue in admission order.
    pub priority: i64,

    /// Opaque caller payload; validated at the system boundary, not here.
    pub metadata: HashMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        priority: i64,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: ItemState::Waiting,
            priority,
            metadata,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Mark as running (a permit has just been acquired for this item).
    pub fn start(&mut self) {
        self.state = ItemState::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark as finished.
    pub fn complete(&mut self, success: bool) {
        self.state = if success {
            ItemState::Completed
        } else {
            ItemState::Failed
        };
        self.completed_at = Some(Utc::now());
    }

    /// Mark as cancelled (legal from Waiting or Running).
    pub fn cancel(&mut self) {
        self.state = ItemState::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Time spent waiting for a permit (started_at - created_at).
    pub fn wait_time(&self) -> Option<chrono::Duration> {
        self.started_at.map(|s| s - self.created_at)
    }

    /// Time spent running (completed_at - started_at).
    pub fn run_time(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(s), Some(c)) => Some(c - s),
            _ => None,
        }
    }
}
