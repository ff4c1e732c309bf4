//! Queue lifecycle events pushed to the artifact sink.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::item::QueueItem;

/// What happened to an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueEventKind {
    Enqueued,
    Started,
    Completed,
    Failed,
    Cancelled,
}

impl QueueEventKind {
    /// Upper-case tag used in the event log line.
    pub fn as_str(self) -> &'static str {
        match self {
            QueueEventKind::Enqueued => "ENQUEUED",
            QueueEventKind::Started => "STARTED",
            QueueEventKind::Completed => "COMPLETED",
            QueueEventKind::Failed => "FAILED",
            QueueEventKind::Cancelled => "CANCELLED",
        }
    }
}

/// One queue lifecycle event with an immutable item snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    /// ULID: sortable by emission time, unique without coordination.
    pub event_id: Ulid,
    pub kind: QueueEventKind,
    pub at: DateTime<Utc>,
    pub item: QueueItem,
}

impl QueueEvent {
    pub fn new(kind: QueueEventKind, item: QueueItem) -> Self {
        Self {
            event_id: Ulid::new(),
            kind,
            at: Utc::now(),
            item,
        }
    }

    /// Render the file-log line:
    /// `[<ISO-8601>] <EVENT> <id> (<name>) priority=<p> [wait_time=<s>s] [run_time=<s>s]`
    ///
    /// wait_time appears once the item has started; run_time once it is terminal.
    pub fn log_line(&self) -> String {
        let mut line = format!(
            "[{}] {} {} ({}) priority={}",
            self.at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.kind.as_str(),
            self.item.id,
            self.item.name,
            self.item.priority,
        );
        if let Some(wait) = self.item.wait_time() {
            line.push_str(&format!(" wait_time={:.2}s", duration_secs(wait)));
        }
        if let Some(run) = self.item.run_time() {
            line.push_str(&format!(" run_time={:.2}s", duration_secs(run)));
        }
        line
    }
}

fn duration_secs(d: chrono::Duration) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}
