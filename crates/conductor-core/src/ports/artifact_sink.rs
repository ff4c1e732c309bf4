//! ArtifactSink port - persistence of queue events and stats snapshots.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{QueueEvent, QueueStats};

/// Sink-side failure. The core catches these, logs them, and moves on;
/// they never reach the caller of a queue operation.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Receives queue lifecycle events and periodic stats snapshots.
///
/// Both calls are fire-and-forget from the queue's point of view: delivery
/// happens off the queue's lock (see `queue::publisher`), and errors are
/// logged rather than propagated.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn on_queue_event(&self, event: &QueueEvent) -> Result<(), SinkError>;

    async fn on_stats_snapshot(&self, stats: &QueueStats) -> Result<(), SinkError>;
}
