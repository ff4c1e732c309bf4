//! File-backed artifact sink.
//!
//! Appends one formatted line per queue event and one JSON line per stats
//! snapshot. Suitable for a single writer per file; the internal mutex
//! serializes concurrent pushes from the publisher and the stats pusher.

use std::path::Path;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::{QueueEvent, QueueStats};
use crate::ports::{ArtifactSink, SinkError};

pub struct FileEventLog {
    file: Mutex<File>,
}

impl FileEventLog {
    /// Open (append, create) the log file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl ArtifactSink for FileEventLog {
    async fn on_queue_event(&self, event: &QueueEvent) -> Result<(), SinkError> {
        let mut line = event.log_line();
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn on_stats_snapshot(&self, stats: &QueueStats) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(stats)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Discards everything. Useful as a default and in tests.
pub struct NullSink;

#[async_trait]
impl ArtifactSink for NullSink {
    async fn on_queue_event(&self, _event: &QueueEvent) -> Result<(), SinkError> {
        Ok(())
    }

    async fn on_stats_snapshot(&self, _stats: &QueueStats) -> Result<(), SinkError> {
        Ok(())
    }
}
