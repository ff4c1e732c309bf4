//! Event publisher: decouples queue bookkeeping from the artifact sink.
//!
//! Queue mutations happen under a synchronous lock, but the sink is async
//! and may be slow or failing. Events therefore go through an unbounded
//! channel to a forwarder task; `emit` never blocks and never fails the
//! queue operation that produced the event.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::QueueEvent;
use crate::ports::ArtifactSink;

pub struct EventPublisher {
    tx: Mutex<Option<mpsc::UnboundedSender<QueueEvent>>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl EventPublisher {
    /// Spawn the forwarder task for `sink`.
    pub fn spawn(sink: Arc<dyn ArtifactSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueueEvent>();
        let join = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = sink.on_queue_event(&event).await {
                    warn!(
                        event_id = %event.event_id,
                        kind = ?event.kind,
                        error = %e,
                        "queue event delivery failed"
                    );
                }
            }
            debug!("event publisher drained");
        });
        Self {
            tx: Mutex::new(Some(tx)),
            join: Mutex::new(Some(join)),
        }
    }

    /// Fire-and-forget. A closed publisher drops the event with a warning.
    pub fn emit(&self, event: QueueEvent) {
        match &*self.tx.lock() {
            Some(tx) => {
                // send only fails when the forwarder is gone; not the caller's problem
                if tx.send(event).is_err() {
                    warn!("event publisher task gone; event dropped");
                }
            }
            None => warn!("event publisher closed; event dropped"),
        }
    }

    /// Stop accepting events and wait for queued ones to be delivered.
    pub async fn close(&self) {
        self.tx.lock().take();
        let join = self.join.lock().take();
        if let Some(join) = join {
            let _ = join.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;

    use crate::domain::{QueueEventKind, QueueItem, QueueStats};
    use crate::ports::SinkError;

    struct RecordingSink {
        delivered: AtomicU64,
        fail: bool,
    }

    #[async_trait]
    impl ArtifactSink for RecordingSink {
        async fn on_queue_event(&self, _event: &QueueEvent) -> Result<(), SinkError> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SinkError::Other("sink down".to_string()));
            }
            Ok(())
        }

        async fn on_stats_snapshot(&self, _stats: &QueueStats) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn event() -> QueueEvent {
        QueueEvent::new(
            QueueEventKind::Enqueued,
            QueueItem::new("a", "x", 0, HashMap::new()),
        )
    }

    #[tokio::test]
    async fn events_are_delivered_then_close_drains() {
        let sink = Arc::new(RecordingSink {
            delivered: AtomicU64::new(0),
            fail: false,
        });
        let publisher = EventPublisher::spawn(Arc::clone(&sink) as Arc<dyn ArtifactSink>);

        for _ in 0..5 {
            publisher.emit(event());
        }
        publisher.close().await;

        assert_eq!(sink.delivered.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn sink_failures_do_not_stop_delivery() {
        let sink = Arc::new(RecordingSink {
            delivered: AtomicU64::new(0),
            fail: true,
        });
        let publisher = EventPublisher::spawn(Arc::clone(&sink) as Arc<dyn ArtifactSink>);

        publisher.emit(event());
        publisher.emit(event());
        publisher.close().await;

        // both attempts reached the sink despite errors
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn emit_after_close_is_a_no_op() {
        let sink = Arc::new(RecordingSink {
            delivered: AtomicU64::new(0),
            fail: false,
        });
        let publisher = EventPublisher::spawn(Arc::clone(&sink) as Arc<dyn ArtifactSink>);
        publisher.close().await;
        publisher.emit(event());
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 0);
    }
}
