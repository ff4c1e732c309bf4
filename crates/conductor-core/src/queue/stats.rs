//! Incremental queue statistics and the optional snapshot pusher.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::QueueStats;
use crate::ports::ArtifactSink;

#[derive(Default)]
struct StatsInner {
    stats: QueueStats,
    wait_samples: u64,
    run_samples: u64,
}

/// Snapshot pusher task handle (watch-channel shutdown + join).
struct Pusher {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// O(1) incremental aggregation of queue statistics.
///
/// Rolling averages use `avg' = (avg * (n - 1) + x) / n`; nothing is ever
/// recomputed over item history, so terminal-record eviction does not affect
/// the aggregates.
///
/// The periodic snapshot task is only spawned by an explicit `start()` call,
/// never at construction, so unit tests stay free of background tasks.
#[derive(Default)]
pub struct StatsTracker {
    /// Shared with the pusher task.
    inner: Arc<Mutex<StatsInner>>,
    pusher: Mutex<Option<Pusher>>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self, queue_depth: usize) {
        let mut inner = self.inner.lock();
        inner.stats.total_enqueued += 1;
        if queue_depth > inner.stats.max_queue_depth {
            inner.stats.max_queue_depth = queue_depth;
        }
    }

    /// An item left Waiting; fold its wait time into the rolling average.
    pub fn record_started(&self, wait_time: Duration) {
        let mut inner = self.inner.lock();
        inner.wait_samples += 1;
        let n = inner.wait_samples as f64;
        inner.stats.avg_wait_secs =
            (inner.stats.avg_wait_secs * (n - 1.0) + wait_time.as_secs_f64()) / n;
    }

    /// An item reached Completed/Failed; fold its run time in.
    pub fn record_finished(&self, run_time: Duration, success: bool) {
        let mut inner = self.inner.lock();
        if success {
            inner.stats.total_completed += 1;
        } else {
            inner.stats.total_failed += 1;
        }
        inner.run_samples += 1;
        let n = inner.run_samples as f64;
        inner.stats.avg_run_secs =
            (inner.stats.avg_run_secs * (n - 1.0) + run_time.as_secs_f64()) / n;
    }

    pub fn record_cancelled(&self) {
        self.inner.lock().stats.total_cancelled += 1;
    }

    /// Owned copy of the current aggregates.
    pub fn snapshot(&self) -> QueueStats {
        self.inner.lock().stats.clone()
    }

    /// Spawn the periodic snapshot pusher. A second call while one is
    /// running is a logged no-op.
    pub fn start(&self, interval: Duration, sink: Arc<dyn ArtifactSink>) {
        let mut slot = self.pusher.lock();
        if slot.is_some() {
            warn!("stats pusher already running; start() ignored");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(interval) => {
                        let snapshot = inner.lock().stats.clone();
                        if let Err(e) = sink.on_stats_snapshot(&snapshot).await {
                            warn!(error = %e, "stats snapshot push failed");
                        }
                    }
                }
            }
            debug!("stats pusher stopped");
        });

        *slot = Some(Pusher { shutdown_tx, join });
    }

    /// Signal the pusher to stop and wait for it to exit.
    pub async fn stop(&self) {
        let pusher = self.pusher.lock().take();
        if let Some(pusher) = pusher {
            // ignore send error: the task may have already exited
            let _ = pusher.shutdown_tx.send(true);
            let _ = pusher.join.await;
        }
    }
}
