//! Execution queue: priority-ordered admission, bounded-concurrency dequeue.
//!
//! Design:
//! - The records map is the single source of truth for item state; the
//!   waiting heap holds (priority, seq, id) entries only.
//! - One lock serializes all structural mutation. It is only ever held for
//!   short synchronous work, never across an await.
//! - The concurrency permit is acquired immediately before the
//!   Waiting -> Running transition and held (stored per item) until
//!   `complete_item` / `cancel_item`, so count(Running) <= max_concurrency
//!   holds at all times.
//! - Selection is late-binding: the heap is consulted only after a permit
//!   frees, so a higher-priority item that arrived while a consumer was
//!   blocked on the gate wins over earlier, lower-priority items.

mod gate;
mod publisher;
mod stats;

pub use gate::ConcurrencyGate;
pub use publisher::EventPublisher;
pub use stats::StatsTracker;

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info, warn};

use crate::domain::{ItemState, QueueCounts, QueueEvent, QueueEventKind, QueueItem, QueueStats, QueueStatus};
use crate::error::ConductorError;
use crate::ports::{ArtifactSink, ConfigProvider};

/// How many terminal records are retained for status views before the
/// oldest are evicted. Aggregated statistics are incremental and unaffected.
const DEFAULT_TERMINAL_RETAINED: usize = 1024;

/// Waiting-heap entry.
///
/// Max-heap order: priority descending, then admission sequence ascending
/// (the deterministic FIFO tie-break within a priority band).
#[derive(Debug, Clone, PartialEq, Eq)]
struct WaitingEntry {
    priority: i64,
    seq: u64,
    id: String,
}

impl PartialOrd for WaitingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WaitingEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    /// All item records (single source of truth), including retained
    /// terminal ones.
    records: HashMap<String, QueueItem>,

    /// Waiting ids in dequeue order. Entries for items that left Waiting by
    /// another path (cancelled, id reused) go stale and are skipped on pop.
    waiting: BinaryHeap<WaitingEntry>,

    /// Permit held by each Running item, keyed by id.
    permits: HashMap<String, OwnedSemaphorePermit>,

    /// Admission sequence of the current Waiting record per id; a heap entry
    /// is live only while its seq matches. One entry per Waiting item, so
    /// its len is the current queue depth.
    admitted: HashMap<String, u64>,

    /// Terminal ids in completion order, for eviction.
    terminal_order: VecDeque<String>,

    next_seq: u64,
}

impl QueueState {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            waiting: BinaryHeap::new(),
            permits: HashMap::new(),
            admitted: HashMap::new(),
            terminal_order: VecDeque::new(),
            next_seq: 0,
        }
    }

    fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for record in self.records.values() {
            match record.state {
                ItemState::Waiting => counts.waiting += 1,
                ItemState::Running => counts.running += 1,
                ItemState::Completed => counts.completed += 1,
                ItemState::Failed => counts.failed += 1,
                ItemState::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    fn mark_terminal(&mut self, id: &str, cap: usize) {
        self.admitted.remove(id);
        self.terminal_order.push_back(id.to_string());
        while self.terminal_order.len() > cap {
            let Some(old) = self.terminal_order.pop_front() else {
                break;
            };
            // A non-terminal record under this id means it was reused;
            // the marker is stale, just drop it.
            if self.records.get(&old).is_some_and(|r| r.is_terminal()) {
                self.records.remove(&old);
            }
        }
    }
}

/// Admission and dequeue point for automation work units.
///
/// The queue does not run anything itself: a consumer calls
/// `execute_next()`, performs the actual work (typically under
/// `TimeoutManager::apply_timeout`), and reports back via `complete_item` /
/// `cancel_item`.
pub struct ExecutionQueue {
    state: Mutex<QueueState>,
    gate: ConcurrencyGate,
    stats: Arc<StatsTracker>,
    publisher: Option<EventPublisher>,
    max_terminal_retained: usize,
}

impl ExecutionQueue {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::new()),
            gate: ConcurrencyGate::new(max_concurrency),
            stats: Arc::new(StatsTracker::new()),
            publisher: None,
            max_terminal_retained: DEFAULT_TERMINAL_RETAINED,
        }
    }

    /// Queue with an event sink attached. Must be called from within a
    /// tokio runtime (the sink forwarder task is spawned here).
    pub fn with_sink(max_concurrency: usize, sink: Arc<dyn ArtifactSink>) -> Self {
        let mut queue = Self::new(max_concurrency);
        queue.publisher = Some(EventPublisher::spawn(sink));
        queue
    }

    /// Queue sized from a config provider.
    pub fn from_config(provider: &dyn ConfigProvider) -> Self {
        Self::new(provider.max_concurrency())
    }

    /// Override the terminal-record retention cap.
    pub fn with_terminal_retention(mut self, cap: usize) -> Self {
        self.max_terminal_retained = cap;
        self
    }

    /// Stats handle, e.g. for starting the periodic snapshot pusher.
    pub fn stats(&self) -> Arc<StatsTracker> {
        Arc::clone(&self.stats)
    }

    /// Admit one item. Synchronous, O(log n).
    ///
    /// Fails with `DuplicateItem` when `id` is already Waiting or Running.
    /// A terminal record under the same id is replaced (ids become reusable
    /// once terminal).
    pub fn enqueue(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        priority: i64,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<QueueItem, ConductorError> {
        let id = id.into();
        let (item, depth) = {
            let mut state = self.state.lock();
            if let Some(existing) = state.records.get(&id)
                && !existing.is_terminal()
            {
                return Err(ConductorError::DuplicateItem(id));
            }

            let item = QueueItem::new(id.clone(), name, priority, metadata);
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiting.push(WaitingEntry {
                priority,
                seq,
                id: id.clone(),
            });
            state.admitted.insert(id.clone(), seq);
            state.records.insert(id.clone(), item.clone());
            (item, state.admitted.len())
        };

        self.stats.record_enqueued(depth);
        debug!(id = %item.id, priority, depth, "item enqueued");
        self.emit(QueueEventKind::Enqueued, item.clone());
        Ok(item)
    }

    /// Dequeue the best waiting item, suspending until a permit is free.
    ///
    /// Returns `None` only when no Waiting item existed at the moment the
    /// permit was obtained; the permit is released immediately in that case.
    pub async fn execute_next(&self) -> Option<QueueItem> {
        let permit = self.gate.acquire().await;

        let snapshot = {
            // 重要: ロックは同期処理の間だけ保持する（await を跨がない）
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let id = loop {
                // Queue empty: returning drops the guard and the permit.
                let entry = state.waiting.pop()?;
                let live = state.admitted.get(&entry.id) == Some(&entry.seq)
                    && state
                        .records
                        .get(&entry.id)
                        .is_some_and(|r| r.state == ItemState::Waiting);
                if live {
                    break entry.id;
                }
                // stale entry (cancelled while waiting, or id reused); skip
            };

            let record = state
                .records
                .get_mut(&id)
                .expect("record existence checked under the same lock");
            record.start();
            let snapshot = record.clone();
            state.admitted.remove(&id);
            state.permits.insert(id, permit);
            snapshot
        };

        if let Some(wait) = snapshot.wait_time() {
            self.stats.record_started(chrono_to_std(wait));
        }
        debug!(id = %snapshot.id, priority = snapshot.priority, "item started");
        self.emit(QueueEventKind::Started, snapshot.clone());
        Some(snapshot)
    }

    /// Report a running item finished. Releases its permit.
    ///
    /// Unknown id or a non-Running state is a logged no-op: the caller may
    /// have raced with an external cancellation, and availability wins over
    /// raising on a benign race.
    pub fn complete_item(&self, id: &str, success: bool) {
        let finished = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let snapshot = match state.records.get_mut(id) {
                Some(record) if record.state == ItemState::Running => {
                    record.complete(success);
                    Some(record.clone())
                }
                Some(record) => {
                    warn!(id, state = %record.state, "complete_item on non-running item; ignoring");
                    None
                }
                None => {
                    warn!(id, "complete_item on unknown item; ignoring");
                    None
                }
            };
            snapshot.map(|snapshot| {
                let permit = state.permits.remove(id);
                state.mark_terminal(id, self.max_terminal_retained);
                (snapshot, permit)
            })
        };

        if let Some((snapshot, permit)) = finished {
            drop(permit);
            if let Some(run) = snapshot.run_time() {
                self.stats.record_finished(chrono_to_std(run), success);
            }
            debug!(id = %snapshot.id, success, "item finished");
            let kind = if success {
                QueueEventKind::Completed
            } else {
                QueueEventKind::Failed
            };
            self.emit(kind, snapshot);
        }
    }

    /// Cancel a waiting or running item. Same no-op policy for unknown ids.
    pub fn cancel_item(&self, id: &str) {
        let cancelled = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let snapshot = match state.records.get_mut(id) {
                Some(record) if !record.is_terminal() => {
                    record.cancel();
                    Some(record.clone())
                }
                Some(record) => {
                    warn!(id, state = %record.state, "cancel_item on terminal item; ignoring");
                    None
                }
                None => {
                    warn!(id, "cancel_item on unknown item; ignoring");
                    None
                }
            };
            snapshot.map(|snapshot| {
                // Running items hold a permit; Waiting ones leave a stale
                // heap entry behind, skipped on pop.
                let permit = state.permits.remove(id);
                state.mark_terminal(id, self.max_terminal_retained);
                (snapshot, permit)
            })
        };

        if let Some((snapshot, permit)) = cancelled {
            drop(permit);
            self.stats.record_cancelled();
            debug!(id = %snapshot.id, "item cancelled");
            self.emit(QueueEventKind::Cancelled, snapshot);
        }
    }

    /// Point-in-time copy of queue contents. Never returns live references.
    pub fn get_queue_status(&self) -> QueueStatus {
        let state = self.state.lock();
        let counts = state.counts();

        // dequeue order: priority desc, then admission sequence (the same
        // key execute_next pops by)
        let mut waiting: Vec<(u64, QueueItem)> = state
            .records
            .values()
            .filter(|r| r.state == ItemState::Waiting)
            .map(|r| {
                let seq = state.admitted.get(&r.id).copied().unwrap_or(u64::MAX);
                (seq, r.clone())
            })
            .collect();
        waiting.sort_by(|a, b| b.1.priority.cmp(&a.1.priority).then_with(|| a.0.cmp(&b.0)));
        let waiting: Vec<QueueItem> = waiting.into_iter().map(|(_, item)| item).collect();

        let running: Vec<QueueItem> = state
            .records
            .values()
            .filter(|r| r.state == ItemState::Running)
            .cloned()
            .collect();

        QueueStatus {
            counts,
            waiting,
            running,
        }
    }

    /// Copy of the aggregated statistics.
    pub fn get_queue_stats(&self) -> QueueStats {
        self.stats.snapshot()
    }

    /// Resize the concurrency gate.
    ///
    /// Fails with `ConcurrencyChange` unless Waiting and Running are both
    /// empty and no permit is outstanding (a consumer between the gate and
    /// the Waiting -> Running transition counts as outstanding).
    pub fn update_max_concurrency(&self, max_concurrency: usize) -> Result<(), ConductorError> {
        let state = self.state.lock();
        let counts = state.counts();
        if counts.waiting > 0 || counts.running > 0 || self.gate.in_use() > 0 {
            return Err(ConductorError::ConcurrencyChange {
                waiting: counts.waiting,
                running: counts.running,
            });
        }
        self.gate.resize(max_concurrency);
        info!(max_concurrency, "concurrency gate resized");
        Ok(())
    }

    /// Shutdown helper: cancel every non-terminal item. Returns how many
    /// were cancelled. Cancelling the TimeoutManager does not touch item
    /// state; this is the queue-side half of shutdown.
    pub fn drain(&self) -> usize {
        let ids: Vec<String> = {
            let state = self.state.lock();
            state
                .records
                .values()
                .filter(|r| !r.is_terminal())
                .map(|r| r.id.clone())
                .collect()
        };
        for id in &ids {
            self.cancel_item(id);
        }
        ids.len()
    }

    /// Drain remaining items, then flush and stop the event publisher and
    /// the stats pusher (if running).
    pub async fn shutdown(&self) {
        let cancelled = self.drain();
        if cancelled > 0 {
            info!(cancelled, "queue drained on shutdown");
        }
        if let Some(publisher) = &self.publisher {
            publisher.close().await;
        }
        self.stats.stop().await;
    }

    fn emit(&self, kind: QueueEventKind, item: QueueItem) {
        if let Some(publisher) = &self.publisher {
            publisher.emit(QueueEvent::new(kind, item));
        }
    }
}

fn chrono_to_std(d: chrono::Duration) -> Duration {
    // negative only if clocks regress; clamp to zero
    d.to_std().unwrap_or_default()
}
