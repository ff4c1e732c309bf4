//! conductor-core
//!
//! Concurrency-control core for a browser-automation platform: a
//! bounded-concurrency, priority-ordered execution queue paired with a
//! hierarchical timeout/cancellation manager. The core schedules, bounds,
//! and times out opaque asynchronous work units; it does not run browsers,
//! scripts, or network calls itself.
//!
//! # モジュール構成
//! - **domain**: 値オブジェクト（QueueItem, ItemState, QueueEvent, stats views）
//! - **queue**: ExecutionQueue, ConcurrencyGate, StatsTracker, EventPublisher
//! - **timeout**: TimeoutManager, TimeoutConfig, TimeoutScope
//! - **ports**: 消費する外部インターフェース（ArtifactSink, ConfigProvider）
//! - **impls**: ポートの参照実装（FileEventLog, StaticConfig など）
//!
//! # Typical flow
//!
//! A runner enqueues named, prioritized items; a consumer awaits
//! [`queue::ExecutionQueue::execute_next`], runs the real work under
//! [`timeout::TimeoutManager::apply_timeout`], and reports back with
//! `complete_item` / `cancel_item`. Construct one queue and one manager per
//! runner and pass them explicitly; there is no global instance.
//!
//! ```ignore
//! let provider = StaticConfig::default();
//! let queue = ExecutionQueue::from_config(&provider);
//! let timeouts = TimeoutManager::new(provider.timeout_config());
//!
//! queue.enqueue("nav-1", "navigate", 5, metadata)?;
//! if let Some(item) = queue.execute_next().await {
//!     let result = timeouts
//!         .apply_timeout(TimeoutScope::Operation, None, do_work(&item))
//!         .await;
//!     queue.complete_item(&item.id, result.is_ok());
//! }
//! ```

pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod timeout;

pub use domain::{ItemState, QueueCounts, QueueEvent, QueueEventKind, QueueItem, QueueStats, QueueStatus};
pub use error::ConductorError;
pub use impls::{FileEventLog, NullSink, StaticConfig};
pub use ports::{ArtifactSink, ConfigProvider, SinkError};
pub use queue::{ConcurrencyGate, ExecutionQueue, StatsTracker};
pub use timeout::{CallbackId, TimeoutConfig, TimeoutManager, TimeoutScope, TimeoutScopeGuard};
