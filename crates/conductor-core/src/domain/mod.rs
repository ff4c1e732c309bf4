//! Domain model (queue items, events, stats views).

pub mod events;
pub mod item;
pub mod stats;

pub use events::{QueueEvent, QueueEventKind};
pub use item::{ItemState, QueueItem};
pub use stats::{QueueCounts, QueueStats, QueueStatus};
