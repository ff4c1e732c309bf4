//! Reference implementations of the ports (file-backed event log, static
//! config). Production deployments may swap in their own.

mod file_log;
mod static_config;

pub use file_log::{FileEventLog, NullSink};
pub use static_config::StaticConfig;
