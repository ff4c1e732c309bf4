//! Ports (consumed collaborator interfaces).
//!
//! The core does not own persistence or configuration; it consumes these
//! seams and never lets a collaborator failure propagate into queue or
//! timeout bookkeeping.

pub mod artifact_sink;
pub mod config;

pub use artifact_sink::{ArtifactSink, SinkError};
pub use config::ConfigProvider;
