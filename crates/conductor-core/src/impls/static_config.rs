//! Fixed-value config provider.

use crate::ports::ConfigProvider;
use crate::timeout::TimeoutConfig;

/// ConfigProvider backed by plain values; handy for tests and for embedders
/// that resolve configuration themselves.
#[derive(Debug, Clone)]
pub struct StaticConfig {
    pub max_concurrency: usize,
    pub timeouts: TimeoutConfig,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl ConfigProvider for StaticConfig {
    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    fn timeout_config(&self) -> TimeoutConfig {
        self.timeouts.clone()
    }
}
