//! ConfigProvider port - where concurrency and timeout settings come from.

use crate::timeout::TimeoutConfig;

/// Supplies the tunables the core needs at construction time.
///
/// The default methods are the fallback values used when configuration is
/// unset or unloadable; a provider overrides only what it actually knows.
pub trait ConfigProvider: Send + Sync {
    /// Maximum number of simultaneously running items.
    fn max_concurrency(&self) -> usize {
        3
    }

    /// Per-scope timeout durations and the shutdown grace period.
    fn timeout_config(&self) -> TimeoutConfig {
        TimeoutConfig::default()
    }
}
