//! Timeout scopes and their configured durations.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hierarchical timeout scope, widest first.
///
/// A job bounds the whole automation run; an operation bounds one logical
/// action (navigate, run script, call out); a step bounds one sub-action;
/// network bounds a single external round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeoutScope {
    Job,
    Operation,
    Step,
    Network,
}

impl std::fmt::Display for TimeoutScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TimeoutScope::Job => "job",
            TimeoutScope::Operation => "operation",
            TimeoutScope::Step => "step",
            TimeoutScope::Network => "network",
        };
        f.write_str(s)
    }
}

/// Per-scope durations plus shutdown behavior.
///
/// Immutable for the lifetime of one `TimeoutManager` instance.
///
/// Defaults (seconds): job=3600, operation=300, step=60, network=30,
/// graceful_shutdown=10.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub job: Duration,
    pub operation: Duration,
    pub step: Duration,
    pub network: Duration,

    /// How long `graceful_shutdown` waits for in-flight scopes before
    /// force-clearing them.
    pub graceful_shutdown: Duration,

    /// When false, `cancel()` is a logged no-op. Timeouts still apply.
    pub cancellation_enabled: bool,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            job: Duration::from_secs(3600),
            operation: Duration::from_secs(300),
            step: Duration::from_secs(60),
            network: Duration::from_secs(30),
            graceful_shutdown: Duration::from_secs(10),
            cancellation_enabled: true,
        }
    }
}

impl TimeoutConfig {
    /// Configured duration for a scope.
    pub fn duration_for(&self, scope: TimeoutScope) -> Duration {
        match scope {
            TimeoutScope::Job => self.job,
            TimeoutScope::Operation => self.operation,
            TimeoutScope::Step => self.step,
            TimeoutScope::Network => self.network,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::job(TimeoutScope::Job, 3600)]
    #[case::operation(TimeoutScope::Operation, 300)]
    #[case::step(TimeoutScope::Step, 60)]
    #[case::network(TimeoutScope::Network, 30)]
    fn default_durations(#[case] scope: TimeoutScope, #[case] secs: u64) {
        let config = TimeoutConfig::default();
        assert_eq!(config.duration_for(scope), Duration::from_secs(secs));
    }

    #[test]
    fn scopes_display_lowercase() {
        assert_eq!(TimeoutScope::Network.to_string(), "network");
        assert_eq!(TimeoutScope::Job.to_string(), "job");
    }
}
