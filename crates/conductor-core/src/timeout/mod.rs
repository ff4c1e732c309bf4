//! Hierarchical timeout enforcement and sticky cancellation.
//!
//! Design:
//! - Deadlines bound the awaited operation directly (`tokio::time::timeout`
//!   raced against the cancellation token), not a side-channel bookkeeping
//!   task.
//! - Cancellation is level-triggered and sticky: once `cancel()` runs, every
//!   scope entered afterwards fails fast, and every in-flight scope observes
//!   the token at its next await point.
//! - `Timeout` and `Cancelled` stay distinguishable: a timeout is retryable
//!   by caller policy, a cancellation unwinds.

mod config;

pub use config::{TimeoutConfig, TimeoutScope};

use std::collections::HashMap;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::ConductorError;

/// Handle for removing a registered cancel callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type CancelCallback = Box<dyn Fn() + Send + Sync>;

/// Manager lifecycle phase.
///
/// Active -> Cancelling -> ShutdownComplete. Cancelling is entered by
/// `cancel()` and never left; ShutdownComplete only via `graceful_shutdown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Cancelling,
    ShutdownComplete,
}

struct ScopeEntry {
    scope: TimeoutScope,
}

struct ManagerInner {
    scopes: HashMap<u64, ScopeEntry>,
    callbacks: Vec<(u64, CancelCallback)>,
    next_id: u64,
    phase: Phase,
}

/// Deadline enforcement for the four automation scopes plus graceful shutdown.
///
/// Construct one per runner and pass it explicitly (no global instance);
/// tests get isolation by constructing their own.
///
/// Wiring OS signals to `cancel()` is the application's responsibility, not
/// this library's. `cancel()` is synchronous and non-blocking so a minimal
/// signal handler can call it.
pub struct TimeoutManager {
    config: TimeoutConfig,
    cancel_token: CancellationToken,
    inner: Mutex<ManagerInner>,
    /// Notified whenever the scope table empties; `graceful_shutdown` waits on it.
    idle: Notify,
}

impl TimeoutManager {
    pub fn new(config: TimeoutConfig) -> Self {
        Self {
            config,
            cancel_token: CancellationToken::new(),
            inner: Mutex::new(ManagerInner {
                scopes: HashMap::new(),
                callbacks: Vec::new(),
                next_id: 1,
                phase: Phase::Active,
            }),
            idle: Notify::new(),
        }
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.inner.lock().phase == Phase::ShutdownComplete
    }

    /// Number of currently tracked (in-flight) scopes.
    pub fn active_scopes(&self) -> usize {
        self.inner.lock().scopes.len()
    }

    /// Enter a tracked timeout scope.
    ///
    /// Fails immediately with `Cancelled` when the manager is already
    /// cancelled. The returned guard removes its bookkeeping entry on every
    /// exit path (it does so in `Drop`).
    pub fn timeout_scope(
        &self,
        scope: TimeoutScope,
        custom_timeout: Option<Duration>,
    ) -> Result<TimeoutScopeGuard<'_>, ConductorError> {
        if self.cancel_token.is_cancelled() {
            return Err(ConductorError::Cancelled);
        }
        let limit = custom_timeout.unwrap_or_else(|| self.config.duration_for(scope));
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.scopes.insert(id, ScopeEntry { scope });
            id
        };
        debug!(scope = %scope, scope_id = id, ?limit, "entered timeout scope");
        Ok(TimeoutScopeGuard {
            manager: self,
            id,
            scope,
            limit,
            deadline: Instant::now() + limit,
        })
    }

    /// Await `fut` under the scope's deadline.
    ///
    /// Returns the future's output, or `Timeout` once the effective duration
    /// elapses, or `Cancelled` when the manager is or becomes cancelled. The
    /// future is never polled if cancellation already happened.
    ///
    /// Boundary behavior: an operation that finishes strictly before the
    /// deadline wins; when the timer fires at exactly the limit, the result
    /// is `Timeout`.
    pub async fn apply_timeout<F>(
        &self,
        scope: TimeoutScope,
        custom_timeout: Option<Duration>,
        fut: F,
    ) -> Result<F::Output, ConductorError>
    where
        F: Future,
    {
        let guard = self.timeout_scope(scope, custom_timeout)?;
        let limit = guard.limit();
        let deadline = guard.deadline();

        tokio::select! {
            _ = self.cancel_token.cancelled() => {
                debug!(scope = %scope, "operation cancelled mid-await");
                Err(ConductorError::Cancelled)
            }
            res = tokio::time::timeout_at(deadline, fut) => {
                match res {
                    Ok(output) if Instant::now() < deadline => Ok(output),
                    // finished at or past the deadline: still a timeout
                    _ => Err(ConductorError::Timeout { scope, limit }),
                }
            }
        }
        // guard drops here, removing the bookkeeping entry on all paths
    }

    /// Request cancellation. Idempotent, synchronous, non-blocking.
    ///
    /// Sets the sticky flag, then invokes every registered callback in
    /// registration order. A panicking callback is caught and logged so it
    /// cannot block the remaining ones. In-flight scopes observe the token
    /// and fail with `Cancelled`.
    pub fn cancel(&self) {
        if !self.config.cancellation_enabled {
            warn!("cancel requested but cancellation is disabled; ignoring");
            return;
        }
        let callbacks = {
            let mut inner = self.inner.lock();
            if self.cancel_token.is_cancelled() {
                return;
            }
            inner.phase = Phase::Cancelling;
            self.cancel_token.cancel();
            std::mem::take(&mut inner.callbacks)
        };
        for (id, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                error!(callback_id = id, "cancel callback panicked; continuing with the rest");
            }
        }
    }

    /// Register a callback invoked (once) when `cancel()` runs.
    ///
    /// Invocation follows registration order. If cancellation has already
    /// happened the callback runs immediately.
    pub fn add_cancel_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            if !self.cancel_token.is_cancelled() {
                inner.callbacks.push((id, Box::new(callback)));
                return CallbackId(id);
            }
            id
        };
        // Already cancelled: run now, outside the lock.
        if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
            error!(callback_id = id, "cancel callback panicked");
        }
        CallbackId(id)
    }

    /// Remove a registered callback. Returns false if it was already
    /// removed or consumed by `cancel()`.
    pub fn remove_cancel_callback(&self, id: CallbackId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.callbacks.len();
        inner.callbacks.retain(|(cb_id, _)| *cb_id != id.0);
        inner.callbacks.len() != before
    }

    /// Cancel (if not already cancelled), then wait up to the configured
    /// grace period for in-flight scopes to finish naturally. Stragglers are
    /// force-cleared once the grace elapses; this always returns within
    /// grace + epsilon.
    pub async fn graceful_shutdown(&self) {
        self.cancel();

        let grace = self.config.graceful_shutdown;
        let wait_idle = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                // Register the waiter before re-checking the count, so a
                // release on another thread in between cannot be missed
                // (an unpolled Notified is invisible to notify_waiters).
                notified.as_mut().enable();
                if self.active_scopes() == 0 {
                    break;
                }
                notified.await;
            }
        };

        if tokio::time::timeout(grace, wait_idle).await.is_err() {
            let stragglers: Vec<(u64, ScopeEntry)> =
                self.inner.lock().scopes.drain().collect();
            for (id, entry) in &stragglers {
                warn!(
                    scope_id = id,
                    scope = %entry.scope,
                    "scope did not finish within the grace period; force-cancelled"
                );
            }
        }

        self.inner.lock().phase = Phase::ShutdownComplete;
        debug!("graceful shutdown complete");
    }

    fn release_scope(&self, id: u64) {
        let empty = {
            let mut inner = self.inner.lock();
            inner.scopes.remove(&id);
            inner.scopes.is_empty()
        };
        if empty {
            self.idle.notify_waiters();
        }
    }
}

impl Default for TimeoutManager {
    fn default() -> Self {
        Self::new(TimeoutConfig::default())
    }
}

/// RAII handle for one tracked scope.
///
/// Dropping the guard removes the scope's bookkeeping entry; this is what
/// guarantees cleanup on normal return, timeout, cancellation, and panic
/// alike.
pub struct TimeoutScopeGuard<'a> {
    manager: &'a TimeoutManager,
    id: u64,
    scope: TimeoutScope,
    limit: Duration,
    deadline: Instant,
}

impl TimeoutScopeGuard<'_> {
    pub fn scope(&self) -> TimeoutScope {
        self.scope
    }

    /// Effective duration for this scope (custom override or configured default).
    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Absolute deadline.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline (zero once passed).
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Check for expiry or manager cancellation without awaiting.
    ///
    /// Useful inside synchronous stretches of work between await points.
    pub fn check(&self) -> Result<(), ConductorError> {
        if self.manager.is_cancelled() {
            return Err(ConductorError::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(ConductorError::Timeout {
                scope: self.scope,
                limit: self.limit,
            });
        }
        Ok(())
    }
}

impl Drop for TimeoutScopeGuard<'_> {
    fn drop(&mut self) {
        self.manager.release_scope(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    fn quick_config() -> TimeoutConfig {
        TimeoutConfig {
            job: Duration::from_secs(3600),
            operation: Duration::from_secs(300),
            step: Duration::from_secs(60),
            network: Duration::from_secs(30),
            graceful_shutdown: Duration::from_secs(10),
            cancellation_enabled: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fast_operation_completes_under_limit() {
        let manager = TimeoutManager::new(quick_config());
        let result = manager
            .apply_timeout(TimeoutScope::Step, None, async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                42
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(manager.active_scopes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operation_times_out() {
        let manager = TimeoutManager::new(quick_config());
        let result = manager
            .apply_timeout(TimeoutScope::Network, None, async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            })
            .await;
        match result {
            Err(ConductorError::Timeout { scope, limit }) => {
                assert_eq!(scope, TimeoutScope::Network);
                assert_eq!(limit, Duration::from_secs(30));
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
        // bookkeeping entry removed on the timeout path too
        assert_eq!(manager.active_scopes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_timeout_overrides_scope_default() {
        let manager = TimeoutManager::new(quick_config());
        let start = Instant::now();
        let result = manager
            .apply_timeout(
                TimeoutScope::Job,
                Some(Duration::from_secs(5)),
                async {
                    tokio::time::sleep(Duration::from_secs(100)).await;
                },
            )
            .await;
        assert!(matches!(result, Err(ConductorError::Timeout { .. })));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn finishing_exactly_at_the_limit_is_a_timeout() {
        let manager = TimeoutManager::new(quick_config());
        let result = manager
            .apply_timeout(TimeoutScope::Network, None, async {
                // runs for exactly the 30s network limit
                tokio::time::sleep(Duration::from_secs(30)).await;
                "done"
            })
            .await;
        match result {
            Err(ConductorError::Timeout { scope, limit }) => {
                assert_eq!(scope, TimeoutScope::Network);
                assert_eq!(limit, Duration::from_secs(30));
            }
            other => panic!("expected Timeout at the boundary, got {other:?}"),
        }
        assert_eq!(manager.active_scopes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_in_flight_await() {
        let manager = Arc::new(TimeoutManager::new(quick_config()));
        let m = Arc::clone(&manager);
        let task = tokio::spawn(async move {
            m.apply_timeout(TimeoutScope::Operation, None, async {
                tokio::time::sleep(Duration::from_secs(200)).await;
            })
            .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        manager.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(ConductorError::Cancelled)));
        assert_eq!(manager.active_scopes(), 0);
    }

    #[tokio::test]
    async fn cancelled_manager_fails_fast_without_polling() {
        let manager = TimeoutManager::new(quick_config());
        manager.cancel();

        let polled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&polled);
        let result = manager
            .apply_timeout(TimeoutScope::Step, None, async move {
                flag.store(true, Ordering::SeqCst);
            })
            .await;

        assert!(matches!(result, Err(ConductorError::Cancelled)));
        assert!(!polled.load(Ordering::SeqCst), "future must not be polled");
        assert!(matches!(
            manager.timeout_scope(TimeoutScope::Network, None),
            Err(ConductorError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_runs_callbacks_once_in_order() {
        let manager = TimeoutManager::new(quick_config());
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            manager.add_cancel_callback(move || order.lock().push(tag));
        }

        manager.cancel();
        manager.cancel();

        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn panicking_callback_does_not_block_the_rest() {
        let manager = TimeoutManager::new(quick_config());
        let ran = Arc::new(AtomicU64::new(0));

        manager.add_cancel_callback(|| panic!("bad callback"));
        let counter = Arc::clone(&ran);
        manager.add_cancel_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.cancel();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn removed_callback_is_not_invoked() {
        let manager = TimeoutManager::new(quick_config());
        let ran = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&ran);
        let id = manager.add_cancel_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(manager.remove_cancel_callback(id));
        assert!(!manager.remove_cancel_callback(id));

        manager.cancel();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn callback_added_after_cancel_runs_immediately() {
        let manager = TimeoutManager::new(quick_config());
        manager.cancel();

        let ran = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&ran);
        manager.add_cancel_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_waits_for_scopes_to_finish() {
        let manager = Arc::new(TimeoutManager::new(quick_config()));
        let m = Arc::clone(&manager);
        let task = tokio::spawn(async move {
            let guard = m.timeout_scope(TimeoutScope::Step, None).unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(guard);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let start = Instant::now();
        manager.graceful_shutdown().await;

        // finished naturally, well before the 10s grace
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(manager.is_shutdown_complete());
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_bounds_a_refusing_straggler() {
        let manager = Arc::new(TimeoutManager::new(quick_config()));
        let m = Arc::clone(&manager);
        tokio::spawn(async move {
            // Ignores cancellation: holds its scope far past the grace period.
            let _guard = m.timeout_scope(TimeoutScope::Job, None).unwrap();
            tokio::time::sleep(Duration::from_secs(7200)).await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let start = Instant::now();
        manager.graceful_shutdown().await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(11));
        assert!(manager.is_shutdown_complete());
        assert_eq!(manager.active_scopes(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn graceful_shutdown_sees_releases_from_other_threads() {
        let config = TimeoutConfig {
            graceful_shutdown: Duration::from_secs(5),
            ..quick_config()
        };
        let manager = Arc::new(TimeoutManager::new(config));
        let entered = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = Arc::clone(&manager);
            let entered = Arc::clone(&entered);
            handles.push(tokio::spawn(async move {
                let guard = m.timeout_scope(TimeoutScope::Step, None).unwrap();
                entered.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                drop(guard);
            }));
        }
        while entered.load(Ordering::SeqCst) < 8 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let start = std::time::Instant::now();
        manager.graceful_shutdown().await;

        // releases raced from worker threads must wake the idle wait; the
        // 5s grace period is never slept out
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(manager.is_shutdown_complete());
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scope_guard_check_reports_expiry() {
        let manager = TimeoutManager::new(quick_config());
        let guard = manager
            .timeout_scope(TimeoutScope::Network, Some(Duration::from_secs(5)))
            .unwrap();

        assert!(guard.check().is_ok());
        assert_eq!(guard.remaining(), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(matches!(
            guard.check(),
            Err(ConductorError::Timeout { scope: TimeoutScope::Network, .. })
        ));
        assert_eq!(guard.remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn disabled_cancellation_is_a_no_op() {
        let config = TimeoutConfig {
            cancellation_enabled: false,
            ..quick_config()
        };
        let manager = TimeoutManager::new(config);
        manager.cancel();
        assert!(!manager.is_cancelled());
        // timeouts still apply normally
        assert!(manager.timeout_scope(TimeoutScope::Step, None).is_ok());
    }
}
