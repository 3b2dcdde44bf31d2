//! Per-session scope shared by every driver of a mount tree.

use std::future::Future;
use std::sync::Arc;

use liveview_core::SessionId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::correlation::CorrelationTable;
use crate::outbound::Outbound;
use crate::registry::DriverRegistry;

/// Everything a started driver needs from its session.
///
/// Cheap to clone. Owns the session's [`DriverRegistry`] and
/// [`CorrelationTable`], holds the [`Outbound`] sender, and tracks every task
/// spawned on the session's behalf so teardown can drain or cancel them.
#[derive(Clone)]
pub struct SessionScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    session_id: SessionId,
    registry: DriverRegistry,
    pending: CorrelationTable,
    outbound: Outbound,
    config: RuntimeConfig,
    cancel: CancellationToken,
    /// Cancelled when teardown begins, before the drain window.
    closing: CancellationToken,
    tasks: TaskTracker,
}

impl SessionScope {
    /// Create a scope; `cancel` is usually a child of the server's shutdown token.
    pub fn new(
        session_id: SessionId,
        outbound: Outbound,
        config: RuntimeConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                session_id,
                registry: DriverRegistry::new(),
                pending: CorrelationTable::new(),
                outbound,
                config,
                closing: cancel.child_token(),
                cancel,
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Id of this session.
    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    /// Started drivers, keyed by component id.
    pub fn registry(&self) -> &DriverRegistry {
        &self.inner.registry
    }

    /// Outstanding `get` requests.
    pub fn pending(&self) -> &CorrelationTable {
        &self.inner.pending
    }

    /// Sender feeding the socket writer.
    pub fn outbound(&self) -> &Outbound {
        &self.inner.outbound
    }

    /// Timeouts for this session.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Token cancelled when the session is torn down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Whether the session has been torn down.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves once the session is cancelled.
    pub async fn cancelled(&self) {
        self.inner.cancel.cancelled().await;
    }

    /// Resolves once teardown has begun.
    ///
    /// Long-running tracked tasks (tickers, pollers) should stop here rather
    /// than wait for cancellation, so they do not hold up the drain.
    pub async fn closing(&self) {
        self.inner.closing.cancelled().await;
    }

    /// Whether teardown has begun.
    pub fn is_closing(&self) -> bool {
        self.inner.closing.is_cancelled()
    }

    /// Spawn a task bound to the session's lifetime.
    ///
    /// The task is tracked for draining and is dropped at its next await
    /// point once the session is cancelled. Returns `None` if the session is
    /// already cancelled.
    pub fn spawn<F>(&self, fut: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_cancelled() {
            return None;
        }
        let cancel = self.inner.cancel.clone();
        Some(self.inner.tasks.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = fut => {}
            }
        }))
    }

    /// Number of tracked tasks still running.
    pub fn in_flight(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Tear the scope down.
    ///
    /// Signals [`closing`](Self::closing), waits up to the drain timeout for
    /// in-flight tasks, then cancels the
    /// session token and waits for the remainder to unwind. Returns `true`
    /// if everything finished within the drain window.
    pub async fn shutdown(&self) -> bool {
        let inner = &self.inner;
        inner.closing.cancel();
        let _ = inner.tasks.close();
        let drained = tokio::time::timeout(inner.config.drain_timeout(), inner.tasks.wait())
            .await
            .is_ok();
        if !drained {
            warn!(
                session_id = %inner.session_id,
                in_flight = inner.tasks.len(),
                "drain timed out, cancelling remaining tasks"
            );
        }
        inner.cancel.cancel();
        inner.tasks.wait().await;
        // Started drivers hold the scope; releasing them here breaks the cycle.
        inner.registry.clear();
        debug!(session_id = %inner.session_id, "session scope shut down");
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn scope_with(config: RuntimeConfig) -> SessionScope {
        let (outbound, _rx) = Outbound::channel();
        SessionScope::new(SessionId::new(), outbound, config, CancellationToken::new())
    }

    #[tokio::test]
    async fn spawned_task_runs_to_completion() {
        let scope = scope_with(RuntimeConfig::default());
        let done = Arc::new(AtomicBool::new(false));
        let d = done.clone();
        let handle = scope
            .spawn(async move {
                d.store(true, Ordering::SeqCst);
            })
            .unwrap();
        handle.await.unwrap();
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn spawn_after_cancel_is_refused() {
        let scope = scope_with(RuntimeConfig::default());
        scope.cancel_token().cancel();
        assert!(scope.spawn(async {}).is_none());
    }

    #[tokio::test]
    async fn shutdown_drains_quick_tasks() {
        let scope = scope_with(RuntimeConfig::default());
        let _ = scope.spawn(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
        });
        assert!(scope.shutdown().await);
        assert_eq!(scope.in_flight(), 0);
        assert!(scope.is_cancelled());
        assert!(scope.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_stuck_tasks_after_drain_timeout() {
        let scope = scope_with(RuntimeConfig {
            drain_timeout_ms: 100,
            ..RuntimeConfig::default()
        });
        let finished = Arc::new(AtomicBool::new(false));
        let f = finished.clone();
        let _ = scope.spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            f.store(true, Ordering::SeqCst);
        });

        assert!(!scope.shutdown().await);
        assert_eq!(scope.in_flight(), 0);
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn closing_lets_background_loops_exit_within_drain() {
        let scope = scope_with(RuntimeConfig {
            drain_timeout_ms: 60_000,
            ..RuntimeConfig::default()
        });
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = ticks.clone();
        let ticker = scope.clone();
        let _ = scope.spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    () = ticker.closing() => break,
                    _ = interval.tick() => {
                        let _ = t.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!scope.is_closing());

        let started = tokio::time::Instant::now();
        assert!(scope.shutdown().await);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(scope.is_closing());
        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn cancel_implies_closing() {
        let scope = scope_with(RuntimeConfig::default());
        scope.cancel_token().cancel();
        assert!(scope.is_closing());
    }

    #[test]
    fn clones_share_state() {
        let scope = scope_with(RuntimeConfig::default());
        let other = scope.clone();
        assert_eq!(scope.session_id(), other.session_id());
        other.cancel_token().cancel();
        assert!(scope.is_cancelled());
    }
}
