//! Refresh coordinator
//!
//! Decides which derived-state batches to re-fetch after an operation
//! reaches a terminal state. Follow-up refreshes are explicitly bounded: a
//! completed refresh never enqueues another one on its own, so no refresh
//! loop can form.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::RefreshScope;
use crate::error::Result;

/// Consumer of refresh requests; implemented over the typed read layer in
/// production and by counting stubs in tests
#[async_trait]
pub trait RefreshTarget: Send + Sync {
    /// Re-issue the reads that depend on the active actor's address
    async fn refresh_user(&self) -> Result<()>;

    /// Re-issue the vault-wide reads
    async fn refresh_global(&self) -> Result<()>;
}

/// Refresh throughput counters
#[derive(Debug, Clone, Default)]
pub struct RefreshStats {
    pub user_refreshes: u64,
    pub global_refreshes: u64,
    pub partial_failures: u64,
}

/// Scope-directed refresh dispatcher with bounded follow-ups
pub struct RefreshCoordinator {
    target: Arc<dyn RefreshTarget>,
    follow_up_delays: Vec<Duration>,
    user_refreshes: AtomicU64,
    global_refreshes: AtomicU64,
    partial_failures: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(target: Arc<dyn RefreshTarget>, follow_up_delays: Vec<Duration>) -> Self {
        Self {
            target,
            follow_up_delays,
            user_refreshes: AtomicU64::new(0),
            global_refreshes: AtomicU64::new(0),
            partial_failures: AtomicU64::new(0),
        }
    }

    /// Run one refresh for the scope. `Both` issues the two batches
    /// concurrently; a failure on either side is logged and does not block
    /// the other, and only a failure of both propagates.
    pub async fn refresh(&self, scope: RefreshScope) -> Result<()> {
        debug!("Refreshing {} scope", scope);
        match scope {
            RefreshScope::User => {
                self.user_refreshes.fetch_add(1, Ordering::SeqCst);
                self.target.refresh_user().await
            }
            RefreshScope::Global => {
                self.global_refreshes.fetch_add(1, Ordering::SeqCst);
                self.target.refresh_global().await
            }
            RefreshScope::Both => {
                self.user_refreshes.fetch_add(1, Ordering::SeqCst);
                self.global_refreshes.fetch_add(1, Ordering::SeqCst);
                let (user, global) =
                    tokio::join!(self.target.refresh_user(), self.target.refresh_global());

                match (user, global) {
                    (Ok(()), Ok(())) => Ok(()),
                    (Err(e), Ok(())) => {
                        self.partial_failures.fetch_add(1, Ordering::SeqCst);
                        warn!("User refresh failed, global succeeded: {}", e);
                        Ok(())
                    }
                    (Ok(()), Err(e)) => {
                        self.partial_failures.fetch_add(1, Ordering::SeqCst);
                        warn!("Global refresh failed, user succeeded: {}", e);
                        Ok(())
                    }
                    (Err(user_err), Err(global_err)) => {
                        warn!("Both refreshes failed: user={}, global={}", user_err, global_err);
                        Err(user_err)
                    }
                }
            }
        }
    }

    /// Refresh now, then schedule the configured bounded follow-ups to
    /// absorb remote propagation lag. The redundancy is deliberate: a single
    /// immediate read is not guaranteed to reflect a just-confirmed write.
    pub async fn refresh_with_follow_ups(self: &Arc<Self>, scope: RefreshScope) -> Result<()> {
        let result = self.refresh(scope).await;

        for delay in self.follow_up_delays.clone() {
            let coordinator = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = coordinator.refresh(scope).await {
                    warn!("Follow-up {} refresh failed: {}", scope, e);
                }
            });
        }

        result
    }

    pub fn stats(&self) -> RefreshStats {
        RefreshStats {
            user_refreshes: self.user_refreshes.load(Ordering::SeqCst),
            global_refreshes: self.global_refreshes.load(Ordering::SeqCst),
            partial_failures: self.partial_failures.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct CountingTarget {
        user: AtomicU64,
        global: AtomicU64,
        fail_global: AtomicBool,
        fail_user: AtomicBool,
    }

    #[async_trait]
    impl RefreshTarget for CountingTarget {
        async fn refresh_user(&self) -> Result<()> {
            self.user.fetch_add(1, Ordering::SeqCst);
            if self.fail_user.load(Ordering::SeqCst) {
                return Err(EngineError::Network("user batch down".into()));
            }
            Ok(())
        }

        async fn refresh_global(&self) -> Result<()> {
            self.global.fetch_add(1, Ordering::SeqCst);
            if self.fail_global.load(Ordering::SeqCst) {
                return Err(EngineError::Network("global batch down".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_scope_routing() {
        let target = Arc::new(CountingTarget::default());
        let coordinator = RefreshCoordinator::new(target.clone(), vec![]);

        coordinator.refresh(RefreshScope::User).await.unwrap();
        assert_eq!(target.user.load(Ordering::SeqCst), 1);
        assert_eq!(target.global.load(Ordering::SeqCst), 0);

        coordinator.refresh(RefreshScope::Global).await.unwrap();
        coordinator.refresh(RefreshScope::Both).await.unwrap();
        assert_eq!(target.user.load(Ordering::SeqCst), 2);
        assert_eq!(target.global.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_tolerated() {
        let target = Arc::new(CountingTarget::default());
        target.fail_global.store(true, Ordering::SeqCst);
        let coordinator = RefreshCoordinator::new(target.clone(), vec![]);

        coordinator.refresh(RefreshScope::Both).await.unwrap();
        assert_eq!(target.user.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.stats().partial_failures, 1);

        target.fail_user.store(true, Ordering::SeqCst);
        assert!(coordinator.refresh(RefreshScope::Both).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_follow_ups() {
        let target = Arc::new(CountingTarget::default());
        let coordinator = Arc::new(RefreshCoordinator::new(
            target.clone(),
            vec![Duration::from_secs(3)],
        ));

        coordinator
            .refresh_with_follow_ups(RefreshScope::User)
            .await
            .unwrap();
        assert_eq!(target.user.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(target.user.load(Ordering::SeqCst), 2);

        // No unbounded chain: nothing further is ever scheduled
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(target.user.load(Ordering::SeqCst), 2);
    }
}
