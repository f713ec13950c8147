//! Outcome poller
//!
//! Turns a submitted-operation handle into a terminal outcome. Each watched
//! handle gets its own task: an immediate first receipt check so fast
//! confirmations are observed promptly, then a fixed cadence until a receipt
//! appears or the wall-clock timeout expires. Detaching stops observation
//! only; a submitted write is irrevocable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapters::ChainProvider;
use crate::config::EngineConfig;
use crate::domain::{OperationOutcome, PendingOperation, ReceiptStatus};
use crate::error::{EngineError, Result};
use crate::services::refresh::RefreshCoordinator;

/// Timing knobs for the poller
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Cadence between receipt checks
    pub interval: Duration,
    /// Wall-clock budget before observation gives up
    pub timeout: Duration,
    /// Delay between confirmation and the first refresh, letting the
    /// remote's own state catch up before it is read back
    pub propagation_delay: Duration,
    /// Delay before the extra refresh for kinds with two dependent reads
    pub second_refresh_delay: Duration,
}

impl PollerConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            timeout: config.poll_timeout(),
            propagation_delay: config.propagation_delay(),
            second_refresh_delay: config.second_refresh_delay(),
        }
    }
}

/// Poller throughput counters
#[derive(Debug, Clone, Default)]
pub struct PollerStats {
    pub confirmed: u64,
    pub failed: u64,
    pub timed_out: u64,
}

/// An active observation of one submitted operation.
///
/// Await `outcome()` for the terminal result, or `detach()` to stop
/// observing without affecting the remote operation.
pub struct OutcomeWatch {
    task: JoinHandle<()>,
    rx: oneshot::Receiver<OperationOutcome>,
}

impl OutcomeWatch {
    /// Wait for the terminal outcome
    pub async fn outcome(self) -> Result<OperationOutcome> {
        self.rx.await.map_err(|_| EngineError::Cancelled)
    }

    /// Stop observing. Clears the polling task deterministically; the
    /// remote write itself cannot be cancelled.
    pub fn detach(self) {
        self.task.abort();
    }
}

/// Per-handle receipt poller
pub struct OutcomePoller {
    provider: Arc<dyn ChainProvider>,
    refresh: Arc<RefreshCoordinator>,
    config: PollerConfig,
    confirmed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

impl OutcomePoller {
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        refresh: Arc<RefreshCoordinator>,
        config: PollerConfig,
    ) -> Self {
        Self {
            provider,
            refresh,
            config,
            confirmed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        }
    }

    /// Start observing a pending operation
    pub fn watch(self: &Arc<Self>, op: PendingOperation) -> OutcomeWatch {
        let (tx, rx) = oneshot::channel();
        let poller = Arc::clone(self);

        let task = tokio::spawn(async move {
            let outcome = poller.poll_until_terminal(&op).await;
            poller.record_outcome(&op, &outcome);
            // Receiver may have detached; observation still ran to term
            let _ = tx.send(outcome);
        });

        OutcomeWatch { task, rx }
    }

    async fn poll_until_terminal(&self, op: &PendingOperation) -> OperationOutcome {
        let deadline = Instant::now() + self.config.timeout;
        debug!(
            "Polling {} operation {} (interval {:?}, timeout {:?})",
            op.kind, op.handle, self.config.interval, self.config.timeout
        );

        loop {
            // First check runs with zero delay so fast confirmations are
            // observed within one cadence of submission
            match self.provider.receipt_for(&op.handle).await {
                Ok(Some(receipt)) => {
                    return match receipt.status {
                        ReceiptStatus::Success => OperationOutcome::Confirmed(receipt),
                        ReceiptStatus::Failure => OperationOutcome::Failed(receipt),
                    };
                }
                // No receipt yet: still polling, not an error
                Ok(None) => {}
                Err(e) => {
                    warn!("Receipt check for {} failed: {}", op.handle, e);
                }
            }

            if Instant::now() >= deadline {
                return OperationOutcome::TimedOut;
            }
            tokio::time::sleep(self.config.interval).await;
        }
    }

    fn record_outcome(&self, op: &PendingOperation, outcome: &OperationOutcome) {
        match outcome {
            OperationOutcome::Confirmed(_) => {
                self.confirmed.fetch_add(1, Ordering::SeqCst);
                info!("Operation {} ({}) confirmed", op.handle, op.kind);
                self.schedule_refresh(op);
            }
            OperationOutcome::Failed(receipt) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                warn!(
                    "Operation {} ({}) failed: {}",
                    op.handle,
                    op.kind,
                    receipt.reason.as_deref().unwrap_or("no reason decoded")
                );
            }
            OperationOutcome::TimedOut => {
                self.timed_out.fetch_add(1, Ordering::SeqCst);
                // The real outcome is unknown, not negative; callers must
                // surface this distinctly from a failure
                warn!(
                    "Gave up observing {} ({}) after {:?}; outcome unknown",
                    op.handle, op.kind, self.config.timeout
                );
            }
        }
    }

    /// Schedule the propagation-delayed refresh for a confirmed operation,
    /// plus the extra delayed refresh for kinds whose downstream effects
    /// need two dependent reads
    fn schedule_refresh(&self, op: &PendingOperation) {
        let scope = op.kind.refresh_scope();
        let refresh = Arc::clone(&self.refresh);
        let delay = self.config.propagation_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = refresh.refresh_with_follow_ups(scope).await {
                warn!("Post-confirmation {} refresh failed: {}", scope, e);
            }
        });

        if op.kind.needs_second_refresh() {
            let refresh = Arc::clone(&self.refresh);
            let delay = self.config.second_refresh_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = refresh.refresh(scope).await {
                    warn!("Second {} refresh failed: {}", scope, e);
                }
            });
        }
    }

    pub fn stats(&self) -> PollerStats {
        PollerStats {
            confirmed: self.confirmed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            timed_out: self.timed_out.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::simulated::{ReceiptScript, SimulatedProvider};
    use crate::adapters::WriteCall;
    use crate::domain::{OperationKind, OperationPayload};
    use crate::services::refresh::RefreshTarget;
    use async_trait::async_trait;

    #[derive(Default)]
    struct NullTarget {
        user: AtomicU64,
        global: AtomicU64,
    }

    #[async_trait]
    impl RefreshTarget for NullTarget {
        async fn refresh_user(&self) -> Result<()> {
            self.user.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn refresh_global(&self) -> Result<()> {
            self.global.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_config() -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(400),
            timeout: Duration::from_secs(30),
            propagation_delay: Duration::from_millis(1500),
            second_refresh_delay: Duration::from_secs(5),
        }
    }

    async fn submitted(
        provider: &SimulatedProvider,
        kind: OperationKind,
        script: ReceiptScript,
    ) -> PendingOperation {
        provider.push_receipt_script(script);
        let handle = provider
            .submit(&WriteCall::new("0xvault", kind.as_str()))
            .await
            .unwrap();
        PendingOperation::new(handle, kind, OperationPayload::None)
    }

    fn poller(
        provider: Arc<SimulatedProvider>,
        target: Arc<NullTarget>,
        follow_ups: Vec<Duration>,
    ) -> Arc<OutcomePoller> {
        let refresh = Arc::new(RefreshCoordinator::new(target, follow_ups));
        Arc::new(OutcomePoller::new(provider, refresh, test_config()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_receipt_after_nth_check_confirms_and_stops() {
        let provider = Arc::new(SimulatedProvider::new());
        let target = Arc::new(NullTarget::default());
        let poller = poller(provider.clone(), target, vec![]);

        let op = submitted(
            &provider,
            OperationKind::Deposit,
            ReceiptScript {
                checks_before_receipt: 3,
                ..Default::default()
            },
        )
        .await;
        let handle = op.handle.clone();

        let start = Instant::now();
        let outcome = poller.watch(op).outcome().await.unwrap();
        assert!(outcome.is_confirmed());
        // Checks at 0ms, 400ms, 800ms, 1200ms; terminal on the fourth
        assert_eq!(start.elapsed(), Duration::from_millis(1200));
        assert_eq!(provider.checks_for(&handle), 4);

        // No check occurs after the terminal transition
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(provider.checks_for(&handle), 4);
        assert_eq!(poller.stats().confirmed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_receipt_reported_without_refresh() {
        let provider = Arc::new(SimulatedProvider::new());
        let target = Arc::new(NullTarget::default());
        let poller = poller(provider.clone(), target.clone(), vec![]);

        let op = submitted(
            &provider,
            OperationKind::Deposit,
            ReceiptScript {
                status: ReceiptStatus::Failure,
                reason: Some("insufficient shares".into()),
                ..Default::default()
            },
        )
        .await;

        let outcome = poller.watch(op).outcome().await.unwrap();
        assert!(matches!(outcome, OperationOutcome::Failed(_)));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(target.user.load(Ordering::SeqCst), 0);
        assert_eq!(target.global.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_receipt_times_out() {
        let provider = Arc::new(SimulatedProvider::new());
        let target = Arc::new(NullTarget::default());
        let poller = poller(provider.clone(), target, vec![]);

        let op = submitted(
            &provider,
            OperationKind::Deposit,
            ReceiptScript {
                never: true,
                ..Default::default()
            },
        )
        .await;
        let handle = op.handle.clone();

        let start = Instant::now();
        let outcome = poller.watch(op).outcome().await.unwrap();
        assert_eq!(outcome, OperationOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_secs(30));

        let checks = provider.checks_for(&handle);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(provider.checks_for(&handle), checks);
        assert_eq!(poller.stats().timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_stops_observation() {
        let provider = Arc::new(SimulatedProvider::new());
        let target = Arc::new(NullTarget::default());
        let poller = poller(provider.clone(), target, vec![]);

        let op = submitted(
            &provider,
            OperationKind::Deposit,
            ReceiptScript {
                never: true,
                ..Default::default()
            },
        )
        .await;
        let handle = op.handle.clone();

        let watch = poller.watch(op);
        tokio::time::sleep(Duration::from_secs(2)).await;
        let checks_at_detach = provider.checks_for(&handle);
        assert!(checks_at_detach > 0);

        watch.detach();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(provider.checks_for(&handle), checks_at_detach);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_deposit_schedules_propagation_refresh() {
        let provider = Arc::new(SimulatedProvider::new());
        let target = Arc::new(NullTarget::default());
        // One follow-up at +3s after the propagation-delayed refresh
        let poller = poller(
            provider.clone(),
            target.clone(),
            vec![Duration::from_secs(3)],
        );

        let op = submitted(&provider, OperationKind::Deposit, ReceiptScript::default()).await;
        let outcome = poller.watch(op).outcome().await.unwrap();
        assert!(outcome.is_confirmed());

        // Nothing before the propagation delay elapses
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(target.user.load(Ordering::SeqCst), 0);

        // Propagation-delayed refresh at +1.5s
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(target.user.load(Ordering::SeqCst), 1);
        assert_eq!(target.global.load(Ordering::SeqCst), 1);

        // One bounded follow-up, then quiescence
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(target.user.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(target.user.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_withdraw_kind_gets_second_refresh() {
        let provider = Arc::new(SimulatedProvider::new());
        let target = Arc::new(NullTarget::default());
        let poller = poller(provider.clone(), target.clone(), vec![]);

        let op = submitted(
            &provider,
            OperationKind::WithdrawInitiate,
            ReceiptScript::default(),
        )
        .await;
        let outcome = poller.watch(op).outcome().await.unwrap();
        assert!(outcome.is_confirmed());

        // Propagation refresh at +1.5s, second refresh at +5s
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(target.user.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(target.user.load(Ordering::SeqCst), 2);
        assert_eq!(target.global.load(Ordering::SeqCst), 2);
    }
}
