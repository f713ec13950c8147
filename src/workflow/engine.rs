//! Operation engine
//!
//! Front door for vault write operations. Each entry point validates its
//! preconditions, reserves the operation kind, pushes the submission through
//! the retry executor, and hands the returned handle to the outcome poller.
//! Derived-state refreshes and approval-state reconciliation happen as side
//! effects of the poller's terminal transitions.

use rust_decimal::Decimal;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use crate::adapters::{
    ChainProvider, GlobalSnapshot, UserSnapshot, VaultContext, VaultReader, WriteCall,
};
use crate::config::EngineConfig;
use crate::coordination::{
    run_with_retry, QueueStats, RateLimitedQueue, RetryEvent, RetryPolicy, TtlCache,
};
use crate::domain::{
    ApprovalState, OperationKind, OperationOutcome, OperationPayload, PendingOperation,
    PendingRegistry, RefreshScope,
};
use crate::error::{EngineError, Result};
use crate::persistence::{JournalEntry, OperationJournal};
use crate::services::{OutcomePoller, PollerConfig, PollerStats, RefreshCoordinator, RefreshStats};
use crate::workflow::approval::ApprovalTracker;
use crate::workflow::target::VaultRefreshTarget;

/// Engine throughput counters, merged from the engine's own atomics and the
/// subsystems it owns
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub submitted: u64,
    pub queue: QueueStats,
    pub poller: PollerStats,
    pub refresh: RefreshStats,
}

/// Orchestrator for the full submit -> poll -> refresh lifecycle
pub struct OperationEngine {
    context: VaultContext,
    reader: Arc<VaultReader>,
    registry: Arc<PendingRegistry>,
    poller: Arc<OutcomePoller>,
    refresh: Arc<RefreshCoordinator>,
    approval: Arc<ApprovalTracker>,
    journal: Arc<OperationJournal>,
    queue: RateLimitedQueue,
    retry: RetryPolicy,
    provider: Arc<dyn ChainProvider>,
    retry_listener: Mutex<Option<mpsc::UnboundedSender<RetryEvent>>>,
    submitted: AtomicU64,
}

impl OperationEngine {
    /// Build an engine and its subsystems from configuration
    pub async fn new(
        provider: Arc<dyn ChainProvider>,
        context: VaultContext,
        config: EngineConfig,
    ) -> Result<Arc<Self>> {
        if let Err(errors) = config.validate() {
            return Err(EngineError::Validation(errors.join("; ")));
        }

        let queue = RateLimitedQueue::new(config.queue_min_interval());
        let cache = Arc::new(TtlCache::new(config.cache_ttl()));
        let reader = Arc::new(VaultReader::new(
            Arc::clone(&provider),
            queue.clone(),
            cache,
            context.clone(),
        ));
        let approval = Arc::new(ApprovalTracker::new());
        let refresh = Arc::new(RefreshCoordinator::new(
            Arc::new(VaultRefreshTarget::new(
                Arc::clone(&reader),
                Arc::clone(&approval),
            )),
            config.follow_up_delays(),
        ));
        let poller = Arc::new(OutcomePoller::new(
            Arc::clone(&provider),
            Arc::clone(&refresh),
            PollerConfig::from_engine(&config),
        ));
        let journal = Arc::new(
            OperationJournal::open(
                &config.journal.path,
                Duration::from_secs(config.journal.max_age_secs),
            )
            .await?,
        );

        info!(
            "Engine ready for vault {} (actor {}, profile {:?})",
            context.vault_address, context.actor, config.profile
        );

        Ok(Arc::new(Self {
            context,
            reader,
            registry: Arc::new(PendingRegistry::new()),
            poller,
            refresh,
            approval,
            journal,
            queue,
            retry: RetryPolicy::for_profile(config.profile),
            provider,
            retry_listener: Mutex::new(None),
            submitted: AtomicU64::new(0),
        }))
    }

    /// Typed read layer, for embedders that need raw balances
    pub fn reader(&self) -> &Arc<VaultReader> {
        &self.reader
    }

    pub fn approval_state(&self) -> ApprovalState {
        self.approval.state()
    }

    /// Subscribe to approval state changes
    pub fn subscribe_approval(&self) -> watch::Receiver<ApprovalState> {
        self.approval.subscribe()
    }

    /// Is an operation of this kind reserved or awaiting its outcome?
    pub fn is_busy(&self, kind: OperationKind) -> bool {
        self.registry.has_pending(kind)
    }

    /// Receive retry progress events for every subsequent submission.
    /// Replaces any previous listener.
    pub fn retry_events(&self) -> mpsc::UnboundedReceiver<RetryEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self
            .retry_listener
            .lock()
            .expect("retry listener lock poisoned") = Some(tx);
        rx
    }

    /// Grant the vault an allowance of `amount` over the asset token.
    ///
    /// Rejected while another grant or a deposit is in flight; the grant
    /// would change the precondition the deposit was validated against.
    pub async fn approve(self: &Arc<Self>, amount: Decimal) -> Result<OperationOutcome> {
        validate_amount(amount)?;
        if self.context.native_asset {
            return Err(EngineError::Validation(
                "native-asset vaults need no allowance".to_string(),
            ));
        }
        if self.registry.has_pending(OperationKind::Deposit) {
            return Err(EngineError::DuplicateOperation {
                kind: OperationKind::Deposit.to_string(),
            });
        }

        let call = WriteCall::new(&self.context.asset_address, "approve")
            .with_args(vec![json!(self.context.vault_address), json!(amount)]);

        let reservation = ReservationGuard::acquire(&self.registry, OperationKind::Grant)?;
        let handle = self.submit_with_retry(&call).await?;

        if let Err(e) = self.approval.grant_submitted() {
            // The write is already out; the tracker will self-correct from
            // the next allowance read
            warn!("Approval tracker out of sync at submission: {}", e);
        }

        let op = PendingOperation::new(handle, OperationKind::Grant, OperationPayload::Amount(amount));
        let outcome = self.track_to_outcome(op, reservation).await?;

        match &outcome {
            OperationOutcome::Confirmed(_) => {
                if let Err(e) = self.approval.grant_confirmed() {
                    warn!("Approval tracker out of sync at confirmation: {}", e);
                }
            }
            OperationOutcome::Failed(_) => {
                if let Err(e) = self.approval.grant_failed() {
                    warn!("Approval tracker out of sync at failure: {}", e);
                }
            }
            // Outcome unknown: leave the tracker Pending and let the next
            // observed allowance settle it
            OperationOutcome::TimedOut => {}
        }
        Ok(outcome)
    }

    /// Deposit `amount` of the asset into the vault.
    ///
    /// Checks the live allowance first; an insufficient allowance surfaces
    /// as `ApprovalRequired` without any submission attempt.
    pub async fn deposit(self: &Arc<Self>, amount: Decimal) -> Result<OperationOutcome> {
        validate_amount(amount)?;

        if !self.context.native_asset {
            let allowance = self.reader.allowance().await?;
            self.approval.observe_allowance(allowance);
            if allowance < amount {
                return Err(EngineError::ApprovalRequired {
                    required: amount,
                    available: allowance,
                });
            }
        }

        let mut call = WriteCall::new(&self.context.vault_address, "deposit")
            .with_args(vec![json!(amount)]);
        if self.context.native_asset {
            call = call.with_value(amount);
        }

        self.execute(OperationKind::Deposit, OperationPayload::Amount(amount), call)
            .await
    }

    /// Withdraw by burning shares immediately, paying the instant-exit fee
    pub async fn withdraw_instant(self: &Arc<Self>, shares: Decimal) -> Result<OperationOutcome> {
        validate_amount(shares)?;
        let call = WriteCall::new(&self.context.vault_address, "withdraw_instant")
            .with_args(vec![json!(shares)]);
        self.execute(
            OperationKind::WithdrawInstant,
            OperationPayload::Shares(shares),
            call,
        )
        .await
    }

    /// Queue a delayed withdrawal of `shares`
    pub async fn withdraw_initiate(self: &Arc<Self>, shares: Decimal) -> Result<OperationOutcome> {
        validate_amount(shares)?;
        let call = WriteCall::new(&self.context.vault_address, "withdraw_initiate")
            .with_args(vec![json!(shares)]);
        self.execute(
            OperationKind::WithdrawInitiate,
            OperationPayload::Shares(shares),
            call,
        )
        .await
    }

    /// Complete a matured queued withdrawal
    pub async fn withdraw_complete(self: &Arc<Self>) -> Result<OperationOutcome> {
        let call = WriteCall::new(&self.context.vault_address, "withdraw_complete");
        self.execute(
            OperationKind::WithdrawComplete,
            OperationPayload::None,
            call,
        )
        .await
    }

    /// Redeem `shares` for the underlying asset
    pub async fn redeem(self: &Arc<Self>, shares: Decimal) -> Result<OperationOutcome> {
        validate_amount(shares)?;
        let call = WriteCall::new(&self.context.vault_address, "redeem")
            .with_args(vec![json!(shares)]);
        self.execute(OperationKind::Redeem, OperationPayload::Shares(shares), call)
            .await
    }

    /// Redeem the actor's entire share balance
    pub async fn redeem_all(self: &Arc<Self>) -> Result<OperationOutcome> {
        let call = WriteCall::new(&self.context.vault_address, "redeem_all");
        self.execute(OperationKind::RedeemAll, OperationPayload::None, call)
            .await
    }

    /// Force a refresh outside the post-confirmation flow, e.g. on a UI
    /// foreground event
    pub async fn refresh(&self, scope: RefreshScope) -> Result<()> {
        self.refresh.refresh(scope).await
    }

    /// Current user-scoped state, read fresh
    pub async fn user_snapshot(&self) -> Result<UserSnapshot> {
        let snapshot = self.reader.refresh_user().await?;
        if !self.context.native_asset {
            self.approval.observe_allowance(snapshot.allowance);
        }
        Ok(snapshot)
    }

    /// Current vault-wide state, read fresh
    pub async fn global_snapshot(&self) -> Result<GlobalSnapshot> {
        self.reader.refresh_global().await
    }

    /// Journaled operations whose outcome was never resolved, oldest first
    pub async fn unresolved_operations(&self) -> Vec<JournalEntry> {
        self.journal.unresolved().await
    }

    /// Resume observation of a journaled operation after a reload
    pub async fn resume(self: &Arc<Self>, entry: &JournalEntry) -> Result<OperationOutcome> {
        let reservation = ReservationGuard::acquire(&self.registry, entry.kind)?;
        let op = PendingOperation::new(
            crate::domain::OperationHandle::new(entry.handle.clone()),
            entry.kind,
            OperationPayload::None,
        );
        info!("Resuming observation of {} operation {}", op.kind, op.handle);
        self.track_to_outcome(op, reservation).await
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            submitted: self.submitted.load(Ordering::SeqCst),
            queue: self.queue.stats(),
            poller: self.poller.stats(),
            refresh: self.refresh.stats(),
        }
    }

    /// Shared reserve -> submit -> observe flow for non-grant operations
    async fn execute(
        self: &Arc<Self>,
        kind: OperationKind,
        payload: OperationPayload,
        call: WriteCall,
    ) -> Result<OperationOutcome> {
        let reservation = ReservationGuard::acquire(&self.registry, kind)?;
        let handle = self.submit_with_retry(&call).await?;
        self.track_to_outcome(PendingOperation::new(handle, kind, payload), reservation)
            .await
    }

    async fn submit_with_retry(&self, call: &WriteCall) -> Result<crate::domain::OperationHandle> {
        let listener = self
            .retry_listener
            .lock()
            .expect("retry listener lock poisoned")
            .clone();
        let provider = Arc::clone(&self.provider);
        let handle = run_with_retry(
            &self.retry,
            move || {
                let provider = Arc::clone(&provider);
                let call = call.clone();
                async move { provider.submit(&call).await }
            },
            listener,
        )
        .await?;
        self.submitted.fetch_add(1, Ordering::SeqCst);
        info!("Submitted {} as {}", call.method, handle);
        Ok(handle)
    }

    /// Register a submitted operation and wait for its terminal outcome.
    ///
    /// Journaling, journal resolution, and the registry release all run in
    /// a spawned task, not in this future: a caller may drop the returned
    /// future at any await point (component unmount, timeout wrapper), and
    /// the kind reservation must still be released once observation
    /// terminates. Everything between submission and the spawn is
    /// synchronous, so there is no await point at which cancellation could
    /// strand the reservation.
    async fn track_to_outcome(
        self: &Arc<Self>,
        op: PendingOperation,
        reservation: ReservationGuard,
    ) -> Result<OperationOutcome> {
        let handle = op.handle.clone();
        let kind = op.kind;
        self.registry.register(op.clone());
        let watch = self.poller.watch(op);
        // Registered and observed: release now belongs to the spawned task
        reservation.disarm();

        let (tx, rx) = oneshot::channel();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.journal.record(&handle, kind).await {
                // Losing the journal degrades crash recovery, not correctness
                warn!("Failed to journal {}: {}", handle, e);
            }
            let result = watch.outcome().await;
            if let Ok(outcome) = &result {
                if let Err(e) = engine.journal.mark(&handle, outcome.status_str()).await {
                    warn!("Failed to resolve journal entry {}: {}", handle, e);
                }
            }
            engine.registry.remove(&handle);
            // The caller may have gone away; the release above already ran
            let _ = tx.send(result);
        });

        rx.await.map_err(|_| EngineError::Cancelled)?
    }
}

/// Holds a kind reservation across the submission awaits. Dropping an armed
/// guard releases the reservation, covering both submission errors and a
/// caller cancelling mid-submission (no handle exists yet in either case,
/// so there is nothing to observe).
struct ReservationGuard {
    registry: Arc<PendingRegistry>,
    kind: OperationKind,
    armed: bool,
}

impl ReservationGuard {
    fn acquire(registry: &Arc<PendingRegistry>, kind: OperationKind) -> Result<Self> {
        registry.begin(kind)?;
        Ok(Self {
            registry: Arc::clone(registry),
            kind,
            armed: true,
        })
    }

    /// Hand release responsibility over to the observation task
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        if self.armed {
            self.registry.abort(self.kind);
        }
    }
}

fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::Validation(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_released_on_drop_unless_disarmed() {
        let registry = Arc::new(PendingRegistry::new());

        let guard = ReservationGuard::acquire(&registry, OperationKind::Deposit).unwrap();
        assert!(registry.has_pending(OperationKind::Deposit));
        drop(guard);
        assert!(!registry.has_pending(OperationKind::Deposit));

        let guard = ReservationGuard::acquire(&registry, OperationKind::Deposit).unwrap();
        guard.disarm();
        assert!(registry.has_pending(OperationKind::Deposit));
    }

    #[test]
    fn test_amount_validation() {
        use rust_decimal_macros::dec;

        assert!(validate_amount(dec!(0.0001)).is_ok());
        assert!(matches!(
            validate_amount(Decimal::ZERO),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_amount(dec!(-5)),
            Err(EngineError::Validation(_))
        ));
    }
}
