//! Approval state tracking
//!
//! The remote allowance is ground truth; this tracker caches its trajectory
//! and self-corrects whenever an observed allowance read disagrees with the
//! transition history. State changes are published on a watch channel so the
//! UI collaborator can subscribe without a rendering framework.

use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::domain::ApprovalState;
use crate::error::{EngineError, Result};

/// Watch-channel backed approval state machine
pub struct ApprovalTracker {
    tx: watch::Sender<ApprovalState>,
    // Held so the channel never closes while the tracker lives
    _rx: watch::Receiver<ApprovalState>,
}

impl Default for ApprovalTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalTracker {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ApprovalState::Idle);
        Self { tx, _rx: rx }
    }

    pub fn state(&self) -> ApprovalState {
        *self.tx.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<ApprovalState> {
        self.tx.subscribe()
    }

    fn transition(&self, to: ApprovalState, reason: &str) -> Result<()> {
        let from = self.state();
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        debug!("Approval state {} -> {}: {}", from, to, reason);
        self.tx.send_replace(to);
        Ok(())
    }

    /// A grant submission was accepted by the remote
    pub fn grant_submitted(&self) -> Result<()> {
        self.transition(ApprovalState::Pending, "grant submitted")
    }

    /// The tracked grant reached a confirmed receipt
    pub fn grant_confirmed(&self) -> Result<()> {
        self.transition(ApprovalState::Approved, "grant confirmed")
    }

    /// The tracked grant failed terminally
    pub fn grant_failed(&self) -> Result<()> {
        self.transition(ApprovalState::Idle, "grant failed")
    }

    /// Reconcile with an observed allowance read.
    ///
    /// A non-zero allowance while `Pending` fast-paths to `Approved`
    /// (covering the case where an external read outruns the poller); a zero
    /// allowance forces `Idle` from any state (externally revoked or
    /// never-completed approvals).
    pub fn observe_allowance(&self, allowance: Decimal) {
        let state = self.state();
        if allowance > Decimal::ZERO {
            if state == ApprovalState::Pending {
                info!(
                    "Observed allowance {} while PENDING, fast-pathing to APPROVED",
                    allowance
                );
                self.tx.send_replace(ApprovalState::Approved);
            }
        } else if state != ApprovalState::Idle {
            warn!("Observed zero allowance while {}, forcing IDLE", state);
            self.tx.send_replace(ApprovalState::Idle);
        }
    }
}
