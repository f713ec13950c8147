//! Pending-operation registry
//!
//! Correlates submitted operation handles back to domain intent so the
//! outcome poller and refresh coordinator can act on the right scope.
//! Constructor-injected rather than a module-level singleton so tests can
//! instantiate isolated instances.

use crate::domain::operation::{OperationHandle, OperationKind, PendingOperation};
use crate::error::{EngineError, Result};
use dashmap::DashMap;
use tracing::debug;

/// Process-wide map of in-flight operations keyed by handle.
///
/// At most one operation of a given kind may be outstanding at a time. The
/// kind is reserved from the moment a submission attempt starts, not from
/// when a handle exists, so two interleaved submission attempts cannot both
/// pass the precondition check: the second is rejected, never raced.
#[derive(Default)]
pub struct PendingRegistry {
    operations: DashMap<OperationHandle, PendingOperation>,
    in_flight: DashMap<OperationKind, ()>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a kind before dispatching its submission.
    ///
    /// Rejects when another operation of the same kind is outstanding
    /// (reserved or already submitted).
    pub fn begin(&self, kind: OperationKind) -> Result<()> {
        // insert returns the previous value; a previous () means the kind
        // was already reserved and this attempt loses
        if self.in_flight.insert(kind, ()).is_some() {
            return Err(EngineError::DuplicateOperation {
                kind: kind.to_string(),
            });
        }
        debug!("Reserved in-flight slot for {} operation", kind);
        Ok(())
    }

    /// Release a reservation whose submission failed before a handle existed
    pub fn abort(&self, kind: OperationKind) {
        self.in_flight.remove(&kind);
        debug!("Released in-flight slot for {} operation", kind);
    }

    /// Record the submitted operation behind a previously reserved kind
    pub fn register(&self, op: PendingOperation) {
        debug!("Registered pending {} operation {}", op.kind, op.handle);
        self.operations.insert(op.handle.clone(), op);
    }

    /// Remove an operation once its outcome has been consumed, releasing
    /// the kind for the next submission
    pub fn remove(&self, handle: &OperationHandle) -> Option<PendingOperation> {
        let removed = self.operations.remove(handle).map(|(_, op)| op);
        if let Some(op) = &removed {
            self.in_flight.remove(&op.kind);
            debug!("Removed pending {} operation {}", op.kind, op.handle);
        }
        removed
    }

    /// Look up the domain intent behind a handle
    pub fn get(&self, handle: &OperationHandle) -> Option<PendingOperation> {
        self.operations.get(handle).map(|entry| entry.clone())
    }

    /// Is any operation of this kind reserved or outstanding?
    pub fn has_pending(&self, kind: OperationKind) -> bool {
        self.in_flight.contains_key(&kind)
    }

    /// Number of operations with a handle awaiting an outcome
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::operation::OperationPayload;
    use rust_decimal_macros::dec;

    fn pending(handle: &str, kind: OperationKind) -> PendingOperation {
        PendingOperation::new(
            OperationHandle::new(handle),
            kind,
            OperationPayload::Amount(dec!(10)),
        )
    }

    #[test]
    fn test_begin_register_remove() {
        let registry = PendingRegistry::new();
        registry.begin(OperationKind::Deposit).unwrap();
        registry.register(pending("0xabc", OperationKind::Deposit));
        assert!(registry.has_pending(OperationKind::Deposit));
        assert_eq!(registry.len(), 1);

        let removed = registry.remove(&OperationHandle::new("0xabc")).unwrap();
        assert_eq!(removed.kind, OperationKind::Deposit);
        assert!(registry.is_empty());
        assert!(!registry.has_pending(OperationKind::Deposit));
    }

    #[test]
    fn test_duplicate_kind_rejected_at_begin() {
        let registry = PendingRegistry::new();
        registry.begin(OperationKind::Grant).unwrap();

        let err = registry.begin(OperationKind::Grant).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateOperation { .. }));

        // The loser's failure must not release the winner's reservation
        assert!(registry.has_pending(OperationKind::Grant));

        // A different kind is still allowed
        registry.begin(OperationKind::Deposit).unwrap();
    }

    #[test]
    fn test_abort_releases_reservation() {
        let registry = PendingRegistry::new();
        registry.begin(OperationKind::Deposit).unwrap();
        registry.abort(OperationKind::Deposit);
        assert!(!registry.has_pending(OperationKind::Deposit));
        registry.begin(OperationKind::Deposit).unwrap();
    }
}
