//! Domain types for the transaction lifecycle engine

pub mod approval;
pub mod operation;
pub mod registry;

pub use approval::ApprovalState;
pub use operation::{
    OperationHandle, OperationKind, OperationOutcome, OperationPayload, PendingOperation, Receipt,
    ReceiptStatus, RefreshScope,
};
pub use registry::PendingRegistry;
