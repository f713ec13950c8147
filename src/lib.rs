pub mod adapters;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod services;
pub mod workflow;

pub use adapters::{
    ChainProvider, GlobalSnapshot, ReadCall, ReceiptScript, SimulatedProvider, UserSnapshot,
    VaultContext, VaultReader, WriteCall,
};
pub use config::{EngineConfig, NetworkProfile};
pub use coordination::{Priority, RateLimitedQueue, RetryEvent, RetryPolicy, TtlCache};
pub use domain::{
    ApprovalState, OperationHandle, OperationKind, OperationOutcome, OperationPayload,
    PendingOperation, PendingRegistry, Receipt, ReceiptStatus, RefreshScope,
};
pub use error::{EngineError, ErrorClass, Result};
pub use logging::init_logging;
pub use persistence::{JournalEntry, OperationJournal};
pub use services::{OutcomePoller, OutcomeWatch, PollerConfig, RefreshCoordinator, RefreshTarget};
pub use workflow::{ApprovalTracker, EngineStats, OperationEngine};
