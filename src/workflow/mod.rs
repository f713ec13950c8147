//! Workflow layer: approval tracking and the operation engine

pub mod approval;
pub mod engine;
pub mod target;

pub use approval::ApprovalTracker;
pub use engine::{EngineStats, OperationEngine};
pub use target::VaultRefreshTarget;
