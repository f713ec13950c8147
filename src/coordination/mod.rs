//! Coordination layer for remote-call scheduling
//!
//! - Rate-limited, priority-ordered dispatch of outbound reads
//! - Classification-driven retry with exponential backoff for writes
//! - Short-lived read memoization

pub mod cache;
pub mod request_queue;
pub mod retry;

pub use cache::TtlCache;
pub use request_queue::{Priority, QueueStats, RateLimitedQueue};
pub use retry::{run_with_retry, RetryEvent, RetryPolicy};
