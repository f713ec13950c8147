//! Background services: receipt polling and post-confirmation refresh

pub mod poller;
pub mod refresh;

pub use poller::{OutcomePoller, OutcomeWatch, PollerConfig, PollerStats};
pub use refresh::{RefreshCoordinator, RefreshStats, RefreshTarget};
