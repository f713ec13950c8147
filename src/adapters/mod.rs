//! Remote-chain boundary and read adapters

pub mod simulated;
pub mod traits;
pub mod vault;

pub use simulated::{ReceiptScript, SimulatedProvider};
pub use traits::{ChainProvider, ReadCall, WriteCall};
pub use vault::{GlobalSnapshot, UserSnapshot, VaultContext, VaultReader};
