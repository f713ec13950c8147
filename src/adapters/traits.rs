use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{OperationHandle, Receipt};
use crate::error::Result;

/// An idempotent remote read: `(address, method, args) -> value | throws`.
///
/// Safe to retry and to deduplicate through the TTL cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadCall {
    pub address: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

impl ReadCall {
    pub fn new(address: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            method: method.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<serde_json::Value>) -> Self {
        self.args = args;
        self
    }

    /// Cache key covering address, method, and every argument
    pub fn cache_key(&self) -> String {
        let args = serde_json::to_string(&self.args).unwrap_or_default();
        format!("{}:{}:{}", self.address, self.method, args)
    }
}

/// A non-idempotent remote write. Never silently retried after partial
/// uncertainty: the executor only retries when submission itself failed
/// before a handle was returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteCall {
    pub address: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    /// Native-asset value attached to the call, when applicable
    #[serde(default)]
    pub value: Option<Decimal>,
}

impl WriteCall {
    pub fn new(address: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            method: method.into(),
            args: Vec::new(),
            value: None,
        }
    }

    pub fn with_args(mut self, args: Vec<serde_json::Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_value(mut self, value: Decimal) -> Self {
        self.value = Some(value);
        self
    }
}

/// Remote-chain boundary.
///
/// Implementations must map their failure modes onto the structured
/// `EngineError` variants so retry classification stays structural.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Execute an idempotent read call
    async fn read(&self, call: &ReadCall) -> Result<serde_json::Value>;

    /// Submit a write; a returned handle means the remote accepted the
    /// submission, not that the operation succeeded
    async fn submit(&self, call: &WriteCall) -> Result<OperationHandle>;

    /// Query for a terminal receipt. `None` means still pending, which is
    /// not an error.
    async fn receipt_for(&self, handle: &OperationHandle) -> Result<Option<Receipt>>;
}
