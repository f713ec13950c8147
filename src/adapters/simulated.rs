//! Simulated chain provider
//!
//! Scripted in-memory provider used by the test suites and by dry-run
//! embedders: reads come from a mutable value table, submissions can be made
//! to fail with a chosen classification, and receipts appear after a
//! configurable number of checks.

use async_trait::async_trait;
use rand::RngCore;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::adapters::traits::{ChainProvider, ReadCall, WriteCall};
use crate::domain::{OperationHandle, Receipt, ReceiptStatus};
use crate::error::{EngineError, ErrorClass, Result};

/// How the receipt for one submission should behave
#[derive(Debug, Clone)]
pub struct ReceiptScript {
    /// Receipt checks that must happen before the receipt appears
    pub checks_before_receipt: u32,
    pub status: ReceiptStatus,
    pub reason: Option<String>,
    /// Never produce a receipt at all (forces a poll timeout)
    pub never: bool,
}

impl Default for ReceiptScript {
    fn default() -> Self {
        Self {
            checks_before_receipt: 0,
            status: ReceiptStatus::Success,
            reason: None,
            never: false,
        }
    }
}

struct TrackedSubmission {
    script: ReceiptScript,
    checks_seen: u32,
}

#[derive(Default)]
struct SimulatedState {
    reads: HashMap<String, serde_json::Value>,
    read_log: Vec<String>,
    submit_log: Vec<WriteCall>,
    submit_faults: VecDeque<ErrorClass>,
    next_receipt: VecDeque<ReceiptScript>,
    tracked: HashMap<OperationHandle, TrackedSubmission>,
}

/// In-memory provider with scripted failures and receipt timing
#[derive(Default)]
pub struct SimulatedProvider {
    state: Mutex<SimulatedState>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value returned for a read method (keyed by method name)
    pub fn set_read(&self, method: impl Into<String>, value: serde_json::Value) {
        let mut state = self.state.lock().expect("simulated state lock poisoned");
        state.reads.insert(method.into(), value);
    }

    /// Convenience for decimal-valued reads such as allowances and balances
    pub fn set_read_decimal(&self, method: impl Into<String>, value: Decimal) {
        self.set_read(method, serde_json::Value::String(value.to_string()));
    }

    /// Queue a submission failure of the given class; consumed one per call
    pub fn push_submit_fault(&self, class: ErrorClass) {
        let mut state = self.state.lock().expect("simulated state lock poisoned");
        state.submit_faults.push_back(class);
    }

    /// Script the receipt behavior of the next successful submission
    pub fn push_receipt_script(&self, script: ReceiptScript) {
        let mut state = self.state.lock().expect("simulated state lock poisoned");
        state.next_receipt.push_back(script);
    }

    /// Methods read so far, in order
    pub fn read_log(&self) -> Vec<String> {
        let state = self.state.lock().expect("simulated state lock poisoned");
        state.read_log.clone()
    }

    pub fn read_count(&self, method: &str) -> usize {
        let state = self.state.lock().expect("simulated state lock poisoned");
        state.read_log.iter().filter(|m| *m == method).count()
    }

    /// Write calls accepted so far
    pub fn submit_log(&self) -> Vec<WriteCall> {
        let state = self.state.lock().expect("simulated state lock poisoned");
        state.submit_log.clone()
    }

    /// Force a terminal receipt for a handle, overriding its script. Also
    /// accepts handles submitted before this provider instance (a tracked
    /// entry is created on demand), for reload scenarios.
    pub fn set_receipt(&self, handle: &str, status: ReceiptStatus) {
        let mut state = self.state.lock().expect("simulated state lock poisoned");
        let entry = state
            .tracked
            .entry(OperationHandle::new(handle))
            .or_insert_with(|| TrackedSubmission {
                script: ReceiptScript::default(),
                checks_seen: 0,
            });
        entry.script = ReceiptScript {
            checks_before_receipt: 0,
            status,
            reason: None,
            never: false,
        };
    }

    /// Receipt checks observed for a handle
    pub fn checks_for(&self, handle: &OperationHandle) -> u32 {
        let state = self.state.lock().expect("simulated state lock poisoned");
        state
            .tracked
            .get(handle)
            .map(|t| t.checks_seen)
            .unwrap_or(0)
    }

    fn fault_to_error(class: ErrorClass) -> EngineError {
        match class {
            ErrorClass::RateLimited => EngineError::RateLimited("simulated 429".into()),
            ErrorClass::UserRejected => EngineError::UserRejected("simulated rejection".into()),
            ErrorClass::NonceConflict => EngineError::NonceConflict("simulated nonce race".into()),
            ErrorClass::TransientNetwork => EngineError::Network("simulated disconnect".into()),
            ErrorClass::Reverted => EngineError::Reverted {
                reason: "simulated revert".into(),
            },
            ErrorClass::Unclassified => EngineError::Internal("simulated unknown fault".into()),
        }
    }

    fn random_handle() -> OperationHandle {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        OperationHandle::new(format!("0x{}", hex::encode(bytes)))
    }
}

#[async_trait]
impl ChainProvider for SimulatedProvider {
    async fn read(&self, call: &ReadCall) -> Result<serde_json::Value> {
        let mut state = self.state.lock().expect("simulated state lock poisoned");
        state.read_log.push(call.method.clone());
        Ok(state
            .reads
            .get(&call.method)
            .cloned()
            .unwrap_or_else(|| serde_json::Value::String("0".to_string())))
    }

    async fn submit(&self, call: &WriteCall) -> Result<OperationHandle> {
        let mut state = self.state.lock().expect("simulated state lock poisoned");
        if let Some(class) = state.submit_faults.pop_front() {
            return Err(Self::fault_to_error(class));
        }

        let handle = Self::random_handle();
        let script = state.next_receipt.pop_front().unwrap_or_default();
        state.submit_log.push(call.clone());
        state.tracked.insert(
            handle.clone(),
            TrackedSubmission {
                script,
                checks_seen: 0,
            },
        );
        Ok(handle)
    }

    async fn receipt_for(&self, handle: &OperationHandle) -> Result<Option<Receipt>> {
        let mut state = self.state.lock().expect("simulated state lock poisoned");
        let tracked = match state.tracked.get_mut(handle) {
            Some(t) => t,
            None => return Ok(None),
        };

        tracked.checks_seen += 1;
        if tracked.script.never || tracked.checks_seen <= tracked.script.checks_before_receipt {
            return Ok(None);
        }

        Ok(Some(Receipt {
            handle: handle.clone(),
            status: tracked.script.status,
            reason: tracked.script.reason.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_submit_fault_consumed_once() {
        let provider = SimulatedProvider::new();
        provider.push_submit_fault(ErrorClass::RateLimited);

        let call = WriteCall::new("0xvault", "deposit");
        assert!(matches!(
            provider.submit(&call).await,
            Err(EngineError::RateLimited(_))
        ));
        assert!(provider.submit(&call).await.is_ok());
    }

    #[tokio::test]
    async fn test_receipt_appears_after_scripted_checks() {
        let provider = SimulatedProvider::new();
        provider.push_receipt_script(ReceiptScript {
            checks_before_receipt: 2,
            ..Default::default()
        });

        let handle = provider
            .submit(&WriteCall::new("0xvault", "deposit"))
            .await
            .unwrap();

        assert!(provider.receipt_for(&handle).await.unwrap().is_none());
        assert!(provider.receipt_for(&handle).await.unwrap().is_none());
        let receipt = provider.receipt_for(&handle).await.unwrap().unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Success);
        assert_eq!(provider.checks_for(&handle), 3);
    }

    #[tokio::test]
    async fn test_unknown_handle_has_no_receipt() {
        let provider = SimulatedProvider::new();
        let receipt = provider
            .receipt_for(&OperationHandle::new("0xmissing"))
            .await
            .unwrap();
        assert!(receipt.is_none());
    }
}
