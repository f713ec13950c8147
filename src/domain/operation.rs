use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier for a submitted write (e.g. a transaction hash).
///
/// Produced by a successful submission, consumed by the outcome poller,
/// discarded once a terminal outcome has been observed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHandle(String);

impl OperationHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of vault operation behind a submitted write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Allowance grant preceding a dependent action
    Grant,
    Deposit,
    WithdrawInstant,
    WithdrawInitiate,
    WithdrawComplete,
    Redeem,
    RedeemAll,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Grant => "grant",
            OperationKind::Deposit => "deposit",
            OperationKind::WithdrawInstant => "withdraw_instant",
            OperationKind::WithdrawInitiate => "withdraw_initiate",
            OperationKind::WithdrawComplete => "withdraw_complete",
            OperationKind::Redeem => "redeem",
            OperationKind::RedeemAll => "redeem_all",
        }
    }

    /// Which derived state must be re-read after this operation confirms
    pub fn refresh_scope(&self) -> RefreshScope {
        match self {
            OperationKind::Grant => RefreshScope::User,
            _ => RefreshScope::Both,
        }
    }

    /// Kinds whose downstream effects need two dependent reads: the queue
    /// state written by the first read only settles after a further delay.
    pub fn needs_second_refresh(&self) -> bool {
        matches!(
            self,
            OperationKind::WithdrawInitiate
                | OperationKind::WithdrawComplete
                | OperationKind::Redeem
                | OperationKind::RedeemAll
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Amount or share quantity carried by a submitted operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationPayload {
    Amount(Decimal),
    Shares(Decimal),
    /// Operations with no quantity (e.g. withdraw-complete claims)
    None,
}

impl OperationPayload {
    pub fn value(&self) -> Option<Decimal> {
        match self {
            OperationPayload::Amount(v) | OperationPayload::Shares(v) => Some(*v),
            OperationPayload::None => None,
        }
    }
}

/// A submitted write awaiting its terminal outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
    pub handle: OperationHandle,
    pub kind: OperationKind,
    pub payload: OperationPayload,
    pub submitted_at: DateTime<Utc>,
}

impl PendingOperation {
    pub fn new(handle: OperationHandle, kind: OperationKind, payload: OperationPayload) -> Self {
        Self {
            handle,
            kind,
            payload,
            submitted_at: Utc::now(),
        }
    }
}

/// Terminal status carried by a receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Failure,
}

/// Terminal confirmation record for a submitted write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub handle: OperationHandle,
    pub status: ReceiptStatus,
    /// Decoded revert reason, when the remote surfaces one
    pub reason: Option<String>,
}

impl Receipt {
    pub fn success(handle: OperationHandle) -> Self {
        Self {
            handle,
            status: ReceiptStatus::Success,
            reason: None,
        }
    }

    pub fn failure(handle: OperationHandle, reason: Option<String>) -> Self {
        Self {
            handle,
            status: ReceiptStatus::Failure,
            reason,
        }
    }
}

/// Terminal outcome of observing a submitted operation.
///
/// `TimedOut` is distinct from `Failed`: the client gave up observing, but
/// the operation may still have succeeded remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Confirmed(Receipt),
    Failed(Receipt),
    TimedOut,
}

impl OperationOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, OperationOutcome::Confirmed(_))
    }

    pub fn status_str(&self) -> &'static str {
        match self {
            OperationOutcome::Confirmed(_) => "confirmed",
            OperationOutcome::Failed(_) => "failed",
            OperationOutcome::TimedOut => "timed_out",
        }
    }
}

/// Which derived-state batches to re-issue after a terminal outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshScope {
    /// Reads depending on the active actor's address
    User,
    /// Vault-wide reads
    Global,
    /// Both batches, issued concurrently
    Both,
}

impl RefreshScope {
    pub fn includes_user(&self) -> bool {
        matches!(self, RefreshScope::User | RefreshScope::Both)
    }

    pub fn includes_global(&self) -> bool {
        matches!(self, RefreshScope::Global | RefreshScope::Both)
    }
}

impl fmt::Display for RefreshScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshScope::User => write!(f, "user"),
            RefreshScope::Global => write!(f, "global"),
            RefreshScope::Both => write!(f, "both"),
        }
    }
}
