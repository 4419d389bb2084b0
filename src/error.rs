//! Engine error taxonomy
//!
//! Every rejected operation surfaces one of these variants. They are all
//! recoverable and carry a stable machine code via [`CustodyError::code`].

use crate::storage::StorageError;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors returned by custody engine operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CustodyError {
    #[error("Unauthorized: {identity} lacks the {required} permission")]
    Unauthorized { identity: String, required: String },
    #[error("Wallet is frozen")]
    WalletFrozen,
    #[error("Policy violation: {0}")]
    PolicyViolation(String),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("Transaction {id} is not pending (status: {status})")]
    NotPending { id: String, status: String },
    #[error("Transaction expired: {0}")]
    Expired(String),
    #[error("Already signed by this signer")]
    AlreadySigned,
    #[error("Already rejected by this signer")]
    AlreadyRejected,
    #[error("Signer not found: {0}")]
    SignerNotFound(String),
    #[error("Insufficient balance: have {available}, need {required}")]
    InsufficientBalance { available: u64, required: u64 },
    #[error("Emergency action cannot execute before {execute_at}")]
    TooEarly { execute_at: DateTime<Utc> },
    #[error("Emergency action not found: {0}")]
    EmergencyActionNotFound(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Execution already in progress for transaction {0}")]
    ExecutionInProgress(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CustodyError {
    /// Stable, machine-checkable reason code
    pub fn code(&self) -> &'static str {
        match self {
            CustodyError::Unauthorized { .. } => "UNAUTHORIZED",
            CustodyError::WalletFrozen => "WALLET_FROZEN",
            CustodyError::PolicyViolation(_) => "POLICY_VIOLATION",
            CustodyError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            CustodyError::NotPending { .. } => "NOT_PENDING",
            CustodyError::Expired(_) => "EXPIRED",
            CustodyError::AlreadySigned => "ALREADY_SIGNED",
            CustodyError::AlreadyRejected => "ALREADY_REJECTED",
            CustodyError::SignerNotFound(_) => "SIGNER_NOT_FOUND",
            CustodyError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            CustodyError::TooEarly { .. } => "TOO_EARLY",
            CustodyError::EmergencyActionNotFound(_) => "EMERGENCY_ACTION_NOT_FOUND",
            CustodyError::InvalidPayload(_) => "INVALID_PAYLOAD",
            CustodyError::InvalidConfiguration(_) => "INVALID_CONFIGURATION",
            CustodyError::ExecutionInProgress(_) => "EXECUTION_IN_PROGRESS",
            CustodyError::Storage(_) => "STORAGE_FAILURE",
            CustodyError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<StorageError> for CustodyError {
    fn from(e: StorageError) -> Self {
        CustodyError::Storage(e.to_string())
    }
}
