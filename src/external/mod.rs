//! Collaborators outside the wallet's consistency boundary
//!
//! The engine never holds the wallet lock while awaiting any of these.

pub mod compliance;
pub mod ledger;
pub mod sink;

use thiserror::Error;

pub use compliance::{ComplianceEngine, StaticCompliance};
pub use ledger::{FundsLedger, SimulatedLedger, TransferReceipt, TransferRequest};
pub use sink::{AuditSink, FanoutSink, LogAuditSink, MemoryAuditSink};

/// Failure reported by, or while reaching, an external service
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExternalError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Call timed out")]
    Timeout,
}

impl ExternalError {
    pub fn code(&self) -> &'static str {
        match self {
            ExternalError::Unavailable(_) => "EXTERNAL_UNAVAILABLE",
            ExternalError::Rejected(_) => "EXTERNAL_REJECTED",
            ExternalError::Timeout => "EXTERNAL_TIMEOUT",
        }
    }
}

/// Recover a std mutex guard even if a previous holder panicked
pub(crate) fn relock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
