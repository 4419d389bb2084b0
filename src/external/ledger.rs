//! Funds-movement service

use crate::crypto::derive_id;
use crate::external::{relock, ExternalError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TransferRequest {
    pub from: String,
    pub to: String,
    pub amount: u64,
    pub fee: u64,
    /// Transaction id the transfer settles
    pub correlation_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TransferReceipt {
    pub receipt_id: String,
    pub request: TransferRequest,
    pub settled_at: DateTime<Utc>,
}

/// Moves value once a fund transaction is approved
#[async_trait]
pub trait FundsLedger: Send + Sync {
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, ExternalError>;
}

/// In-process ledger that records transfers and can be told to fail
#[derive(Debug, Default)]
pub struct SimulatedLedger {
    settled: Mutex<Vec<TransferReceipt>>,
    failure: Mutex<Option<ExternalError>>,
    latency: Option<Duration>,
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every transfer sleeps for `latency` before settling
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Fail every transfer with `error` until cleared
    pub fn fail_with(&self, error: ExternalError) {
        *relock(&self.failure) = Some(error);
    }

    pub fn clear_failure(&self) {
        *relock(&self.failure) = None;
    }

    pub fn settled(&self) -> Vec<TransferReceipt> {
        relock(&self.settled).clone()
    }
}

#[async_trait]
impl FundsLedger for SimulatedLedger {
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, ExternalError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = relock(&self.failure).clone() {
            log::warn!("Simulated ledger refusing {}: {}", request.correlation_id, error);
            return Err(error);
        }

        let mut settled = relock(&self.settled);
        let receipt = TransferReceipt {
            receipt_id: derive_id(
                "rcpt",
                &format!("{}:{}", request.correlation_id, settled.len()),
            ),
            request: request.clone(),
            settled_at: Utc::now(),
        };
        settled.push(receipt.clone());

        log::debug!(
            "Settled {} -> {} amount {} fee {}",
            request.from,
            request.to,
            request.amount,
            request.fee
        );
        Ok(receipt)
    }
}
