//! Execution handlers for approved transactions
//!
//! Governance handlers run entirely under the wallet lock. Fund movements
//! are split in two: funds are reserved under the lock, the compliance and
//! ledger calls run with the lock released ([`settle`]), and the outcome is
//! committed under the lock again. Every handler failure ends as an
//! Executed transaction with a `Failed` result.

use crate::access::{Principal, SignerRegistry};
use crate::engine::WalletState;
use crate::error::CustodyError;
use crate::external::{ComplianceEngine, ExternalError, FundsLedger, TransferReceipt, TransferRequest};
use crate::multisig::{ActionPayload, ExecutionResult, Transaction, TransactionKind};
use crate::policy::PolicyStore;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// What the caller must do after an approval or execute request
#[derive(Debug, Clone)]
pub enum ExecutionStep {
    /// Nothing left to run; the transaction as it now stands
    Done(Transaction),
    /// Funds are reserved; settle outside the lock, then commit
    Dispatch(FundsDispatch),
}

#[derive(Debug, Clone)]
pub struct ComplianceCheck {
    pub identity: Principal,
    pub amount: u64,
    pub recipient: Option<String>,
    pub kind: TransactionKind,
}

/// A fund movement waiting on external calls
#[derive(Debug, Clone)]
pub struct FundsDispatch {
    pub tx_id: String,
    pub request: TransferRequest,
    /// Present when the transaction's policy requires a compliance check
    pub compliance: Option<ComplianceCheck>,
}

impl FundsDispatch {
    pub(crate) fn for_transaction(tx: &Transaction, wallet_id: &str, check_compliance: bool) -> Self {
        let compliance = check_compliance.then(|| ComplianceCheck {
            identity: tx.initiator.clone(),
            amount: tx.amount,
            recipient: tx.recipient.clone(),
            kind: tx.kind,
        });

        Self {
            tx_id: tx.id.clone(),
            request: TransferRequest {
                from: wallet_id.to_string(),
                to: tx.recipient.clone().unwrap_or_default(),
                amount: tx.amount,
                fee: tx.fee,
                correlation_id: tx.id.clone(),
            },
            compliance,
        }
    }
}

/// Outcome of the external half of a fund movement
pub type FundsOutcome = Result<TransferReceipt, ExecutionResult>;

pub fn external_failure(error: &ExternalError) -> ExecutionResult {
    ExecutionResult::Failed {
        code: error.code().to_string(),
        reason: error.to_string(),
    }
}

/// Apply a governance payload to the registry or policy store
///
/// Proposal-time checks are re-run here since the signer set or policy may
/// have changed while the transaction collected signatures.
pub(crate) fn apply_governance(
    payload: &ActionPayload,
    signers: &mut SignerRegistry,
    policies: &mut PolicyStore,
    tx_id: &str,
    now: DateTime<Utc>,
) -> ExecutionResult {
    let outcome = match payload {
        ActionPayload::AddSigner { identity, role } => signers
            .enroll(identity.clone(), *role, now)
            .map(|s| format!("{} enrolled as {}", s.identity, s.role)),
        ActionPayload::RemoveSigner { identity } => {
            let required = policies.current_policy().required_signatures;
            signers
                .deactivate(identity, required)
                .map(|s| format!("{} deactivated", s.identity))
        }
        ActionPayload::ChangePolicy { policy } => policy
            .validate(signers.eligible_count())
            .map(|()| {
                let version = policies.publish(policy.clone(), now, Some(tx_id.to_string()));
                format!(
                    "policy version {} installed ({})",
                    version,
                    policy.description(signers.eligible_count())
                )
            }),
        ActionPayload::None => Err(CustodyError::InvalidPayload(
            "governance transaction carries no target".to_string(),
        )),
    };

    match outcome {
        Ok(detail) => ExecutionResult::Success {
            receipt: None,
            detail,
        },
        Err(e) => ExecutionResult::failed(&e),
    }
}

/// Debit `amount + fee` and count `amount` against today's limit
pub(crate) fn reserve_funds(
    tx: &mut Transaction,
    state: &mut WalletState,
    policies: &PolicyStore,
    fee: u64,
    now: DateTime<Utc>,
) -> Result<(), CustodyError> {
    let total = tx
        .amount
        .checked_add(fee)
        .ok_or_else(|| CustodyError::InvalidPayload("amount overflows with fee".to_string()))?;

    if state.balance < total {
        return Err(CustodyError::InsufficientBalance {
            available: state.balance,
            required: total,
        });
    }

    policies.validate_limits(tx.amount, &mut state.spend, now)?;

    state.balance -= total;
    state.spend.record(tx.amount);
    tx.fee = fee;
    tx.funds_reserved = true;
    Ok(())
}

/// Return a failed transaction's reservation
pub(crate) fn release_funds(tx: &mut Transaction, state: &mut WalletState) {
    if !tx.funds_reserved {
        return;
    }
    state.balance = state.balance.saturating_add(tx.amount + tx.fee);
    state.spend.release(tx.amount);
    tx.funds_reserved = false;
}

/// Run the compliance gate and the ledger transfer
///
/// Never called with the wallet lock held. Each call is bounded by
/// `call_timeout`.
pub async fn settle(
    job: &FundsDispatch,
    compliance: &dyn ComplianceEngine,
    ledger: &dyn FundsLedger,
    call_timeout: Duration,
) -> FundsOutcome {
    if let Some(check) = &job.compliance {
        let verdict = tokio::time::timeout(
            call_timeout,
            compliance.evaluate(
                &check.identity,
                check.amount,
                check.recipient.as_deref(),
                check.kind,
            ),
        )
        .await;

        match verdict {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                log::warn!("Compliance denied transaction {}", job.tx_id);
                return Err(ExecutionResult::failed(&CustodyError::PolicyViolation(
                    "compliance check denied the transfer".to_string(),
                )));
            }
            Ok(Err(e)) => {
                log::warn!("Compliance check for {} failed: {}", job.tx_id, e);
                return Err(external_failure(&e));
            }
            Err(_) => {
                log::warn!("Compliance check for {} timed out", job.tx_id);
                return Err(external_failure(&ExternalError::Timeout));
            }
        }
    }

    match tokio::time::timeout(call_timeout, ledger.transfer(&job.request)).await {
        Ok(Ok(receipt)) => Ok(receipt),
        Ok(Err(e)) => {
            log::error!("Ledger transfer for {} failed: {}", job.tx_id, e);
            Err(external_failure(&e))
        }
        Err(_) => {
            log::error!("Ledger transfer for {} timed out", job.tx_id);
            Err(external_failure(&ExternalError::Timeout))
        }
    }
}
