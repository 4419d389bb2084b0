//! Custody transactions awaiting multi-party approval
//!
//! A transaction is proposed once, collects signatures from distinct
//! eligible signers, and executes as soon as the threshold snapshotted at
//! proposal time is met.

use crate::access::{Principal, Role};
use crate::error::CustodyError;
use crate::policy::Policy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a transaction does once approved
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    Transfer,
    Withdrawal,
    AddSigner,
    RemoveSigner,
    ChangePolicy,
    /// Emergency freezes go through the emergency queue, never the ledger
    Emergency,
}

impl TransactionKind {
    pub fn moves_funds(self) -> bool {
        matches!(self, TransactionKind::Transfer | TransactionKind::Withdrawal)
    }

    pub fn is_governance(self) -> bool {
        matches!(
            self,
            TransactionKind::AddSigner | TransactionKind::RemoveSigner | TransactionKind::ChangePolicy
        )
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "transfer" => Ok(TransactionKind::Transfer),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            "addsigner" => Ok(TransactionKind::AddSigner),
            "removesigner" => Ok(TransactionKind::RemoveSigner),
            "changepolicy" => Ok(TransactionKind::ChangePolicy),
            "emergency" => Ok(TransactionKind::Emergency),
            other => Err(format!("unknown transaction kind '{}'", other)),
        }
    }
}

/// Lifecycle status
///
/// `Pending -> Approved -> Executed`, or `Pending -> Expired | Rejected | Cancelled`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    Pending,
    Approved,
    Executed,
    Expired,
    Rejected,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionStatus::Pending | TransactionStatus::Approved)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Structured governance target, fixed at proposal time
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionPayload {
    /// Fund movements carry no governance target
    None,
    AddSigner { identity: Principal, role: Role },
    RemoveSigner { identity: Principal },
    ChangePolicy { policy: Policy },
}

impl ActionPayload {
    /// Whether this payload is the one `kind` requires
    pub fn fits(&self, kind: TransactionKind) -> bool {
        matches!(
            (kind, self),
            (TransactionKind::Transfer, ActionPayload::None)
                | (TransactionKind::Withdrawal, ActionPayload::None)
                | (TransactionKind::AddSigner, ActionPayload::AddSigner { .. })
                | (TransactionKind::RemoveSigner, ActionPayload::RemoveSigner { .. })
                | (TransactionKind::ChangePolicy, ActionPayload::ChangePolicy { .. })
        )
    }
}

/// One approval from a signer
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SignatureRecord {
    pub signer: Principal,
    pub signed_at: DateTime<Utc>,
}

/// Recorded outcome of running the execution handler
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success {
        /// Ledger receipt for fund movements
        receipt: Option<String>,
        detail: String,
    },
    Failed {
        code: String,
        reason: String,
    },
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn failed(err: &CustodyError) -> Self {
        ExecutionResult::Failed {
            code: err.code().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Input for a new proposal
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proposal {
    pub kind: TransactionKind,
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub recipient: Option<String>,
    pub payload: ActionPayload,
}

impl Proposal {
    pub fn transfer(recipient: &str, amount: u64) -> Self {
        Self {
            kind: TransactionKind::Transfer,
            amount,
            recipient: Some(recipient.to_string()),
            payload: ActionPayload::None,
        }
    }

    pub fn withdrawal(recipient: &str, amount: u64) -> Self {
        Self {
            kind: TransactionKind::Withdrawal,
            amount,
            recipient: Some(recipient.to_string()),
            payload: ActionPayload::None,
        }
    }

    pub fn add_signer(identity: Principal, role: Role) -> Self {
        Self {
            kind: TransactionKind::AddSigner,
            amount: 0,
            recipient: None,
            payload: ActionPayload::AddSigner { identity, role },
        }
    }

    pub fn remove_signer(identity: Principal) -> Self {
        Self {
            kind: TransactionKind::RemoveSigner,
            amount: 0,
            recipient: None,
            payload: ActionPayload::RemoveSigner { identity },
        }
    }

    pub fn change_policy(policy: Policy) -> Self {
        Self {
            kind: TransactionKind::ChangePolicy,
            amount: 0,
            recipient: None,
            payload: ActionPayload::ChangePolicy { policy },
        }
    }
}

/// A custody transaction
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    /// Proposal order within the wallet
    pub sequence: u64,
    pub kind: TransactionKind,
    pub initiator: Principal,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: TransactionStatus,
    pub amount: u64,
    pub recipient: Option<String>,
    pub payload: ActionPayload,
    /// Threshold snapshotted from the policy at proposal time
    pub required_signatures: u8,
    /// Policy revision the transaction was proposed under
    pub policy_version: u32,
    pub signatures: Vec<SignatureRecord>,
    pub rejections: Vec<SignatureRecord>,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_result: Option<ExecutionResult>,
    /// Ledger fee charged on top of `amount`, fixed when funds are reserved
    #[serde(default)]
    pub fee: u64,
    /// Balance and daily spend are held for this transaction
    #[serde(default)]
    pub funds_reserved: bool,
    /// Execution handler is running outside the wallet lock
    #[serde(skip)]
    pub in_flight: bool,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: String,
        sequence: u64,
        proposal: Proposal,
        initiator: Principal,
        required_signatures: u8,
        policy_version: u32,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sequence,
            kind: proposal.kind,
            initiator,
            created_at: now,
            expires_at,
            status: TransactionStatus::Pending,
            amount: proposal.amount,
            recipient: proposal.recipient,
            payload: proposal.payload,
            required_signatures,
            policy_version,
            signatures: Vec::new(),
            rejections: Vec::new(),
            executed_at: None,
            execution_result: None,
            fee: 0,
            funds_reserved: false,
            in_flight: false,
        }
    }

    /// Pending but past its signature window
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == TransactionStatus::Pending && now > self.expires_at
    }

    /// Status as a reader must see it at `now`
    pub fn observed_status(&self, now: DateTime<Utc>) -> TransactionStatus {
        if self.is_expired_at(now) {
            TransactionStatus::Expired
        } else {
            self.status
        }
    }

    /// Copy of this transaction with lazy expiry applied
    pub fn observed(&self, now: DateTime<Utc>) -> Transaction {
        let mut view = self.clone();
        view.status = self.observed_status(now);
        view
    }

    pub fn has_signed(&self, identity: &Principal) -> bool {
        self.signatures.iter().any(|s| &s.signer == identity)
    }

    pub fn has_rejected(&self, identity: &Principal) -> bool {
        self.rejections.iter().any(|s| &s.signer == identity)
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    pub fn threshold_met(&self) -> bool {
        self.signatures.len() >= self.required_signatures as usize
    }

    /// Signers who have already approved, in signing order
    pub fn signed_by(&self) -> Vec<&str> {
        self.signatures.iter().map(|s| s.signer.as_str()).collect()
    }

    pub(crate) fn ensure_pending(&self) -> Result<(), CustodyError> {
        match self.status {
            TransactionStatus::Pending => Ok(()),
            TransactionStatus::Expired => Err(CustodyError::Expired(self.id.clone())),
            status => Err(CustodyError::NotPending {
                id: self.id.clone(),
                status: status.to_string(),
            }),
        }
    }

    /// Append an approval; returns true when this signature met the threshold
    pub(crate) fn add_signature(
        &mut self,
        signer: &Principal,
        now: DateTime<Utc>,
    ) -> Result<bool, CustodyError> {
        self.ensure_pending()?;

        if self.has_signed(signer) {
            return Err(CustodyError::AlreadySigned);
        }
        if self.has_rejected(signer) {
            return Err(CustodyError::AlreadyRejected);
        }

        self.signatures.push(SignatureRecord {
            signer: signer.clone(),
            signed_at: now,
        });

        if self.threshold_met() {
            self.status = TransactionStatus::Approved;
            return Ok(true);
        }
        Ok(false)
    }

    /// Record a vote against; returns true once the transaction is rejected
    pub(crate) fn add_rejection(
        &mut self,
        signer: &Principal,
        now: DateTime<Utc>,
        rejections_to_fail: usize,
    ) -> Result<bool, CustodyError> {
        self.ensure_pending()?;

        if self.has_signed(signer) {
            return Err(CustodyError::AlreadySigned);
        }
        if self.has_rejected(signer) {
            return Err(CustodyError::AlreadyRejected);
        }

        self.rejections.push(SignatureRecord {
            signer: signer.clone(),
            signed_at: now,
        });

        if self.rejections.len() >= rejections_to_fail {
            self.status = TransactionStatus::Rejected;
            return Ok(true);
        }
        Ok(false)
    }

    pub(crate) fn mark_expired(&mut self) {
        self.status = TransactionStatus::Expired;
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.status = TransactionStatus::Cancelled;
    }

    pub(crate) fn mark_executed(&mut self, now: DateTime<Utc>, result: ExecutionResult) {
        self.status = TransactionStatus::Executed;
        self.executed_at = Some(now);
        self.execution_result = Some(result);
        self.in_flight = false;
    }
}
