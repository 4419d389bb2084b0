//! Wallet aggregate
//!
//! One wallet's complete state: balance and spend counters, signer
//! registry, policy history, transaction ledger, emergency queue and audit
//! trail. Every method here is synchronous and runs under the engine's
//! exclusive wallet lock; the engine is responsible for the external calls
//! that happen between [`WalletAggregate::sign`] (or `execute`) returning
//! [`ExecutionStep::Dispatch`] and [`WalletAggregate::complete_execution`].

use crate::access::{Principal, Role, Signer, SignerRegistry};
use crate::audit::{AuditDraft, AuditEvent, AuditQuery, AuditTrail, Category};
use crate::dispatch::executor::{self, ExecutionStep, FundsDispatch, FundsOutcome};
use crate::emergency::{EmergencyAction, EmergencyKind, EmergencyQueue};
use crate::error::CustodyError;
use crate::multisig::{
    ActionPayload, ExecutionResult, Proposal, Transaction, TransactionKind, TransactionLedger,
    TransactionStatus,
};
use crate::policy::{DailySpend, Policy, PolicyStore, PolicyVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Balance, freeze flag and daily spend counters
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WalletState {
    pub wallet_id: String,
    pub balance: u64,
    pub is_frozen: bool,
    pub spend: DailySpend,
    pub created_at: DateTime<Utc>,
}

/// Read-only wallet summary
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletInfo {
    pub wallet_id: String,
    pub balance: u64,
    pub is_frozen: bool,
    pub daily_spent: u64,
    pub daily_remaining: u64,
    pub policy_version: u32,
    pub policy: Policy,
    /// e.g. "2-of-3"
    pub threshold: String,
    pub signer_count: usize,
    pub eligible_signers: usize,
    pub pending_transactions: usize,
    pub approved_transactions: usize,
    pub transaction_count: usize,
    pub pending_emergency_actions: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletAggregate {
    state: WalletState,
    signers: SignerRegistry,
    policies: PolicyStore,
    ledger: TransactionLedger,
    emergency: EmergencyQueue,
    audit: AuditTrail,
    /// Events appended since the last drain, awaiting the external sink
    #[serde(skip)]
    outbox: Vec<AuditEvent>,
}

impl WalletAggregate {
    /// Bootstrap a wallet with its founding signers and policy version 1
    pub fn genesis(
        wallet_id: &str,
        signers: Vec<(Principal, Role)>,
        policy: Policy,
        now: DateTime<Utc>,
    ) -> Result<Self, CustodyError> {
        if wallet_id.trim().is_empty() {
            return Err(CustodyError::InvalidConfiguration(
                "wallet id must not be empty".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        let mut registry = SignerRegistry::new();
        for (identity, role) in signers {
            if !seen.insert(identity.clone()) {
                return Err(CustodyError::InvalidConfiguration(format!(
                    "duplicate signer {}",
                    identity
                )));
            }
            registry.enroll(identity, role, now)?;
        }

        if registry.active_owner_count() == 0 {
            return Err(CustodyError::InvalidConfiguration(
                "a wallet needs at least one owner".to_string(),
            ));
        }
        policy.validate(registry.eligible_count())?;

        let threshold = policy.description(registry.eligible_count());
        let mut wallet = Self {
            state: WalletState {
                wallet_id: wallet_id.to_string(),
                balance: 0,
                is_frozen: false,
                spend: DailySpend::new(now),
                created_at: now,
            },
            signers: registry,
            policies: PolicyStore::with_initial(policy, now),
            ledger: TransactionLedger::new(),
            emergency: EmergencyQueue::new(),
            audit: AuditTrail::new(),
            outbox: Vec::new(),
        };

        let founders: Vec<String> = wallet
            .signers
            .all()
            .map(|s| format!("{}:{}", s.identity, s.role))
            .collect();
        wallet.record(
            AuditDraft::info(Category::Governance, "wallet_created", "genesis")
                .details(format!("{} signers [{}]", threshold, founders.join(", "))),
            now,
        );
        log::info!("Wallet {} created ({})", wallet_id, threshold);

        Ok(wallet)
    }

    /// Post-load fixups for a snapshot read from disk
    pub fn restored(mut self) -> Self {
        self.ledger.clear_in_flight();
        self.outbox.clear();
        self
    }

    pub fn wallet_id(&self) -> &str {
        &self.state.wallet_id
    }

    pub fn state(&self) -> &WalletState {
        &self.state
    }

    pub fn signers(&self) -> &SignerRegistry {
        &self.signers
    }

    pub fn policies(&self) -> &PolicyStore {
        &self.policies
    }

    pub fn ledger(&self) -> &TransactionLedger {
        &self.ledger
    }

    pub fn emergency(&self) -> &EmergencyQueue {
        &self.emergency
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Hand over events recorded since the last call
    pub fn take_outbox(&mut self) -> Vec<AuditEvent> {
        std::mem::take(&mut self.outbox)
    }

    fn record(&mut self, draft: AuditDraft, now: DateTime<Utc>) {
        let event = self.audit.append(draft, now).clone();
        self.outbox.push(event);
    }

    /// Pass through `check`, auditing a failed permission check
    fn authorize(
        &mut self,
        caller: &Principal,
        check: Result<(), CustodyError>,
        operation: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CustodyError> {
        if let Err(e) = check {
            log::warn!("{} denied for {}: {}", operation, caller, e);
            if matches!(e, CustodyError::Unauthorized { .. }) {
                self.record(
                    AuditDraft::warning(Category::Access, "unauthorized_attempt", caller.as_str())
                        .details(format!("{}: {}", operation, e)),
                    now,
                );
            }
            return Err(e);
        }
        Ok(())
    }

    fn ensure_not_frozen(&self, operation: &str) -> Result<(), CustodyError> {
        if self.state.is_frozen {
            log::warn!("{} refused: wallet {} is frozen", operation, self.state.wallet_id);
            return Err(CustodyError::WalletFrozen);
        }
        Ok(())
    }

    fn require_owner_or_emergency(&self, caller: &Principal) -> Result<(), CustodyError> {
        if self.signers.has_role(caller, Role::Emergency) {
            Ok(())
        } else {
            Err(CustodyError::Unauthorized {
                identity: caller.to_string(),
                required: "owner or emergency".to_string(),
            })
        }
    }

    // ------------------------------------------------------------------
    // Transaction lifecycle
    // ------------------------------------------------------------------

    /// Validate and store a new Pending transaction
    ///
    /// A proposer who can sign contributes the first approval; with a
    /// threshold of one that approval also starts execution.
    pub fn propose(
        &mut self,
        caller: &Principal,
        proposal: Proposal,
        fee: u64,
        now: DateTime<Utc>,
    ) -> Result<ExecutionStep, CustodyError> {
        let check = self.signers.require_role(caller, Role::Admin);
        self.authorize(caller, check, "propose_transaction", now)?;
        self.ensure_not_frozen("propose_transaction")?;

        let policy = self.policies.current_policy();
        if let Err(e) = self.check_proposal(&proposal, &policy, now) {
            log::warn!("Proposal by {} refused: {}", caller, e);
            self.record(
                AuditDraft::warning(Category::Transaction, "proposal_refused", caller.as_str())
                    .details(format!("{} of {}: {}", proposal.kind, proposal.amount, e)),
                now,
            );
            return Err(e);
        }

        let expires_at = policy.signature_deadline(now)?;
        let kind = proposal.kind;
        let tx_id = self.ledger.open(
            &self.state.wallet_id,
            proposal,
            caller,
            policy.required_signatures,
            self.policies.current_version(),
            expires_at,
            now,
        );
        self.signers.record_activity(caller, now);

        let category = if kind.is_governance() {
            Category::Governance
        } else {
            Category::Transaction
        };
        self.record(
            AuditDraft::info(category, "transaction_proposed", caller.as_str())
                .details(format!(
                    "{} requiring {} signature(s)",
                    kind, policy.required_signatures
                ))
                .correlated(&tx_id),
            now,
        );

        if self.signers.can_sign(caller) {
            return self.apply_signature(caller, &tx_id, fee, now);
        }
        self.snapshot(&tx_id, now).map(ExecutionStep::Done)
    }

    fn check_proposal(
        &self,
        proposal: &Proposal,
        policy: &Policy,
        now: DateTime<Utc>,
    ) -> Result<(), CustodyError> {
        if proposal.kind == TransactionKind::Emergency {
            return Err(CustodyError::InvalidPayload(
                "emergency actions go through the emergency queue".to_string(),
            ));
        }
        if !proposal.payload.fits(proposal.kind) {
            return Err(CustodyError::InvalidPayload(format!(
                "payload does not match a {} transaction",
                proposal.kind
            )));
        }

        if proposal.kind.moves_funds() {
            if proposal.amount == 0 {
                return Err(CustodyError::InvalidPayload(
                    "amount must be positive".to_string(),
                ));
            }
            let recipient = proposal
                .recipient
                .as_deref()
                .filter(|r| !r.trim().is_empty())
                .ok_or_else(|| CustodyError::InvalidPayload("recipient is required".to_string()))?;
            policy.check_destination(recipient)?;

            // Limits are checked against a scratch copy; spend is only
            // recorded when funds are reserved at execution.
            let mut spend = self.state.spend.clone();
            return self.policies.validate_limits(proposal.amount, &mut spend, now);
        }

        match &proposal.payload {
            ActionPayload::AddSigner { identity, .. } => self.signers.check_enrollment(identity),
            ActionPayload::RemoveSigner { identity } => self
                .signers
                .check_removal(identity, policy.required_signatures),
            ActionPayload::ChangePolicy { policy: next } => {
                next.validate(self.signers.eligible_count())
            }
            ActionPayload::None => Ok(()),
        }
    }

    /// Add the caller's approval; may start execution
    pub fn sign(
        &mut self,
        caller: &Principal,
        tx_id: &str,
        fee: u64,
        now: DateTime<Utc>,
    ) -> Result<ExecutionStep, CustodyError> {
        let check = self.signers.require_signer(caller);
        self.authorize(caller, check, "sign_transaction", now)?;
        self.ensure_not_frozen("sign_transaction")?;
        self.touch(tx_id, now)?;
        self.apply_signature(caller, tx_id, fee, now)
    }

    fn apply_signature(
        &mut self,
        caller: &Principal,
        tx_id: &str,
        fee: u64,
        now: DateTime<Utc>,
    ) -> Result<ExecutionStep, CustodyError> {
        let (approved, count, required) = {
            let tx = self.ledger.get_mut(tx_id)?;
            let approved = tx.add_signature(caller, now)?;
            (approved, tx.signature_count(), tx.required_signatures)
        };
        self.signers.record_signature(caller, now);

        log::info!(
            "Transaction {} signed by {} ({}/{})",
            tx_id,
            caller,
            count,
            required
        );
        self.record(
            AuditDraft::info(Category::Transaction, "transaction_signed", caller.as_str())
                .details(format!("{}/{} signatures", count, required))
                .correlated(tx_id),
            now,
        );

        if !approved {
            return self.snapshot(tx_id, now).map(ExecutionStep::Done);
        }

        log::info!("Transaction {} approved", tx_id);
        self.record(
            AuditDraft::info(Category::Transaction, "transaction_approved", caller.as_str())
                .correlated(tx_id),
            now,
        );

        match self.start_execution(tx_id, fee, now) {
            Ok(step) => Ok(step),
            Err(e) => {
                // The approval itself stands; execution can be retried
                log::warn!("Execution of {} deferred: {}", tx_id, e);
                self.snapshot(tx_id, now).map(ExecutionStep::Done)
            }
        }
    }

    /// Vote against a Pending transaction
    pub fn reject(
        &mut self,
        caller: &Principal,
        tx_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Transaction, CustodyError> {
        let check = self.signers.require_signer(caller);
        self.authorize(caller, check, "reject_transaction", now)?;
        self.ensure_not_frozen("reject_transaction")?;
        self.touch(tx_id, now)?;

        let eligible = self.signers.eligible_count();
        let (rejected, votes) = {
            let tx = self.ledger.get_mut(tx_id)?;
            let to_fail = eligible
                .saturating_sub(tx.required_signatures as usize)
                .saturating_add(1);
            let rejected = tx.add_rejection(caller, now, to_fail)?;
            (rejected, tx.rejections.len())
        };
        self.signers.record_activity(caller, now);

        self.record(
            AuditDraft::info(Category::Transaction, "transaction_rejection_vote", caller.as_str())
                .details(format!("{} rejection(s)", votes))
                .correlated(tx_id),
            now,
        );
        if rejected {
            log::info!("Transaction {} rejected: quorum unreachable", tx_id);
            self.record(
                AuditDraft::warning(Category::Transaction, "transaction_rejected", caller.as_str())
                    .correlated(tx_id),
                now,
            );
        }

        self.snapshot(tx_id, now)
    }

    /// Withdraw a Pending transaction; initiator or Owner only
    pub fn cancel(
        &mut self,
        caller: &Principal,
        tx_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Transaction, CustodyError> {
        let initiator = self
            .ledger
            .get(tx_id)
            .map(|tx| tx.initiator.clone())
            .ok_or_else(|| CustodyError::TransactionNotFound(tx_id.to_string()))?;

        let allowed = self.signers.get_signer(caller).map_or(false, |s| s.active)
            && (&initiator == caller || self.signers.has_role(caller, Role::Owner));
        let check = if allowed {
            Ok(())
        } else {
            Err(CustodyError::Unauthorized {
                identity: caller.to_string(),
                required: "initiator or owner".to_string(),
            })
        };
        self.authorize(caller, check, "cancel_transaction", now)?;

        self.touch(tx_id, now)?;
        {
            let tx = self.ledger.get_mut(tx_id)?;
            tx.ensure_pending()?;
            tx.mark_cancelled();
        }
        self.signers.record_activity(caller, now);

        log::info!("Transaction {} cancelled by {}", tx_id, caller);
        self.record(
            AuditDraft::info(Category::Transaction, "transaction_cancelled", caller.as_str())
                .correlated(tx_id),
            now,
        );
        self.snapshot(tx_id, now)
    }

    /// Run (or report) execution of an Approved transaction
    ///
    /// Executed transactions return their stored result unchanged.
    pub fn execute(
        &mut self,
        caller: &Principal,
        tx_id: &str,
        fee: u64,
        now: DateTime<Utc>,
    ) -> Result<ExecutionStep, CustodyError> {
        let check = self.signers.require_signer(caller);
        self.authorize(caller, check, "execute_transaction", now)?;
        self.start_execution(tx_id, fee, now)
    }

    fn start_execution(
        &mut self,
        tx_id: &str,
        fee: u64,
        now: DateTime<Utc>,
    ) -> Result<ExecutionStep, CustodyError> {
        let frozen = self.state.is_frozen;
        self.touch(tx_id, now)?;
        let (kind, payload) = {
            let tx = self.ledger.get_mut(tx_id)?;
            match tx.status {
                TransactionStatus::Approved => {}
                TransactionStatus::Executed => return Ok(ExecutionStep::Done(tx.clone())),
                TransactionStatus::Expired => return Err(CustodyError::Expired(tx.id.clone())),
                status => {
                    return Err(CustodyError::NotPending {
                        id: tx.id.clone(),
                        status: status.to_string(),
                    })
                }
            }
            if tx.in_flight {
                return Err(CustodyError::ExecutionInProgress(tx.id.clone()));
            }
            if frozen {
                log::warn!("Execution of {} blocked: wallet is frozen", tx.id);
                return Err(CustodyError::WalletFrozen);
            }
            (tx.kind, tx.payload.clone())
        };

        if kind.is_governance() {
            let result = executor::apply_governance(
                &payload,
                &mut self.signers,
                &mut self.policies,
                tx_id,
                now,
            );
            return self.finish(tx_id, result, now).map(ExecutionStep::Done);
        }

        {
            let tx = self.ledger.get_mut(tx_id)?;
            if !tx.funds_reserved {
                if let Err(e) =
                    executor::reserve_funds(tx, &mut self.state, &self.policies, fee, now)
                {
                    let result = ExecutionResult::failed(&e);
                    return self.finish(tx_id, result, now).map(ExecutionStep::Done);
                }
            }
        }

        let job = {
            let tx = self.ledger.get_mut(tx_id)?;
            tx.in_flight = true;
            let check_compliance = self
                .policies
                .policy_at(tx.policy_version)
                .requires_compliance_check;
            FundsDispatch::for_transaction(tx, &self.state.wallet_id, check_compliance)
        };

        self.record(
            AuditDraft::info(Category::Funds, "funds_reserved", "engine")
                .details(format!(
                    "{} + fee {} to {}",
                    job.request.amount, job.request.fee, job.request.to
                ))
                .correlated(tx_id),
            now,
        );
        Ok(ExecutionStep::Dispatch(job))
    }

    /// Commit the outcome of a dispatched fund movement
    pub fn complete_execution(
        &mut self,
        tx_id: &str,
        outcome: FundsOutcome,
        now: DateTime<Utc>,
    ) -> Result<Transaction, CustodyError> {
        let result = {
            let tx = self.ledger.get_mut(tx_id)?;
            if tx.status != TransactionStatus::Approved {
                return Ok(tx.observed(now));
            }
            match outcome {
                Ok(receipt) => {
                    tx.funds_reserved = false;
                    ExecutionResult::Success {
                        detail: format!(
                            "transferred {} to {} (fee {})",
                            receipt.request.amount, receipt.request.to, receipt.request.fee
                        ),
                        receipt: Some(receipt.receipt_id),
                    }
                }
                Err(failed) => failed,
            }
        };
        self.finish(tx_id, result, now)
    }

    fn finish(
        &mut self,
        tx_id: &str,
        result: ExecutionResult,
        now: DateTime<Utc>,
    ) -> Result<Transaction, CustodyError> {
        let (kind, amount) = {
            let tx = self.ledger.get_mut(tx_id)?;
            if !result.is_success() {
                executor::release_funds(tx, &mut self.state);
            }
            tx.mark_executed(now, result.clone());
            (tx.kind, tx.amount)
        };

        let category = if kind.is_governance() {
            Category::Governance
        } else {
            Category::Funds
        };
        match &result {
            ExecutionResult::Success { detail, .. } => {
                log::info!("Transaction {} executed: {}", tx_id, detail);
                self.record(
                    AuditDraft::info(category, "transaction_executed", "engine")
                        .details(detail.clone())
                        .correlated(tx_id),
                    now,
                );
            }
            ExecutionResult::Failed { code, reason } => {
                log::warn!("Transaction {} failed at execution: {}", tx_id, reason);
                self.record(
                    AuditDraft::warning(category, "transaction_failed", "engine")
                        .details(format!("{} of {}: {} ({})", kind, amount, reason, code))
                        .correlated(tx_id),
                    now,
                );
            }
        }

        self.snapshot(tx_id, now)
    }

    /// Persist a due Pending -> Expired transition
    fn touch(&mut self, tx_id: &str, now: DateTime<Utc>) -> Result<(), CustodyError> {
        let due = self
            .ledger
            .get(tx_id)
            .map_or(false, |tx| tx.is_expired_at(now));
        self.ledger.touch(tx_id, now)?;
        if due {
            self.record(
                AuditDraft::info(Category::Transaction, "transaction_expired", "engine")
                    .correlated(tx_id),
                now,
            );
        }
        Ok(())
    }

    fn snapshot(&self, tx_id: &str, now: DateTime<Utc>) -> Result<Transaction, CustodyError> {
        self.ledger
            .get_observed(tx_id, now)
            .ok_or_else(|| CustodyError::TransactionNotFound(tx_id.to_string()))
    }

    // ------------------------------------------------------------------
    // Funds
    // ------------------------------------------------------------------

    /// Credit inbound funds; no quorum needed
    pub fn deposit(
        &mut self,
        caller: &Principal,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<WalletInfo, CustodyError> {
        let check = self.signers.require_role(caller, Role::Admin);
        self.authorize(caller, check, "record_deposit", now)?;
        self.ensure_not_frozen("record_deposit")?;

        if amount == 0 {
            return Err(CustodyError::InvalidPayload(
                "deposit amount must be positive".to_string(),
            ));
        }
        self.state.balance = self
            .state
            .balance
            .checked_add(amount)
            .ok_or_else(|| CustodyError::InvalidPayload("balance overflow".to_string()))?;
        self.signers.record_activity(caller, now);

        log::info!(
            "Deposit of {} recorded by {}; balance {}",
            amount,
            caller,
            self.state.balance
        );
        self.record(
            AuditDraft::info(Category::Funds, "deposit_recorded", caller.as_str())
                .details(format!("amount {}, balance {}", amount, self.state.balance)),
            now,
        );
        Ok(self.wallet_info(now))
    }

    // ------------------------------------------------------------------
    // Emergency queue
    // ------------------------------------------------------------------

    pub fn initiate_emergency(
        &mut self,
        caller: &Principal,
        kind: EmergencyKind,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<EmergencyAction, CustodyError> {
        let check = self.require_owner_or_emergency(caller);
        self.authorize(caller, check, "initiate_emergency", now)?;

        let execute_at = self.policies.current_policy().emergency_deadline(now)?;
        let action = self
            .emergency
            .enqueue(
                &self.state.wallet_id,
                kind,
                caller,
                reason.to_string(),
                execute_at,
                now,
            )
            .clone();
        self.signers.record_activity(caller, now);

        self.record(
            AuditDraft::critical(Category::Emergency, "emergency_initiated", caller.as_str())
                .details(format!(
                    "{} executable at {}: {}",
                    kind, action.execute_at, reason
                ))
                .correlated(&action.id),
            now,
        );
        Ok(action)
    }

    pub fn execute_emergency(
        &mut self,
        caller: &Principal,
        action_id: &str,
        now: DateTime<Utc>,
    ) -> Result<EmergencyAction, CustodyError> {
        let check = self.require_owner_or_emergency(caller);
        self.authorize(caller, check, "execute_emergency_action", now)?;

        let action = self.emergency.execute(action_id, caller, now)?.clone();
        self.state.is_frozen = action.kind.target_frozen();
        self.signers.record_activity(caller, now);

        log::warn!(
            "Emergency {} executed on wallet {} by {}",
            action.kind,
            self.state.wallet_id,
            caller
        );
        self.record(
            AuditDraft::critical(Category::Emergency, "emergency_executed", caller.as_str())
                .details(format!("{}: wallet frozen = {}", action.kind, self.state.is_frozen))
                .correlated(action_id),
            now,
        );
        Ok(action)
    }

    pub fn cancel_emergency(
        &mut self,
        caller: &Principal,
        action_id: &str,
        now: DateTime<Utc>,
    ) -> Result<EmergencyAction, CustodyError> {
        let check = self.signers.require_role(caller, Role::Owner);
        self.authorize(caller, check, "cancel_emergency_action", now)?;

        let action = self.emergency.cancel(action_id, caller, now)?.clone();
        self.signers.record_activity(caller, now);

        log::info!("Emergency {} {} cancelled by {}", action.kind, action_id, caller);
        self.record(
            AuditDraft::warning(Category::Emergency, "emergency_cancelled", caller.as_str())
                .correlated(action_id),
            now,
        );
        Ok(action)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get_transaction(
        &self,
        tx_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Transaction, CustodyError> {
        self.snapshot(tx_id, now)
    }

    pub fn get_pending_transactions(&self, now: DateTime<Utc>) -> Vec<Transaction> {
        self.ledger.pending(now)
    }

    pub fn list_transactions(&self, now: DateTime<Utc>) -> Vec<Transaction> {
        self.ledger
            .ordered()
            .into_iter()
            .map(|tx| tx.observed(now))
            .collect()
    }

    pub fn get_signer_info(&self, identity: &Principal) -> Result<Signer, CustodyError> {
        self.signers
            .get_signer(identity)
            .cloned()
            .ok_or_else(|| CustodyError::SignerNotFound(identity.to_string()))
    }

    pub fn list_signers(&self) -> Vec<Signer> {
        self.signers.all().cloned().collect()
    }

    pub fn current_policy(&self) -> Policy {
        self.policies.current_policy()
    }

    pub fn policy_history(&self) -> Vec<PolicyVersion> {
        self.policies.history().to_vec()
    }

    pub fn wallet_info(&self, now: DateTime<Utc>) -> WalletInfo {
        let policy = self.policies.current_policy();
        let daily_spent = self.state.spend.spent_on(now);
        let eligible = self.signers.eligible_count();

        WalletInfo {
            wallet_id: self.state.wallet_id.clone(),
            balance: self.state.balance,
            is_frozen: self.state.is_frozen,
            daily_spent,
            daily_remaining: policy.daily_limit.saturating_sub(daily_spent),
            policy_version: self.policies.current_version(),
            threshold: policy.description(eligible),
            policy,
            signer_count: self.signers.active().count(),
            eligible_signers: eligible,
            pending_transactions: self.ledger.pending(now).len(),
            approved_transactions: self.ledger.approved().len(),
            transaction_count: self.ledger.count(),
            pending_emergency_actions: self.emergency.pending().len(),
            created_at: self.state.created_at,
        }
    }

    pub fn get_audit_trail(&self, query: &AuditQuery) -> Vec<AuditEvent> {
        self.audit.query(query)
    }

    pub fn get_emergency_actions(&self) -> Vec<EmergencyAction> {
        self.emergency.list().into_iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::TransferReceipt;
    use chrono::Duration;

    fn policy(required: u8) -> Policy {
        Policy {
            required_signatures: required,
            single_tx_limit: 500,
            daily_limit: 1_000,
            ..Policy::default()
        }
    }

    fn wallet(required: u8) -> (WalletAggregate, DateTime<Utc>) {
        let now = Utc::now();
        let mut wallet = WalletAggregate::genesis(
            "vault-1",
            vec![
                ("alice".into(), Role::Owner),
                ("bob".into(), Role::Signer),
                ("carol".into(), Role::Signer),
                ("oscar".into(), Role::Observer),
                ("erin".into(), Role::Emergency),
            ],
            policy(required),
            now,
        )
        .unwrap();
        wallet.deposit(&"alice".into(), 2_000, now).unwrap();
        (wallet, now)
    }

    fn done(step: ExecutionStep) -> Transaction {
        match step {
            ExecutionStep::Done(tx) => tx,
            ExecutionStep::Dispatch(job) => panic!("unexpected dispatch of {}", job.tx_id),
        }
    }

    fn dispatched(step: ExecutionStep) -> FundsDispatch {
        match step {
            ExecutionStep::Dispatch(job) => job,
            ExecutionStep::Done(tx) => panic!("expected dispatch, got {}", tx.status),
        }
    }

    fn receipt(job: &FundsDispatch) -> TransferReceipt {
        TransferReceipt {
            receipt_id: "rcpt-1".to_string(),
            request: job.request.clone(),
            settled_at: Utc::now(),
        }
    }

    #[test]
    fn test_genesis_validation() {
        let now = Utc::now();
        let no_owner = WalletAggregate::genesis(
            "vault-1",
            vec![("bob".into(), Role::Signer)],
            policy(1),
            now,
        );
        assert!(matches!(no_owner, Err(CustodyError::InvalidConfiguration(_))));

        let duplicate = WalletAggregate::genesis(
            "vault-1",
            vec![("alice".into(), Role::Owner), ("alice".into(), Role::Signer)],
            policy(1),
            now,
        );
        assert!(matches!(duplicate, Err(CustodyError::InvalidConfiguration(_))));

        let unreachable = WalletAggregate::genesis(
            "vault-1",
            vec![("alice".into(), Role::Owner), ("oscar".into(), Role::Observer)],
            policy(2),
            now,
        );
        assert!(matches!(
            unreachable,
            Err(CustodyError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_propose_applies_implicit_signature() {
        let (mut wallet, now) = wallet(2);
        let tx = done(
            wallet
                .propose(&"alice".into(), Proposal::transfer("bank", 100), 0, now)
                .unwrap(),
        );

        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.signed_by(), vec!["alice"]);
        assert_eq!(tx.required_signatures, 2);
        assert_eq!(tx.policy_version, 1);
    }

    #[test]
    fn test_propose_requires_admin() {
        let (mut wallet, now) = wallet(2);
        let result = wallet.propose(&"bob".into(), Proposal::transfer("bank", 100), 0, now);

        assert!(matches!(result, Err(CustodyError::Unauthorized { .. })));
        let denied = wallet.get_audit_trail(&AuditQuery {
            category: Some(Category::Access),
            ..AuditQuery::default()
        });
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].actor, "bob");
    }

    #[test]
    fn test_propose_rejects_emergency_kind() {
        let (mut wallet, now) = wallet(2);
        let proposal = Proposal {
            kind: TransactionKind::Emergency,
            amount: 0,
            recipient: None,
            payload: ActionPayload::None,
        };
        assert!(matches!(
            wallet.propose(&"alice".into(), proposal, 0, now),
            Err(CustodyError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_limit_violation_records_nothing() {
        let (mut wallet, now) = wallet(2);
        let result = wallet.propose(&"alice".into(), Proposal::withdrawal("bank", 1_000), 0, now);

        assert!(matches!(result, Err(CustodyError::PolicyViolation(_))));
        assert_eq!(wallet.ledger().count(), 0);
    }

    #[test]
    fn test_threshold_dispatches_and_commits() {
        let (mut wallet, now) = wallet(2);
        let tx = done(
            wallet
                .propose(&"alice".into(), Proposal::transfer("bank", 300), 0, now)
                .unwrap(),
        );

        let job = dispatched(wallet.sign(&"bob".into(), &tx.id, 5, now).unwrap());
        assert_eq!(wallet.state().balance, 2_000 - 305);
        assert!(wallet.ledger().get(&tx.id).unwrap().in_flight);

        // A concurrent execute sees the in-flight marker
        assert!(matches!(
            wallet.execute(&"carol".into(), &tx.id, 5, now),
            Err(CustodyError::ExecutionInProgress(_))
        ));

        let tx = wallet
            .complete_execution(&tx.id, Ok(receipt(&job)), now)
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Executed);
        assert!(tx.execution_result.unwrap().is_success());
        assert_eq!(wallet.state().balance, 1_695);
        assert_eq!(wallet.state().spend.daily_spent, 300);
    }

    #[test]
    fn test_failed_settlement_releases_funds() {
        let (mut wallet, now) = wallet(2);
        let tx = done(
            wallet
                .propose(&"alice".into(), Proposal::transfer("bank", 300), 0, now)
                .unwrap(),
        );
        dispatched(wallet.sign(&"bob".into(), &tx.id, 5, now).unwrap());

        let failure = ExecutionResult::Failed {
            code: "EXTERNAL_UNAVAILABLE".to_string(),
            reason: "ledger down".to_string(),
        };
        let tx = wallet.complete_execution(&tx.id, Err(failure), now).unwrap();

        assert_eq!(tx.status, TransactionStatus::Executed);
        assert!(!tx.execution_result.unwrap().is_success());
        assert_eq!(wallet.state().balance, 2_000);
        assert_eq!(wallet.state().spend.daily_spent, 0);
    }

    #[test]
    fn test_insufficient_balance_is_terminal_failure() {
        let now = Utc::now();
        let mut empty = WalletAggregate::genesis(
            "vault-2",
            vec![("alice".into(), Role::Owner)],
            policy(1),
            now,
        )
        .unwrap();

        // 1-of-1: the proposer's implicit signature executes immediately
        let tx = done(
            empty
                .propose(&"alice".into(), Proposal::transfer("bank", 100), 0, now)
                .unwrap(),
        );

        assert_eq!(tx.status, TransactionStatus::Executed);
        match tx.execution_result {
            Some(ExecutionResult::Failed { code, .. }) => {
                assert_eq!(code, "INSUFFICIENT_BALANCE")
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(empty.state().balance, 0);
        assert!(!tx.funds_reserved);
    }

    #[test]
    fn test_execute_is_idempotent() {
        let (mut wallet, now) = wallet(2);
        let tx = done(
            wallet
                .propose(
                    &"alice".into(),
                    Proposal::add_signer("dave".into(), Role::Signer),
                    0,
                    now,
                )
                .unwrap(),
        );
        let executed = done(wallet.sign(&"bob".into(), &tx.id, 0, now).unwrap());
        assert_eq!(executed.status, TransactionStatus::Executed);
        assert!(wallet.signers().can_sign(&"dave".into()));

        let again = done(wallet.execute(&"carol".into(), &tx.id, 0, now).unwrap());
        assert_eq!(again.execution_result, executed.execution_result);
        assert_eq!(again.executed_at, executed.executed_at);
    }

    #[test]
    fn test_rejection_quorum() {
        let (mut wallet, now) = wallet(2);
        let tx = done(
            wallet
                .propose(&"alice".into(), Proposal::transfer("bank", 100), 0, now)
                .unwrap(),
        );

        // 3 eligible, 2 required: two rejections make quorum unreachable
        let tx = wallet.reject(&"bob".into(), &tx.id, now).unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(matches!(
            wallet.sign(&"bob".into(), &tx.id, 0, now),
            Err(CustodyError::AlreadyRejected)
        ));

        let tx = wallet.reject(&"carol".into(), &tx.id, now).unwrap();
        assert_eq!(tx.status, TransactionStatus::Rejected);
    }

    #[test]
    fn test_cancel_permissions() {
        let (mut wallet, now) = wallet(3);
        wallet
            .propose(&"alice".into(), Proposal::transfer("bank", 100), 0, now)
            .unwrap();
        let tx_id = wallet.get_pending_transactions(now)[0].id.clone();

        assert!(matches!(
            wallet.cancel(&"bob".into(), &tx_id, now),
            Err(CustodyError::Unauthorized { .. })
        ));

        let tx = wallet.cancel(&"alice".into(), &tx_id, now).unwrap();
        assert_eq!(tx.status, TransactionStatus::Cancelled);
        assert!(matches!(
            wallet.cancel(&"alice".into(), &tx_id, now),
            Err(CustodyError::NotPending { .. })
        ));
    }

    #[test]
    fn test_expired_sign_is_persisted_and_audited() {
        let (mut wallet, now) = wallet(2);
        let tx = done(
            wallet
                .propose(&"alice".into(), Proposal::transfer("bank", 100), 0, now)
                .unwrap(),
        );
        let later = tx.expires_at + Duration::seconds(1);

        assert!(matches!(
            wallet.sign(&"bob".into(), &tx.id, 0, later),
            Err(CustodyError::Expired(_))
        ));
        assert_eq!(
            wallet.ledger().get(&tx.id).unwrap().status,
            TransactionStatus::Expired
        );
        assert!(matches!(
            wallet.sign(&"carol".into(), &tx.id, 0, later),
            Err(CustodyError::Expired(_))
        ));
        let expiries = wallet.get_audit_trail(&AuditQuery::for_transaction(&tx.id));
        assert!(expiries
            .iter()
            .any(|e| e.event_type == "transaction_expired"));
    }

    #[test]
    fn test_freeze_blocks_execution_retry() {
        let (mut wallet, now) = wallet(2);
        let tx = done(
            wallet
                .propose(&"alice".into(), Proposal::transfer("bank", 100), 0, now)
                .unwrap(),
        );
        dispatched(wallet.sign(&"bob".into(), &tx.id, 0, now).unwrap());

        // Simulate a restart mid-execution, then a freeze
        let mut wallet = wallet.restored();
        let action = wallet
            .initiate_emergency(&"erin".into(), EmergencyKind::Freeze, "incident", now)
            .unwrap();
        wallet
            .execute_emergency(&"erin".into(), &action.id, action.execute_at)
            .unwrap();

        assert!(matches!(
            wallet.execute(&"alice".into(), &tx.id, 0, now),
            Err(CustodyError::WalletFrozen)
        ));
        let stored = wallet.get_transaction(&tx.id, now).unwrap();
        assert_eq!(stored.status, TransactionStatus::Approved);
        assert!(stored.funds_reserved);
        assert!(wallet.wallet_info(now).is_frozen);
    }

    #[test]
    fn test_emergency_permissions() {
        let (mut wallet, now) = wallet(2);
        assert!(matches!(
            wallet.initiate_emergency(&"bob".into(), EmergencyKind::Freeze, "x", now),
            Err(CustodyError::Unauthorized { .. })
        ));

        let action = wallet
            .initiate_emergency(&"erin".into(), EmergencyKind::Freeze, "x", now)
            .unwrap();
        assert!(matches!(
            wallet.cancel_emergency(&"erin".into(), &action.id, now),
            Err(CustodyError::Unauthorized { .. })
        ));
        wallet
            .cancel_emergency(&"alice".into(), &action.id, now)
            .unwrap();
        assert!(!wallet.state().is_frozen);
    }

    #[test]
    fn test_policy_change_with_unbounded_window_is_refused() {
        let (mut wallet, now) = wallet(2);
        let mut next = policy(1);
        next.signature_timeout_secs = 9_000_000_000_000;
        next.emergency_delay_secs = 9_000_000_000_000;

        let result = wallet.propose(&"alice".into(), Proposal::change_policy(next), 0, now);
        assert!(matches!(result, Err(CustodyError::InvalidConfiguration(_))));
        assert!(wallet.list_transactions(now).is_empty());
        assert_eq!(wallet.policies().current_version(), 1);
    }

    #[test]
    fn test_out_of_range_window_fails_without_consuming_a_sequence() {
        let (mut wallet, now) = wallet(1);
        let mut stored = policy(1);
        stored.signature_timeout_secs = i64::MAX;
        stored.emergency_delay_secs = i64::MAX;
        wallet.policies.publish(stored, now, None);

        let propose = wallet.propose(&"alice".into(), Proposal::transfer("bank", 100), 0, now);
        assert!(matches!(propose, Err(CustodyError::InvalidConfiguration(_))));
        let freeze =
            wallet.initiate_emergency(&"erin".into(), EmergencyKind::Freeze, "incident", now);
        assert!(matches!(freeze, Err(CustodyError::InvalidConfiguration(_))));
        assert!(wallet.list_transactions(now).is_empty());
        assert!(wallet.get_emergency_actions().is_empty());

        wallet.policies.publish(policy(1), now, None);
        let step = wallet
            .propose(&"alice".into(), Proposal::transfer("bank", 100), 0, now)
            .unwrap();
        let job = dispatched(step);
        let tx = wallet.get_transaction(&job.tx_id, now).unwrap();
        assert_eq!(tx.sequence, 1);
    }
}
