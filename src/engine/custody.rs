//! Async custody engine
//!
//! Wraps one [`WalletAggregate`] behind a `tokio` read/write lock. Every
//! mutating operation takes the write lock, runs to completion and writes a
//! snapshot before the lock is released. Compliance checks, ledger
//! transfers and audit forwarding run with the lock released.
//!
//! Settlement and its commit run on a spawned task, so a caller that stops
//! waiting (dropped HTTP request, client-side timeout) never leaves a
//! transaction half executed. Audit events are queued under the write lock
//! and delivered to the sink by a single forwarder task, in sequence order.

use crate::access::{Principal, Role, Signer};
use crate::audit::{AuditEvent, AuditQuery};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::dispatch::{settle, ExecutionStep};
use crate::emergency::{EmergencyAction, EmergencyKind};
use crate::engine::aggregate::{WalletAggregate, WalletInfo};
use crate::error::CustodyError;
use crate::external::{
    AuditSink, ComplianceEngine, FundsLedger, LogAuditSink, SimulatedLedger, StaticCompliance,
};
use crate::multisig::{Proposal, Transaction};
use crate::policy::{Policy, PolicyVersion};
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

/// Result of recomputing the audit hash chain
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditChainStatus {
    pub valid: bool,
    pub length: usize,
    pub head_hash: String,
    pub first_broken: Option<u64>,
}

/// Queue feeding the sink forwarder, started on first use
type AuditQueue = Arc<OnceLock<mpsc::UnboundedSender<Vec<AuditEvent>>>>;

/// Cloning yields another handle onto the same wallet
#[derive(Clone)]
pub struct CustodyEngine {
    wallet: Arc<RwLock<WalletAggregate>>,
    storage: Option<Arc<Storage>>,
    ledger: Arc<dyn FundsLedger>,
    compliance: Arc<dyn ComplianceEngine>,
    sink: Arc<dyn AuditSink>,
    audit_queue: AuditQueue,
    clock: Arc<dyn Clock>,
    transfer_fee: u64,
    call_timeout: Duration,
}

impl CustodyEngine {
    /// An in-memory engine with a simulated ledger and permissive compliance
    pub fn new(wallet: WalletAggregate) -> Self {
        Self {
            wallet: Arc::new(RwLock::new(wallet)),
            storage: None,
            ledger: Arc::new(SimulatedLedger::new()),
            compliance: Arc::new(StaticCompliance::allow_all()),
            sink: Arc::new(LogAuditSink),
            audit_queue: Arc::new(OnceLock::new()),
            clock: Arc::new(SystemClock),
            transfer_fee: 0,
            call_timeout: Duration::from_secs(10),
        }
    }

    /// Load the wallet from `config.data_dir`, or create it from the
    /// configured genesis if no snapshot exists yet
    pub fn open(config: &EngineConfig) -> Result<Self, CustodyError> {
        let storage = Storage::new(config.storage_config())?;

        let wallet = if storage.exists() {
            let wallet = storage.load()?;
            log::info!(
                "Loaded wallet {} from {}",
                wallet.wallet_id(),
                storage.data_dir().display()
            );
            wallet
        } else {
            let genesis = config.genesis.as_ref().ok_or_else(|| {
                CustodyError::InvalidConfiguration(format!(
                    "no wallet in {} and no genesis configured",
                    config.data_dir.display()
                ))
            })?;
            let mut wallet = genesis.build(&config.wallet_id, Utc::now())?;
            wallet.take_outbox();
            storage.save(&wallet)?;
            wallet
        };

        Ok(Self::new(wallet)
            .with_storage(storage)
            .with_compliance(Arc::new(StaticCompliance::blocking(
                config.blocked_recipients.iter().cloned(),
            )))
            .with_transfer_fee(config.transfer_fee)
            .with_call_timeout(config.call_timeout()))
    }

    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn FundsLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_compliance(mut self, compliance: Arc<dyn ComplianceEngine>) -> Self {
        self.compliance = compliance;
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = sink;
        self.audit_queue = Arc::new(OnceLock::new());
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_transfer_fee(mut self, fee: u64) -> Self {
        self.transfer_fee = fee;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run `op` under the exclusive wallet lock and snapshot the result.
    /// Audit events are queued for the sink before the lock is released.
    async fn mutate<T, F>(&self, op: F) -> Result<T, CustodyError>
    where
        F: FnOnce(&mut WalletAggregate, DateTime<Utc>) -> Result<T, CustodyError>,
    {
        let mut wallet = self.wallet.write().await;
        let now = self.clock.now();
        let before = self.storage.as_ref().map(|_| wallet.clone());

        let result = op(&mut wallet, now);
        let events = wallet.take_outbox();

        let (result, events) = match (&self.storage, before) {
            (Some(storage), Some(before)) if result.is_ok() || !events.is_empty() => {
                match storage.save(&wallet) {
                    Ok(()) => (result, events),
                    Err(e) => {
                        log::error!("Snapshot write failed, rolling back: {}", e);
                        *wallet = before;
                        (Err(CustodyError::from(e)), Vec::new())
                    }
                }
            }
            _ => (result, events),
        };

        self.forward(events);
        result
    }

    /// Hand events to the forwarder task; delivery order matches the
    /// order in which mutations committed
    fn forward(&self, events: Vec<AuditEvent>) {
        if events.is_empty() {
            return;
        }
        let queue = self.audit_queue.get_or_init(|| {
            let (tx, mut rx) = mpsc::unbounded_channel::<Vec<AuditEvent>>();
            let sink = Arc::clone(&self.sink);
            tokio::spawn(async move {
                while let Some(batch) = rx.recv().await {
                    for event in batch {
                        if let Err(e) = sink.emit(&event).await {
                            log::warn!("Audit sink dropped event {}: {}", event.sequence, e);
                        }
                    }
                }
            });
            tx
        });
        if let Err(e) = queue.send(events) {
            log::warn!("Audit forwarder stopped, {} events not delivered", e.0.len());
        }
    }

    async fn run(&self, step: ExecutionStep) -> Result<Transaction, CustodyError> {
        match step {
            ExecutionStep::Done(tx) => Ok(tx),
            ExecutionStep::Dispatch(job) => {
                let engine = self.clone();
                let dispatch = tokio::spawn(async move {
                    let outcome = settle(
                        &job,
                        engine.compliance.as_ref(),
                        engine.ledger.as_ref(),
                        engine.call_timeout,
                    )
                    .await;
                    engine
                        .mutate(|wallet, now| wallet.complete_execution(&job.tx_id, outcome, now))
                        .await
                });
                dispatch.await.map_err(|e| {
                    log::error!("Execution task failed: {}", e);
                    CustodyError::Internal(format!("execution task failed: {}", e))
                })?
            }
        }
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub async fn propose_transaction(
        &self,
        caller: &Principal,
        proposal: Proposal,
    ) -> Result<Transaction, CustodyError> {
        let fee = self.transfer_fee;
        let step = self
            .mutate(|wallet, now| wallet.propose(caller, proposal, fee, now))
            .await?;
        self.run(step).await
    }

    /// Approve a transaction; the final signature returns the executed
    /// transaction with its result
    pub async fn sign_transaction(
        &self,
        caller: &Principal,
        tx_id: &str,
    ) -> Result<Transaction, CustodyError> {
        let fee = self.transfer_fee;
        let step = self
            .mutate(|wallet, now| wallet.sign(caller, tx_id, fee, now))
            .await?;
        self.run(step).await
    }

    /// Execute an Approved transaction, or return an Executed one unchanged
    pub async fn execute_transaction(
        &self,
        caller: &Principal,
        tx_id: &str,
    ) -> Result<Transaction, CustodyError> {
        let fee = self.transfer_fee;
        let step = self
            .mutate(|wallet, now| wallet.execute(caller, tx_id, fee, now))
            .await?;
        self.run(step).await
    }

    pub async fn cancel_transaction(
        &self,
        caller: &Principal,
        tx_id: &str,
    ) -> Result<Transaction, CustodyError> {
        self.mutate(|wallet, now| wallet.cancel(caller, tx_id, now))
            .await
    }

    pub async fn reject_transaction(
        &self,
        caller: &Principal,
        tx_id: &str,
    ) -> Result<Transaction, CustodyError> {
        self.mutate(|wallet, now| wallet.reject(caller, tx_id, now))
            .await
    }

    pub async fn add_signer(
        &self,
        caller: &Principal,
        identity: Principal,
        role: Role,
    ) -> Result<Transaction, CustodyError> {
        self.propose_transaction(caller, Proposal::add_signer(identity, role))
            .await
    }

    pub async fn remove_signer(
        &self,
        caller: &Principal,
        identity: Principal,
    ) -> Result<Transaction, CustodyError> {
        self.propose_transaction(caller, Proposal::remove_signer(identity))
            .await
    }

    pub async fn update_policy(
        &self,
        caller: &Principal,
        policy: Policy,
    ) -> Result<Transaction, CustodyError> {
        self.propose_transaction(caller, Proposal::change_policy(policy))
            .await
    }

    pub async fn record_deposit(
        &self,
        caller: &Principal,
        amount: u64,
    ) -> Result<WalletInfo, CustodyError> {
        self.mutate(|wallet, now| wallet.deposit(caller, amount, now))
            .await
    }

    // ------------------------------------------------------------------
    // Emergency
    // ------------------------------------------------------------------

    pub async fn initiate_emergency_freeze(
        &self,
        caller: &Principal,
        reason: &str,
    ) -> Result<EmergencyAction, CustodyError> {
        self.mutate(|wallet, now| {
            wallet.initiate_emergency(caller, EmergencyKind::Freeze, reason, now)
        })
        .await
    }

    pub async fn initiate_emergency_unfreeze(
        &self,
        caller: &Principal,
        reason: &str,
    ) -> Result<EmergencyAction, CustodyError> {
        self.mutate(|wallet, now| {
            wallet.initiate_emergency(caller, EmergencyKind::Unfreeze, reason, now)
        })
        .await
    }

    pub async fn execute_emergency_action(
        &self,
        caller: &Principal,
        action_id: &str,
    ) -> Result<EmergencyAction, CustodyError> {
        self.mutate(|wallet, now| wallet.execute_emergency(caller, action_id, now))
            .await
    }

    pub async fn cancel_emergency_action(
        &self,
        caller: &Principal,
        action_id: &str,
    ) -> Result<EmergencyAction, CustodyError> {
        self.mutate(|wallet, now| wallet.cancel_emergency(caller, action_id, now))
            .await
    }

    // ------------------------------------------------------------------
    // Queries (shared lock, lazy expiry applied to every view)
    // ------------------------------------------------------------------

    pub async fn get_transaction(&self, tx_id: &str) -> Result<Transaction, CustodyError> {
        let wallet = self.wallet.read().await;
        wallet.get_transaction(tx_id, self.clock.now())
    }

    pub async fn get_pending_transactions(&self) -> Vec<Transaction> {
        let wallet = self.wallet.read().await;
        wallet.get_pending_transactions(self.clock.now())
    }

    pub async fn list_transactions(&self) -> Vec<Transaction> {
        let wallet = self.wallet.read().await;
        wallet.list_transactions(self.clock.now())
    }

    pub async fn get_signer_info(&self, identity: &Principal) -> Result<Signer, CustodyError> {
        self.wallet.read().await.get_signer_info(identity)
    }

    pub async fn list_signers(&self) -> Vec<Signer> {
        self.wallet.read().await.list_signers()
    }

    pub async fn get_wallet_info(&self) -> WalletInfo {
        let wallet = self.wallet.read().await;
        wallet.wallet_info(self.clock.now())
    }

    pub async fn current_policy(&self) -> Policy {
        self.wallet.read().await.current_policy()
    }

    pub async fn policy_history(&self) -> Vec<PolicyVersion> {
        self.wallet.read().await.policy_history()
    }

    pub async fn get_audit_trail(&self, query: &AuditQuery) -> Vec<AuditEvent> {
        self.wallet.read().await.get_audit_trail(query)
    }

    pub async fn verify_audit_chain(&self) -> AuditChainStatus {
        let wallet = self.wallet.read().await;
        let trail = wallet.audit();
        let first_broken = trail.first_broken_link();
        AuditChainStatus {
            valid: first_broken.is_none(),
            length: trail.len(),
            head_hash: trail.head_hash().to_string(),
            first_broken,
        }
    }

    pub async fn get_emergency_actions(&self) -> Vec<EmergencyAction> {
        self.wallet.read().await.get_emergency_actions()
    }

    /// Consistent copy of the whole aggregate
    pub async fn export_snapshot(&self) -> WalletAggregate {
        self.wallet.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::Category;
    use crate::clock::ManualClock;
    use crate::external::{ExternalError, MemoryAuditSink};
    use crate::multisig::{ExecutionResult, TransactionStatus};
    use chrono::{Duration as ChronoDuration, TimeZone};

    struct Harness {
        engine: Arc<CustodyEngine>,
        clock: Arc<ManualClock>,
        ledger: Arc<SimulatedLedger>,
        sink: Arc<MemoryAuditSink>,
    }

    fn alice() -> Principal {
        "alice".into()
    }
    fn bob() -> Principal {
        "bob".into()
    }
    fn carol() -> Principal {
        "carol".into()
    }
    fn erin() -> Principal {
        "erin".into()
    }

    fn base_policy() -> Policy {
        Policy {
            required_signatures: 2,
            single_tx_limit: 500,
            daily_limit: 1_000,
            signature_timeout_secs: 3_600,
            emergency_delay_secs: 600,
            ..Policy::default()
        }
    }

    fn harness_with(policy: Policy, ledger: SimulatedLedger) -> Harness {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let ledger = Arc::new(ledger);
        let sink = Arc::new(MemoryAuditSink::new());

        let wallet = WalletAggregate::genesis(
            "vault-1",
            vec![
                (alice(), Role::Owner),
                (bob(), Role::Signer),
                (carol(), Role::Signer),
                ("oscar".into(), Role::Observer),
                (erin(), Role::Emergency),
            ],
            policy,
            start,
        )
        .unwrap();

        let engine = CustodyEngine::new(wallet)
            .with_clock(clock.clone())
            .with_ledger(ledger.clone())
            .with_audit_sink(sink.clone())
            .with_call_timeout(Duration::from_millis(100));

        Harness {
            engine: Arc::new(engine),
            clock,
            ledger,
            sink,
        }
    }

    async fn funded(policy: Policy) -> Harness {
        let h = harness_with(policy, SimulatedLedger::new());
        h.engine.record_deposit(&alice(), 5_000).await.unwrap();
        h
    }

    #[tokio::test]
    async fn test_limit_violation_before_any_signature() {
        let h = funded(base_policy()).await;

        let result = h
            .engine
            .propose_transaction(&alice(), Proposal::withdrawal("bank", 1_000))
            .await;

        assert!(matches!(result, Err(CustodyError::PolicyViolation(_))));
        assert!(h.engine.list_transactions().await.is_empty());
        assert_eq!(h.engine.get_signer_info(&alice()).await.unwrap().signature_count, 0);
    }

    #[tokio::test]
    async fn test_second_signature_executes_and_third_is_not_pending() {
        let h = funded(base_policy()).await;
        let tx = h
            .engine
            .propose_transaction(&alice(), Proposal::transfer("bank", 300))
            .await
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);

        let tx = h.engine.sign_transaction(&bob(), &tx.id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Executed);
        assert!(tx.execution_result.as_ref().unwrap().is_success());
        assert_eq!(h.ledger.settled().len(), 1);
        assert_eq!(h.engine.get_wallet_info().await.balance, 4_700);

        let third = h.engine.sign_transaction(&carol(), &tx.id).await;
        assert!(matches!(third, Err(CustodyError::NotPending { .. })));
    }

    #[tokio::test]
    async fn test_double_sign_counts_once() {
        let mut policy = base_policy();
        policy.required_signatures = 3;
        let h = funded(policy).await;
        let tx = h
            .engine
            .propose_transaction(&alice(), Proposal::transfer("bank", 100))
            .await
            .unwrap();

        h.engine.sign_transaction(&bob(), &tx.id).await.unwrap();
        let again = h.engine.sign_transaction(&bob(), &tx.id).await;

        assert!(matches!(again, Err(CustodyError::AlreadySigned)));
        assert_eq!(h.engine.get_signer_info(&bob()).await.unwrap().signature_count, 1);
        assert_eq!(h.engine.get_transaction(&tx.id).await.unwrap().signature_count(), 2);
    }

    #[tokio::test]
    async fn test_observer_cannot_sign() {
        let h = funded(base_policy()).await;
        let tx = h
            .engine
            .propose_transaction(&alice(), Proposal::transfer("bank", 100))
            .await
            .unwrap();

        let result = h.engine.sign_transaction(&"oscar".into(), &tx.id).await;
        assert!(matches!(result, Err(CustodyError::Unauthorized { .. })));
        let result = h.engine.sign_transaction(&erin(), &tx.id).await;
        assert!(matches!(result, Err(CustodyError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn test_expiry_observed_on_read_and_sign() {
        let h = funded(base_policy()).await;
        let tx = h
            .engine
            .propose_transaction(&alice(), Proposal::transfer("bank", 100))
            .await
            .unwrap();

        h.clock.advance(ChronoDuration::seconds(3_601));

        let observed = h.engine.get_transaction(&tx.id).await.unwrap();
        assert_eq!(observed.status, TransactionStatus::Expired);
        assert!(h.engine.get_pending_transactions().await.is_empty());

        let result = h.engine.sign_transaction(&bob(), &tx.id).await;
        assert!(matches!(result, Err(CustodyError::Expired(_))));
        let result = h.engine.sign_transaction(&carol(), &tx.id).await;
        assert!(matches!(result, Err(CustodyError::Expired(_))));
    }

    #[tokio::test]
    async fn test_threshold_is_snapshotted_at_proposal() {
        let h = funded(base_policy()).await;
        let transfer = h
            .engine
            .propose_transaction(&alice(), Proposal::transfer("bank", 100))
            .await
            .unwrap();

        let mut stricter = base_policy();
        stricter.required_signatures = 3;
        let change = h.engine.update_policy(&alice(), stricter).await.unwrap();
        let change = h.engine.sign_transaction(&bob(), &change.id).await.unwrap();
        assert!(change.execution_result.unwrap().is_success());
        assert_eq!(h.engine.get_wallet_info().await.policy_version, 2);

        // Old transfer keeps its 2-of-N threshold
        let transfer = h.engine.sign_transaction(&carol(), &transfer.id).await.unwrap();
        assert_eq!(transfer.required_signatures, 2);
        assert_eq!(transfer.policy_version, 1);
        assert_eq!(transfer.status, TransactionStatus::Executed);

        // New proposals need three
        let next = h
            .engine
            .propose_transaction(&alice(), Proposal::transfer("bank", 100))
            .await
            .unwrap();
        let next = h.engine.sign_transaction(&bob(), &next.id).await.unwrap();
        assert_eq!(next.required_signatures, 3);
        assert_eq!(next.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_signer_and_approval_invariant() {
        let h = funded(base_policy()).await;
        let tx = h
            .engine
            .add_signer(&alice(), "dave".into(), Role::Signer)
            .await
            .unwrap();
        assert!(h.engine.get_signer_info(&"dave".into()).await.is_err());

        let tx = h.engine.sign_transaction(&carol(), &tx.id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Executed);
        let dave = h.engine.get_signer_info(&"dave".into()).await.unwrap();
        assert_eq!(dave.role, Role::Signer);

        let removal = h.engine.remove_signer(&alice(), "dave".into()).await.unwrap();
        h.engine.sign_transaction(&bob(), &removal.id).await.unwrap();
        assert!(!h.engine.get_signer_info(&"dave".into()).await.unwrap().active);

        for tx in h.engine.list_transactions().await {
            let approved = matches!(
                tx.status,
                TransactionStatus::Approved | TransactionStatus::Executed
            );
            assert_eq!(tx.threshold_met(), approved, "{}", tx.id);
        }
    }

    #[tokio::test]
    async fn test_daily_limit_resets_after_midnight() {
        let mut policy = base_policy();
        policy.required_signatures = 1;
        policy.single_tx_limit = 1_000;
        let h = funded(policy).await;
        h.clock
            .set(Utc.with_ymd_and_hms(2026, 3, 2, 23, 30, 0).unwrap());

        let tx = h
            .engine
            .propose_transaction(&alice(), Proposal::transfer("bank", 1_000))
            .await
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Executed);
        assert_eq!(h.engine.get_wallet_info().await.daily_remaining, 0);

        let over = h
            .engine
            .propose_transaction(&alice(), Proposal::transfer("bank", 1))
            .await;
        assert!(matches!(over, Err(CustodyError::PolicyViolation(_))));

        h.clock.advance(ChronoDuration::hours(1));
        assert_eq!(h.engine.get_wallet_info().await.daily_remaining, 1_000);
        let tx = h
            .engine
            .propose_transaction(&alice(), Proposal::transfer("bank", 1_000))
            .await
            .unwrap();
        assert!(tx.execution_result.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_frozen_wallet_rejects_mutations_but_answers_queries() {
        let h = funded(base_policy()).await;
        let pending = h
            .engine
            .propose_transaction(&alice(), Proposal::transfer("bank", 100))
            .await
            .unwrap();

        let action = h
            .engine
            .initiate_emergency_freeze(&erin(), "suspected key compromise")
            .await
            .unwrap();
        h.clock.advance(ChronoDuration::seconds(600));
        h.engine
            .execute_emergency_action(&erin(), &action.id)
            .await
            .unwrap();

        let propose = h
            .engine
            .propose_transaction(&alice(), Proposal::transfer("bank", 100))
            .await;
        assert!(matches!(propose, Err(CustodyError::WalletFrozen)));
        let sign = h.engine.sign_transaction(&bob(), &pending.id).await;
        assert!(matches!(sign, Err(CustodyError::WalletFrozen)));
        let sign = h.engine.sign_transaction(&alice(), &pending.id).await;
        assert!(matches!(sign, Err(CustodyError::WalletFrozen)));

        let info = h.engine.get_wallet_info().await;
        assert!(info.is_frozen);
        assert_eq!(info.balance, 5_000);
    }

    #[tokio::test]
    async fn test_emergency_delay() {
        let h = funded(base_policy()).await;
        let action = h
            .engine
            .initiate_emergency_freeze(&erin(), "drill")
            .await
            .unwrap();

        let early = h.engine.execute_emergency_action(&erin(), &action.id).await;
        assert!(matches!(early, Err(CustodyError::TooEarly { .. })));
        assert!(!h.engine.get_wallet_info().await.is_frozen);

        h.clock.advance(ChronoDuration::seconds(600));
        h.engine
            .execute_emergency_action(&erin(), &action.id)
            .await
            .unwrap();
        assert!(h.engine.get_wallet_info().await.is_frozen);

        // Unfreeze works while frozen
        let thaw = h
            .engine
            .initiate_emergency_unfreeze(&alice(), "drill over")
            .await
            .unwrap();
        h.clock.advance(ChronoDuration::seconds(600));
        h.engine
            .execute_emergency_action(&alice(), &thaw.id)
            .await
            .unwrap();
        assert!(!h.engine.get_wallet_info().await.is_frozen);
        assert_eq!(h.engine.get_emergency_actions().await.len(), 2);
    }

    #[tokio::test]
    async fn test_ledger_failure_is_terminal_and_refunds() {
        let h = funded(base_policy()).await;
        h.ledger
            .fail_with(ExternalError::Unavailable("settlement offline".to_string()));

        let tx = h
            .engine
            .propose_transaction(&alice(), Proposal::transfer("bank", 400))
            .await
            .unwrap();
        let tx = h.engine.sign_transaction(&bob(), &tx.id).await.unwrap();

        assert_eq!(tx.status, TransactionStatus::Executed);
        match tx.execution_result.clone() {
            Some(ExecutionResult::Failed { code, .. }) => assert_eq!(code, "EXTERNAL_UNAVAILABLE"),
            other => panic!("expected failure, got {:?}", other),
        }
        let info = h.engine.get_wallet_info().await;
        assert_eq!(info.balance, 5_000);
        assert_eq!(info.daily_spent, 0);

        // Retrying returns the recorded failure; it never re-runs
        h.ledger.clear_failure();
        let again = h.engine.execute_transaction(&carol(), &tx.id).await.unwrap();
        assert_eq!(again.execution_result, tx.execution_result);
        assert!(h.ledger.settled().is_empty());
    }

    #[tokio::test]
    async fn test_ledger_timeout_is_terminal() {
        let h = harness_with(
            base_policy(),
            SimulatedLedger::with_latency(Duration::from_millis(500)),
        );
        h.engine.record_deposit(&alice(), 1_000).await.unwrap();

        let tx = h
            .engine
            .propose_transaction(&alice(), Proposal::transfer("bank", 100))
            .await
            .unwrap();
        let tx = h.engine.sign_transaction(&bob(), &tx.id).await.unwrap();

        match tx.execution_result {
            Some(ExecutionResult::Failed { code, .. }) => assert_eq!(code, "EXTERNAL_TIMEOUT"),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(h.engine.get_wallet_info().await.balance, 1_000);
    }

    #[tokio::test]
    async fn test_compliance_gate() {
        let mut policy = base_policy();
        policy.requires_compliance_check = true;
        let h = funded(policy).await;
        let engine = Arc::try_unwrap(h.engine)
            .ok()
            .unwrap()
            .with_compliance(Arc::new(StaticCompliance::blocking(["sanctioned"])));

        let tx = engine
            .propose_transaction(&alice(), Proposal::transfer("sanctioned", 100))
            .await
            .unwrap();
        let tx = engine.sign_transaction(&bob(), &tx.id).await.unwrap();

        match tx.execution_result {
            Some(ExecutionResult::Failed { code, .. }) => assert_eq!(code, "POLICY_VIOLATION"),
            other => panic!("expected denial, got {:?}", other),
        }
        assert!(h.ledger.settled().is_empty());
        assert_eq!(engine.get_wallet_info().await.balance, 5_000);
    }

    #[tokio::test]
    async fn test_racing_final_signatures_execute_once() {
        let h = harness_with(
            base_policy(),
            SimulatedLedger::with_latency(Duration::from_millis(20)),
        );
        h.engine.record_deposit(&alice(), 1_000).await.unwrap();
        let tx = h
            .engine
            .propose_transaction(&alice(), Proposal::transfer("bank", 100))
            .await
            .unwrap();

        let first = {
            let engine = h.engine.clone();
            let id = tx.id.clone();
            tokio::spawn(async move { engine.sign_transaction(&bob(), &id).await })
        };
        let second = {
            let engine = h.engine.clone();
            let id = tx.id.clone();
            tokio::spawn(async move { engine.sign_transaction(&carol(), &id).await })
        };

        let results = [first.await.unwrap(), second.await.unwrap()];
        let executed = results.iter().filter(|r| r.is_ok()).count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Err(CustodyError::NotPending { .. })))
            .count();

        assert_eq!((executed, refused), (1, 1));
        assert_eq!(h.ledger.settled().len(), 1);
        assert_eq!(h.engine.get_wallet_info().await.balance, 900);
    }

    #[tokio::test]
    async fn test_audit_events_reach_sink() {
        let h = funded(base_policy()).await;
        let tx = h
            .engine
            .propose_transaction(&alice(), Proposal::transfer("bank", 100))
            .await
            .unwrap();
        let _ = h.engine.propose_transaction(&bob(), Proposal::transfer("bank", 1)).await;

        tokio::time::sleep(Duration::from_millis(20)).await;

        let delivered = h.sink.events();
        assert!(delivered
            .iter()
            .any(|e| e.event_type == "transaction_proposed"
                && e.correlation_id.as_deref() == Some(tx.id.as_str())));
        assert!(delivered
            .iter()
            .any(|e| e.category == Category::Access && e.actor == "bob"));

        let status = h.engine.verify_audit_chain().await;
        assert!(status.valid);
        assert_eq!(
            status.length,
            h.engine.get_audit_trail(&AuditQuery::default()).await.len()
        );
    }

    #[tokio::test]
    async fn test_abandoned_signature_still_settles() {
        let h = harness_with(
            base_policy(),
            SimulatedLedger::with_latency(Duration::from_millis(150)),
        );
        let engine = Arc::try_unwrap(h.engine)
            .ok()
            .unwrap()
            .with_call_timeout(Duration::from_secs(2));
        engine.record_deposit(&alice(), 1_000).await.unwrap();
        let tx = engine
            .propose_transaction(&alice(), Proposal::transfer("bank", 100))
            .await
            .unwrap();

        // Caller gives up while the ledger call is still outstanding
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            engine.sign_transaction(&bob(), &tx.id),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;

        let settled = engine.get_transaction(&tx.id).await.unwrap();
        assert_eq!(settled.status, TransactionStatus::Executed);
        assert!(settled.execution_result.as_ref().unwrap().is_success());
        assert_eq!(engine.get_wallet_info().await.balance, 900);

        let again = engine.execute_transaction(&carol(), &tx.id).await.unwrap();
        assert_eq!(again.execution_result, settled.execution_result);
        assert_eq!(h.ledger.settled().len(), 1);
    }

    #[tokio::test]
    async fn test_sink_receives_events_in_sequence_order() {
        let h = funded(base_policy()).await;

        let mut deposits = Vec::new();
        for amount in 1..=8u64 {
            let engine = h.engine.clone();
            deposits.push(tokio::spawn(async move {
                engine.record_deposit(&alice(), amount).await
            }));
        }
        for deposit in deposits {
            deposit.await.unwrap().unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;

        let delivered: Vec<u64> = h.sink.events().iter().map(|e| e.sequence).collect();
        assert!(delivered.windows(2).all(|pair| pair[0] < pair[1]), "{:?}", delivered);

        let trail = h.engine.get_audit_trail(&AuditQuery::default()).await;
        assert_eq!(delivered.last(), trail.last().map(|e| &e.sequence));
    }

    #[tokio::test]
    async fn test_restart_resumes_from_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            data_dir: dir.path().to_path_buf(),
            genesis: Some(crate::config::GenesisConfig {
                signers: vec![
                    crate::config::GenesisSigner {
                        identity: alice(),
                        role: Role::Owner,
                    },
                    crate::config::GenesisSigner {
                        identity: bob(),
                        role: Role::Signer,
                    },
                ],
                policy: base_policy(),
            }),
            ..EngineConfig::default()
        };

        let tx_id = {
            let engine = CustodyEngine::open(&config).unwrap();
            engine.record_deposit(&alice(), 800).await.unwrap();
            engine
                .propose_transaction(&alice(), Proposal::transfer("bank", 300))
                .await
                .unwrap()
                .id
        };

        let engine = CustodyEngine::open(&config).unwrap();
        assert_eq!(engine.get_pending_transactions().await.len(), 1);

        let tx = engine.sign_transaction(&bob(), &tx_id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Executed);
        assert_eq!(engine.get_wallet_info().await.balance, 500);
        assert!(engine.verify_audit_chain().await.valid);
    }

    #[tokio::test]
    async fn test_open_without_snapshot_or_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            data_dir: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };

        assert!(matches!(
            CustodyEngine::open(&config),
            Err(CustodyError::InvalidConfiguration(_))
        ));
    }
}
