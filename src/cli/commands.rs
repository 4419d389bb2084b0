//! CLI commands for the custody engine
//!
//! Every command opens the wallet snapshot in the configured data
//! directory, runs one engine operation and prints the outcome.

use crate::access::{Principal, Role};
use crate::audit::{AuditEvent, AuditQuery};
use crate::config::{EngineConfig, GenesisConfig, GenesisSigner};
use crate::emergency::EmergencyAction;
use crate::engine::CustodyEngine;
use crate::multisig::{ExecutionResult, Proposal, Transaction, TransactionKind};
use crate::policy::Policy;
use crate::storage::{save_to_file, Storage};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Application state
pub struct AppState {
    pub engine: CustodyEngine,
    pub config: EngineConfig,
    caller: Option<Principal>,
    runtime: Runtime,
}

impl AppState {
    /// Open the wallet described by `config`
    pub fn new(config: EngineConfig, caller: Option<Principal>) -> CliResult<Self> {
        let runtime = Runtime::new()?;
        let engine = CustodyEngine::open(&config)?;

        Ok(Self {
            engine,
            config,
            caller,
            runtime,
        })
    }

    /// Identity passed with `--as`
    pub fn caller(&self) -> CliResult<&Principal> {
        self.caller
            .as_ref()
            .ok_or_else(|| "this command needs a caller identity: pass --as <principal>".into())
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Hand the engine and runtime to a long-running server
    pub fn into_parts(self) -> (CustodyEngine, Runtime) {
        (self.engine, self.runtime)
    }
}

/// Read the config file if present, then apply the `--data-dir` override
pub fn load_config(path: &Path, data_dir: Option<PathBuf>) -> CliResult<EngineConfig> {
    let mut config = if path.exists() {
        EngineConfig::load(path)?
    } else {
        EngineConfig::default()
    };

    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    Ok(config)
}

/// Parse `identity:role` as given to `init --signer`
pub fn parse_signer(raw: &str) -> Result<GenesisSigner, String> {
    let (identity, role) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected identity:role, got '{}'", raw))?;
    let identity = identity.trim();
    if identity.is_empty() {
        return Err(format!("empty identity in '{}'", raw));
    }

    Ok(GenesisSigner {
        identity: Principal::new(identity),
        role: role.trim().parse::<Role>()?,
    })
}

// ============================================================================
// Setup
// ============================================================================

/// Create a new wallet and write its config file
pub fn cmd_init(
    config_path: &Path,
    mut config: EngineConfig,
    signers: Vec<GenesisSigner>,
    policy: Policy,
) -> CliResult<()> {
    let storage = Storage::new(config.storage_config())?;
    if storage.exists() {
        println!("⚠️  A wallet already exists at {:?}", config.data_dir);
        println!("   Delete the data directory to start over");
        return Ok(());
    }

    config.genesis = Some(GenesisConfig { signers, policy });
    let state = AppState::new(config, None)?;
    state.config.save(config_path)?;

    let info = state.block_on(state.engine.get_wallet_info());
    println!("✅ Custody wallet initialized!");
    println!("   🏦 Wallet: {}", info.wallet_id);
    println!("   📁 Data directory: {:?}", state.config.data_dir);
    println!("   📝 Config: {:?}", config_path);
    println!("   ✍️  Threshold: {}", info.threshold);
    for signer in state.block_on(state.engine.list_signers()) {
        println!("   └─ {} ({})", signer.identity, signer.role);
    }

    Ok(())
}

/// Wallet summary
pub fn cmd_info(state: &AppState) -> CliResult<()> {
    let info = state.block_on(state.engine.get_wallet_info());

    println!("🏦 Wallet {}", info.wallet_id);
    println!("   ├─ Balance: {}", info.balance);
    println!(
        "   ├─ Status: {}",
        if info.is_frozen { "❄️  FROZEN" } else { "active" }
    );
    println!(
        "   ├─ Daily spend: {} used, {} remaining",
        info.daily_spent, info.daily_remaining
    );
    println!(
        "   ├─ Policy: v{} ({})",
        info.policy_version, info.threshold
    );
    println!(
        "   ├─ Signers: {} ({} can sign)",
        info.signer_count, info.eligible_signers
    );
    println!(
        "   ├─ Transactions: {} total, {} pending, {} approved",
        info.transaction_count, info.pending_transactions, info.approved_transactions
    );
    println!(
        "   └─ Pending emergency actions: {}",
        info.pending_emergency_actions
    );

    Ok(())
}

/// Record inbound funds
pub fn cmd_deposit(state: &AppState, amount: u64) -> CliResult<()> {
    let caller = state.caller()?;
    let info = state.block_on(state.engine.record_deposit(caller, amount))?;

    println!("📥 Deposit of {} recorded", amount);
    println!("   New balance: {}", info.balance);
    Ok(())
}

// ============================================================================
// Transactions
// ============================================================================

/// Build the proposal for `propose`
pub fn build_proposal(
    kind: TransactionKind,
    amount: u64,
    recipient: Option<String>,
) -> CliResult<Proposal> {
    if !kind.moves_funds() {
        return Err(format!(
            "{} is proposed through the signer or policy commands",
            kind
        )
        .into());
    }
    let recipient = recipient.ok_or("a recipient is required for fund movements")?;

    Ok(match kind {
        TransactionKind::Withdrawal => Proposal::withdrawal(&recipient, amount),
        _ => Proposal::transfer(&recipient, amount),
    })
}

pub fn cmd_propose(state: &AppState, proposal: Proposal) -> CliResult<()> {
    let caller = state.caller()?;
    let tx = state.block_on(state.engine.propose_transaction(caller, proposal))?;

    println!("📝 Transaction proposed");
    print_transaction(&tx);
    Ok(())
}

pub fn cmd_sign(state: &AppState, tx_id: &str) -> CliResult<()> {
    let caller = state.caller()?;
    let tx = state.block_on(state.engine.sign_transaction(caller, tx_id))?;

    println!("✍️  Signed by {}", caller);
    print_transaction(&tx);
    Ok(())
}

pub fn cmd_reject(state: &AppState, tx_id: &str) -> CliResult<()> {
    let caller = state.caller()?;
    let tx = state.block_on(state.engine.reject_transaction(caller, tx_id))?;

    println!("🚫 Rejection recorded for {}", caller);
    print_transaction(&tx);
    Ok(())
}

pub fn cmd_execute(state: &AppState, tx_id: &str) -> CliResult<()> {
    let caller = state.caller()?;
    let tx = state.block_on(state.engine.execute_transaction(caller, tx_id))?;

    println!("⚙️  Execution finished");
    print_transaction(&tx);
    Ok(())
}

pub fn cmd_cancel(state: &AppState, tx_id: &str) -> CliResult<()> {
    let caller = state.caller()?;
    let tx = state.block_on(state.engine.cancel_transaction(caller, tx_id))?;

    println!("🗑️  Transaction cancelled");
    print_transaction(&tx);
    Ok(())
}

pub fn cmd_tx_show(state: &AppState, tx_id: &str) -> CliResult<()> {
    let tx = state.block_on(state.engine.get_transaction(tx_id))?;
    print_transaction(&tx);
    Ok(())
}

/// List pending transactions, or every transaction with `all`
pub fn cmd_tx_list(state: &AppState, all: bool) -> CliResult<()> {
    let txs = if all {
        state.block_on(state.engine.list_transactions())
    } else {
        state.block_on(state.engine.get_pending_transactions())
    };

    if txs.is_empty() {
        println!("📭 No transactions");
        return Ok(());
    }

    println!("📋 Transactions ({}):", txs.len());
    for tx in &txs {
        println!(
            "   {} | {} | {} | {} | {}/{} signatures",
            tx.id,
            tx.kind,
            tx.status,
            tx.amount,
            tx.signature_count(),
            tx.required_signatures
        );
    }
    Ok(())
}

fn print_transaction(tx: &Transaction) {
    println!("   ├─ ID: {}", tx.id);
    println!("   ├─ Kind: {}", tx.kind);
    println!("   ├─ Status: {}", tx.status);
    if tx.kind.moves_funds() {
        println!(
            "   ├─ Amount: {} to {}",
            tx.amount,
            tx.recipient.as_deref().unwrap_or("-")
        );
    }
    println!("   ├─ Initiator: {}", tx.initiator);
    println!(
        "   ├─ Signatures: {}/{} [{}]",
        tx.signature_count(),
        tx.required_signatures,
        tx.signed_by().join(", ")
    );
    if !tx.rejections.is_empty() {
        println!("   ├─ Rejections: {}", tx.rejections.len());
    }
    match &tx.execution_result {
        Some(ExecutionResult::Success { receipt, detail }) => {
            println!("   ├─ Result: ✅ {}", detail);
            if let Some(receipt) = receipt {
                println!("   ├─ Receipt: {}", receipt);
            }
        }
        Some(ExecutionResult::Failed { code, reason }) => {
            println!("   ├─ Result: ❌ {} ({})", reason, code);
        }
        None => {}
    }
    println!("   └─ Expires: {}", tx.expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
}

// ============================================================================
// Signers and policy
// ============================================================================

pub fn cmd_signer_list(state: &AppState) -> CliResult<()> {
    let signers = state.block_on(state.engine.list_signers());

    println!("👥 Signers ({}):", signers.len());
    for signer in &signers {
        println!(
            "   {} | {} | {} | {} signatures",
            signer.identity,
            signer.role,
            if signer.active { "active" } else { "removed" },
            signer.signature_count
        );
    }
    Ok(())
}

pub fn cmd_signer_show(state: &AppState, identity: &str) -> CliResult<()> {
    let signer = state.block_on(state.engine.get_signer_info(&Principal::new(identity)))?;

    println!("👤 Signer {}", signer.identity);
    println!("   ├─ Role: {}", signer.role);
    println!("   ├─ Active: {}", signer.active);
    println!("   ├─ Joined: {}", signer.joined_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(last) = signer.last_activity {
        println!("   ├─ Last activity: {}", last.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("   └─ Signatures: {}", signer.signature_count);
    Ok(())
}

pub fn cmd_signer_add(state: &AppState, identity: &str, role: Role) -> CliResult<()> {
    let caller = state.caller()?;
    let tx = state.block_on(
        state
            .engine
            .add_signer(caller, Principal::new(identity), role),
    )?;

    println!("📝 Proposed adding {} as {}", identity, role);
    print_transaction(&tx);
    Ok(())
}

pub fn cmd_signer_remove(state: &AppState, identity: &str) -> CliResult<()> {
    let caller = state.caller()?;
    let tx = state.block_on(state.engine.remove_signer(caller, Principal::new(identity)))?;

    println!("📝 Proposed removing {}", identity);
    print_transaction(&tx);
    Ok(())
}

pub fn cmd_policy_show(state: &AppState, history: bool) -> CliResult<()> {
    if history {
        println!("📜 Policy history:");
        for version in state.block_on(state.engine.policy_history()) {
            println!(
                "   v{} | from {} | {} signatures | installed by {}",
                version.version,
                version.effective_from.format("%Y-%m-%d %H:%M:%S"),
                version.policy.required_signatures,
                version.installed_by.as_deref().unwrap_or("genesis")
            );
        }
        return Ok(());
    }

    let policy = state.block_on(state.engine.current_policy());
    println!("📜 Current policy");
    println!("{}", serde_json::to_string_pretty(&policy)?);
    Ok(())
}

/// Propose the policy read from a JSON file
pub fn cmd_policy_update(state: &AppState, file: &Path) -> CliResult<()> {
    let caller = state.caller()?;
    let policy: Policy = serde_json::from_str(&fs::read_to_string(file)?)?;
    let tx = state.block_on(state.engine.update_policy(caller, policy))?;

    println!("📝 Policy change proposed from {:?}", file);
    print_transaction(&tx);
    Ok(())
}

// ============================================================================
// Emergency
// ============================================================================

pub fn cmd_emergency_initiate(state: &AppState, freeze: bool, reason: &str) -> CliResult<()> {
    let caller = state.caller()?;
    let action = if freeze {
        state.block_on(state.engine.initiate_emergency_freeze(caller, reason))?
    } else {
        state.block_on(state.engine.initiate_emergency_unfreeze(caller, reason))?
    };

    println!("🚨 Emergency {} queued", action.kind);
    print_emergency(&action);
    Ok(())
}

pub fn cmd_emergency_execute(state: &AppState, action_id: &str) -> CliResult<()> {
    let caller = state.caller()?;
    let action = state.block_on(state.engine.execute_emergency_action(caller, action_id))?;

    println!("🚨 Emergency {} executed", action.kind);
    print_emergency(&action);
    Ok(())
}

pub fn cmd_emergency_cancel(state: &AppState, action_id: &str) -> CliResult<()> {
    let caller = state.caller()?;
    let action = state.block_on(state.engine.cancel_emergency_action(caller, action_id))?;

    println!("🗑️  Emergency action cancelled");
    print_emergency(&action);
    Ok(())
}

pub fn cmd_emergency_list(state: &AppState) -> CliResult<()> {
    let actions = state.block_on(state.engine.get_emergency_actions());
    if actions.is_empty() {
        println!("📭 No emergency actions");
        return Ok(());
    }

    println!("🚨 Emergency actions ({}):", actions.len());
    for action in &actions {
        println!(
            "   {} | {} | {} | by {} | executable from {}",
            action.id,
            action.kind,
            action.status,
            action.initiator,
            action.execute_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn print_emergency(action: &EmergencyAction) {
    println!("   ├─ ID: {}", action.id);
    println!("   ├─ Status: {}", action.status);
    println!("   ├─ Initiator: {}", action.initiator);
    if !action.reason.is_empty() {
        println!("   ├─ Reason: {}", action.reason);
    }
    println!(
        "   └─ Executable from: {}",
        action.execute_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
}

// ============================================================================
// Audit
// ============================================================================

pub fn cmd_audit_list(state: &AppState, query: AuditQuery) -> CliResult<()> {
    let events = state.block_on(state.engine.get_audit_trail(&query));
    if events.is_empty() {
        println!("📭 No matching audit events");
        return Ok(());
    }

    println!("🧾 Audit events ({}):", events.len());
    for event in &events {
        print_audit_line(event);
    }
    Ok(())
}

fn print_audit_line(event: &AuditEvent) {
    println!(
        "   #{} {} | {} | {} | {} by {}{}",
        event.sequence,
        event.timestamp.format("%Y-%m-%d %H:%M:%S"),
        event.severity,
        event.category,
        event.event_type,
        event.actor,
        if event.details.is_empty() {
            String::new()
        } else {
            format!(" ({})", event.details)
        }
    );
}

pub fn cmd_audit_verify(state: &AppState) -> CliResult<()> {
    println!("🔍 Verifying audit chain...");
    let status = state.block_on(state.engine.verify_audit_chain());

    if status.valid {
        println!("✅ Audit chain is intact");
        println!("   {} events verified", status.length);
        println!("   Head: {}", status.head_hash);
    } else {
        println!("❌ Audit chain verification FAILED!");
        if let Some(seq) = status.first_broken {
            println!("   First broken link at event #{}", seq);
        }
    }
    Ok(())
}

// ============================================================================
// Snapshots
// ============================================================================

/// Write a consistent copy of the wallet to `path`
pub fn cmd_export(state: &AppState, path: &Path) -> CliResult<()> {
    let wallet = state.block_on(state.engine.export_snapshot());
    save_to_file(&wallet, path)?;

    println!("📦 Wallet {} exported to {:?}", wallet.wallet_id(), path);
    println!("   Audit events: {}", wallet.audit().len());
    Ok(())
}

pub fn cmd_backup_list(config: &EngineConfig) -> CliResult<()> {
    let storage = Storage::new(config.storage_config())?;
    let stats = storage.stats()?;

    println!("💾 Snapshot storage at {:?}", stats.data_dir);
    println!("   Current snapshot: {} bytes", stats.file_size);
    if stats.backup_count == 0 {
        println!("   No backups yet");
        return Ok(());
    }
    println!("   Backups ({}), 0 is the most recent:", stats.backup_count);
    for index in storage.list_backups() {
        println!("   └─ #{}", index);
    }
    Ok(())
}

/// Replace the live snapshot with backup `index`
///
/// The snapshot being replaced is rotated into the backups, so a restore
/// can itself be undone.
pub fn cmd_backup_restore(config: &EngineConfig, index: usize) -> CliResult<()> {
    let storage = Storage::new(config.storage_config())?;
    let wallet = storage.restore_backup(index)?;
    storage.save(&wallet)?;

    println!("♻️  Restored backup #{} of wallet {}", index, wallet.wallet_id());
    println!("   Audit chain valid: {}", wallet.audit().verify_chain());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genesis_config(dir: &Path) -> EngineConfig {
        EngineConfig {
            data_dir: dir.join("data"),
            genesis: Some(GenesisConfig {
                signers: vec![
                    parse_signer("alice:owner").unwrap(),
                    parse_signer("bob:signer").unwrap(),
                ],
                policy: Policy::default(),
            }),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_parse_signer() {
        let signer = parse_signer("carol : Emergency").unwrap();
        assert_eq!(signer.identity.as_str(), "carol");
        assert_eq!(signer.role, Role::Emergency);

        assert!(parse_signer("carol").is_err());
        assert!(parse_signer(":owner").is_err());
        assert!(parse_signer("carol:root").is_err());
    }

    #[test]
    fn test_build_proposal_requires_recipient() {
        assert!(build_proposal(TransactionKind::Transfer, 10, None).is_err());
        assert!(build_proposal(TransactionKind::AddSigner, 0, Some("x".into())).is_err());

        let proposal =
            build_proposal(TransactionKind::Withdrawal, 10, Some("bank".into())).unwrap();
        assert_eq!(proposal.kind, TransactionKind::Withdrawal);
    }

    #[test]
    fn test_state_persists_between_invocations() {
        let dir = tempfile::tempdir().unwrap();
        let config = genesis_config(dir.path());

        {
            let state = AppState::new(config.clone(), Some("alice".into())).unwrap();
            cmd_deposit(&state, 500).unwrap();
            cmd_propose(&state, Proposal::transfer("bank", 100)).unwrap();
        }

        let state = AppState::new(config, Some("bob".into())).unwrap();
        let pending = state.block_on(state.engine.get_pending_transactions());
        assert_eq!(pending.len(), 1);

        cmd_sign(&state, &pending[0].id).unwrap();
        let info = state.block_on(state.engine.get_wallet_info());
        assert_eq!(info.balance, 400);
    }

    #[test]
    fn test_mutating_command_needs_caller() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(genesis_config(dir.path()), None).unwrap();
        assert!(cmd_deposit(&state, 1).is_err());
        assert!(cmd_info(&state).is_ok());
    }

    #[test]
    fn test_backup_restore_rolls_back_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config = genesis_config(dir.path());

        {
            let state = AppState::new(config.clone(), Some("alice".into())).unwrap();
            cmd_deposit(&state, 100).unwrap();
            cmd_deposit(&state, 50).unwrap();
        }

        // Backup 0 holds the snapshot from before the second deposit
        cmd_backup_restore(&config, 0).unwrap();

        let state = AppState::new(config, None).unwrap();
        assert_eq!(state.block_on(state.engine.get_wallet_info()).balance, 100);

        let exported = dir.path().join("export.json");
        cmd_export(&state, &exported).unwrap();
        let copy = crate::storage::load_from_file(&exported).unwrap();
        assert_eq!(copy.state().balance, 100);
    }

    #[test]
    fn test_load_config_applies_data_dir_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custody.json");

        let config = load_config(&path, Some(dir.path().join("elsewhere"))).unwrap();
        assert_eq!(config.data_dir, dir.path().join("elsewhere"));
        assert!(config.genesis.is_none());
    }
}
