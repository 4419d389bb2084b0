//! Custody vault CLI application
//!
//! Operates one multi-signature custody wallet from the command line or
//! serves it over the REST API.

use clap::{Parser, Subcommand};
use custody_vault::access::{Principal, Role};
use custody_vault::api::{create_router, ApiState, WsBroadcaster};
use custody_vault::audit::{AuditQuery, Category, Severity};
use custody_vault::cli::{self, AppState};
use custody_vault::config::{EngineConfig, GenesisSigner};
use custody_vault::external::{AuditSink, FanoutSink, LogAuditSink};
use custody_vault::multisig::TransactionKind;
use custody_vault::policy::Policy;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "custody")]
#[command(version = "0.1.0")]
#[command(about = "Multi-party transaction authorization for custody wallets", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, default_value = "custody.json")]
    config: PathBuf,

    /// Data directory for the wallet snapshot (overrides the config file)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Authenticated identity to act as
    #[arg(long = "as", value_name = "PRINCIPAL")]
    caller: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new custody wallet
    Init {
        /// Wallet identifier
        #[arg(long, default_value = "vault-main")]
        wallet_id: String,

        /// Founding signer as identity:role (repeatable)
        #[arg(short, long = "signer", value_parser = cli::parse_signer, required = true)]
        signers: Vec<GenesisSigner>,

        /// Signatures required to approve a transaction
        #[arg(short, long)]
        required: Option<u8>,

        /// Daily outflow limit
        #[arg(long)]
        daily_limit: Option<u64>,

        /// Per-transaction outflow limit
        #[arg(long)]
        single_limit: Option<u64>,

        /// Emergency action delay in seconds
        #[arg(long)]
        emergency_delay: Option<i64>,

        /// Require a compliance check on every fund movement
        #[arg(long)]
        compliance: bool,
    },

    /// Serve the REST API
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Snapshot backups
    Backup {
        #[command(subcommand)]
        action: BackupCommands,
    },

    #[command(flatten)]
    Wallet(WalletCommands),
}

/// Commands that run against an opened wallet
#[derive(Subcommand)]
enum WalletCommands {
    /// Show wallet information
    Info,

    /// Record inbound funds
    Deposit {
        #[arg(short, long)]
        amount: u64,
    },

    /// Propose a transfer or withdrawal
    Propose {
        /// transfer or withdrawal
        #[arg(short, long, default_value = "transfer")]
        kind: TransactionKind,

        #[arg(short, long)]
        amount: u64,

        #[arg(short, long)]
        to: String,
    },

    /// Sign a pending transaction
    Sign { id: String },

    /// Vote against a pending transaction
    Reject { id: String },

    /// Execute (or retry) an approved transaction
    Execute { id: String },

    /// Cancel a pending transaction
    Cancel { id: String },

    /// Show one transaction
    Tx { id: String },

    /// List pending transactions
    Pending {
        /// Include every transaction, not just pending ones
        #[arg(long)]
        all: bool,
    },

    /// Signer management
    Signer {
        #[command(subcommand)]
        action: SignerCommands,
    },

    /// Policy management
    Policy {
        #[command(subcommand)]
        action: PolicyCommands,
    },

    /// Emergency freeze queue
    Emergency {
        #[command(subcommand)]
        action: EmergencyCommands,
    },

    /// Audit trail
    Audit {
        #[command(subcommand)]
        action: AuditCommands,
    },

    /// Export the wallet snapshot to a file
    Export {
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum SignerCommands {
    /// List all signers
    List,

    /// Show a signer
    Show { identity: String },

    /// Propose adding a signer
    Add {
        identity: String,

        #[arg(short, long, default_value = "signer")]
        role: Role,
    },

    /// Propose removing a signer
    Remove { identity: String },
}

#[derive(Subcommand)]
enum PolicyCommands {
    /// Show the current policy
    Show {
        /// Show every published version instead
        #[arg(long)]
        history: bool,
    },

    /// Propose the policy in a JSON file
    Update {
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum EmergencyCommands {
    /// Queue a freeze
    Freeze {
        #[arg(short, long, default_value = "")]
        reason: String,
    },

    /// Queue an unfreeze
    Unfreeze {
        #[arg(short, long, default_value = "")]
        reason: String,
    },

    /// Execute a queued action once its delay has passed
    Execute { id: String },

    /// Cancel a queued action
    Cancel { id: String },

    /// List emergency actions
    List,
}

#[derive(Subcommand)]
enum AuditCommands {
    /// List audit events
    List {
        #[arg(long)]
        category: Option<Category>,

        #[arg(long)]
        min_severity: Option<Severity>,

        #[arg(long)]
        actor: Option<String>,

        /// Only events correlated with this transaction or action
        #[arg(long)]
        correlation: Option<String>,

        /// Most recent N events
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Recompute the audit hash chain
    Verify,
}

#[derive(Subcommand)]
enum BackupCommands {
    /// List snapshot backups
    List,

    /// Replace the live snapshot with a backup
    Restore {
        /// Backup number (0 is the most recent)
        index: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli::load_config(&cli.config, cli.data_dir.clone())?;

    match cli.command {
        // Init creates the snapshot, so it cannot go through AppState::new
        Commands::Init {
            wallet_id,
            signers,
            required,
            daily_limit,
            single_limit,
            emergency_delay,
            compliance,
        } => {
            let defaults = Policy::default();
            let policy = Policy {
                required_signatures: required.unwrap_or(defaults.required_signatures),
                daily_limit: daily_limit.unwrap_or(defaults.daily_limit),
                single_tx_limit: single_limit.unwrap_or(defaults.single_tx_limit),
                emergency_delay_secs: emergency_delay.unwrap_or(defaults.emergency_delay_secs),
                requires_compliance_check: compliance,
                ..defaults
            };
            let config = EngineConfig {
                wallet_id,
                ..config
            };
            cli::cmd_init(&cli.config, config, signers, policy)
        }

        Commands::Serve { port } => {
            let port = port.unwrap_or(config.api_port);
            run_server(AppState::new(config, None)?, port)
        }

        // Backups operate on the files directly, without opening the engine
        Commands::Backup { action } => match action {
            BackupCommands::List => cli::cmd_backup_list(&config),
            BackupCommands::Restore { index } => cli::cmd_backup_restore(&config, index),
        },

        Commands::Wallet(command) => {
            let state = AppState::new(config, cli.caller.map(Principal::new))?;
            run_wallet_command(&state, command)
        }
    }
}

fn run_wallet_command(
    state: &AppState,
    command: WalletCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        WalletCommands::Info => cli::cmd_info(state)?,
        WalletCommands::Deposit { amount } => cli::cmd_deposit(state, amount)?,
        WalletCommands::Propose { kind, amount, to } => {
            let proposal = cli::build_proposal(kind, amount, Some(to))?;
            cli::cmd_propose(state, proposal)?;
        }
        WalletCommands::Sign { id } => cli::cmd_sign(state, &id)?,
        WalletCommands::Reject { id } => cli::cmd_reject(state, &id)?,
        WalletCommands::Execute { id } => cli::cmd_execute(state, &id)?,
        WalletCommands::Cancel { id } => cli::cmd_cancel(state, &id)?,
        WalletCommands::Tx { id } => cli::cmd_tx_show(state, &id)?,
        WalletCommands::Pending { all } => cli::cmd_tx_list(state, all)?,

        WalletCommands::Signer { action } => match action {
            SignerCommands::List => cli::cmd_signer_list(state)?,
            SignerCommands::Show { identity } => cli::cmd_signer_show(state, &identity)?,
            SignerCommands::Add { identity, role } => {
                cli::cmd_signer_add(state, &identity, role)?
            }
            SignerCommands::Remove { identity } => cli::cmd_signer_remove(state, &identity)?,
        },

        WalletCommands::Policy { action } => match action {
            PolicyCommands::Show { history } => cli::cmd_policy_show(state, history)?,
            PolicyCommands::Update { file } => cli::cmd_policy_update(state, &file)?,
        },

        WalletCommands::Emergency { action } => match action {
            EmergencyCommands::Freeze { reason } => {
                cli::cmd_emergency_initiate(state, true, &reason)?
            }
            EmergencyCommands::Unfreeze { reason } => {
                cli::cmd_emergency_initiate(state, false, &reason)?
            }
            EmergencyCommands::Execute { id } => cli::cmd_emergency_execute(state, &id)?,
            EmergencyCommands::Cancel { id } => cli::cmd_emergency_cancel(state, &id)?,
            EmergencyCommands::List => cli::cmd_emergency_list(state)?,
        },

        WalletCommands::Audit { action } => match action {
            AuditCommands::List {
                category,
                min_severity,
                actor,
                correlation,
                limit,
            } => {
                let query = AuditQuery {
                    category,
                    min_severity,
                    actor,
                    correlation_id: correlation,
                    limit,
                    ..AuditQuery::default()
                };
                cli::cmd_audit_list(state, query)?;
            }
            AuditCommands::Verify => cli::cmd_audit_verify(state)?,
        },

        WalletCommands::Export { output } => cli::cmd_export(state, &output)?,
    }

    Ok(())
}

fn run_server(state: AppState, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let (engine, runtime) = state.into_parts();

    runtime.block_on(async move {
        let ws_broadcaster = Arc::new(WsBroadcaster::new());
        let sink: Arc<dyn AuditSink> = Arc::new(
            FanoutSink::new()
                .with(Arc::new(LogAuditSink))
                .with(ws_broadcaster.clone()),
        );
        let engine = Arc::new(engine.with_audit_sink(sink));

        let info = engine.get_wallet_info().await;
        let app = create_router(ApiState {
            engine,
            ws_broadcaster,
        });

        let addr = format!("0.0.0.0:{}", port);
        println!("🚀 Custody API for wallet {} on http://localhost:{}", info.wallet_id, port);
        println!("   ✍️  Threshold: {}", info.threshold);
        if info.is_frozen {
            println!("   ❄️  Wallet is FROZEN");
        }
        println!();
        println!("📖 Available endpoints:");
        println!("   GET  /health                            - Health check");
        println!("   GET  /ws                                - Live audit events");
        println!("   GET  /api/wallet                        - Wallet info");
        println!("   POST /api/wallet/deposits               - Record deposit");
        println!("   GET  /api/transactions[/pending]        - List transactions");
        println!("   POST /api/transactions                  - Propose");
        println!("   POST /api/transactions/{{id}}/sign        - Sign");
        println!("   POST /api/transactions/{{id}}/reject      - Reject");
        println!("   POST /api/transactions/{{id}}/execute     - Execute");
        println!("   POST /api/transactions/{{id}}/cancel      - Cancel");
        println!("   GET  /api/signers                       - List signers");
        println!("   POST /api/signers                       - Propose add signer");
        println!("   DEL  /api/signers/{{identity}}            - Propose remove signer");
        println!("   GET  /api/policy[/history]              - Policy");
        println!("   PUT  /api/policy                        - Propose policy change");
        println!("   POST /api/emergency/freeze|unfreeze     - Queue emergency action");
        println!("   GET  /api/audit                         - Audit trail");
        println!("   GET  /api/audit/verify                  - Verify audit chain");
        println!();

        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            println!("\n📴 Shutting down custody API...");
            std::process::exit(0);
        });

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    Ok(())
}
