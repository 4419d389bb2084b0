//! Custody Vault: multi-party transaction authorization for custody wallets
//!
//! This crate provides an authorization engine for institutional custody
//! featuring:
//! - M-of-N signature thresholds over fund movements and governance changes
//! - Role-based signers (Owner, Admin, Signer, Observer, Emergency)
//! - Versioned policies with per-transaction and daily outflow limits
//! - Time-locked emergency freeze and unfreeze
//! - A SHA-256 hash-chained audit trail
//! - Pluggable ledger, compliance and audit-sink collaborators
//! - JSON snapshots with rotating backups, a REST API and a CLI
//!
//! # Example
//!
//! ```rust
//! use custody_vault::{CustodyEngine, Policy, Proposal, Role, WalletAggregate};
//! use chrono::Utc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let wallet = WalletAggregate::genesis(
//!     "vault-main",
//!     vec![("alice".into(), Role::Owner), ("bob".into(), Role::Signer)],
//!     Policy::default(),
//!     Utc::now(),
//! )
//! .unwrap();
//! let engine = CustodyEngine::new(wallet);
//!
//! engine.record_deposit(&"alice".into(), 1_000).await.unwrap();
//!
//! // The proposer's signature counts toward the 2-of-2 threshold
//! let tx = engine
//!     .propose_transaction(&"alice".into(), Proposal::transfer("bank", 400))
//!     .await
//!     .unwrap();
//! let tx = engine.sign_transaction(&"bob".into(), &tx.id).await.unwrap();
//!
//! assert!(tx.execution_result.unwrap().is_success());
//! assert_eq!(engine.get_wallet_info().await.balance, 600);
//! # });
//! ```

pub mod access;
pub mod api;
pub mod audit;
pub mod cli;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod emergency;
pub mod engine;
pub mod error;
pub mod external;
pub mod multisig;
pub mod policy;
pub mod storage;

// Re-export commonly used types
pub use access::{Principal, Role, Signer};
pub use api::{create_router, ApiState};
pub use audit::{AuditEvent, AuditQuery, AuditTrail};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use emergency::{EmergencyAction, EmergencyKind};
pub use engine::{CustodyEngine, WalletAggregate, WalletInfo};
pub use error::CustodyError;
pub use external::{AuditSink, ComplianceEngine, FundsLedger};
pub use multisig::{ExecutionResult, Proposal, Transaction, TransactionKind, TransactionStatus};
pub use policy::Policy;
pub use storage::{Storage, StorageConfig};
