//! Multi-party transaction approval
//!
//! Every fund movement and governance change is a [`Transaction`] that
//! needs M approvals from eligible signers, where M is snapshotted from the
//! wallet policy when the transaction is proposed.
//!
//! # Example
//!
//! ```ignore
//! use custody_vault::multisig::Proposal;
//!
//! // Propose a transfer; the proposer's own approval is applied implicitly
//! let tx = engine.propose_transaction(&alice, Proposal::transfer("bank", 250)).await?;
//!
//! // A second signer meets a 2-of-N threshold and the transfer executes
//! let tx = engine.sign_transaction(&bob, &tx.id).await?;
//! assert_eq!(tx.status, TransactionStatus::Executed);
//! ```

pub mod ledger;
pub mod transaction;

pub use ledger::TransactionLedger;
pub use transaction::{
    ActionPayload, ExecutionResult, Proposal, SignatureRecord, Transaction, TransactionKind,
    TransactionStatus,
};
