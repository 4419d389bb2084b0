//! Custody engine
//!
//! [`WalletAggregate`] is the synchronous state machine for one wallet.
//! [`CustodyEngine`] serializes access to it and drives the external
//! collaborators.

pub mod aggregate;
pub mod custody;

pub use aggregate::{WalletAggregate, WalletInfo, WalletState};
pub use custody::{AuditChainStatus, CustodyEngine};
