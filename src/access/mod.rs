//! Signer registry and access control
//!
//! Signers carry one role each. `Owner` implicitly passes every role
//! check; only `Owner`, `Admin` and `Signer` may contribute approvals.

pub mod registry;
pub mod signer;

pub use registry::SignerRegistry;
pub use signer::{Principal, Role, Signer};
