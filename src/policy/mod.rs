//! Policy store
//!
//! Holds the versioned threshold/limits configuration consulted by every
//! proposal, plus the daily outflow counter it validates against.

pub mod policy;
pub mod store;

pub use policy::{
    Policy, PolicyVersion, DEFAULT_DAILY_LIMIT, DEFAULT_EMERGENCY_DELAY_SECS,
    DEFAULT_REQUIRED_SIGNATURES, DEFAULT_SIGNATURE_TIMEOUT_SECS, DEFAULT_SINGLE_TX_LIMIT,
};
pub use store::{DailySpend, PolicyStore};
