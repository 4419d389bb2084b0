//! Wallet policy values

use crate::error::CustodyError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default approvals required when no policy has been configured
pub const DEFAULT_REQUIRED_SIGNATURES: u8 = 2;
/// Default signature collection window (72 hours)
pub const DEFAULT_SIGNATURE_TIMEOUT_SECS: i64 = 72 * 60 * 60;
/// Default emergency time-lock (1 hour)
pub const DEFAULT_EMERGENCY_DELAY_SECS: i64 = 60 * 60;
/// Default daily outflow limit (100 BTC in satoshis)
pub const DEFAULT_DAILY_LIMIT: u64 = 10_000_000_000;
/// Default per-transaction limit (10 BTC in satoshis)
pub const DEFAULT_SINGLE_TX_LIMIT: u64 = 1_000_000_000;
/// Longest accepted signature window or emergency delay (365 days)
pub const MAX_WINDOW_SECS: i64 = 365 * 24 * 60 * 60;

/// Thresholds, limits and timeouts governing a wallet
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    /// Distinct approvals needed before a transaction executes
    pub required_signatures: u8,
    pub signature_timeout_secs: i64,
    pub daily_limit: u64,
    pub single_tx_limit: u64,
    pub emergency_delay_secs: i64,
    /// When non-empty, outflows may only go to these recipients
    #[serde(default)]
    pub allowed_destinations: BTreeSet<String>,
    /// Outflows to these recipients are always refused
    #[serde(default)]
    pub blocked_destinations: BTreeSet<String>,
    #[serde(default)]
    pub requires_compliance_check: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            required_signatures: DEFAULT_REQUIRED_SIGNATURES,
            signature_timeout_secs: DEFAULT_SIGNATURE_TIMEOUT_SECS,
            daily_limit: DEFAULT_DAILY_LIMIT,
            single_tx_limit: DEFAULT_SINGLE_TX_LIMIT,
            emergency_delay_secs: DEFAULT_EMERGENCY_DELAY_SECS,
            allowed_destinations: BTreeSet::new(),
            blocked_destinations: BTreeSet::new(),
            requires_compliance_check: false,
        }
    }
}

impl Policy {
    /// When a transaction proposed at `now` stops accepting signatures
    pub fn signature_deadline(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, CustodyError> {
        offset(now, self.signature_timeout_secs, "signature_timeout_secs")
    }

    /// Earliest execution time of an emergency action initiated at `now`
    pub fn emergency_deadline(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, CustodyError> {
        offset(now, self.emergency_delay_secs, "emergency_delay_secs")
    }

    /// Check internal consistency against the number of eligible signers
    pub fn validate(&self, eligible_signers: usize) -> Result<(), CustodyError> {
        if self.required_signatures == 0 {
            return Err(CustodyError::InvalidConfiguration(
                "required_signatures must be at least 1".to_string(),
            ));
        }
        if self.required_signatures as usize > eligible_signers {
            return Err(CustodyError::InvalidConfiguration(format!(
                "required_signatures {} exceeds eligible signer count {}",
                self.required_signatures, eligible_signers
            )));
        }
        if self.signature_timeout_secs <= 0 || self.emergency_delay_secs < 0 {
            return Err(CustodyError::InvalidConfiguration(
                "timeouts must be positive".to_string(),
            ));
        }
        if self.signature_timeout_secs > MAX_WINDOW_SECS
            || self.emergency_delay_secs > MAX_WINDOW_SECS
        {
            return Err(CustodyError::InvalidConfiguration(format!(
                "timeouts may not exceed {} seconds",
                MAX_WINDOW_SECS
            )));
        }
        if self.single_tx_limit > self.daily_limit {
            return Err(CustodyError::InvalidConfiguration(format!(
                "single_tx_limit {} exceeds daily_limit {}",
                self.single_tx_limit, self.daily_limit
            )));
        }
        Ok(())
    }

    /// Check a recipient against the allow and deny lists
    pub fn check_destination(&self, recipient: &str) -> Result<(), CustodyError> {
        if self.blocked_destinations.contains(recipient) {
            return Err(CustodyError::PolicyViolation(format!(
                "destination {} is blocked",
                recipient
            )));
        }
        if !self.allowed_destinations.is_empty() && !self.allowed_destinations.contains(recipient)
        {
            return Err(CustodyError::PolicyViolation(format!(
                "destination {} is not in the allow-list",
                recipient
            )));
        }
        Ok(())
    }

    /// Human-readable threshold, e.g. "2-of-3"
    pub fn description(&self, eligible_signers: usize) -> String {
        format!("{}-of-{}", self.required_signatures, eligible_signers)
    }
}

fn offset(now: DateTime<Utc>, secs: i64, field: &str) -> Result<DateTime<Utc>, CustodyError> {
    Duration::try_seconds(secs)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| {
            CustodyError::InvalidConfiguration(format!("{} {} is out of range", field, secs))
        })
}

/// An immutable, timestamped policy revision
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PolicyVersion {
    /// Monotonic revision number, starting at 1
    pub version: u32,
    pub policy: Policy,
    pub effective_from: DateTime<Utc>,
    /// Transaction that installed this revision (`None` at genesis)
    pub installed_by: Option<String>,
}
