//! Versioned policy store and daily spend accounting
//!
//! Policies are never edited in place. An executed ChangePolicy
//! transaction appends a new [`PolicyVersion`]; transactions keep the
//! version number they were proposed under.

use crate::clock::day_index;
use crate::error::CustodyError;
use crate::policy::policy::{Policy, PolicyVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outflow accounting for the current day
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DailySpend {
    pub daily_spent: u64,
    pub last_reset_day: i64,
}

impl DailySpend {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            daily_spent: 0,
            last_reset_day: day_index(now),
        }
    }

    /// Reset the counter if the wall-clock day has advanced
    pub fn roll(&mut self, now: DateTime<Utc>) {
        let today = day_index(now);
        if today > self.last_reset_day {
            log::debug!(
                "Daily spend window rolled: day {} -> {}",
                self.last_reset_day,
                today
            );
            self.daily_spent = 0;
            self.last_reset_day = today;
        }
    }

    /// Amount spent today without mutating the counter
    pub fn spent_on(&self, now: DateTime<Utc>) -> u64 {
        if day_index(now) > self.last_reset_day {
            0
        } else {
            self.daily_spent
        }
    }

    pub(crate) fn record(&mut self, amount: u64) {
        self.daily_spent = self.daily_spent.saturating_add(amount);
    }

    pub(crate) fn release(&mut self, amount: u64) {
        self.daily_spent = self.daily_spent.saturating_sub(amount);
    }
}

/// Append-only history of policy revisions
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PolicyStore {
    versions: Vec<PolicyVersion>,
}

impl PolicyStore {
    /// A store with no configured policy; the system default applies
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial(policy: Policy, now: DateTime<Utc>) -> Self {
        let mut store = Self::new();
        store.publish(policy, now, None);
        store
    }

    /// The active policy, or the system default if none was ever set
    pub fn current_policy(&self) -> Policy {
        self.versions
            .last()
            .map(|v| v.policy.clone())
            .unwrap_or_default()
    }

    /// Active revision number; 0 means the system default
    pub fn current_version(&self) -> u32 {
        self.versions.last().map(|v| v.version).unwrap_or(0)
    }

    pub fn version(&self, version: u32) -> Option<&PolicyVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    /// Policy in force at a given revision
    pub fn policy_at(&self, version: u32) -> Policy {
        self.version(version)
            .map(|v| v.policy.clone())
            .unwrap_or_default()
    }

    pub fn history(&self) -> &[PolicyVersion] {
        &self.versions
    }

    /// Check an outflow against the active per-transaction and daily limits
    pub fn validate_limits(
        &self,
        amount: u64,
        spend: &mut DailySpend,
        now: DateTime<Utc>,
    ) -> Result<(), CustodyError> {
        let policy = self.current_policy();
        spend.roll(now);

        if amount > policy.single_tx_limit {
            return Err(CustodyError::PolicyViolation(format!(
                "amount {} exceeds single transaction limit {}",
                amount, policy.single_tx_limit
            )));
        }

        let projected = spend.daily_spent.saturating_add(amount);
        if projected > policy.daily_limit {
            return Err(CustodyError::PolicyViolation(format!(
                "amount {} exceeds remaining daily limit {}",
                amount,
                policy.daily_limit.saturating_sub(spend.daily_spent)
            )));
        }

        Ok(())
    }

    /// Install a new revision; returns its version number
    pub(crate) fn publish(
        &mut self,
        policy: Policy,
        now: DateTime<Utc>,
        installed_by: Option<String>,
    ) -> u32 {
        let version = self.current_version() + 1;
        self.versions.push(PolicyVersion {
            version,
            policy,
            effective_from: now,
            installed_by,
        });
        log::info!("Policy version {} is now active", version);
        version
    }
}
