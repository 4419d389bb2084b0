//! Time-locked emergency freeze/unfreeze queue
//!
//! Emergency actions bypass signature counting. Each one waits out the
//! policy's emergency delay between initiation and execution so a single
//! compromised emergency identity cannot halt a wallet without an
//! observable window.

use crate::access::Principal;
use crate::crypto::derive_id;
use crate::error::CustodyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum EmergencyKind {
    Freeze,
    Unfreeze,
}

impl EmergencyKind {
    /// Frozen flag after this action executes
    pub fn target_frozen(self) -> bool {
        matches!(self, EmergencyKind::Freeze)
    }
}

impl fmt::Display for EmergencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum EmergencyStatus {
    Pending,
    Executed,
    Cancelled,
}

impl fmt::Display for EmergencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EmergencyAction {
    pub id: String,
    pub sequence: u64,
    pub kind: EmergencyKind,
    pub initiator: Principal,
    pub created_at: DateTime<Utc>,
    /// Earliest instant the action may execute
    pub execute_at: DateTime<Utc>,
    pub status: EmergencyStatus,
    pub reason: String,
    pub executed_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Principal>,
}

impl EmergencyAction {
    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        self.status == EmergencyStatus::Pending && now >= self.execute_at
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmergencyQueue {
    actions: BTreeMap<String, EmergencyAction>,
    next_sequence: u64,
}

impl EmergencyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enqueue(
        &mut self,
        wallet_id: &str,
        kind: EmergencyKind,
        initiator: &Principal,
        reason: String,
        execute_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> &EmergencyAction {
        self.next_sequence += 1;
        let id = derive_id(
            "em",
            &format!(
                "{}:{}:{}:{}",
                wallet_id,
                self.next_sequence,
                initiator,
                now.timestamp_nanos_opt().unwrap_or(0)
            ),
        );

        let action = EmergencyAction {
            id: id.clone(),
            sequence: self.next_sequence,
            kind,
            initiator: initiator.clone(),
            created_at: now,
            execute_at,
            status: EmergencyStatus::Pending,
            reason,
            executed_at: None,
            resolved_by: None,
        };

        log::warn!(
            "Emergency {} {} initiated by {}; executable at {}",
            kind,
            id,
            initiator,
            action.execute_at
        );
        self.actions.entry(id).or_insert(action)
    }

    pub fn get(&self, id: &str) -> Option<&EmergencyAction> {
        self.actions.get(id)
    }

    fn pending_mut(&mut self, id: &str) -> Result<&mut EmergencyAction, CustodyError> {
        let action = self
            .actions
            .get_mut(id)
            .ok_or_else(|| CustodyError::EmergencyActionNotFound(id.to_string()))?;

        if action.status != EmergencyStatus::Pending {
            return Err(CustodyError::NotPending {
                id: id.to_string(),
                status: action.status.to_string(),
            });
        }
        Ok(action)
    }

    /// Mark a Pending action executed once its delay has elapsed
    pub(crate) fn execute(
        &mut self,
        id: &str,
        by: &Principal,
        now: DateTime<Utc>,
    ) -> Result<&EmergencyAction, CustodyError> {
        let action = self.pending_mut(id)?;

        if now < action.execute_at {
            return Err(CustodyError::TooEarly {
                execute_at: action.execute_at,
            });
        }

        action.status = EmergencyStatus::Executed;
        action.executed_at = Some(now);
        action.resolved_by = Some(by.clone());
        Ok(&*action)
    }

    pub(crate) fn cancel(
        &mut self,
        id: &str,
        by: &Principal,
        now: DateTime<Utc>,
    ) -> Result<&EmergencyAction, CustodyError> {
        let action = self.pending_mut(id)?;
        action.status = EmergencyStatus::Cancelled;
        action.executed_at = Some(now);
        action.resolved_by = Some(by.clone());
        Ok(&*action)
    }

    /// All actions in initiation order
    pub fn list(&self) -> Vec<&EmergencyAction> {
        let mut all: Vec<&EmergencyAction> = self.actions.values().collect();
        all.sort_by_key(|a| a.sequence);
        all
    }

    pub fn pending(&self) -> Vec<&EmergencyAction> {
        self.list()
            .into_iter()
            .filter(|a| a.status == EmergencyStatus::Pending)
            .collect()
    }
}
