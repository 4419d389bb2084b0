//! Transaction ledger
//!
//! Append-only store of every transaction a wallet has seen. Records are
//! never deleted; they only move forward through the status machine.
//! Expiry is applied lazily when a record is read or touched.

use crate::access::Principal;
use crate::crypto::derive_id;
use crate::error::CustodyError;
use crate::multisig::transaction::{Proposal, Transaction, TransactionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionLedger {
    transactions: BTreeMap<String, Transaction>,
    /// Proposal counter used for ordering and id derivation
    next_sequence: u64,
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new Pending transaction and return its id
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn open(
        &mut self,
        wallet_id: &str,
        proposal: Proposal,
        initiator: &Principal,
        required_signatures: u8,
        policy_version: u32,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> String {
        self.next_sequence += 1;
        let sequence = self.next_sequence;
        let id = derive_id(
            "tx",
            &format!(
                "{}:{}:{}:{}",
                wallet_id,
                sequence,
                initiator,
                now.timestamp_nanos_opt().unwrap_or(0)
            ),
        );

        let tx = Transaction::new(
            id.clone(),
            sequence,
            proposal,
            initiator.clone(),
            required_signatures,
            policy_version,
            now,
            expires_at,
        );

        log::info!(
            "Transaction {} proposed by {}: {} of {} ({} signature(s) required)",
            id,
            initiator,
            tx.kind,
            tx.amount,
            required_signatures
        );
        self.transactions.insert(id.clone(), tx);
        id
    }

    /// Raw stored record, without lazy expiry
    pub fn get(&self, tx_id: &str) -> Option<&Transaction> {
        self.transactions.get(tx_id)
    }

    /// Record as observed at `now`
    pub fn get_observed(&self, tx_id: &str, now: DateTime<Utc>) -> Option<Transaction> {
        self.transactions.get(tx_id).map(|tx| tx.observed(now))
    }

    pub(crate) fn get_mut(&mut self, tx_id: &str) -> Result<&mut Transaction, CustodyError> {
        self.transactions
            .get_mut(tx_id)
            .ok_or_else(|| CustodyError::TransactionNotFound(tx_id.to_string()))
    }

    /// Fetch a record for mutation, persisting an overdue Pending -> Expired
    /// transition first
    pub(crate) fn touch(
        &mut self,
        tx_id: &str,
        now: DateTime<Utc>,
    ) -> Result<&mut Transaction, CustodyError> {
        let tx = self.get_mut(tx_id)?;
        if tx.is_expired_at(now) {
            tx.mark_expired();
            log::info!("Transaction {} expired at {}", tx.id, tx.expires_at);
        }
        Ok(tx)
    }

    /// Pending transactions still inside their signature window
    pub fn pending(&self, now: DateTime<Utc>) -> Vec<Transaction> {
        self.ordered()
            .into_iter()
            .filter(|tx| tx.observed_status(now) == TransactionStatus::Pending)
            .cloned()
            .collect()
    }

    /// Approved transactions whose execution has not committed
    pub fn approved(&self) -> Vec<&Transaction> {
        self.ordered()
            .into_iter()
            .filter(|tx| tx.status == TransactionStatus::Approved)
            .collect()
    }

    /// Every transaction in proposal order
    pub fn ordered(&self) -> Vec<&Transaction> {
        let mut all: Vec<&Transaction> = self.transactions.values().collect();
        all.sort_by_key(|tx| tx.sequence);
        all
    }

    pub fn count(&self) -> usize {
        self.transactions.len()
    }

    /// Transaction counts per observed status
    pub fn status_counts(&self, now: DateTime<Utc>) -> HashMap<TransactionStatus, usize> {
        let mut counts = HashMap::new();
        for tx in self.transactions.values() {
            *counts.entry(tx.observed_status(now)).or_insert(0) += 1;
        }
        counts
    }

    /// Drop in-flight markers left behind by an interrupted process
    pub(crate) fn clear_in_flight(&mut self) {
        for tx in self.transactions.values_mut() {
            tx.in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn open_transfer(ledger: &mut TransactionLedger, now: DateTime<Utc>) -> String {
        ledger.open(
            "vault-1",
            Proposal::transfer("bank", 100),
            &"alice".into(),
            2,
            1,
            now + Duration::hours(1),
            now,
        )
    }

    #[test]
    fn test_ledger_creation() {
        let ledger = TransactionLedger::new();
        assert_eq!(ledger.count(), 0);
        assert!(ledger.pending(Utc::now()).is_empty());
    }

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let mut ledger = TransactionLedger::new();
        let now = Utc::now();

        let first = open_transfer(&mut ledger, now);
        let second = open_transfer(&mut ledger, now);

        assert_ne!(first, second);
        let ordered: Vec<&str> = ledger.ordered().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ordered, vec![first.as_str(), second.as_str()]);
    }

    #[test]
    fn test_touch_applies_lazy_expiry() {
        let mut ledger = TransactionLedger::new();
        let now = Utc::now();
        let id = open_transfer(&mut ledger, now);

        let later = now + Duration::hours(2);
        assert!(ledger.pending(later).is_empty());
        assert_eq!(ledger.get(&id).unwrap().status, TransactionStatus::Pending);

        let tx = ledger.touch(&id, later).unwrap();
        assert_eq!(tx.status, TransactionStatus::Expired);
    }

    #[test]
    fn test_missing_transaction() {
        let mut ledger = TransactionLedger::new();
        assert!(matches!(
            ledger.touch("tx-missing", Utc::now()),
            Err(CustodyError::TransactionNotFound(_))
        ));
    }

    #[test]
    fn test_status_counts() {
        let mut ledger = TransactionLedger::new();
        let now = Utc::now();
        open_transfer(&mut ledger, now);
        open_transfer(&mut ledger, now);

        let counts = ledger.status_counts(now + Duration::hours(2));
        assert_eq!(counts.get(&TransactionStatus::Expired), Some(&2));
    }
}
