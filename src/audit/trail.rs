//! Hash-chained audit trail
//!
//! Every event the engine emits is appended here before it is forwarded
//! to the external sink. Each entry commits to the previous entry's hash,
//! so rewriting history breaks [`AuditTrail::verify_chain`].

use crate::crypto::sha256_hex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hash linked to by the first event
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Category {
    Transaction,
    Governance,
    Emergency,
    Funds,
    Access,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "transaction" => Ok(Category::Transaction),
            "governance" => Ok(Category::Governance),
            "emergency" => Ok(Category::Emergency),
            "funds" => Ok(Category::Funds),
            "access" => Ok(Category::Access),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

/// An event before it is sequenced and hashed
#[derive(Clone, Debug)]
pub struct AuditDraft {
    pub severity: Severity,
    pub category: Category,
    pub event_type: String,
    pub actor: String,
    pub details: String,
    pub correlation_id: Option<String>,
}

impl AuditDraft {
    pub fn new(severity: Severity, category: Category, event_type: &str, actor: &str) -> Self {
        Self {
            severity,
            category,
            event_type: event_type.to_string(),
            actor: actor.to_string(),
            details: String::new(),
            correlation_id: None,
        }
    }

    pub fn info(category: Category, event_type: &str, actor: &str) -> Self {
        Self::new(Severity::Info, category, event_type, actor)
    }

    pub fn warning(category: Category, event_type: &str, actor: &str) -> Self {
        Self::new(Severity::Warning, category, event_type, actor)
    }

    pub fn critical(category: Category, event_type: &str, actor: &str) -> Self {
        Self::new(Severity::Critical, category, event_type, actor)
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn correlated(mut self, id: &str) -> Self {
        self.correlation_id = Some(id.to_string());
        self
    }
}

/// A sequenced, hash-linked audit record
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub category: Category,
    pub event_type: String,
    pub actor: String,
    pub details: String,
    pub correlation_id: Option<String>,
    pub previous_hash: String,
    pub hash: String,
}

impl AuditEvent {
    /// Hash over every field except `hash` itself
    pub fn compute_hash(&self) -> String {
        let data = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.sequence,
            self.timestamp.timestamp_nanos_opt().unwrap_or(0),
            self.severity,
            self.category,
            self.event_type,
            self.actor,
            self.details,
            self.correlation_id.as_deref().unwrap_or(""),
            self.previous_hash
        );
        sha256_hex(data.as_bytes())
    }

    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

/// Filter for [`AuditTrail::query`]
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    pub category: Option<Category>,
    pub min_severity: Option<Severity>,
    pub actor: Option<String>,
    pub correlation_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Keep only the most recent N matches
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn for_transaction(tx_id: &str) -> Self {
        Self {
            correlation_id: Some(tx_id.to_string()),
            ..Self::default()
        }
    }

    fn matches(&self, event: &AuditEvent) -> bool {
        self.category.map_or(true, |c| event.category == c)
            && self.min_severity.map_or(true, |s| event.severity >= s)
            && self.actor.as_ref().map_or(true, |a| &event.actor == a)
            && self
                .correlation_id
                .as_ref()
                .map_or(true, |c| event.correlation_id.as_ref() == Some(c))
            && self.since.map_or(true, |t| event.timestamp >= t)
            && self.until.map_or(true, |t| event.timestamp <= t)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditTrail {
    events: Vec<AuditEvent>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head_hash(&self) -> &str {
        self.events
            .last()
            .map(|e| e.hash.as_str())
            .unwrap_or(GENESIS_HASH)
    }

    pub fn append(&mut self, draft: AuditDraft, now: DateTime<Utc>) -> &AuditEvent {
        let mut event = AuditEvent {
            sequence: self.events.len() as u64 + 1,
            timestamp: now,
            severity: draft.severity,
            category: draft.category,
            event_type: draft.event_type,
            actor: draft.actor,
            details: draft.details,
            correlation_id: draft.correlation_id,
            previous_hash: self.head_hash().to_string(),
            hash: String::new(),
        };
        event.hash = event.compute_hash();

        let index = self.events.len();
        self.events.push(event);
        &self.events[index]
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEvent> {
        let matched: Vec<&AuditEvent> = self.events.iter().filter(|e| query.matches(e)).collect();
        let skip = query
            .limit
            .map_or(0, |limit| matched.len().saturating_sub(limit));
        matched.into_iter().skip(skip).cloned().collect()
    }

    /// Sequence number of the first event whose hash or link is wrong
    pub fn first_broken_link(&self) -> Option<u64> {
        let mut previous = GENESIS_HASH;
        for event in &self.events {
            if event.previous_hash != previous || !event.verify_hash() {
                return Some(event.sequence);
            }
            previous = &event.hash;
        }
        None
    }

    /// Recompute every hash and link
    pub fn verify_chain(&self) -> bool {
        self.first_broken_link().is_none()
    }
}
