//! Audit trail

pub mod trail;

pub use trail::{AuditDraft, AuditEvent, AuditQuery, AuditTrail, Category, Severity, GENESIS_HASH};
