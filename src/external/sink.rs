//! Audit event sinks
//!
//! Sinks are fire-and-forget from the engine's point of view: it spawns
//! the `emit` call and only logs a failure.

use crate::audit::AuditEvent;
use crate::external::{relock, ExternalError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, event: &AuditEvent) -> Result<(), ExternalError>;
}

/// Writes each event as a JSON line on the `audit` log target
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn emit(&self, event: &AuditEvent) -> Result<(), ExternalError> {
        let line = serde_json::to_string(event)
            .map_err(|e| ExternalError::Rejected(e.to_string()))?;
        log::info!(target: "audit", "{}", line);
        Ok(())
    }
}

/// Keeps events in memory; used by tests and the CLI
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        relock(&self.events).clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn emit(&self, event: &AuditEvent) -> Result<(), ExternalError> {
        relock(&self.events).push(event.clone());
        Ok(())
    }
}

/// Forwards to several sinks; one failing does not stop the others
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl AuditSink for FanoutSink {
    async fn emit(&self, event: &AuditEvent) -> Result<(), ExternalError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(event).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
