//! KYC / sanctions gate

use crate::access::Principal;
use crate::external::{relock, ExternalError};
use crate::multisig::TransactionKind;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

/// Yes/no compliance decision for a fund movement
#[async_trait]
pub trait ComplianceEngine: Send + Sync {
    async fn evaluate(
        &self,
        identity: &Principal,
        amount: u64,
        recipient: Option<&str>,
        kind: TransactionKind,
    ) -> Result<bool, ExternalError>;
}

/// Denies a fixed set of recipients and allows everything else
#[derive(Debug, Default)]
pub struct StaticCompliance {
    blocked: Mutex<HashSet<String>>,
    outage: Mutex<Option<String>>,
}

impl StaticCompliance {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn blocking<I, S>(recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            blocked: Mutex::new(recipients.into_iter().map(Into::into).collect()),
            outage: Mutex::new(None),
        }
    }

    pub fn block(&self, recipient: &str) {
        relock(&self.blocked).insert(recipient.to_string());
    }

    /// Report the engine as unreachable until `restore` is called
    pub fn set_outage(&self, reason: &str) {
        *relock(&self.outage) = Some(reason.to_string());
    }

    pub fn restore(&self) {
        *relock(&self.outage) = None;
    }
}

#[async_trait]
impl ComplianceEngine for StaticCompliance {
    async fn evaluate(
        &self,
        identity: &Principal,
        amount: u64,
        recipient: Option<&str>,
        kind: TransactionKind,
    ) -> Result<bool, ExternalError> {
        if let Some(reason) = relock(&self.outage).clone() {
            return Err(ExternalError::Unavailable(reason));
        }

        let cleared = recipient.map_or(true, |r| !relock(&self.blocked).contains(r));
        log::debug!(
            "Compliance {} for {} {} of {} to {:?}",
            if cleared { "cleared" } else { "denied" },
            identity,
            kind,
            amount,
            recipient
        );
        Ok(cleared)
    }
}
