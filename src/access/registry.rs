//! Signer registry
//!
//! Holds every signer ever enrolled in a wallet and answers authorization
//! questions. Mutation is crate-internal: signers change only when an
//! AddSigner/RemoveSigner transaction executes (or at wallet genesis).

use crate::access::signer::{Principal, Role, Signer};
use crate::error::CustodyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignerRegistry {
    signers: BTreeMap<Principal, Signer>,
}

impl SignerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a signer record (active or not)
    pub fn get_signer(&self, identity: &Principal) -> Option<&Signer> {
        self.signers.get(identity)
    }

    /// Whether `identity` is an active signer whose role passes `role`
    pub fn has_role(&self, identity: &Principal, role: Role) -> bool {
        self.signers
            .get(identity)
            .map(|s| s.active && s.role.satisfies(role))
            .unwrap_or(false)
    }

    /// Whether `identity` may contribute approval signatures
    pub fn can_sign(&self, identity: &Principal) -> bool {
        self.signers
            .get(identity)
            .map(Signer::is_eligible)
            .unwrap_or(false)
    }

    /// Fail with `Unauthorized` unless `identity` holds `role`
    pub fn require_role(&self, identity: &Principal, role: Role) -> Result<(), CustodyError> {
        if self.has_role(identity, role) {
            Ok(())
        } else {
            Err(CustodyError::Unauthorized {
                identity: identity.to_string(),
                required: role.to_string(),
            })
        }
    }

    /// Fail with `Unauthorized` unless `identity` may sign
    pub fn require_signer(&self, identity: &Principal) -> Result<(), CustodyError> {
        if self.can_sign(identity) {
            Ok(())
        } else {
            Err(CustodyError::Unauthorized {
                identity: identity.to_string(),
                required: "sign".to_string(),
            })
        }
    }

    /// All signer records, including deactivated ones
    pub fn all(&self) -> impl Iterator<Item = &Signer> {
        self.signers.values()
    }

    pub fn active(&self) -> impl Iterator<Item = &Signer> {
        self.signers.values().filter(|s| s.active)
    }

    /// Number of active signers able to approve transactions
    pub fn eligible_count(&self) -> usize {
        self.signers.values().filter(|s| s.is_eligible()).count()
    }

    pub fn active_owner_count(&self) -> usize {
        self.active().filter(|s| s.role == Role::Owner).count()
    }

    /// Check that `identity` can be enrolled with `role`
    pub fn check_enrollment(&self, identity: &Principal) -> Result<(), CustodyError> {
        match self.signers.get(identity) {
            Some(existing) if existing.active => Err(CustodyError::InvalidPayload(format!(
                "{} is already an active {}",
                identity, existing.role
            ))),
            _ => Ok(()),
        }
    }

    /// Check that removing `identity` keeps the wallet governable
    pub fn check_removal(
        &self,
        identity: &Principal,
        required_signatures: u8,
    ) -> Result<(), CustodyError> {
        let target = self
            .signers
            .get(identity)
            .filter(|s| s.active)
            .ok_or_else(|| CustodyError::SignerNotFound(identity.to_string()))?;

        if target.role == Role::Owner && self.active_owner_count() <= 1 {
            return Err(CustodyError::InvalidPayload(
                "cannot remove the last active owner".to_string(),
            ));
        }

        let remaining = self.eligible_count() - usize::from(target.is_eligible());
        if remaining < required_signatures as usize {
            return Err(CustodyError::InvalidPayload(format!(
                "removal leaves {} eligible signers, policy requires {}",
                remaining, required_signatures
            )));
        }

        Ok(())
    }

    /// Enroll a new signer or reactivate a removed one
    pub(crate) fn enroll(
        &mut self,
        identity: Principal,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<&Signer, CustodyError> {
        self.check_enrollment(&identity)?;

        let signer = self
            .signers
            .entry(identity.clone())
            .and_modify(|s| {
                s.role = role;
                s.active = true;
                s.last_activity = Some(now);
            })
            .or_insert_with(|| Signer::new(identity, role, now));

        Ok(&*signer)
    }

    /// Deactivate a signer; the record is kept for audit
    pub(crate) fn deactivate(
        &mut self,
        identity: &Principal,
        required_signatures: u8,
    ) -> Result<&Signer, CustodyError> {
        self.check_removal(identity, required_signatures)?;

        let signer = self
            .signers
            .get_mut(identity)
            .ok_or_else(|| CustodyError::SignerNotFound(identity.to_string()))?;
        signer.active = false;
        Ok(&*signer)
    }

    /// Bump activity counters after a signature
    pub(crate) fn record_signature(&mut self, identity: &Principal, now: DateTime<Utc>) {
        if let Some(signer) = self.signers.get_mut(identity) {
            signer.signature_count += 1;
            signer.last_activity = Some(now);
        }
    }

    pub(crate) fn record_activity(&mut self, identity: &Principal, now: DateTime<Utc>) {
        if let Some(signer) = self.signers.get_mut(identity) {
            signer.last_activity = Some(now);
        }
    }
}
