//! Principals, roles and signer records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An authenticated caller identity
///
/// The engine treats principals as opaque strings that the upstream
/// identity layer has already verified.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Principal {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Permission tier of a signer
///
/// `Owner > Admin > Signer > Observer` form a hierarchy. `Emergency` sits
/// outside it and only grants access to the emergency queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Owner,
    Admin,
    Signer,
    Observer,
    Emergency,
}

impl Role {
    /// Position in the hierarchy; `None` for the orthogonal emergency role
    fn rank(self) -> Option<u8> {
        match self {
            Role::Owner => Some(3),
            Role::Admin => Some(2),
            Role::Signer => Some(1),
            Role::Observer => Some(0),
            Role::Emergency => None,
        }
    }

    /// Whether holding `self` passes a check for `required`
    ///
    /// Owner passes every check, including the emergency one.
    pub fn satisfies(self, required: Role) -> bool {
        if self == Role::Owner || self == required {
            return true;
        }
        match (self.rank(), required.rank()) {
            (Some(held), Some(needed)) => held >= needed,
            _ => false,
        }
    }

    /// Roles that may contribute approval signatures
    pub fn can_sign(self) -> bool {
        matches!(self, Role::Owner | Role::Admin | Role::Signer)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Signer => "signer",
            Role::Observer => "observer",
            Role::Emergency => "emergency",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "signer" => Ok(Role::Signer),
            "observer" => Ok(Role::Observer),
            "emergency" => Ok(Role::Emergency),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// A role-tagged signer record
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Signer {
    pub identity: Principal,
    pub role: Role,
    /// Removed signers are deactivated, never deleted
    pub active: bool,
    pub joined_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    /// Number of approval signatures contributed
    pub signature_count: u64,
}

impl Signer {
    pub fn new(identity: Principal, role: Role, joined_at: DateTime<Utc>) -> Self {
        Self {
            identity,
            role,
            active: true,
            joined_at,
            last_activity: None,
            signature_count: 0,
        }
    }

    /// Active and holding a signing-capable role
    pub fn is_eligible(&self) -> bool {
        self.active && self.role.can_sign()
    }
}
