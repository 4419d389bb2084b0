//! Engine configuration
//!
//! Loaded from a JSON file and then overridden by command-line flags.

use crate::access::{Principal, Role};
use crate::engine::WalletAggregate;
use crate::error::CustodyError;
use crate::policy::Policy;
use crate::storage::{StorageConfig, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub wallet_id: String,
    /// Directory holding the wallet snapshot and its backups
    pub data_dir: PathBuf,
    pub api_port: u16,
    /// Ledger fee charged on every fund movement
    pub transfer_fee: u64,
    /// Upper bound on each compliance or ledger call
    pub external_call_timeout_secs: u64,
    /// Recipients the built-in compliance engine denies
    pub blocked_recipients: Vec<String>,
    pub max_backups: usize,
    /// Used only when no snapshot exists yet
    pub genesis: Option<GenesisConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wallet_id: "vault-main".to_string(),
            data_dir: PathBuf::from(".custody_data"),
            api_port: 3000,
            transfer_fee: 0,
            external_call_timeout_secs: 10,
            blocked_recipients: Vec::new(),
            max_backups: 5,
            genesis: None,
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let raw = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            max_backups: self.max_backups,
            ..StorageConfig::in_dir(&self.data_dir)
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.external_call_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisSigner {
    pub identity: Principal,
    pub role: Role,
}

/// Founding signer set and policy of a new wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub signers: Vec<GenesisSigner>,
    #[serde(default)]
    pub policy: Policy,
}

impl GenesisConfig {
    pub fn build(&self, wallet_id: &str, now: DateTime<Utc>) -> Result<WalletAggregate, CustodyError> {
        let signers = self
            .signers
            .iter()
            .map(|s| (s.identity.clone(), s.role))
            .collect();
        WalletAggregate::genesis(wallet_id, signers, self.policy.clone(), now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custody.json");
        fs::write(
            &path,
            r#"{
                "wallet_id": "vault-ops",
                "genesis": {
                    "signers": [
                        { "identity": "alice", "role": "Owner" },
                        { "identity": "bob", "role": "Signer" }
                    ],
                    "policy": {
                        "required_signatures": 2,
                        "signature_timeout_secs": 3600,
                        "daily_limit": 1000,
                        "single_tx_limit": 500,
                        "emergency_delay_secs": 600
                    }
                }
            }"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.wallet_id, "vault-ops");
        assert_eq!(config.api_port, 3000);

        let wallet = config
            .genesis
            .as_ref()
            .unwrap()
            .build(&config.wallet_id, Utc::now())
            .unwrap();
        assert_eq!(wallet.signers().eligible_count(), 2);
        assert_eq!(wallet.current_policy().single_tx_limit, 500);
        assert!(!wallet.current_policy().requires_compliance_check);
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custody.json");

        let config = EngineConfig {
            transfer_fee: 25,
            ..EngineConfig::default()
        };
        config.save(&path).unwrap();

        assert_eq!(EngineConfig::load(&path).unwrap().transfer_fee, 25);
    }
}
