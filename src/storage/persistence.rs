//! Wallet snapshot persistence
//!
//! The engine writes a full snapshot of the wallet aggregate after every
//! committed mutation. Writes go to a temporary file first and are renamed
//! into place, with the previous snapshots kept as rotating backups.

use crate::engine::WalletAggregate;
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub wallet_file: String,
    pub backup_enabled: bool,
    pub max_backups: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".custody_data"),
            wallet_file: "wallet.json".to_string(),
            backup_enabled: true,
            max_backups: 5,
        }
    }
}

impl StorageConfig {
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }
}

/// Wallet snapshot storage
#[derive(Debug)]
pub struct Storage {
    config: StorageConfig,
}

impl Storage {
    /// Create a new storage manager
    pub fn new(config: StorageConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.data_dir)?;
        Ok(Self { config })
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn wallet_path(&self) -> PathBuf {
        self.config.data_dir.join(&self.config.wallet_file)
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        self.config
            .data_dir
            .join(format!("{}.backup.{}", self.config.wallet_file, index))
    }

    /// Save a wallet snapshot to disk
    pub fn save(&self, wallet: &WalletAggregate) -> Result<(), StorageError> {
        let path = self.wallet_path();

        if self.config.backup_enabled && self.config.max_backups > 0 && path.exists() {
            self.rotate_backups()?;
            fs::copy(&path, self.backup_path(0))?;
        }

        // Write to temporary file first
        let temp_path = self.config.data_dir.join("wallet.tmp");
        let file = fs::File::create(&temp_path)?;
        let writer = BufWriter::new(file);

        serde_json::to_writer_pretty(writer, wallet)?;

        // Atomic rename
        fs::rename(&temp_path, &path)?;

        log::debug!("Wallet snapshot written to {}", path.display());
        Ok(())
    }

    /// Load the wallet snapshot from disk
    pub fn load(&self) -> Result<WalletAggregate, StorageError> {
        let path = self.wallet_path();

        if !path.exists() {
            return Err(StorageError::InvalidData(format!(
                "Wallet snapshot not found in {}",
                self.config.data_dir.display()
            )));
        }

        load_from_file(&path)
    }

    /// Check if a saved wallet exists
    pub fn exists(&self) -> bool {
        self.wallet_path().exists()
    }

    fn rotate_backups(&self) -> Result<(), StorageError> {
        // Delete oldest backup
        let oldest = self.backup_path(self.config.max_backups - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }

        // Shift existing backups
        for i in (0..self.config.max_backups - 1).rev() {
            let current = self.backup_path(i);
            if current.exists() {
                fs::rename(&current, self.backup_path(i + 1))?;
            }
        }

        Ok(())
    }

    /// Restore from a backup; index 0 is the most recent
    pub fn restore_backup(&self, backup_index: usize) -> Result<WalletAggregate, StorageError> {
        let backup_path = self.backup_path(backup_index);

        if !backup_path.exists() {
            return Err(StorageError::InvalidData(format!(
                "Backup {} not found",
                backup_index
            )));
        }

        load_from_file(&backup_path)
    }

    /// List available backups
    pub fn list_backups(&self) -> Vec<usize> {
        (0..self.config.max_backups)
            .filter(|i| self.backup_path(*i).exists())
            .collect()
    }

    /// Get storage statistics
    pub fn stats(&self) -> Result<StorageStats, StorageError> {
        let path = self.wallet_path();

        let file_size = if path.exists() {
            fs::metadata(&path)?.len()
        } else {
            0
        };

        Ok(StorageStats {
            file_size,
            backup_count: self.list_backups().len(),
            data_dir: self.config.data_dir.clone(),
        })
    }
}

/// Storage statistics
#[derive(Debug)]
pub struct StorageStats {
    pub file_size: u64,
    pub backup_count: usize,
    pub data_dir: PathBuf,
}

/// Save a wallet snapshot to a specific file path
pub fn save_to_file(wallet: &WalletAggregate, path: &Path) -> Result<(), StorageError> {
    let file = fs::File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, wallet)?;
    Ok(())
}

/// Load a wallet snapshot from a specific file path
///
/// In-flight execution markers are cleared; approved transactions that
/// were mid-execution come back as retryable.
pub fn load_from_file(path: &Path) -> Result<WalletAggregate, StorageError> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    let wallet: WalletAggregate = serde_json::from_reader(reader)?;
    Ok(wallet.restored())
}
