//! Chain persistence layer
//!
//! Saves the node's blocks and parameters as JSON, keeping a rotating set of
//! backups. Indexes and deployment caches are rebuilt on load.

use crate::core::Blockchain;
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
    pub chain_file: String,
    pub backup_enabled: bool,
    pub max_backups: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".versionbits_data"),
            chain_file: "chain.json".to_string(),
            backup_enabled: true,
            max_backups: 5,
        }
    }
}

impl StorageConfig {
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Path of the saved chain
    pub fn chain_path(&self) -> PathBuf {
        self.data_dir.join(&self.chain_file)
    }
}

/// Chain storage manager
pub struct Storage {
    config: StorageConfig,
}

impl Storage {
    /// Create a storage manager, creating the data directory if needed
    pub fn new(config: StorageConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.data_dir)?;
        Ok(Self { config })
    }

    fn chain_path(&self) -> PathBuf {
        self.config.chain_path()
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        self.config
            .data_dir
            .join(format!("{}.backup.{}", self.config.chain_file, index))
    }

    /// Save the chain, moving the previous file into the backups
    pub fn save(&self, blockchain: &Blockchain) -> Result<(), StorageError> {
        let path = self.chain_path();

        if self.config.backup_enabled && self.config.max_backups > 0 && path.exists() {
            self.rotate_backups()?;
            fs::copy(&path, self.backup_path(0))?;
        }

        // Write to temporary file first
        let temp_path = path.with_extension("tmp");
        save_to_file(blockchain, &temp_path)?;

        // Atomic rename
        fs::rename(&temp_path, &path)?;

        log::debug!("Saved chain at height {} to {:?}", blockchain.height(), path);
        Ok(())
    }

    /// Load the chain saved in the data directory
    pub fn load(&self) -> Result<Blockchain, StorageError> {
        let path = self.chain_path();
        if !path.exists() {
            return Err(StorageError::InvalidData(format!(
                "no chain found in {:?}, run init first",
                self.config.data_dir
            )));
        }

        load_from_file(&path)
    }

    pub fn exists(&self) -> bool {
        self.chain_path().exists()
    }

    fn rotate_backups(&self) -> Result<(), StorageError> {
        let oldest = self.backup_path(self.config.max_backups - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }

        for i in (0..self.config.max_backups - 1).rev() {
            let current = self.backup_path(i);
            if current.exists() {
                fs::rename(&current, self.backup_path(i + 1))?;
            }
        }

        Ok(())
    }

    /// Load a backup; 0 is the most recent
    pub fn restore_backup(&self, backup_index: usize) -> Result<Blockchain, StorageError> {
        let backup_path = self.backup_path(backup_index);
        if !backup_path.exists() {
            return Err(StorageError::InvalidData(format!(
                "Backup {} not found",
                backup_index
            )));
        }

        load_from_file(&backup_path)
    }

    pub fn list_backups(&self) -> Vec<usize> {
        (0..self.config.max_backups)
            .filter(|&i| self.backup_path(i).exists())
            .collect()
    }
}

/// Save a chain to a specific file path
pub fn save_to_file(blockchain: &Blockchain, path: &Path) -> Result<(), StorageError> {
    let file = fs::File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), blockchain)?;
    Ok(())
}

/// Load a chain from a specific file path, replaying block acceptance before use
pub fn load_from_file(path: &Path) -> Result<Blockchain, StorageError> {
    let file = fs::File::open(path)?;
    let mut blockchain: Blockchain = serde_json::from_reader(BufReader::new(file))?;

    blockchain
        .params
        .validate()
        .map_err(|e| StorageError::InvalidData(e.to_string()))?;
    blockchain
        .reconnect()
        .map_err(|e| StorageError::InvalidData(e.to_string()))?;

    log::debug!("Loaded chain at height {} from {:?}", blockchain.height(), path);
    Ok(blockchain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Block, ChainParams, ThresholdState};

    fn temp_storage(max_backups: usize) -> (tempfile::TempDir, Storage) {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            max_backups,
            ..StorageConfig::in_dir(temp_dir.path())
        };
        let storage = Storage::new(config).unwrap();
        (temp_dir, storage)
    }

    #[test]
    fn test_save_load_blockchain() {
        let (_dir, storage) = temp_storage(5);
        let mut blockchain = Blockchain::new(ChainParams::regtest());
        blockchain.set_mock_time(Some(1_700_000_000));
        blockchain.generate(150, "miner").unwrap();

        storage.save(&blockchain).unwrap();
        assert!(storage.exists());

        let mut loaded = storage.load().unwrap();
        assert_eq!(loaded.blocks, blockchain.blocks);
        assert_eq!(loaded.params, blockchain.params);

        // Indexes come back
        let hash = blockchain.get_block(10).unwrap().hash.clone();
        assert_eq!(loaded.get_block_by_hash(&hash).unwrap().height(), 10);
        assert_eq!(loaded.deployment_state("csv").unwrap(), ThresholdState::Started);
    }

    #[test]
    fn test_load_missing_chain() {
        let (_dir, storage) = temp_storage(5);
        assert!(matches!(storage.load(), Err(StorageError::InvalidData(_))));
    }

    #[test]
    fn test_load_rejects_broken_linkage() {
        let (dir, _storage) = temp_storage(5);
        let path = dir.path().join("broken.json");

        let mut blockchain = Blockchain::regtest();
        blockchain.set_mock_time(Some(1_700_000_000));
        blockchain.generate(3, "miner").unwrap();
        blockchain.blocks.swap(1, 2);
        save_to_file(&blockchain, &path).unwrap();

        assert!(matches!(load_from_file(&path), Err(StorageError::InvalidData(_))));
    }

    #[test]
    fn test_load_rejects_shifted_genesis() {
        let (dir, _storage) = temp_storage(5);
        let path = dir.path().join("shifted.json");

        let mut blockchain = Blockchain::regtest();
        blockchain.blocks[0].header.height = 1;
        blockchain.blocks[0].rehash();
        save_to_file(&blockchain, &path).unwrap();

        assert!(matches!(load_from_file(&path), Err(StorageError::InvalidData(_))));
    }

    #[test]
    fn test_load_rejects_time_too_old() {
        let (dir, _storage) = temp_storage(5);
        let path = dir.path().join("stale.json");

        let mut blockchain = Blockchain::regtest();
        blockchain.set_mock_time(Some(1_700_000_000));
        blockchain.generate(3, "miner").unwrap();
        // Well linked, but not above the median time past
        let stale = Block::build_on(blockchain.tip(), 0x2000_0000, 1_700_000_000, vec![]);
        blockchain.blocks.push(stale);
        save_to_file(&blockchain, &path).unwrap();

        let err = load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("time-too-old"));
    }

    #[test]
    fn test_custom_chain_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            chain_file: "regtest.json".to_string(),
            ..StorageConfig::in_dir(temp_dir.path())
        };
        assert!(!config.chain_path().exists());

        let storage = Storage::new(config.clone()).unwrap();
        storage.save(&Blockchain::regtest()).unwrap();

        assert_eq!(config.chain_path(), temp_dir.path().join("regtest.json"));
        assert!(config.chain_path().exists());
        assert!(!temp_dir.path().join("chain.json").exists());
        assert!(storage.exists());
        assert_eq!(storage.load().unwrap().height(), 0);
    }

    #[test]
    fn test_backup_rotation() {
        let (_dir, storage) = temp_storage(3);
        let mut blockchain = Blockchain::regtest();
        blockchain.set_mock_time(Some(1_700_000_000));

        for _ in 0..5 {
            storage.save(&blockchain).unwrap();
            blockchain.generate(1, "miner").unwrap();
        }

        assert_eq!(storage.list_backups(), vec![0, 1, 2]);

        // Backup 0 holds the state before the last save
        let restored = storage.restore_backup(0).unwrap();
        assert_eq!(restored.height(), 3);
        assert!(storage.restore_backup(7).is_err());
    }
}
