//! Block implementation
//!
//! A block contains a header with the fields the activation and lock-time
//! rules read (version, timestamp, height, parent link) and a list of
//! transactions committed to by a merkle root.

use crate::core::transaction::{Transaction, BLOCK_REWARD};
use crate::crypto::{calculate_merkle_root, double_sha256_hex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of transactions per block
pub const MAX_BLOCK_TXS: usize = 10_000;

/// Recipient of coinbase outputs for blocks built without an explicit payee
pub const DEFAULT_COINBASE_RECIPIENT: &str = "coinbase";

// =============================================================================
// Block Errors
// =============================================================================

/// Block validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("Too many transactions: {0} (max: {1})")]
    TooManyTransactions(usize, usize),
    #[error("Block has no coinbase transaction")]
    MissingCoinbase,
    #[error("Coinbase transaction found at position {0}")]
    MisplacedCoinbase(usize),
    #[error("Invalid merkle root")]
    InvalidMerkleRoot,
    #[error("Invalid block hash")]
    InvalidBlockHash,
    #[error("Malformed transaction: {0}")]
    MalformedTransaction(String),
}

/// Block header
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block version; top bits `001` mark a versionbits-signaling version
    pub version: u32,
    /// Height of this block in the chain
    pub height: u64,
    /// Hash of the previous block
    pub previous_hash: String,
    /// Merkle root of all transactions
    pub merkle_root: String,
    /// Block timestamp (Unix seconds)
    pub timestamp: u32,
}

impl BlockHeader {
    /// Calculate the hash of the block header
    pub fn hash(&self) -> String {
        let data = format!(
            "{}{}{}{}{}",
            self.version, self.height, self.previous_hash, self.merkle_root, self.timestamp
        );
        double_sha256_hex(data.as_bytes())
    }
}

/// A block in the chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    /// Block hash (cached)
    pub hash: String,
    /// Transactions, coinbase first
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create the genesis block
    pub fn genesis(version: u32, timestamp: u32) -> Self {
        let coinbase = Transaction::coinbase(DEFAULT_COINBASE_RECIPIENT, BLOCK_REWARD, 0);
        Self::assemble(version, 0, "0".repeat(64), timestamp, vec![coinbase])
    }

    /// Build a block on top of `prev` paying the reward to the default recipient
    ///
    /// Pure: the same inputs always produce the same block.
    pub fn build_on(
        prev: &BlockHeader,
        version: u32,
        timestamp: u32,
        transactions: Vec<Transaction>,
    ) -> Self {
        Self::build_with_coinbase(prev, version, timestamp, DEFAULT_COINBASE_RECIPIENT, transactions)
    }

    /// Build a block on top of `prev` with a coinbase paying `recipient`
    pub fn build_with_coinbase(
        prev: &BlockHeader,
        version: u32,
        timestamp: u32,
        recipient: &str,
        transactions: Vec<Transaction>,
    ) -> Self {
        let height = prev.height + 1;
        let coinbase = Transaction::coinbase(recipient, BLOCK_REWARD, height);

        let mut all_transactions = Vec::with_capacity(transactions.len() + 1);
        all_transactions.push(coinbase);
        all_transactions.extend(transactions);

        Self::assemble(version, height, prev.hash(), timestamp, all_transactions)
    }

    fn assemble(
        version: u32,
        height: u64,
        previous_hash: String,
        timestamp: u32,
        transactions: Vec<Transaction>,
    ) -> Self {
        let header = BlockHeader {
            version,
            height,
            previous_hash,
            merkle_root: Self::calculate_merkle_root(&transactions),
            timestamp,
        };
        let hash = header.hash();

        Self {
            header,
            hash,
            transactions,
        }
    }

    /// Calculate the merkle root from transactions
    fn calculate_merkle_root(transactions: &[Transaction]) -> String {
        let tx_hashes: Vec<Vec<u8>> = transactions
            .iter()
            .map(|tx| hex::decode(&tx.id).unwrap_or_default())
            .collect();

        hex::encode(calculate_merkle_root(&tx_hashes))
    }

    /// Recompute merkle root and hash after the transaction list changed
    pub fn rehash(&mut self) {
        self.header.merkle_root = Self::calculate_merkle_root(&self.transactions);
        self.hash = self.header.hash();
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Verify the block's merkle root
    pub fn verify_merkle_root(&self) -> bool {
        Self::calculate_merkle_root(&self.transactions) == self.header.merkle_root
    }

    /// Verify the block hash
    pub fn verify_hash(&self) -> bool {
        self.hash == self.header.hash()
    }

    /// Get the coinbase transaction (first transaction)
    pub fn coinbase_tx(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase)
    }

    /// Structural validation (coinbase placement, commitments, hash)
    pub fn validate_structure(&self) -> Result<(), BlockError> {
        let tx_count = self.transactions.len();
        if tx_count > MAX_BLOCK_TXS {
            return Err(BlockError::TooManyTransactions(tx_count, MAX_BLOCK_TXS));
        }

        if self.coinbase_tx().is_none() {
            return Err(BlockError::MissingCoinbase);
        }
        if let Some(pos) = self.transactions.iter().skip(1).position(|tx| tx.is_coinbase) {
            return Err(BlockError::MisplacedCoinbase(pos + 1));
        }

        for tx in self.transactions.iter().skip(1) {
            if !tx.is_valid() {
                return Err(BlockError::MalformedTransaction(tx.id.clone()));
            }
        }

        if !self.verify_merkle_root() {
            return Err(BlockError::InvalidMerkleRoot);
        }

        if !self.verify_hash() {
            return Err(BlockError::InvalidBlockHash);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{TransactionBuilder, COIN};

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis(1, 1_296_688_602);
        assert_eq!(genesis.height(), 0);
        assert_eq!(genesis.header.previous_hash, "0".repeat(64));
        assert!(genesis.validate_structure().is_ok());
    }

    #[test]
    fn test_build_on_links_parent() {
        let genesis = Block::genesis(1, 1_000);
        let block = Block::build_on(&genesis.header, 0x2000_0001, 1_001, vec![]);

        assert_eq!(block.height(), 1);
        assert_eq!(block.header.previous_hash, genesis.hash);
        assert_eq!(block.header.version, 0x2000_0001);
        assert!(block.validate_structure().is_ok());
    }

    #[test]
    fn test_build_on_is_deterministic() {
        let genesis = Block::genesis(1, 1_000);
        let a = Block::build_on(&genesis.header, 4, 1_001, vec![]);
        let b = Block::build_on(&genesis.header, 4, 1_001, vec![]);
        assert_eq!(a, b);

        let c = Block::build_on(&genesis.header, 4, 1_002, vec![]);
        assert_ne!(a.hash, c.hash);
    }

    #[test]
    fn test_merkle_root_verification() {
        let genesis = Block::genesis(1, 1_000);
        let tx = TransactionBuilder::new()
            .add_input(&genesis.transactions[0].id, 0)
            .add_output("addr", COIN)
            .build();
        let mut block = Block::build_on(&genesis.header, 4, 1_001, vec![tx]);
        assert!(block.verify_merkle_root());

        block.transactions[1].lock_time = 5;
        block.transactions[1].rehash();
        assert!(!block.verify_merkle_root());
        assert_eq!(block.validate_structure(), Err(BlockError::InvalidMerkleRoot));

        block.rehash();
        assert!(block.validate_structure().is_ok());
    }

    #[test]
    fn test_block_hash_verification() {
        let mut block = Block::genesis(1, 1_000);
        assert!(block.verify_hash());

        block.header.timestamp += 1;
        assert!(!block.verify_hash());
    }

    #[test]
    fn test_coinbase_placement() {
        let genesis = Block::genesis(1, 1_000);
        let mut block = Block::build_on(&genesis.header, 4, 1_001, vec![]);
        block
            .transactions
            .push(Transaction::coinbase("second", BLOCK_REWARD, 1));
        block.rehash();
        assert_eq!(block.validate_structure(), Err(BlockError::MisplacedCoinbase(1)));

        block.transactions.remove(0);
        block.transactions.remove(0);
        block.rehash();
        assert_eq!(block.validate_structure(), Err(BlockError::MissingCoinbase));
    }
}
