//! Blockchain implementation
//!
//! An in-memory regtest-style node: a single linear chain of blocks, validated
//! with the versionbits and lock-time rules as they are submitted. Proof of
//! work and reorganisations are not modelled.

use crate::core::block::{Block, BlockError, BlockHeader};
use crate::core::chain_state::{BlockStatus, ChainStateError, HeaderChain};
use crate::core::params::ChainParams;
use crate::core::transaction::{Transaction, TransactionError};
use crate::core::validation::{LockTimeReference, LockTimeValidator, PrevoutLock};
use crate::core::versionbits::{
    compute_block_version, window_statistics, Deployment, ThresholdState, VersionBitsCache,
    VersionBitsError, WindowStatistics,
};
use crate::crypto::sha256_hex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Blockchain-related errors
#[derive(Error, Debug)]
pub enum BlockchainError {
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Block structure: {0}")]
    Structure(#[from] BlockError),
    #[error(transparent)]
    Chain(#[from] ChainStateError),
    #[error(transparent)]
    VersionBits(#[from] VersionBitsError),
    #[error("Non-final transaction {tx_id}: {source}")]
    NonFinalTransaction {
        tx_id: String,
        #[source]
        source: TransactionError,
    },
    #[error("Transaction not found: {0}")]
    UnknownTransaction(String),
    #[error("Block not found: {0}")]
    BlockNotFound(String),
}

/// Where a transaction was confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TxLocation {
    height: u64,
    position: usize,
}

/// The node's chain and everything derived from it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blockchain {
    pub params: ChainParams,
    /// The chain of blocks, indexed by height
    pub blocks: Vec<Block>,
    /// Version for generated blocks; computed from deployment states if unset
    #[serde(default)]
    pub block_version: Option<u32>,
    /// Counter behind generated addresses
    #[serde(default)]
    address_counter: u64,
    /// Fixed "now" for generated blocks
    #[serde(skip)]
    mock_time: Option<u32>,
    #[serde(skip)]
    block_index: HashMap<String, u64>,
    #[serde(skip)]
    tx_index: HashMap<String, TxLocation>,
    #[serde(skip)]
    versionbits: VersionBitsCache,
}

impl Blockchain {
    /// Create a new chain holding only the genesis block
    pub fn new(params: ChainParams) -> Self {
        let genesis = Block::genesis(params.genesis_version, params.genesis_time);
        let mut blockchain = Self {
            params,
            blocks: vec![genesis],
            block_version: None,
            address_counter: 0,
            mock_time: None,
            block_index: HashMap::new(),
            tx_index: HashMap::new(),
            versionbits: VersionBitsCache::new(),
        };
        blockchain.rebuild_indexes();
        blockchain
    }

    /// Create a regtest chain
    pub fn regtest() -> Self {
        Self::new(ChainParams::regtest())
    }

    /// Get the latest block
    pub fn latest_block(&self) -> &Block {
        // The genesis block is never removed
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn tip(&self) -> &BlockHeader {
        &self.latest_block().header
    }

    /// Get blockchain height
    pub fn height(&self) -> u64 {
        self.blocks.len() as u64 - 1
    }

    /// Get a block by height
    pub fn get_block(&self, height: u64) -> Option<&Block> {
        self.blocks.get(height as usize)
    }

    /// Get a block by hash
    pub fn get_block_by_hash(&self, hash: &str) -> Option<&Block> {
        self.block_index
            .get(hash)
            .and_then(|&height| self.get_block(height))
    }

    /// Find a confirmed transaction and the height it was confirmed at
    pub fn find_transaction(&self, tx_id: &str) -> Option<(&Transaction, u64)> {
        let location = self.tx_index.get(tx_id)?;
        let block = self.get_block(location.height)?;
        block
            .transactions
            .get(location.position)
            .map(|tx| (tx, location.height))
    }

    /// Pin the clock used for generated blocks
    pub fn set_mock_time(&mut self, time: Option<u32>) {
        self.mock_time = time;
    }

    fn now(&self) -> u32 {
        self.mock_time
            .unwrap_or_else(|| chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32)
    }

    /// Median time past of the block at `height`
    pub fn median_time_past(&self, height: u64) -> Result<u32, ChainStateError> {
        self.blocks.as_slice().median_time_past(height)
    }

    // =========================================================================
    // Deployments
    // =========================================================================

    /// State of a deployment for the block at `height` (at most tip + 1)
    pub fn deployment_state_at(
        &mut self,
        deployment: &Deployment,
        height: u64,
    ) -> Result<ThresholdState, VersionBitsError> {
        self.versionbits
            .state_for(self.blocks.as_slice(), deployment, height)
    }

    /// State of the named deployment for the next block
    pub fn deployment_state(&mut self, name: &str) -> Result<ThresholdState, VersionBitsError> {
        let deployment = self.params.deployment(name)?.clone();
        let next = self.height() + 1;
        self.deployment_state_at(&deployment, next)
    }

    /// Signaling progress of the named deployment in the current window
    pub fn deployment_statistics(&self, name: &str) -> Result<WindowStatistics, VersionBitsError> {
        let deployment = self.params.deployment(name)?;
        window_statistics(self.blocks.as_slice(), deployment, self.height())
    }

    /// Version used for the next generated block
    pub fn next_block_version(&mut self) -> Result<u32, VersionBitsError> {
        if let Some(version) = self.block_version {
            return Ok(version);
        }
        let next = self.height() + 1;
        compute_block_version(
            self.blocks.as_slice(),
            &self.params.deployments,
            &mut self.versionbits,
            next,
        )
    }

    // =========================================================================
    // Block Acceptance
    // =========================================================================

    /// Validate a block against the tip and append it
    pub fn add_block(&mut self, block: Block) -> Result<(), BlockchainError> {
        self.validate_block(&block)?;

        let height = block.height();
        self.index_block(&block);
        self.blocks.push(block);

        log::debug!("Connected block {} at height {}", self.latest_block().hash, height);
        Ok(())
    }

    /// Submit a block; rejection is reported, not raised
    pub fn submit_block(&mut self, block: Block) -> BlockStatus {
        if self.block_index.contains_key(&block.hash) {
            return BlockStatus::Duplicate;
        }

        let hash = block.hash.clone();
        match self.add_block(block) {
            Ok(()) => BlockStatus::AddedToMainChain,
            Err(e) => {
                log::warn!("Rejected block {}: {}", hash, e);
                BlockStatus::Invalid(e.to_string())
            }
        }
    }

    /// Mine `count` trivial blocks on the tip
    pub fn generate(&mut self, count: u32, recipient: &str) -> Result<Vec<String>, BlockchainError> {
        let mut hashes = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let version = self.next_block_version()?;
            let min_time = self.median_time_past(self.height())? + 1;
            let timestamp = self.now().max(min_time);

            let block = Block::build_with_coinbase(self.tip(), version, timestamp, recipient, vec![]);
            hashes.push(block.hash.clone());
            self.add_block(block)?;
        }

        log::info!("Generated {} block(s), height is now {}", count, self.height());
        Ok(hashes)
    }

    fn validate_block(&mut self, block: &Block) -> Result<(), BlockchainError> {
        block.validate_structure()?;

        let tip = self.tip();
        let height = tip.height + 1;
        if block.header.height != height {
            return Err(ChainStateError::malformed(
                block.header.height,
                format!("expected height {}", height),
            )
            .into());
        }
        if block.header.previous_hash != self.latest_block().hash {
            return Err(ChainStateError::malformed(height, "previous hash does not match the tip").into());
        }

        let prev_median_time_past = self.median_time_past(tip.height)?;
        if block.header.timestamp <= prev_median_time_past {
            return Err(BlockchainError::InvalidBlock(format!(
                "time-too-old: {} <= median time past {}",
                block.header.timestamp, prev_median_time_past
            )));
        }

        let deployment = self.params.lock_time_deployment()?.clone();
        let state = self.deployment_state_at(&deployment, height)?;
        let validator = LockTimeValidator::new(state);
        let reference = LockTimeReference {
            height,
            block_time: block.header.timestamp,
            prev_median_time_past,
        };

        log::debug!(
            "Validating block at height {} with {} deployment {} ({:?} lock-times)",
            height,
            deployment.name,
            state,
            validator.enforcement()
        );

        // Transactions may spend outputs created earlier in the same block
        let mut in_block: HashSet<&str> = HashSet::new();
        for tx in &block.transactions {
            if !tx.is_coinbase {
                let prevouts = self.prevout_locks(tx, height, prev_median_time_past, &in_block)?;
                validator
                    .check_transaction(tx, &reference, &prevouts)
                    .map_err(|source| BlockchainError::NonFinalTransaction {
                        tx_id: tx.id.clone(),
                        source,
                    })?;
            }
            in_block.insert(tx.id.as_str());
        }

        Ok(())
    }

    /// Confirmation points of the coins `tx` spends
    fn prevout_locks(
        &self,
        tx: &Transaction,
        height: u64,
        prev_median_time_past: u32,
        in_block: &HashSet<&str>,
    ) -> Result<Vec<PrevoutLock>, BlockchainError> {
        tx.inputs
            .iter()
            .map(|input| {
                if in_block.contains(input.prev_tx_id.as_str()) {
                    return Ok(PrevoutLock {
                        height,
                        median_time_past: prev_median_time_past,
                    });
                }

                let location = self
                    .tx_index
                    .get(&input.prev_tx_id)
                    .ok_or_else(|| BlockchainError::UnknownTransaction(input.prev_tx_id.clone()))?;
                let median_time_past = self.median_time_past(location.height.saturating_sub(1))?;
                Ok(PrevoutLock {
                    height: location.height,
                    median_time_past,
                })
            })
            .collect()
    }

    fn index_block(&mut self, block: &Block) {
        let height = block.height();
        self.block_index.insert(block.hash.clone(), height);
        for (position, tx) in block.transactions.iter().enumerate() {
            self.tx_index
                .insert(tx.id.clone(), TxLocation { height, position });
        }
    }

    /// Rebuild hash/transaction indexes from the blocks (after loading)
    pub fn rebuild_indexes(&mut self) {
        self.block_index.clear();
        self.tx_index.clear();
        self.versionbits.clear();

        let blocks = std::mem::take(&mut self.blocks);
        for block in &blocks {
            self.index_block(block);
        }
        self.blocks = blocks;
    }

    /// Re-run block acceptance over the stored blocks, rebuilding every index
    ///
    /// The first block must sit at height 0; each later block is validated
    /// against the chain before it, as `add_block` would.
    pub fn reconnect(&mut self) -> Result<(), BlockchainError> {
        let mut blocks = std::mem::take(&mut self.blocks).into_iter();
        let genesis = blocks
            .next()
            .ok_or_else(|| BlockchainError::InvalidBlock("chain has no genesis block".to_string()))?;
        if genesis.height() != 0 {
            return Err(ChainStateError::malformed(genesis.height(), "genesis block must be at height 0").into());
        }
        genesis.validate_structure()?;

        self.blocks = vec![genesis];
        self.rebuild_indexes();
        for block in blocks {
            self.add_block(block)?;
        }

        log::debug!("Reconnected {} block(s)", self.height());
        Ok(())
    }

    /// Remove every block above `height`
    pub fn truncate(&mut self, height: u64) {
        if height >= self.height() {
            return;
        }

        for block in self.blocks.drain(height as usize + 1..) {
            self.block_index.remove(&block.hash);
            for tx in &block.transactions {
                self.tx_index.remove(&tx.id);
            }
        }
        self.versionbits.invalidate_from(height + 1);

        log::info!("Truncated chain to height {}", height);
    }

    /// Validate the linkage of the whole chain
    pub fn is_valid(&self) -> bool {
        self.blocks.windows(2).all(|pair| {
            let (previous, current) = (&pair[0], &pair[1]);
            current.header.previous_hash == previous.hash
                && current.header.height == previous.header.height + 1
                && current.validate_structure().is_ok()
        })
    }

    /// Generate a fresh receiving address
    pub fn new_address(&mut self) -> String {
        self.address_counter += 1;
        let hash = sha256_hex(format!("{}:address:{}", self.params.network, self.address_counter).as_bytes());
        format!("1{}", &hash[..39])
    }

    /// Get chain statistics
    pub fn stats(&self) -> Result<ChainStats, ChainStateError> {
        let total_transactions: usize = self.blocks.iter().map(|b| b.transactions.len()).sum();

        Ok(ChainStats {
            height: self.height(),
            total_transactions: total_transactions as u64,
            median_time_past: self.median_time_past(self.height())?,
            latest_hash: self.latest_block().hash.clone(),
        })
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::regtest()
    }
}

/// Chain statistics
#[derive(Debug, Clone)]
pub struct ChainStats {
    pub height: u64,
    pub total_transactions: u64,
    pub median_time_past: u32,
    pub latest_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{TransactionBuilder, COIN};
    use crate::core::versionbits::VERSIONBITS_LAST_OLD_BLOCK_VERSION;

    const T0: u32 = 1_700_000_000;

    fn node() -> Blockchain {
        let mut chain = Blockchain::regtest();
        chain.set_mock_time(Some(T0));
        chain
    }

    fn build_next(chain: &Blockchain, version: u32, txs: Vec<Transaction>) -> Block {
        Block::build_on(chain.tip(), version, chain.tip().timestamp.max(T0) + 1, txs)
    }

    #[test]
    fn test_new_blockchain() {
        let chain = node();
        assert_eq!(chain.height(), 0);
        assert!(chain.is_valid());
        assert_eq!(chain.get_block_by_hash(&chain.latest_block().hash).unwrap().height(), 0);
    }

    #[test]
    fn test_generate_blocks() {
        let mut chain = node();
        let hashes = chain.generate(3, "miner").unwrap();

        assert_eq!(hashes.len(), 3);
        assert_eq!(chain.height(), 3);
        assert_eq!(chain.latest_block().hash, hashes[2]);
        assert!(chain.is_valid());

        // Coinbases are indexed
        let coinbase = &chain.get_block(2).unwrap().transactions[0];
        assert_eq!(chain.find_transaction(&coinbase.id).unwrap().1, 2);
    }

    #[test]
    fn test_generated_version_signals_started_deployments() {
        let mut chain = node();
        chain.generate(1, "miner").unwrap();
        // Genesis window: nothing started
        assert_eq!(chain.latest_block().header.version, 0x2000_0000);

        chain.generate(143, "miner").unwrap();
        assert_eq!(chain.deployment_state("csv").unwrap(), ThresholdState::Started);
        chain.generate(1, "miner").unwrap();
        // csv (bit 0) and testdummy (bit 28) both signal
        assert_eq!(chain.latest_block().header.version, 0x3000_0001);

        chain.block_version = Some(VERSIONBITS_LAST_OLD_BLOCK_VERSION);
        chain.generate(1, "miner").unwrap();
        assert_eq!(chain.latest_block().header.version, VERSIONBITS_LAST_OLD_BLOCK_VERSION);
    }

    #[test]
    fn test_zero_period_deployment_is_an_error() {
        let mut params = ChainParams::regtest();
        for deployment in params.deployments.iter_mut().filter(|d| d.name == "csv") {
            deployment.period = 0;
        }
        let mut chain = Blockchain::new(params);
        chain.set_mock_time(Some(T0));

        assert!(matches!(
            chain.deployment_state("csv"),
            Err(VersionBitsError::InvalidDeployment { .. })
        ));
        assert!(chain.deployment_statistics("csv").is_err());
        assert!(chain.generate(1, "miner").is_err());

        let block = build_next(&chain, 0x2000_0000, vec![]);
        assert!(matches!(chain.submit_block(block), BlockStatus::Invalid(_)));
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn test_unknown_deployment_status() {
        let mut chain = node();
        assert!(matches!(
            chain.deployment_state("segwit"),
            Err(VersionBitsError::UnknownDeployment(_))
        ));
    }

    #[test]
    fn test_submit_rejects_bad_links() {
        let mut chain = node();
        let mut block = build_next(&chain, 4, vec![]);
        block.header.previous_hash = "f".repeat(64);
        block.rehash();

        assert!(matches!(chain.submit_block(block), BlockStatus::Invalid(_)));
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn test_submit_duplicate() {
        let mut chain = node();
        let block = build_next(&chain, 4, vec![]);
        assert_eq!(chain.submit_block(block.clone()), BlockStatus::AddedToMainChain);
        assert_eq!(chain.submit_block(block), BlockStatus::Duplicate);
    }

    #[test]
    fn test_time_too_old_rejected() {
        let mut chain = node();
        chain.generate(5, "miner").unwrap();
        let mtp = chain.median_time_past(chain.height()).unwrap();

        let block = Block::build_on(chain.tip(), 4, mtp, vec![]);
        let status = chain.submit_block(block);
        assert!(matches!(status, BlockStatus::Invalid(ref reason) if reason.contains("time-too-old")));
    }

    #[test]
    fn test_unknown_input_rejected() {
        let mut chain = node();
        let tx = TransactionBuilder::new()
            .add_input(&"a".repeat(64), 0)
            .add_output("addr", COIN)
            .build();
        let block = build_next(&chain, 4, vec![tx]);
        assert!(matches!(
            chain.add_block(block),
            Err(BlockchainError::UnknownTransaction(_))
        ));
    }

    #[test]
    fn test_non_final_height_lock_rejected() {
        let mut chain = node();
        let hashes = chain.generate(2, "miner").unwrap();
        let coinbase_id = chain.get_block_by_hash(&hashes[0]).unwrap().transactions[0].id.clone();

        // Height 3 block cannot include a tx locked until after height 3
        let tx = TransactionBuilder::new()
            .add_input_with_sequence(&coinbase_id, 0, 0)
            .add_output("addr", COIN)
            .raw_lock_time(3)
            .build();
        let block = build_next(&chain, 4, vec![tx.clone()]);
        assert!(matches!(
            chain.add_block(block),
            Err(BlockchainError::NonFinalTransaction { .. })
        ));

        chain.generate(1, "miner").unwrap();
        let block = build_next(&chain, 4, vec![tx]);
        assert_eq!(chain.submit_block(block), BlockStatus::AddedToMainChain);
    }

    #[test]
    fn test_spend_within_same_block() {
        let mut chain = node();
        let hashes = chain.generate(1, "miner").unwrap();
        let coinbase_id = chain.get_block_by_hash(&hashes[0]).unwrap().transactions[0].id.clone();

        let parent = TransactionBuilder::new()
            .add_input(&coinbase_id, 0)
            .add_output("a", COIN)
            .build();
        let child = TransactionBuilder::new()
            .add_input(&parent.id, 0)
            .add_output("b", COIN)
            .build();
        let block = build_next(&chain, 4, vec![parent, child]);
        assert_eq!(chain.submit_block(block), BlockStatus::AddedToMainChain);
    }

    #[test]
    fn test_truncate_invalidates_indexes() {
        let mut chain = node();
        let hashes = chain.generate(4, "miner").unwrap();
        chain.truncate(2);

        assert_eq!(chain.height(), 2);
        assert!(chain.get_block_by_hash(&hashes[3]).is_none());
        assert!(chain.get_block_by_hash(&hashes[1]).is_some());

        chain.generate(1, "miner").unwrap();
        assert_eq!(chain.height(), 3);
    }

    #[test]
    fn test_reconnect_replays_acceptance() {
        let mut chain = node();
        chain.generate(5, "miner").unwrap();
        let blocks = chain.blocks.clone();

        chain.reconnect().unwrap();
        assert_eq!(chain.blocks, blocks);
        let coinbase = &chain.get_block(4).unwrap().transactions[0];
        assert_eq!(chain.find_transaction(&coinbase.id).unwrap().1, 4);

        // A genesis block away from height 0 is refused
        let mut shifted = node();
        shifted.blocks[0].header.height = 1;
        shifted.blocks[0].rehash();
        assert!(shifted.reconnect().is_err());

        // Linkage holds, but the block is older than the median time past
        let mut stale = node();
        stale.generate(3, "miner").unwrap();
        let old = Block::build_on(stale.tip(), 0x2000_0000, stale.blocks[0].header.timestamp, vec![]);
        stale.blocks.push(old);
        assert!(stale.is_valid());
        assert!(matches!(stale.reconnect(), Err(BlockchainError::InvalidBlock(_))));
    }

    #[test]
    fn test_new_addresses_are_distinct() {
        let mut chain = node();
        let a = chain.new_address();
        let b = chain.new_address();
        assert_ne!(a, b);
        assert_eq!(a.len(), 40);
        assert!(a.starts_with('1'));
    }

    #[test]
    fn test_stats() {
        let mut chain = node();
        chain.generate(2, "miner").unwrap();
        let stats = chain.stats().unwrap();
        assert_eq!(stats.height, 2);
        assert_eq!(stats.total_transactions, 3);
        assert_eq!(stats.latest_hash, chain.latest_block().hash);
    }
}
