//! Node query interface
//!
//! The handful of node calls a test driver needs: deployment status, chain
//! info, block submission and trivial mining. [`Blockchain`] implements it
//! directly; results serialise to the JSON shapes a regtest node reports.

use crate::core::{
    Block, BlockStatus, Blockchain, BlockchainError, DeploymentStart, ThresholdState, Transaction,
    VersionBitsError, WindowStatistics,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-deployment entry of [`BlockchainInfo::bip9_softforks`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftforkInfo {
    pub status: ThresholdState,
    pub bit: u8,
    pub start: DeploymentStart,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    /// Signaling progress, only while `started`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<WindowStatistics>,
}

/// Chain summary, in the spirit of `getblockchaininfo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainInfo {
    pub chain: String,
    pub blocks: u64,
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: String,
    #[serde(rename = "mediantime")]
    pub median_time: u32,
    pub bip9_softforks: BTreeMap<String, SoftforkInfo>,
}

/// Calls exposed by a regtest node
pub trait NodeRpc {
    /// Deployment state for the next block
    fn get_deployment_status(&mut self, id: &str) -> Result<ThresholdState, VersionBitsError>;

    fn get_blockchain_info(&mut self) -> Result<BlockchainInfo, BlockchainError>;

    fn submit_block(&mut self, block: Block) -> BlockStatus;

    /// Mine `count` blocks, returning their hashes
    fn generate(&mut self, count: u32) -> Result<Vec<String>, BlockchainError>;

    fn get_best_block_hash(&self) -> String;

    fn get_block(&self, hash: &str) -> Result<Block, BlockchainError>;

    fn get_block_count(&self) -> u64;

    fn get_raw_transaction(&self, tx_id: &str) -> Result<Transaction, BlockchainError>;

    fn get_new_address(&mut self) -> String;
}

impl NodeRpc for Blockchain {
    fn get_deployment_status(&mut self, id: &str) -> Result<ThresholdState, VersionBitsError> {
        self.deployment_state(id)
    }

    fn get_blockchain_info(&mut self) -> Result<BlockchainInfo, BlockchainError> {
        let mut bip9_softforks = BTreeMap::new();
        for deployment in self.params.deployments.clone() {
            let status = self.deployment_state(&deployment.name)?;
            let statistics = match status {
                ThresholdState::Started => Some(self.deployment_statistics(&deployment.name)?),
                _ => None,
            };

            bip9_softforks.insert(
                deployment.name.clone(),
                SoftforkInfo {
                    status,
                    bit: deployment.bit,
                    start: deployment.start,
                    timeout: deployment.timeout,
                    statistics,
                },
            );
        }

        Ok(BlockchainInfo {
            chain: self.params.network.to_string(),
            blocks: self.height(),
            best_block_hash: self.latest_block().hash.clone(),
            median_time: self.median_time_past(self.height())?,
            bip9_softforks,
        })
    }

    fn submit_block(&mut self, block: Block) -> BlockStatus {
        Blockchain::submit_block(self, block)
    }

    fn generate(&mut self, count: u32) -> Result<Vec<String>, BlockchainError> {
        let recipient = self.new_address();
        Blockchain::generate(self, count, &recipient)
    }

    fn get_best_block_hash(&self) -> String {
        self.latest_block().hash.clone()
    }

    fn get_block(&self, hash: &str) -> Result<Block, BlockchainError> {
        self.get_block_by_hash(hash)
            .cloned()
            .ok_or_else(|| BlockchainError::BlockNotFound(hash.to_string()))
    }

    fn get_block_count(&self) -> u64 {
        self.height()
    }

    fn get_raw_transaction(&self, tx_id: &str) -> Result<Transaction, BlockchainError> {
        self.find_transaction(tx_id)
            .map(|(tx, _)| tx.clone())
            .ok_or_else(|| BlockchainError::UnknownTransaction(tx_id.to_string()))
    }

    fn get_new_address(&mut self) -> String {
        self.new_address()
    }
}
