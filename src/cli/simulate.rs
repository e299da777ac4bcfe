//! BIP113 activation scenario
//!
//! Drives a node through the csv deployment on regtest the way an external
//! test harness would: build blocks on the tip with chosen versions and
//! timestamps, submit them, and watch the reported deployment status.
//!
//! 1. mine 2 blocks and keep their coinbases for later spends
//! 2. 141 blocks move `defined` to `started`
//! 3. 100 of 144 blocks signal: still `started`
//! 4. 108 of 144 blocks signal: `locked_in`
//! 5. 143 more blocks: still `locked_in`
//! 6. a block with a transaction locked to `block time - 1` is accepted, and
//!    the deployment is then `active`
//! 7. the same construction is rejected once lock-times use median time past

use crate::core::{
    Block, BlockHeader, BlockStatus, BlockchainError, ThresholdState, Transaction,
    TransactionBuilder, VersionBitsError, CSV_DEPLOYMENT, COIN, VERSIONBITS_LAST_OLD_BLOCK_VERSION,
};
use crate::rpc::NodeRpc;
use thiserror::Error;

/// Sequence used by the scenario's spends: relative lock disabled, not final
pub const MTP_SPEND_SEQUENCE: u32 = 0x90FF_FFFF;

/// Signals bit 0
pub const VERSION_SIGNAL_CSV: u32 = 0x2000_0001;
/// Signals bits 0 and 8
pub const VERSION_SIGNAL_CSV_AND_BIT8: u32 = 0x2000_0101;
/// Signals bit 16 only
pub const VERSION_SIGNAL_BIT16: u32 = 0x2001_0000;
/// Legacy version, never signals
pub const VERSION_LEGACY: u32 = VERSIONBITS_LAST_OLD_BLOCK_VERSION;

#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error(transparent)]
    Node(#[from] BlockchainError),
    #[error(transparent)]
    Status(#[from] VersionBitsError),
    #[error("Block at height {height} rejected: {reason}")]
    Rejected { height: u64, reason: String },
    #[error("Scenario needs at least {0} coinbase blocks")]
    MissingCoinbase(usize),
}

/// Builds blocks on the node's tip and submits them
pub struct ScenarioDriver<'a, N: NodeRpc + ?Sized> {
    node: &'a mut N,
    tip: BlockHeader,
    last_block_time: u32,
    coinbase_blocks: Vec<String>,
    address: String,
}

impl<'a, N: NodeRpc + ?Sized> ScenarioDriver<'a, N> {
    /// Mine two blocks through the node and start building after them
    pub fn new(node: &'a mut N, start_time: u32) -> Result<Self, ScenarioError> {
        let coinbase_blocks = node.generate(2)?;
        let tip = node.get_block(&node.get_best_block_hash())?.header;
        let address = node.get_new_address();
        let last_block_time = start_time.max(tip.timestamp);

        Ok(Self {
            node,
            tip,
            last_block_time,
            coinbase_blocks,
            address,
        })
    }

    pub fn node(&mut self) -> &mut N {
        &mut *self.node
    }

    /// Height of the next block to build
    pub fn height(&self) -> u64 {
        self.tip.height + 1
    }

    pub fn last_block_time(&self) -> u32 {
        self.last_block_time
    }

    pub fn status(&mut self, deployment: &str) -> Result<ThresholdState, VersionBitsError> {
        self.node.get_deployment_status(deployment)
    }

    /// Next block on the tip, one second after the last one
    pub fn build_block(&self, version: u32, transactions: Vec<Transaction>) -> Block {
        Block::build_on(&self.tip, version, self.last_block_time + 1, transactions)
    }

    /// Submit a block; the tip only moves when it is accepted
    pub fn submit(&mut self, block: Block) -> BlockStatus {
        let header = block.header.clone();
        let status = self.node.submit_block(block);
        if status.is_accepted() {
            self.last_block_time = header.timestamp;
            self.tip = header;
        }
        status
    }

    /// Build and submit `count` empty blocks of `version`, all of which must be accepted
    pub fn submit_blocks(&mut self, count: u32, version: u32) -> Result<(), ScenarioError> {
        for _ in 0..count {
            let block = self.build_block(version, vec![]);
            let height = block.height();
            if let BlockStatus::Invalid(reason) = self.submit(block) {
                return Err(ScenarioError::Rejected { height, reason });
            }
        }
        Ok(())
    }

    /// Spend the coinbase of the `index`th pre-mined block with a lock-time of
    /// `block_time - 1`, where `block_time` is the next block's timestamp
    pub fn mtp_invalid_spend(&self, index: usize) -> Result<Transaction, ScenarioError> {
        let block_hash = self
            .coinbase_blocks
            .get(index)
            .ok_or(ScenarioError::MissingCoinbase(index + 1))?;
        let coinbase = self
            .node
            .get_block(block_hash)?
            .coinbase_tx()
            .map(|tx| tx.id.clone())
            .ok_or(ScenarioError::MissingCoinbase(index + 1))?;

        let block_time = self.last_block_time + 1;
        Ok(TransactionBuilder::new()
            .add_input_with_sequence(&coinbase, 0, MTP_SPEND_SEQUENCE)
            .add_output(&self.address, COIN)
            .raw_lock_time(block_time - 1)
            .build())
    }
}

/// Outcome of one scenario checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub description: String,
    pub expected: String,
    pub actual: String,
}

impl StepOutcome {
    fn new(description: &str, expected: impl ToString, actual: impl ToString) -> Self {
        Self {
            description: description.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn passed(&self) -> bool {
        self.expected == self.actual
    }
}

/// Checkpoints of a scenario run
#[derive(Debug, Clone, Default)]
pub struct ScenarioReport {
    pub steps: Vec<StepOutcome>,
}

impl ScenarioReport {
    pub fn all_passed(&self) -> bool {
        self.steps.iter().all(StepOutcome::passed)
    }
}

fn check<N: NodeRpc + ?Sized>(
    driver: &mut ScenarioDriver<'_, N>,
    report: &mut ScenarioReport,
    description: &str,
    expected: ThresholdState,
) -> Result<(), ScenarioError> {
    let actual = driver.status(CSV_DEPLOYMENT)?;
    log::info!("{}: csv is {}", description, actual);
    report.steps.push(StepOutcome::new(description, expected, actual));
    Ok(())
}

fn acceptance(status: &BlockStatus) -> &'static str {
    match status {
        BlockStatus::AddedToMainChain => "accepted",
        BlockStatus::Duplicate => "duplicate",
        BlockStatus::Invalid(_) => "rejected",
    }
}

/// Run the activation scenario against `node`
///
/// The node should mine legacy-version blocks so that `generate` does not
/// signal on its own.
pub fn run_bip113_scenario<N: NodeRpc + ?Sized>(
    node: &mut N,
    start_time: u32,
) -> Result<ScenarioReport, ScenarioError> {
    let mut report = ScenarioReport::default();
    let mut driver = ScenarioDriver::new(node, start_time)?;

    check(&mut driver, &mut report, "after 2 generated blocks", ThresholdState::Defined)?;

    driver.submit_blocks(141, VERSION_LEGACY)?;
    check(&mut driver, &mut report, "after 141 legacy blocks", ThresholdState::Started)?;

    driver.submit_blocks(50, VERSION_SIGNAL_CSV)?;
    driver.submit_blocks(20, VERSION_LEGACY)?;
    driver.submit_blocks(50, VERSION_SIGNAL_CSV_AND_BIT8)?;
    driver.submit_blocks(24, VERSION_SIGNAL_BIT16)?;
    check(&mut driver, &mut report, "after 100 of 144 signaling", ThresholdState::Started)?;

    driver.submit_blocks(58, VERSION_SIGNAL_CSV)?;
    driver.submit_blocks(26, VERSION_LEGACY)?;
    driver.submit_blocks(50, VERSION_SIGNAL_CSV_AND_BIT8)?;
    driver.submit_blocks(10, VERSION_SIGNAL_BIT16)?;
    check(&mut driver, &mut report, "after 108 of 144 signaling", ThresholdState::LockedIn)?;

    driver.submit_blocks(143, VERSION_LEGACY)?;
    check(&mut driver, &mut report, "after 143 more blocks", ThresholdState::LockedIn)?;

    let spend = driver.mtp_invalid_spend(0)?;
    let block = driver.build_block(VERSION_SIGNAL_CSV, vec![spend]);
    let status = driver.submit(block);
    report.steps.push(StepOutcome::new(
        "lock-time below block time while locked in",
        "accepted",
        acceptance(&status),
    ));
    check(&mut driver, &mut report, "after the activation block", ThresholdState::Active)?;

    let spend = driver.mtp_invalid_spend(1)?;
    let block = driver.build_block(VERSION_SIGNAL_CSV, vec![spend]);
    let status = driver.submit(block);
    report.steps.push(StepOutcome::new(
        "lock-time not below median time past once active",
        "rejected",
        acceptance(&status),
    ));

    Ok(report)
}
