//! Core chain components
//!
//! This module contains the consensus building blocks:
//! - Transactions (absolute and relative lock-times)
//! - Blocks and headers
//! - Chain state (header history, median time past)
//! - Versionbits deployment state machine
//! - Lock-time validation gated on deployment state
//! - Chain parameters and the in-memory node

pub mod block;
pub mod blockchain;
pub mod chain_state;
pub mod params;
pub mod transaction;
pub mod validation;
pub mod versionbits;

pub use block::{Block, BlockError, BlockHeader, DEFAULT_COINBASE_RECIPIENT, MAX_BLOCK_TXS};
pub use blockchain::{Blockchain, BlockchainError, ChainStats};
pub use chain_state::{
    BlockStatus, ChainState, ChainStateError, HeaderChain, TimestampWindow, MTP_BLOCK_COUNT,
};
pub use params::{ChainParams, Network, ParamsError, CSV_DEPLOYMENT, TESTDUMMY_DEPLOYMENT};
pub use transaction::{
    LockTime, RelativeLockTime, Transaction, TransactionBuilder, TransactionError,
    TransactionInput, TransactionOutput, BLOCK_REWARD, COIN, LOCKTIME_THRESHOLD, SEQUENCE_FINAL,
    SEQUENCE_LOCKTIME_DISABLE_FLAG, SEQUENCE_LOCKTIME_GRANULARITY, SEQUENCE_LOCKTIME_MASK,
    SEQUENCE_LOCKTIME_TYPE_FLAG, TX_VERSION,
};
pub use validation::{
    is_transaction_final, LockTimeEnforcement, LockTimeReference, LockTimeValidator, PrevoutLock,
    SequenceLock,
};
pub use versionbits::{
    compute_block_version, compute_state, is_signaling, window_statistics, Deployment,
    DeploymentStart, ThresholdState, VersionBitsCache, VersionBitsError, WindowStatistics,
    VERSIONBITS_LAST_OLD_BLOCK_VERSION, VERSIONBITS_NUM_BITS, VERSIONBITS_TOP_BITS,
    VERSIONBITS_TOP_MASK,
};
