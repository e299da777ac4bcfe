//! mtp-versionbits: versionbits soft-fork activation with median-time-past lock-times
//!
//! This crate provides:
//! - Versionbits (BIP9) deployment state tracking over block headers
//! - Median time past over the last 11 blocks
//! - Lock-time finality that switches to median time past once the
//!   lock-time deployment is active (BIP113), plus relative lock-times (BIP68)
//! - An in-memory regtest node with JSON persistence and a CLI
//!
//! # Example
//!
//! ```rust
//! use mtp_versionbits::core::{Blockchain, ChainParams, ThresholdState};
//!
//! let mut chain = Blockchain::new(ChainParams::regtest());
//! assert_eq!(chain.deployment_state("csv").unwrap(), ThresholdState::Defined);
//!
//! // One full window later signaling has started
//! chain.generate(143, "miner").unwrap();
//! assert_eq!(chain.deployment_state("csv").unwrap(), ThresholdState::Started);
//! ```

pub mod cli;
pub mod core;
pub mod crypto;
pub mod rpc;
pub mod storage;

// Re-export commonly used types
pub use core::{
    Block, BlockHeader, BlockStatus, Blockchain, ChainParams, Deployment, LockTimeValidator,
    ThresholdState, Transaction,
};
pub use rpc::{BlockchainInfo, NodeRpc};
pub use storage::{Storage, StorageConfig};
