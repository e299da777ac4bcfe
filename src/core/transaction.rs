//! Transaction handling
//!
//! Transactions carry the two lock-time fields that the lock-time rules read:
//! - `lock_time` (absolute, Bitcoin nLockTime): block height or Unix timestamp
//! - per-input `sequence` (BIP-68 relative lock-time encoding)
//!
//! Scripts and signatures are not modelled; a transaction here is only as
//! rich as lock-time validation needs it to be.

use crate::crypto::double_sha256_hex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Current transaction version (BIP-68 applies from version 2)
pub const TX_VERSION: u32 = 2;

/// Sequence number that marks an input as final
pub const SEQUENCE_FINAL: u32 = 0xFFFF_FFFF;

/// If set, the sequence number carries no relative lock-time (BIP-68)
pub const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;

/// If set, the relative lock-time is in units of 512 seconds, else blocks
pub const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;

/// Bits of the sequence number holding the relative lock-time value
pub const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_FFFF;

/// Relative time locks are counted in 2^9 = 512 second units
pub const SEQUENCE_LOCKTIME_GRANULARITY: u32 = 9;

/// Locktime threshold: values below are block heights, at or above are timestamps
/// (500 million, same as Bitcoin)
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Block reward paid by coinbase transactions
pub const BLOCK_REWARD: u64 = 50 * COIN;

/// Base units per coin
pub const COIN: u64 = 100_000_000;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Invalid lock-time encoding: {value} is not a valid {expected}")]
    InvalidLockTimeEncoding { value: u32, expected: &'static str },
    #[error("Transaction not final: locktime {0} not reached")]
    NotFinal(u32),
    #[error("Sequence locks not satisfied for transaction {0}")]
    SequenceLockNotMet(String),
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
}

// =============================================================================
// Lock Times
// =============================================================================

/// An absolute lock-time, disambiguated by [`LOCKTIME_THRESHOLD`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockTime {
    /// Transaction is final once the chain passes this height
    Blocks(u32),
    /// Transaction is final once the reference time passes this Unix timestamp
    Seconds(u32),
}

impl LockTime {
    /// The lock-time that never locks anything
    pub const ZERO: LockTime = LockTime::Blocks(0);

    /// Decode a raw nLockTime value. Every `u32` is valid here.
    pub fn from_consensus(value: u32) -> Self {
        if value < LOCKTIME_THRESHOLD {
            LockTime::Blocks(value)
        } else {
            LockTime::Seconds(value)
        }
    }

    /// Build a height lock, rejecting values that would decode as a timestamp
    pub fn from_height(height: u32) -> Result<Self, TransactionError> {
        if height < LOCKTIME_THRESHOLD {
            Ok(LockTime::Blocks(height))
        } else {
            Err(TransactionError::InvalidLockTimeEncoding {
                value: height,
                expected: "block height",
            })
        }
    }

    /// Build a time lock, rejecting values that would decode as a height
    pub fn from_time(timestamp: u32) -> Result<Self, TransactionError> {
        if timestamp >= LOCKTIME_THRESHOLD {
            Ok(LockTime::Seconds(timestamp))
        } else {
            Err(TransactionError::InvalidLockTimeEncoding {
                value: timestamp,
                expected: "block time",
            })
        }
    }

    pub fn to_consensus_u32(self) -> u32 {
        match self {
            LockTime::Blocks(n) | LockTime::Seconds(n) => n,
        }
    }
}

impl fmt::Display for LockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTime::Blocks(h) => write!(f, "height {}", h),
            LockTime::Seconds(t) => write!(f, "time {}", t),
        }
    }
}

/// A relative lock-time decoded from an input's sequence number (BIP-68)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeLockTime {
    /// Input may be spent this many blocks after its coin was confirmed
    Blocks(u16),
    /// Input may be spent this many 512-second intervals after its coin was confirmed
    Intervals(u16),
}

impl RelativeLockTime {
    /// Decode a sequence number, `None` when the disable flag is set
    pub fn from_sequence(sequence: u32) -> Option<Self> {
        if sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            return None;
        }

        let value = (sequence & SEQUENCE_LOCKTIME_MASK) as u16;
        if sequence & SEQUENCE_LOCKTIME_TYPE_FLAG != 0 {
            Some(RelativeLockTime::Intervals(value))
        } else {
            Some(RelativeLockTime::Blocks(value))
        }
    }

    /// Encode back into a sequence number
    pub fn to_sequence(self) -> u32 {
        match self {
            RelativeLockTime::Blocks(n) => n as u32,
            RelativeLockTime::Intervals(n) => SEQUENCE_LOCKTIME_TYPE_FLAG | n as u32,
        }
    }

    /// Time-based locks expressed in seconds
    pub fn seconds(self) -> Option<i64> {
        match self {
            RelativeLockTime::Intervals(n) => Some((n as i64) << SEQUENCE_LOCKTIME_GRANULARITY),
            RelativeLockTime::Blocks(_) => None,
        }
    }
}

// =============================================================================
// Transaction Input / Output
// =============================================================================

/// Transaction input (reference to a previous output)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionInput {
    /// Transaction ID of the previous transaction
    pub prev_tx_id: String,
    /// Index of the output in the previous transaction
    pub output_index: u32,
    /// Sequence number
    /// - SEQUENCE_FINAL (0xFFFFFFFF): disables the absolute lock-time for this input
    /// - bit 31 clear: relative lock-time (BIP-68)
    #[serde(default = "default_sequence")]
    pub sequence: u32,
}

fn default_sequence() -> u32 {
    SEQUENCE_FINAL
}

impl TransactionInput {
    pub fn new(prev_tx_id: &str, output_index: u32) -> Self {
        Self {
            prev_tx_id: prev_tx_id.to_string(),
            output_index,
            sequence: SEQUENCE_FINAL,
        }
    }

    /// Check if this input opts out of the absolute lock-time
    pub fn is_final(&self) -> bool {
        self.sequence == SEQUENCE_FINAL
    }

    /// Relative lock-time carried by the sequence number, if any
    pub fn relative_lock_time(&self) -> Option<RelativeLockTime> {
        RelativeLockTime::from_sequence(self.sequence)
    }
}

/// Transaction output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionOutput {
    /// Amount in base units
    pub amount: u64,
    /// Recipient's address
    pub recipient: String,
}

// =============================================================================
// Transaction
// =============================================================================

/// A transaction as seen by lock-time validation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    /// Transaction version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Transaction ID (hash of transaction data)
    pub id: String,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    /// Raw nLockTime
    /// - 0: transaction is always final
    /// - < LOCKTIME_THRESHOLD: block height
    /// - >= LOCKTIME_THRESHOLD: Unix timestamp
    #[serde(default)]
    pub lock_time: u32,
    /// Whether this is a coinbase (mining reward) transaction
    #[serde(default)]
    pub is_coinbase: bool,
}

fn default_version() -> u32 {
    TX_VERSION
}

impl Transaction {
    /// Create a new transaction
    pub fn new(inputs: Vec<TransactionInput>, outputs: Vec<TransactionOutput>) -> Self {
        let mut tx = Self {
            version: TX_VERSION,
            id: String::new(),
            inputs,
            outputs,
            lock_time: 0,
            is_coinbase: false,
        };
        tx.id = tx.calculate_hash();
        tx
    }

    /// Create a coinbase transaction; the height keeps coinbase IDs unique (BIP-34)
    pub fn coinbase(recipient: &str, amount: u64, block_height: u64) -> Self {
        let inputs = vec![TransactionInput {
            prev_tx_id: "0".repeat(64),
            output_index: block_height as u32,
            sequence: SEQUENCE_FINAL,
        }];
        let outputs = vec![TransactionOutput {
            amount,
            recipient: recipient.to_string(),
        }];

        let mut tx = Self {
            version: TX_VERSION,
            id: String::new(),
            inputs,
            outputs,
            lock_time: 0,
            is_coinbase: true,
        };
        tx.id = tx.calculate_hash();
        tx
    }

    /// Calculate the transaction hash
    pub fn calculate_hash(&self) -> String {
        let data = format!(
            "{}{:?}{:?}{}{}",
            self.version, self.inputs, self.outputs, self.lock_time, self.is_coinbase
        );
        double_sha256_hex(data.as_bytes())
    }

    /// Recompute the ID after mutating fields
    pub fn rehash(&mut self) {
        self.id = self.calculate_hash();
    }

    /// The decoded absolute lock-time
    pub fn lock_time(&self) -> LockTime {
        LockTime::from_consensus(self.lock_time)
    }

    /// Get total output amount
    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    // =========================================================================
    // Locktime & Finality
    // =========================================================================

    /// Check if transaction is final (can be included in a block)
    /// - block_height: height of the block that would include it
    /// - cutoff_time: time that time-based lock-times are compared against
    ///
    /// A lock-time must be strictly below its reference to be satisfied.
    pub fn is_final(&self, block_height: u64, cutoff_time: u32) -> bool {
        if self.lock_time == 0 {
            return true;
        }

        let reached = match self.lock_time() {
            LockTime::Blocks(height) => (height as u64) < block_height,
            LockTime::Seconds(time) => time < cutoff_time,
        };
        if reached {
            return true;
        }

        // An unreached lock-time is ignored only if every input opts out
        self.inputs.iter().all(|i| i.is_final())
    }

    /// Check if transaction is final, returning error with details if not
    pub fn check_final(&self, block_height: u64, cutoff_time: u32) -> Result<(), TransactionError> {
        if self.is_final(block_height, cutoff_time) {
            Ok(())
        } else {
            Err(TransactionError::NotFinal(self.lock_time))
        }
    }

    /// Basic structural checks
    pub fn is_valid(&self) -> bool {
        if self.version == 0 || self.inputs.is_empty() || self.outputs.is_empty() {
            return false;
        }
        self.id == self.calculate_hash()
    }
}

// =============================================================================
// Transaction Builder
// =============================================================================

/// Builder for creating transactions with all options
pub struct TransactionBuilder {
    version: u32,
    inputs: Vec<TransactionInput>,
    outputs: Vec<TransactionOutput>,
    lock_time: u32,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self {
            version: TX_VERSION,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        }
    }

    /// Set the transaction version
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Spend an output of a previous transaction with a final sequence
    pub fn add_input(mut self, prev_tx_id: &str, output_index: u32) -> Self {
        self.inputs.push(TransactionInput::new(prev_tx_id, output_index));
        self
    }

    /// Spend an output with a custom sequence number
    pub fn add_input_with_sequence(mut self, prev_tx_id: &str, output_index: u32, sequence: u32) -> Self {
        self.inputs.push(TransactionInput {
            prev_tx_id: prev_tx_id.to_string(),
            output_index,
            sequence,
        });
        self
    }

    /// Add an output
    pub fn add_output(mut self, recipient: &str, amount: u64) -> Self {
        self.outputs.push(TransactionOutput {
            amount,
            recipient: recipient.to_string(),
        });
        self
    }

    /// Set an absolute lock-time
    pub fn lock_time(mut self, lock_time: LockTime) -> Self {
        self.lock_time = lock_time.to_consensus_u32();
        self
    }

    /// Set a raw nLockTime value
    pub fn raw_lock_time(mut self, lock_time: u32) -> Self {
        self.lock_time = lock_time;
        self
    }

    pub fn build(self) -> Transaction {
        let mut tx = Transaction::new(self.inputs, self.outputs);
        tx.version = self.version;
        tx.lock_time = self.lock_time;
        tx.rehash();
        tx
    }
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
