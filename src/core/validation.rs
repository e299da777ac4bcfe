//! Lock-time validation (BIP-113 median time past, BIP-68 sequence locks)
//!
//! Before the lock-time deployment is `Active`, time-based lock-times are
//! compared against the including block's own timestamp. Once it is
//! `Active`, they are compared against the median time past of the previous
//! block instead, so a miner cannot move the reference by choosing its own
//! block's timestamp. Relative lock-times from input sequence numbers are
//! only enforced once `Active`, and measured in median time past too.

use crate::core::transaction::{RelativeLockTime, Transaction, TransactionError};
use crate::core::versionbits::ThresholdState;
use serde::{Deserialize, Serialize};

/// Reference time that time-based lock-times are compared against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockTimeEnforcement {
    /// Legacy: the including block's own timestamp
    BlockTime,
    /// The median time past of the previous block
    MedianTimePast,
}

impl LockTimeEnforcement {
    pub fn for_state(state: ThresholdState) -> Self {
        if state == ThresholdState::Active {
            LockTimeEnforcement::MedianTimePast
        } else {
            LockTimeEnforcement::BlockTime
        }
    }
}

/// Where a candidate block sits, as far as lock-times care
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeReference {
    /// Height of the block that would include the transaction
    pub height: u64,
    /// That block's own timestamp
    pub block_time: u32,
    /// Median time past of its parent
    pub prev_median_time_past: u32,
}

impl LockTimeReference {
    /// The time that time-based lock-times must be below
    pub fn cutoff(&self, enforcement: LockTimeEnforcement) -> u32 {
        match enforcement {
            LockTimeEnforcement::BlockTime => self.block_time,
            LockTimeEnforcement::MedianTimePast => self.prev_median_time_past,
        }
    }
}

/// Confirmation point of the coin an input spends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrevoutLock {
    /// Height of the block that created the coin
    pub height: u64,
    /// Median time past of the block before that one
    pub median_time_past: u32,
}

/// Earliest point (exclusive) at which a transaction's relative locks are met
///
/// `-1` means unconstrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceLock {
    pub min_height: i64,
    pub min_time: i64,
}

impl SequenceLock {
    pub const NONE: SequenceLock = SequenceLock {
        min_height: -1,
        min_time: -1,
    };

    /// Whether a block at `reference` satisfies the locks
    pub fn is_satisfied(&self, reference: &LockTimeReference) -> bool {
        self.min_height < reference.height as i64
            && self.min_time < reference.prev_median_time_past as i64
    }
}

/// Decides whether transactions may be included in a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeValidator {
    state: ThresholdState,
}

impl LockTimeValidator {
    /// Validator for blocks where the lock-time deployment is in `state`
    pub fn new(state: ThresholdState) -> Self {
        Self { state }
    }

    pub fn enforcement(&self) -> LockTimeEnforcement {
        LockTimeEnforcement::for_state(self.state)
    }

    /// Sequence locks only apply once the deployment is active
    pub fn enforces_sequence_locks(&self) -> bool {
        self.state == ThresholdState::Active
    }

    /// Absolute lock-time finality against the selected reference
    pub fn is_final(&self, tx: &Transaction, reference: &LockTimeReference) -> bool {
        tx.is_final(reference.height, reference.cutoff(self.enforcement()))
    }

    /// Minimum height/time implied by the inputs' relative lock-times
    ///
    /// `prevouts[i]` describes the coin spent by input `i`.
    pub fn calculate_sequence_locks(
        &self,
        tx: &Transaction,
        prevouts: &[PrevoutLock],
    ) -> Result<SequenceLock, TransactionError> {
        let mut lock = SequenceLock::NONE;

        if !self.enforces_sequence_locks() || tx.version < 2 || tx.is_coinbase {
            return Ok(lock);
        }

        if prevouts.len() != tx.inputs.len() {
            return Err(TransactionError::InvalidTransaction(format!(
                "{} inputs but {} prevouts",
                tx.inputs.len(),
                prevouts.len()
            )));
        }

        for (input, coin) in tx.inputs.iter().zip(prevouts) {
            match input.relative_lock_time() {
                None => {}
                Some(RelativeLockTime::Blocks(blocks)) => {
                    let min_height = coin.height as i64 + blocks as i64 - 1;
                    lock.min_height = lock.min_height.max(min_height);
                }
                Some(relative @ RelativeLockTime::Intervals(_)) => {
                    let seconds = relative.seconds().unwrap_or_default();
                    let min_time = coin.median_time_past as i64 + seconds - 1;
                    lock.min_time = lock.min_time.max(min_time);
                }
            }
        }

        Ok(lock)
    }

    /// Full lock-time check for one transaction
    pub fn check_transaction(
        &self,
        tx: &Transaction,
        reference: &LockTimeReference,
        prevouts: &[PrevoutLock],
    ) -> Result<(), TransactionError> {
        if tx.is_coinbase {
            return Ok(());
        }

        tx.check_final(reference.height, reference.cutoff(self.enforcement()))?;

        let lock = self.calculate_sequence_locks(tx, prevouts)?;
        if !lock.is_satisfied(reference) {
            return Err(TransactionError::SequenceLockNotMet(tx.id.clone()));
        }

        Ok(())
    }
}

/// Absolute lock-time finality of `tx` in a block at `reference`, given the
/// state of the lock-time deployment
pub fn is_transaction_final(
    tx: &Transaction,
    reference: &LockTimeReference,
    state: ThresholdState,
) -> bool {
    LockTimeValidator::new(state).is_final(tx, reference)
}
