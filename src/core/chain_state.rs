//! Chain State
//!
//! Header history and the median-time-past (MTP) calculation over it.
//! Everything the activation state machine needs from the chain goes
//! through the [`HeaderChain`] trait, so it can run over a bare list of
//! headers as well as over the full block store.

use crate::core::block::{Block, BlockHeader};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Number of blocks to use for Median Time Past calculation (Bitcoin uses 11)
pub const MTP_BLOCK_COUNT: usize = 11;

/// Chain state errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainStateError {
    #[error("Malformed header at height {height}: {reason}")]
    MalformedHeader { height: u64, reason: String },
}

impl ChainStateError {
    pub fn malformed(height: u64, reason: impl Into<String>) -> Self {
        ChainStateError::MalformedHeader {
            height,
            reason: reason.into(),
        }
    }
}

/// Read access to a linear chain of headers indexed by height
pub trait HeaderChain {
    /// Header at `height`, if the chain reaches that far
    fn header_at(&self, height: u64) -> Option<&BlockHeader>;

    /// Height of the tip, `None` for an empty chain
    fn tip_height(&self) -> Option<u64>;

    /// Median time past of the block at `height`
    fn median_time_past(&self, height: u64) -> Result<u32, ChainStateError> {
        let window = TimestampWindow::ending_at(self, height)?;
        window
            .median()
            .ok_or_else(|| ChainStateError::malformed(height, "no timestamps available"))
    }
}

impl HeaderChain for [BlockHeader] {
    fn header_at(&self, height: u64) -> Option<&BlockHeader> {
        self.get(usize::try_from(height).ok()?)
    }

    fn tip_height(&self) -> Option<u64> {
        self.len().checked_sub(1).map(|h| h as u64)
    }
}

impl HeaderChain for [Block] {
    fn header_at(&self, height: u64) -> Option<&BlockHeader> {
        self.get(usize::try_from(height).ok()?).map(|b| &b.header)
    }

    fn tip_height(&self) -> Option<u64> {
        self.len().checked_sub(1).map(|h| h as u64)
    }
}

// =============================================================================
// Timestamp Window
// =============================================================================

/// The most recent (up to 11) block timestamps ending at some block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampWindow {
    /// Oldest first
    timestamps: VecDeque<u32>,
}

impl TimestampWindow {
    pub fn new() -> Self {
        Self {
            timestamps: VecDeque::with_capacity(MTP_BLOCK_COUNT),
        }
    }

    /// Collect the window by walking back from `height` (fewer near genesis)
    pub fn ending_at<C: HeaderChain + ?Sized>(chain: &C, height: u64) -> Result<Self, ChainStateError> {
        match chain.tip_height() {
            Some(tip) if height <= tip => {}
            _ => {
                return Err(ChainStateError::malformed(
                    height,
                    "not enough ancestor history for median time past",
                ))
            }
        }

        let first = height.saturating_sub(MTP_BLOCK_COUNT as u64 - 1);
        let mut window = Self::new();
        for h in first..=height {
            let header = chain
                .header_at(h)
                .ok_or_else(|| ChainStateError::malformed(h, "missing ancestor header"))?;
            window.push(header.timestamp);
        }

        Ok(window)
    }

    /// Slide the window forward by one block
    pub fn push(&mut self, timestamp: u32) {
        if self.timestamps.len() == MTP_BLOCK_COUNT {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(timestamp);
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Median of the window; the lower-middle element for an even count
    pub fn median(&self) -> Option<u32> {
        if self.timestamps.is_empty() {
            return None;
        }

        let mut sorted: Vec<u32> = self.timestamps.iter().copied().collect();
        sorted.sort_unstable();
        Some(sorted[(sorted.len() - 1) / 2])
    }
}

// =============================================================================
// Chain State
// =============================================================================

/// A linear, append-only chain of headers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainState {
    headers: Vec<BlockHeader>,
}

impl ChainState {
    /// Start a chain from its genesis header
    pub fn new(genesis: BlockHeader) -> Result<Self, ChainStateError> {
        let mut state = Self::default();
        state.push(genesis)?;
        Ok(state)
    }

    /// Append a header that extends the current tip
    pub fn push(&mut self, header: BlockHeader) -> Result<(), ChainStateError> {
        let expected_height = self.headers.len() as u64;
        if header.height != expected_height {
            return Err(ChainStateError::malformed(
                header.height,
                format!("expected height {}", expected_height),
            ));
        }

        if let Some(tip) = self.headers.last() {
            if header.previous_hash != tip.hash() {
                return Err(ChainStateError::malformed(
                    header.height,
                    "previous hash does not match the tip",
                ));
            }
        }

        self.headers.push(header);
        Ok(())
    }

    /// Drop every header above `height`
    pub fn truncate(&mut self, height: u64) {
        self.headers.truncate(height as usize + 1);
    }

    pub fn tip(&self) -> Option<&BlockHeader> {
        self.headers.last()
    }

    pub fn headers(&self) -> &[BlockHeader] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl HeaderChain for ChainState {
    fn header_at(&self, height: u64) -> Option<&BlockHeader> {
        self.headers.as_slice().header_at(height)
    }

    fn tip_height(&self) -> Option<u64> {
        self.headers.as_slice().tip_height()
    }
}

/// Result of submitting a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    /// Block was added to the main chain
    AddedToMainChain,
    /// Block is already known
    Duplicate,
    /// Block is invalid
    Invalid(String),
}

impl BlockStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, BlockStatus::AddedToMainChain)
    }
}
