//! Versionbits soft-fork activation (BIP-9)
//!
//! Each deployment owns a bit of the block version. Miners signal readiness by
//! setting that bit in a version whose top three bits are `001`. Signaling is
//! tallied over fixed windows of `period` blocks, and the deployment moves
//! through
//!
//! ```text
//! Defined -> Started -> LockedIn -> Active
//!               \
//!                -> Failed
//! ```
//!
//! The state of a block is a function of the last block of the previous
//! window, so it only ever changes at window boundaries. It is derived from
//! header history alone: [`compute_state`] recomputes it from scratch and
//! [`VersionBitsCache`] memoises it per window, and both must agree.

use crate::core::chain_state::{ChainStateError, HeaderChain};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Top bits of a block version that opts into versionbits signaling
pub const VERSIONBITS_TOP_BITS: u32 = 0x2000_0000;

/// Mask selecting the top bits of the version
pub const VERSIONBITS_TOP_MASK: u32 = 0xE000_0000;

/// Number of bits available for deployments
pub const VERSIONBITS_NUM_BITS: u8 = 29;

/// Highest version number used before versionbits
pub const VERSIONBITS_LAST_OLD_BLOCK_VERSION: u32 = 4;

/// Versionbits errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionBitsError {
    #[error("Unknown deployment: {0}")]
    UnknownDeployment(String),
    #[error("Invalid deployment {name}: {reason}")]
    InvalidDeployment { name: String, reason: String },
    #[error(transparent)]
    Chain(#[from] ChainStateError),
}

// =============================================================================
// Threshold State
// =============================================================================

/// Activation state of a deployment at a given block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdState {
    /// First state of every deployment; the genesis window is always here
    Defined,
    /// Signaling is being counted
    Started,
    /// Threshold reached; activates after one more window
    LockedIn,
    /// Rules are enforced (terminal)
    Active,
    /// Timed out without locking in (terminal)
    Failed,
}

impl ThresholdState {
    /// Label used by status queries
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdState::Defined => "defined",
            ThresholdState::Started => "started",
            ThresholdState::LockedIn => "locked_in",
            ThresholdState::Active => "active",
            ThresholdState::Failed => "failed",
        }
    }

    /// Position along the activation path; never decreases over a chain
    pub fn rank(&self) -> u8 {
        match self {
            ThresholdState::Defined => 0,
            ThresholdState::Started => 1,
            ThresholdState::LockedIn => 2,
            ThresholdState::Active | ThresholdState::Failed => 3,
        }
    }
}

impl fmt::Display for ThresholdState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Deployment
// =============================================================================

/// When a deployment begins counting signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStart {
    /// Once the median time past of a window boundary reaches this time
    Time(u32),
    /// At the first window that begins at or after this height
    Height(u64),
}

/// A versionbits deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Identifier used by status queries
    pub name: String,
    /// Bit position in the block version (0..29)
    pub bit: u8,
    /// Window size in blocks
    pub period: u32,
    /// Signaling blocks per window needed to lock in
    pub threshold: u32,
    pub start: DeploymentStart,
    /// Median time past at which an unlocked deployment fails
    #[serde(default)]
    pub timeout: Option<u32>,
}

impl Deployment {
    /// A deployment that starts at the first window boundary and never times out
    pub fn new(name: &str, bit: u8, period: u32, threshold: u32) -> Self {
        Self {
            name: name.to_string(),
            bit,
            period,
            threshold,
            start: DeploymentStart::Time(0),
            timeout: None,
        }
    }

    pub fn with_start(mut self, start: DeploymentStart) -> Self {
        self.start = start;
        self
    }

    pub fn with_timeout(mut self, timeout: u32) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Check the deployment's invariants
    pub fn validate(&self) -> Result<(), VersionBitsError> {
        let invalid = |reason: String| VersionBitsError::InvalidDeployment {
            name: self.name.clone(),
            reason,
        };

        if self.bit >= VERSIONBITS_NUM_BITS {
            return Err(invalid(format!(
                "bit {} out of range (max {})",
                self.bit,
                VERSIONBITS_NUM_BITS - 1
            )));
        }
        if self.period == 0 {
            return Err(invalid("period must be positive".to_string()));
        }
        if self.threshold > self.period {
            return Err(invalid(format!(
                "threshold {} exceeds period {}",
                self.threshold, self.period
            )));
        }
        if let (DeploymentStart::Time(start), Some(timeout)) = (self.start, self.timeout) {
            if timeout <= start {
                return Err(invalid(format!(
                    "timeout {} is not after start {}",
                    timeout, start
                )));
            }
        }

        Ok(())
    }

    /// Version bit mask for this deployment
    pub fn mask(&self) -> u32 {
        1u32 << self.bit
    }

    /// Whether a block with `version` signals for this deployment
    pub fn signals(&self, version: u32) -> bool {
        is_signaling(version, self.bit)
    }

    fn has_started(&self, boundary: u64, median_time_past: u32) -> bool {
        match self.start {
            DeploymentStart::Time(start) => median_time_past >= start,
            DeploymentStart::Height(start) => boundary + 1 >= start,
        }
    }

    fn has_timed_out(&self, median_time_past: u32) -> bool {
        self.timeout.is_some_and(|timeout| median_time_past >= timeout)
    }
}

/// Whether a block version signals for `bit`
///
/// Versions without the `001` top bits never signal, whatever their low bits.
pub fn is_signaling(version: u32, bit: u8) -> bool {
    bit < VERSIONBITS_NUM_BITS
        && (version & VERSIONBITS_TOP_MASK) == VERSIONBITS_TOP_BITS
        && (version & (1u32 << bit)) != 0
}

/// Height of the last block of the window before the one containing `height`
fn window_boundary(height: u64, period: u32) -> Option<u64> {
    let window_start = height - height % period as u64;
    window_start.checked_sub(1)
}

/// Count signaling blocks in the window ending at `boundary`
fn count_signals<C: HeaderChain + ?Sized>(
    chain: &C,
    deployment: &Deployment,
    boundary: u64,
) -> Result<u32, VersionBitsError> {
    let first = boundary + 1 - deployment.period as u64;
    let mut count = 0;
    for h in first..=boundary {
        let header = chain
            .header_at(h)
            .ok_or_else(|| ChainStateError::malformed(h, "missing header in signaling window"))?;
        if deployment.signals(header.version) {
            count += 1;
        }
    }
    Ok(count)
}

/// Walk back to the nearest known window, then replay transitions forward
fn state_with_cache<C: HeaderChain + ?Sized>(
    chain: &C,
    deployment: &Deployment,
    height: u64,
    cache: &mut HashMap<u64, ThresholdState>,
) -> Result<ThresholdState, VersionBitsError> {
    deployment.validate()?;

    let mut boundary = window_boundary(height, deployment.period);
    let mut to_compute = Vec::new();

    let mut state = loop {
        let Some(b) = boundary else {
            break ThresholdState::Defined;
        };
        if let Some(&known) = cache.get(&b) {
            break known;
        }

        let mtp = chain.median_time_past(b)?;
        if !deployment.has_started(b, mtp) && !deployment.has_timed_out(mtp) {
            cache.insert(b, ThresholdState::Defined);
            break ThresholdState::Defined;
        }

        to_compute.push((b, mtp));
        boundary = b.checked_sub(deployment.period as u64);
    };

    while let Some((b, mtp)) = to_compute.pop() {
        let next = match state {
            ThresholdState::Defined => {
                if deployment.has_timed_out(mtp) {
                    ThresholdState::Failed
                } else if deployment.has_started(b, mtp) {
                    ThresholdState::Started
                } else {
                    ThresholdState::Defined
                }
            }
            ThresholdState::Started => {
                if deployment.has_timed_out(mtp) {
                    ThresholdState::Failed
                } else {
                    let count = count_signals(chain, deployment, b)?;
                    log::debug!(
                        "{}: {}/{} signaling blocks in window ending at {}",
                        deployment.name,
                        count,
                        deployment.period,
                        b
                    );
                    if count >= deployment.threshold {
                        ThresholdState::LockedIn
                    } else {
                        ThresholdState::Started
                    }
                }
            }
            ThresholdState::LockedIn => ThresholdState::Active,
            terminal => terminal,
        };

        if next != state {
            log::info!(
                "Deployment {} transitions {} -> {} at height {}",
                deployment.name,
                state,
                next,
                b + 1
            );
        }

        cache.insert(b, next);
        state = next;
    }

    Ok(state)
}

/// Compute the state of the block at `height` from scratch
///
/// `height` may be one past the tip: the state of a candidate block only
/// depends on its ancestors.
pub fn compute_state<C: HeaderChain + ?Sized>(
    chain: &C,
    deployment: &Deployment,
    height: u64,
) -> Result<ThresholdState, VersionBitsError> {
    state_with_cache(chain, deployment, height, &mut HashMap::new())
}

/// Signaling progress in the window containing `tip_height`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowStatistics {
    pub period: u32,
    pub threshold: u32,
    /// Blocks of the window seen so far
    pub elapsed: u32,
    /// Signaling blocks among them
    pub count: u32,
    /// Whether the threshold can still be reached in this window
    pub possible: bool,
}

/// Tally the window the block after `tip_height` belongs to
///
/// Only blocks of that window already on the chain are counted, so right after
/// a window boundary the tally is empty.
pub fn window_statistics<C: HeaderChain + ?Sized>(
    chain: &C,
    deployment: &Deployment,
    tip_height: u64,
) -> Result<WindowStatistics, VersionBitsError> {
    deployment.validate()?;

    let period = deployment.period as u64;
    let next = tip_height + 1;
    let window_start = next - next % period;

    let mut count = 0;
    for h in window_start..next {
        let header = chain
            .header_at(h)
            .ok_or_else(|| ChainStateError::malformed(h, "missing header in signaling window"))?;
        if deployment.signals(header.version) {
            count += 1;
        }
    }

    let elapsed = (next - window_start) as u32;
    Ok(WindowStatistics {
        period: deployment.period,
        threshold: deployment.threshold,
        elapsed,
        count,
        possible: deployment.period - deployment.threshold >= elapsed - count,
    })
}

// =============================================================================
// Cache
// =============================================================================

/// Per-deployment memo of the state computed at each window boundary
///
/// Owned by the chain-update path; call [`VersionBitsCache::invalidate_from`]
/// whenever blocks at or above a height are removed.
#[derive(Debug, Clone, Default)]
pub struct VersionBitsCache {
    caches: HashMap<String, HashMap<u64, ThresholdState>>,
}

impl VersionBitsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// State of the block at `height`, reusing and extending the memo
    pub fn state_for<C: HeaderChain + ?Sized>(
        &mut self,
        chain: &C,
        deployment: &Deployment,
        height: u64,
    ) -> Result<ThresholdState, VersionBitsError> {
        let cache = self.caches.entry(deployment.name.clone()).or_default();
        state_with_cache(chain, deployment, height, cache)
    }

    /// Forget every window whose boundary block is at or above `height`
    pub fn invalidate_from(&mut self, height: u64) {
        for cache in self.caches.values_mut() {
            cache.retain(|&boundary, _| boundary < height);
        }
    }

    pub fn clear(&mut self) {
        self.caches.clear();
    }

    /// Number of memoised windows for a deployment
    pub fn cached_windows(&self, name: &str) -> usize {
        self.caches.get(name).map_or(0, HashMap::len)
    }
}

/// Version a miner should use for the block at `height`
///
/// Sets the bit of every deployment that is `Started` or `LockedIn`.
pub fn compute_block_version<C: HeaderChain + ?Sized>(
    chain: &C,
    deployments: &[Deployment],
    cache: &mut VersionBitsCache,
    height: u64,
) -> Result<u32, VersionBitsError> {
    let mut version = VERSIONBITS_TOP_BITS;
    for deployment in deployments {
        let state = cache.state_for(chain, deployment, height)?;
        if matches!(state, ThresholdState::Started | ThresholdState::LockedIn) {
            version |= deployment.mask();
        }
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::BlockHeader;
    use crate::core::chain_state::ChainState;

    const PERIOD: u32 = 144;
    const THRESHOLD: u32 = 108;
    const SIGNAL: u32 = 0x2000_0001;

    /// Builds a header chain one block at a time with +1s timestamps
    struct HeaderFactory {
        chain: ChainState,
        time: u32,
    }

    impl HeaderFactory {
        fn new(genesis_time: u32) -> Self {
            let genesis = BlockHeader {
                version: 1,
                height: 0,
                previous_hash: "0".repeat(64),
                merkle_root: String::new(),
                timestamp: genesis_time,
            };
            Self {
                chain: ChainState::new(genesis).unwrap(),
                time: genesis_time,
            }
        }

        fn mine(&mut self, count: u32, version: u32) {
            for _ in 0..count {
                let tip = self.chain.tip().unwrap();
                self.time += 1;
                let header = BlockHeader {
                    version,
                    height: tip.height + 1,
                    previous_hash: tip.hash(),
                    merkle_root: String::new(),
                    timestamp: self.time,
                };
                self.chain.push(header).unwrap();
            }
        }

        /// Mine up to (and including) the last block of the current window
        fn finish_window(&mut self, version: u32) {
            let next = self.chain.tip_height().unwrap() + 1;
            let remaining = (PERIOD as u64 - next % PERIOD as u64) % PERIOD as u64;
            self.mine(remaining as u32, version);
        }

        fn next_state(&self, deployment: &Deployment) -> ThresholdState {
            let next = self.chain.tip_height().unwrap() + 1;
            compute_state(&self.chain, deployment, next).unwrap()
        }
    }

    fn csv() -> Deployment {
        Deployment::new("csv", 0, PERIOD, THRESHOLD)
    }

    #[test]
    fn test_signaling_requires_top_bits() {
        assert!(is_signaling(0x2000_0001, 0));
        assert!(is_signaling(0x2000_0101, 0));
        assert!(is_signaling(0x2000_0101, 8));
        assert!(!is_signaling(0x2001_0000, 0));
        assert!(is_signaling(0x2001_0000, 16));

        // Legacy versions never signal, even with the bit set
        assert!(!is_signaling(1, 0));
        assert!(!is_signaling(VERSIONBITS_LAST_OLD_BLOCK_VERSION, 2));
        assert!(!is_signaling(0x6000_0001, 0));
        assert!(!is_signaling(0xE000_0001, 0));

        // Bits 29..31 are not deployment bits
        assert!(!is_signaling(0x2000_0000, 29));
    }

    #[test]
    fn test_deployment_validation() {
        assert!(csv().validate().is_ok());
        assert!(Deployment::new("x", 29, 144, 108).validate().is_err());
        assert!(Deployment::new("x", 1, 144, 145).validate().is_err());
        assert!(Deployment::new("x", 1, 0, 0).validate().is_err());
        assert!(Deployment::new("x", 1, 144, 144).validate().is_ok());
        assert!(csv()
            .with_start(DeploymentStart::Time(100))
            .with_timeout(50)
            .validate()
            .is_err());
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(ThresholdState::Defined.as_str(), "defined");
        assert_eq!(ThresholdState::LockedIn.to_string(), "locked_in");
        assert_eq!(
            serde_json::to_string(&ThresholdState::LockedIn).unwrap(),
            "\"locked_in\""
        );
        assert_eq!(
            serde_json::from_str::<ThresholdState>("\"active\"").unwrap(),
            ThresholdState::Active
        );
    }

    #[test]
    fn test_genesis_window_is_defined() {
        let mut f = HeaderFactory::new(1_000);
        let dep = csv();
        assert_eq!(f.next_state(&dep), ThresholdState::Defined);

        f.mine(PERIOD - 2, SIGNAL);
        assert_eq!(f.next_state(&dep), ThresholdState::Defined);

        // Height 143 is the last block of the genesis window
        f.mine(1, SIGNAL);
        assert_eq!(f.next_state(&dep), ThresholdState::Started);
    }

    #[test]
    fn test_107_signals_stay_started() {
        let mut f = HeaderFactory::new(1_000);
        let dep = csv();
        f.finish_window(4);
        assert_eq!(f.next_state(&dep), ThresholdState::Started);

        f.mine(THRESHOLD - 1, SIGNAL);
        f.finish_window(4);
        assert_eq!(f.next_state(&dep), ThresholdState::Started);
    }

    #[test]
    fn test_108_signals_lock_in_then_activate() {
        let mut f = HeaderFactory::new(1_000);
        let dep = csv();
        f.finish_window(4);

        f.mine(PERIOD - THRESHOLD, 4);
        f.mine(THRESHOLD, SIGNAL);
        assert_eq!(f.next_state(&dep), ThresholdState::LockedIn);

        // Locked in for exactly one window, regardless of signaling
        f.mine(PERIOD - 1, 4);
        assert_eq!(f.next_state(&dep), ThresholdState::LockedIn);
        f.mine(1, 4);
        assert_eq!(f.next_state(&dep), ThresholdState::Active);

        // Terminal
        f.mine(PERIOD * 2, 4);
        assert_eq!(f.next_state(&dep), ThresholdState::Active);
    }

    #[test]
    fn test_other_bits_do_not_count() {
        let mut f = HeaderFactory::new(1_000);
        let dep = csv();
        f.finish_window(4);

        // Every block signals, but for bit 1
        f.mine(PERIOD, 0x2000_0002);
        assert_eq!(f.next_state(&dep), ThresholdState::Started);
        assert_eq!(
            f.next_state(&Deployment::new("other", 1, PERIOD, THRESHOLD)),
            ThresholdState::LockedIn
        );
    }

    #[test]
    fn test_time_start_waits_for_median_time() {
        let mut f = HeaderFactory::new(1_000);
        // Boundary MTP after window 0 is ~1_138, after window 1 ~1_282
        let dep = csv().with_start(DeploymentStart::Time(1_200));
        f.finish_window(SIGNAL);
        assert_eq!(f.next_state(&dep), ThresholdState::Defined);

        // Signals while Defined are ignored
        f.mine(PERIOD, SIGNAL);
        assert_eq!(f.next_state(&dep), ThresholdState::Started);
    }

    #[test]
    fn test_height_start() {
        let mut f = HeaderFactory::new(1_000);
        let dep = csv().with_start(DeploymentStart::Height(200));
        f.finish_window(SIGNAL);
        assert_eq!(f.next_state(&dep), ThresholdState::Defined);

        f.mine(PERIOD, SIGNAL);
        // Window 2 begins at 288 >= 200
        assert_eq!(f.next_state(&dep), ThresholdState::Started);
    }

    #[test]
    fn test_timeout_fails_started_deployment() {
        let mut f = HeaderFactory::new(1_000);
        let dep = csv().with_timeout(1_250);
        f.finish_window(4);
        assert_eq!(f.next_state(&dep), ThresholdState::Started);

        // Full signaling, but the boundary MTP has passed the timeout first
        f.mine(PERIOD, SIGNAL);
        assert_eq!(f.next_state(&dep), ThresholdState::Failed);

        f.mine(PERIOD, SIGNAL);
        assert_eq!(f.next_state(&dep), ThresholdState::Failed);
    }

    #[test]
    fn test_timeout_from_defined() {
        let mut f = HeaderFactory::new(1_000);
        let dep = csv()
            .with_start(DeploymentStart::Time(5_000))
            .with_timeout(5_001);
        f.finish_window(4);
        assert_eq!(f.next_state(&dep), ThresholdState::Defined);

        let mut late = HeaderFactory::new(6_000);
        late.finish_window(4);
        assert_eq!(late.next_state(&dep), ThresholdState::Failed);
    }

    #[test]
    fn test_lock_in_beats_timeout_after_lock() {
        let mut f = HeaderFactory::new(1_000);
        let dep = csv().with_timeout(1_300);
        f.finish_window(4);
        f.mine(PERIOD, SIGNAL);
        // Boundary MTP ~1_282 < 1_300: locks in
        assert_eq!(f.next_state(&dep), ThresholdState::LockedIn);

        f.mine(PERIOD, 4);
        assert_eq!(f.next_state(&dep), ThresholdState::Active);
    }

    #[test]
    fn test_states_never_move_backward() {
        let mut f = HeaderFactory::new(1_000);
        let dep = csv();
        let versions = [4, SIGNAL, 0x2000_0002, SIGNAL, 4];
        for (i, &v) in versions.iter().cycle().take(PERIOD as usize * 5).enumerate() {
            // Mostly signaling in the third window
            let version = if (2 * PERIOD as usize..3 * PERIOD as usize).contains(&i) {
                SIGNAL
            } else {
                v
            };
            f.mine(1, version);
        }

        let tip = f.chain.tip_height().unwrap();
        let mut previous = ThresholdState::Defined;
        for h in 0..=tip + 1 {
            let state = compute_state(&f.chain, &dep, h).unwrap();
            assert!(state.rank() >= previous.rank(), "moved backward at {}", h);
            if h % PERIOD as u64 != 0 {
                assert_eq!(state, previous, "changed inside a window at {}", h);
            }
            previous = state;
        }
        assert_eq!(previous, ThresholdState::Active);
    }

    #[test]
    fn test_cache_matches_recomputation() {
        let mut f = HeaderFactory::new(1_000);
        let dep = csv();
        let mut cache = VersionBitsCache::new();

        let schedule = [(PERIOD - 1, 4), (PERIOD, SIGNAL), (PERIOD, 4), (PERIOD, 4)];
        for (count, version) in schedule {
            for _ in 0..count {
                f.mine(1, version);
                let next = f.chain.tip_height().unwrap() + 1;
                let cached = cache.state_for(&f.chain, &dep, next).unwrap();
                assert_eq!(cached, compute_state(&f.chain, &dep, next).unwrap());
            }
        }
        assert!(cache.cached_windows("csv") >= 4);
        assert_eq!(f.next_state(&dep), ThresholdState::Active);
    }

    #[test]
    fn test_cache_invalidation_after_truncation() {
        let mut f = HeaderFactory::new(1_000);
        let dep = csv();
        let mut cache = VersionBitsCache::new();

        f.finish_window(4);
        f.mine(PERIOD, SIGNAL);
        let next = f.chain.tip_height().unwrap() + 1;
        assert_eq!(cache.state_for(&f.chain, &dep, next).unwrap(), ThresholdState::LockedIn);

        // Replace the signaling window with a non-signaling one
        f.chain.truncate(PERIOD as u64 - 1);
        cache.invalidate_from(PERIOD as u64);
        f.mine(PERIOD, 4);

        let next = f.chain.tip_height().unwrap() + 1;
        assert_eq!(cache.state_for(&f.chain, &dep, next).unwrap(), ThresholdState::Started);
        assert_eq!(compute_state(&f.chain, &dep, next).unwrap(), ThresholdState::Started);
    }

    #[test]
    fn test_state_beyond_history_is_error() {
        let f = HeaderFactory::new(1_000);
        let err = compute_state(&f.chain, &csv(), PERIOD as u64 * 2).unwrap_err();
        assert!(matches!(err, VersionBitsError::Chain(_)));
    }

    #[test]
    fn test_window_statistics() {
        let mut f = HeaderFactory::new(1_000);
        let dep = csv();
        f.finish_window(4);

        f.mine(10, SIGNAL);
        f.mine(5, 4);
        let stats = window_statistics(&f.chain, &dep, f.chain.tip_height().unwrap()).unwrap();
        assert_eq!(stats.elapsed, 15);
        assert_eq!(stats.count, 10);
        assert!(stats.possible);

        f.mine(PERIOD - THRESHOLD - 5 + 1, 4);
        let stats = window_statistics(&f.chain, &dep, f.chain.tip_height().unwrap()).unwrap();
        assert_eq!(stats.elapsed - stats.count, PERIOD - THRESHOLD + 1);
        assert!(!stats.possible);
    }

    #[test]
    fn test_window_statistics_at_boundary() {
        let mut f = HeaderFactory::new(1_000);
        let dep = csv();
        f.finish_window(SIGNAL);

        // The tip closes a window: the next block starts an empty one
        let tip = f.chain.tip_height().unwrap();
        assert_eq!(tip, PERIOD as u64 - 1);
        let stats = window_statistics(&f.chain, &dep, tip).unwrap();
        assert_eq!(stats.elapsed, 0);
        assert_eq!(stats.count, 0);
        assert!(stats.possible);

        f.mine(1, SIGNAL);
        let stats = window_statistics(&f.chain, &dep, tip + 1).unwrap();
        assert_eq!((stats.elapsed, stats.count), (1, 1));

        // A started window closes without enough signals: the tally restarts
        f.finish_window(VERSIONBITS_LAST_OLD_BLOCK_VERSION);
        let tip = f.chain.tip_height().unwrap();
        assert_eq!(tip, 2 * PERIOD as u64 - 1);
        assert_eq!(f.next_state(&dep), ThresholdState::Started);
        let stats = window_statistics(&f.chain, &dep, tip).unwrap();
        assert_eq!((stats.elapsed, stats.count), (0, 0));
        assert!(stats.possible);
    }

    #[test]
    fn test_zero_period_is_rejected_not_divided() {
        let mut f = HeaderFactory::new(1_000);
        f.mine(3, SIGNAL);
        let broken = Deployment::new("csv", 0, 0, 0);

        assert!(matches!(
            compute_state(&f.chain, &broken, 4),
            Err(VersionBitsError::InvalidDeployment { .. })
        ));
        assert!(matches!(
            window_statistics(&f.chain, &broken, 3),
            Err(VersionBitsError::InvalidDeployment { .. })
        ));

        let mut cache = VersionBitsCache::new();
        assert!(compute_block_version(&f.chain, &[broken], &mut cache, 4).is_err());
    }

    #[test]
    fn test_compute_block_version() {
        let mut f = HeaderFactory::new(1_000);
        let deployments = vec![
            csv(),
            Deployment::new("testdummy", 28, PERIOD, THRESHOLD)
                .with_start(DeploymentStart::Height(10_000)),
        ];
        let mut cache = VersionBitsCache::new();

        let next = f.chain.tip_height().unwrap() + 1;
        let version = compute_block_version(&f.chain, &deployments, &mut cache, next).unwrap();
        assert_eq!(version, VERSIONBITS_TOP_BITS);

        f.finish_window(4);
        let next = f.chain.tip_height().unwrap() + 1;
        let version = compute_block_version(&f.chain, &deployments, &mut cache, next).unwrap();
        assert_eq!(version, VERSIONBITS_TOP_BITS | 1);
        assert!(deployments[0].signals(version));
        assert!(!deployments[1].signals(version));
    }
}
