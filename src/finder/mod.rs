//! Timestamp-to-height resolution
//!
//! Both chains expose monotonically increasing block timestamps, so mapping
//! a target timestamp to "the latest block at or before it" is one binary
//! search shared by the two finders. Probes are strictly sequential; a
//! failed probe shrinks the boundary on its side instead of aborting.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ChainError;
use crate::types::ResolvedBlock;

pub mod ethereum;
pub mod layer;

pub use ethereum::EthBlockFinder;
pub use layer::LayerBlockFinder;

/// Hard cap on probes per resolution; the seeded guess plus log2 of any
/// realistic height range stays far below this.
const MAX_PROBES: u32 = 64;
/// Consecutive probe failures before the search gives up.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Anything that can report the timestamp of a block at a given height.
#[async_trait::async_trait]
pub(crate) trait TimestampSource {
    async fn timestamp_at(&self, height: u64) -> Result<i64, ChainError>;
}

/// Known extent of the searchable range, plus a first-probe seed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SearchRange {
    pub earliest_height: u64,
    pub earliest_timestamp: i64,
    pub latest_height: u64,
    pub latest_timestamp: i64,
    /// Estimated seconds per block, used to seed the first probe near the
    /// target instead of starting from the middle of the whole chain.
    pub avg_block_time: f64,
}

impl SearchRange {
    fn seed_height(&self, target: i64) -> u64 {
        let blocks_back = (self.latest_timestamp - target) as f64 / self.avg_block_time.max(0.1);
        let guess = self.latest_height as i64 - blocks_back as i64;
        guess.clamp(self.earliest_height as i64, self.latest_height as i64) as u64
    }
}

/// Find the greatest height H with `time(H) <= target < time(H+1)`.
///
/// Edge cases per the range bounds:
/// - target before the earliest available block: `NotFound` (never block 1,
///   which would silently misattribute data);
/// - target at or after the latest block's timestamp: the latest height,
///   flagged `extrapolated` so the caller can judge the drift.
pub(crate) async fn resolve_target(
    source: &dyn TimestampSource,
    range: SearchRange,
    target: i64,
    cancel: &CancellationToken,
) -> Result<ResolvedBlock, ChainError> {
    if target < range.earliest_timestamp {
        return Err(ChainError::NotFound(format!(
            "target {} precedes earliest available block {} ({})",
            target, range.earliest_height, range.earliest_timestamp
        )));
    }
    if target >= range.latest_timestamp {
        return Ok(ResolvedBlock {
            height: range.latest_height,
            timestamp: range.latest_timestamp,
            drift_secs: range.latest_timestamp - target,
            extrapolated: true,
        });
    }

    let mut low = range.earliest_height;
    let mut high = range.latest_height;
    // Invariant: time(low) <= target < time(high + 1), with low's timestamp
    // tracked once it has actually been probed.
    let mut low_timestamp: Option<i64> = Some(range.earliest_timestamp);

    let mut probes = 0u32;
    let mut consecutive_failures = 0u32;
    let mut seeded = false;

    while low < high {
        if cancel.is_cancelled() {
            return Err(ChainError::Cancelled);
        }
        if probes >= MAX_PROBES {
            return Err(ChainError::NotFound(format!(
                "no convergence after {MAX_PROBES} probes (target {target})"
            )));
        }
        probes += 1;

        // Upper midpoint so the loop makes progress when low + 1 == high.
        let mid = low + (high - low).div_ceil(2);
        let probe = if !seeded {
            seeded = true;
            range.seed_height(target).clamp(low + 1, high)
        } else {
            mid
        };

        match source.timestamp_at(probe).await {
            Ok(timestamp) => {
                consecutive_failures = 0;
                debug!(probe, timestamp, target, "finder probe");
                if timestamp <= target {
                    low = probe;
                    low_timestamp = Some(timestamp);
                } else {
                    high = probe - 1;
                }
            }
            Err(err) => {
                consecutive_failures += 1;
                warn!(probe, error = %err, "finder probe failed, shrinking bounds");
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    return Err(err);
                }
                if err.is_pruned() {
                    // Node lacks history at or below the probe; nothing
                    // lower can ever be verified.
                    low = probe.min(high);
                    low_timestamp = None;
                } else if probe > mid {
                    high = probe.saturating_sub(1).max(low);
                } else {
                    // Best effort: step past the unprobeable height so the
                    // search keeps making progress.
                    low = probe.min(high);
                    low_timestamp = None;
                }
            }
        }
    }

    let timestamp = match low_timestamp {
        Some(ts) => ts,
        None => source.timestamp_at(low).await?,
    };

    Ok(ResolvedBlock {
        height: low,
        timestamp,
        drift_secs: timestamp - target,
        extrapolated: false,
    })
}
