//! Layer block finder
//!
//! Maps an Ethereum block timestamp to the Tellor Layer height whose block
//! time is the latest at or before it. The search range and average block
//! time come from the node's own status report, so a node that has pruned
//! old history naturally narrows the range.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::chain::LayerReader;
use crate::error::ChainError;
use crate::finder::{resolve_target, SearchRange, TimestampSource};
use crate::types::ResolvedBlock;

pub struct LayerBlockFinder {
    reader: Arc<dyn LayerReader>,
}

struct LayerSource<'a> {
    reader: &'a dyn LayerReader,
}

#[async_trait::async_trait]
impl TimestampSource for LayerSource<'_> {
    async fn timestamp_at(&self, height: u64) -> Result<i64, ChainError> {
        self.reader.block_timestamp(height).await
    }
}

impl LayerBlockFinder {
    pub fn new(reader: Arc<dyn LayerReader>) -> Self {
        LayerBlockFinder { reader }
    }

    /// Resolve `target_timestamp` to a Layer block. Tolerance enforcement
    /// is the caller's decision; the result reports its own drift.
    pub async fn find_block_by_timestamp(
        &self,
        target_timestamp: i64,
        cancel: &CancellationToken,
    ) -> Result<ResolvedBlock, ChainError> {
        let status = self.reader.status().await?;
        let range = SearchRange {
            earliest_height: status.earliest_height,
            earliest_timestamp: status.earliest_timestamp,
            latest_height: status.latest_height,
            latest_timestamp: status.latest_timestamp,
            avg_block_time: status.avg_block_time(),
        };

        info!(
            target_timestamp,
            earliest = range.earliest_height,
            latest = range.latest_height,
            avg_block_time = range.avg_block_time,
            "resolving layer height"
        );

        let source = LayerSource {
            reader: self.reader.as_ref(),
        };
        let resolved = resolve_target(&source, range, target_timestamp, cancel).await?;

        info!(
            height = resolved.height,
            drift_secs = resolved.drift_secs,
            extrapolated = resolved.extrapolated,
            "layer height resolved"
        );
        Ok(resolved)
    }
}
