//! Ethereum block finder
//!
//! Mirror of the Layer finder for chain 1. Only used when a caller has a
//! timestamp but no block number (the block number on a snapshot is
//! record-keeping; chain-1 data is fetched by number when one is known).

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::chain::EthereumReader;
use crate::error::ChainError;
use crate::finder::{resolve_target, SearchRange, TimestampSource};
use crate::types::ResolvedBlock;

/// Nominal post-merge block spacing, used to seed the first probe.
const ETH_BLOCK_TIME_SECS: f64 = 12.0;

pub struct EthBlockFinder {
    reader: Arc<dyn EthereumReader>,
}

struct EthSource<'a> {
    reader: &'a dyn EthereumReader,
}

#[async_trait::async_trait]
impl TimestampSource for EthSource<'_> {
    async fn timestamp_at(&self, height: u64) -> Result<i64, ChainError> {
        Ok(self.reader.get_block(height).await?.timestamp)
    }
}

impl EthBlockFinder {
    pub fn new(reader: Arc<dyn EthereumReader>) -> Self {
        EthBlockFinder { reader }
    }

    pub async fn find_block_by_timestamp(
        &self,
        target_timestamp: i64,
        cancel: &CancellationToken,
    ) -> Result<ResolvedBlock, ChainError> {
        let latest = self.reader.latest_block().await?;
        // Execution-layer nodes serve every header, so the lower bound is
        // the first block rather than a pruning horizon.
        let earliest = self.reader.get_block(1).await?;

        let range = SearchRange {
            earliest_height: earliest.number,
            earliest_timestamp: earliest.timestamp,
            latest_height: latest.number,
            latest_timestamp: latest.timestamp,
            avg_block_time: ETH_BLOCK_TIME_SECS,
        };

        info!(
            target_timestamp,
            latest = latest.number,
            "resolving ethereum block number"
        );

        let source = EthSource {
            reader: self.reader.as_ref(),
        };
        let resolved = resolve_target(&source, range, target_timestamp, cancel).await?;

        info!(
            block_number = resolved.height,
            drift_secs = resolved.drift_secs,
            extrapolated = resolved.extrapolated,
            "ethereum block resolved"
        );
        Ok(resolved)
    }
}
