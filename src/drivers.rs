//! Collection drivers
//!
//! The reconciler handles one snapshot; everything here decides which
//! snapshots to attempt. Range collection walks a recent time window at a
//! fixed spacing, backfill retries incomplete rows, gap filling targets the
//! widest hole in Layer height coverage, and the monitor loop strings the
//! other drivers together on a timer.

use anyhow::{Context, Result};
use chrono::Utc;
use std::io::{self, BufRead, Write};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::finder::ethereum::EthBlockFinder;
use crate::reconciler::UnifiedReconciler;
use crate::store::StoreSummary;

/// An existing snapshot this close to a target timestamp makes a new
/// collection redundant.
const DUPLICATE_TOLERANCE_SECS: i64 = 60;

/// Run backfill every Nth monitor cycle.
const BACKFILL_EVERY: u64 = 5;
/// Log a store summary every Nth monitor cycle.
const SUMMARY_EVERY: u64 = 3;

pub struct CollectionDriver {
    reconciler: UnifiedReconciler,
    eth_finder: EthBlockFinder,
}

/// Outcome of a batch driver run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub attempted: usize,
    pub succeeded: usize,
}

impl CollectionDriver {
    pub fn new(reconciler: UnifiedReconciler) -> Self {
        let eth_finder = EthBlockFinder::new(reconciler.eth_reader());
        CollectionDriver {
            reconciler,
            eth_finder,
        }
    }

    pub fn reconciler(&self) -> &UnifiedReconciler {
        &self.reconciler
    }

    /// Snapshot the chain head right now.
    pub async fn collect_latest(&self, cancel: &CancellationToken) -> Result<bool> {
        let latest = self
            .reconciler
            .eth_reader()
            .latest_block()
            .await
            .context("fetching latest ethereum block")?;
        info!(
            block = latest.number,
            timestamp = latest.timestamp,
            "collecting snapshot at chain head"
        );
        Ok(self
            .reconciler
            .collect_unified_snapshot(latest.number, latest.timestamp, None, cancel)
            .await)
    }

    /// Snapshot one specific Ethereum block.
    pub async fn collect_at_block(
        &self,
        block_number: u64,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let block = self
            .reconciler
            .eth_reader()
            .get_block(block_number)
            .await
            .with_context(|| format!("fetching ethereum block {block_number}"))?;
        info!(
            block = block.number,
            timestamp = block.timestamp,
            "collecting snapshot at requested block"
        );
        Ok(self
            .reconciler
            .collect_unified_snapshot(block.number, block.timestamp, None, cancel)
            .await)
    }

    /// Walk the recent window oldest-first at the configured spacing,
    /// skipping targets already covered within the duplicate tolerance.
    pub async fn collect_range(&self, cancel: &CancellationToken) -> Result<BatchOutcome> {
        let config = self.reconciler.config();
        let now = Utc::now().timestamp();
        let start = now - config.hours_back as i64 * 3600;
        let spacing = config.block_interval_secs.max(1) as i64;

        let mut targets: Vec<i64> = (0..)
            .map(|i| start + i * spacing)
            .take_while(|t| *t <= now)
            .take(config.max_blocks)
            .collect();
        targets.sort_unstable();

        let mut existing = self.reconciler.store().existing_eth_timestamps()?;
        let mut outcome = BatchOutcome::default();

        info!(
            targets = targets.len(),
            hours_back = config.hours_back,
            spacing,
            "starting range collection"
        );

        for target in targets {
            if cancel.is_cancelled() {
                warn!("range collection cancelled");
                break;
            }
            if is_duplicate(&existing, target) {
                info!(target, "target already covered, skipping");
                continue;
            }

            let resolved = match self.eth_finder.find_block_by_timestamp(target, cancel).await {
                Ok(resolved) => resolved,
                Err(err) => {
                    warn!(target, error = %err, "could not resolve ethereum block for target");
                    outcome.attempted += 1;
                    continue;
                }
            };

            // The resolved block timestamp, not the target, is the canonical
            // key; re-check coverage against it.
            if is_duplicate(&existing, resolved.timestamp) {
                info!(
                    target,
                    resolved_timestamp = resolved.timestamp,
                    "resolved block already covered, skipping"
                );
                continue;
            }

            outcome.attempted += 1;
            if self
                .reconciler
                .collect_unified_snapshot(resolved.height, resolved.timestamp, None, cancel)
                .await
            {
                outcome.succeeded += 1;
                let idx = existing.partition_point(|&t| t < resolved.timestamp);
                existing.insert(idx, resolved.timestamp);
            }

            if config.collection_delay_secs > 0 {
                tokio::time::sleep(Duration::from_secs(config.collection_delay_secs)).await;
            }
        }

        info!(
            succeeded = outcome.succeeded,
            attempted = outcome.attempted,
            "range collection finished"
        );
        Ok(outcome)
    }

    /// Re-attempt incomplete rows, oldest first. Never deletes; a retry
    /// that fails again leaves the row as it was.
    pub async fn backfill_incomplete(&self, cancel: &CancellationToken) -> Result<BatchOutcome> {
        let config = self.reconciler.config();
        let incomplete = self
            .reconciler
            .store()
            .incomplete_snapshots(config.max_backfill as u32)?;

        let mut outcome = BatchOutcome::default();
        if incomplete.is_empty() {
            info!("no incomplete snapshots to backfill");
            return Ok(outcome);
        }

        info!(count = incomplete.len(), "backfilling incomplete snapshots");
        for snapshot in incomplete {
            if cancel.is_cancelled() {
                warn!("backfill cancelled");
                break;
            }
            outcome.attempted += 1;
            if self
                .reconciler
                .collect_unified_snapshot(
                    snapshot.eth_block_number,
                    snapshot.eth_block_timestamp,
                    None,
                    cancel,
                )
                .await
            {
                outcome.succeeded += 1;
            }

            if config.collection_delay_secs > 0 {
                tokio::time::sleep(Duration::from_secs(config.collection_delay_secs)).await;
            }
        }

        info!(
            succeeded = outcome.succeeded,
            attempted = outcome.attempted,
            "backfill finished"
        );
        Ok(outcome)
    }

    /// Fill the midpoint of the widest hole in Layer height coverage. The
    /// Layer height is pinned first and the Ethereum side resolved from its
    /// timestamp, the reverse of normal collection.
    pub async fn collect_largest_gap(&self, cancel: &CancellationToken) -> Result<bool> {
        let gap = match self.reconciler.store().largest_layer_gap()? {
            Some(gap) => gap,
            None => {
                info!("no layer height gap to fill");
                return Ok(false);
            }
        };

        let (lower, upper) = gap;
        let midpoint = lower + (upper - lower) / 2;
        info!(lower, upper, midpoint, "filling largest layer gap");

        let layer_timestamp = self
            .reconciler
            .layer_reader()
            .block_timestamp(midpoint)
            .await
            .context("fetching gap midpoint block")?;

        let eth_block = self
            .eth_finder
            .find_block_by_timestamp(layer_timestamp, cancel)
            .await
            .context("resolving ethereum block for gap midpoint")?;

        Ok(self
            .reconciler
            .collect_unified_snapshot(
                eth_block.height,
                eth_block.timestamp,
                Some(midpoint),
                cancel,
            )
            .await)
    }

    /// Periodic collection loop. Each cycle snapshots the chain head; every
    /// few cycles it also backfills and logs a store summary. Runs until
    /// cancelled.
    pub async fn monitor(&self, cancel: &CancellationToken) -> Result<()> {
        let interval = Duration::from_secs(self.reconciler.config().monitor_interval_secs);
        let mut cycle: u64 = 0;

        info!(interval_secs = interval.as_secs(), "monitor loop starting");
        loop {
            cycle += 1;
            info!(cycle, "monitor cycle");

            if let Err(err) = self.collect_latest(cancel).await {
                warn!(cycle, error = %err, "head collection failed");
            }

            if cycle % BACKFILL_EVERY == 0 {
                if let Err(err) = self.backfill_incomplete(cancel).await {
                    warn!(cycle, error = %err, "backfill pass failed");
                }
            }

            if cycle % SUMMARY_EVERY == 0 {
                match self.reconciler.store().summary() {
                    Ok(summary) => log_summary(&summary),
                    Err(err) => warn!(cycle, error = %err, "summary query failed"),
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("monitor loop stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Remove every snapshot at one Layer height, with a preview and a
    /// confirmation prompt unless `assume_yes` is set.
    pub fn remove_layer_block(&self, height: u64, assume_yes: bool) -> Result<usize> {
        self.remove_layer_range(height, height, assume_yes)
    }

    pub fn remove_layer_range(
        &self,
        start_height: u64,
        end_height: u64,
        assume_yes: bool,
    ) -> Result<usize> {
        let store = self.reconciler.store();
        let preview = store.snapshots_in_layer_range(start_height, end_height)?;
        if preview.is_empty() {
            info!(start_height, end_height, "no snapshots in range, nothing to remove");
            return Ok(0);
        }

        println!(
            "About to remove {} snapshot(s) for layer heights {}..={}:",
            preview.len(),
            start_height,
            end_height
        );
        for snapshot in &preview {
            println!(
                "  layer height {:?}, eth timestamp {}, completeness {:.2}",
                snapshot.layer_block_height,
                snapshot.eth_block_timestamp,
                snapshot.data_completeness_score
            );
        }

        if !assume_yes && !confirm("Proceed with removal? [y/N] ")? {
            info!("removal aborted by operator");
            return Ok(0);
        }

        let deleted = store.delete_by_layer_height_range(start_height, end_height)?;
        println!("Removed {deleted} snapshot(s).");
        Ok(deleted)
    }
}

fn is_duplicate(existing: &[i64], timestamp: i64) -> bool {
    // existing is sorted ascending; check the nearest neighbors.
    let idx = existing.partition_point(|&t| t < timestamp);
    let after = existing.get(idx);
    let before = idx.checked_sub(1).and_then(|i| existing.get(i));
    [before, after]
        .into_iter()
        .flatten()
        .any(|&t| (t - timestamp).abs() <= DUPLICATE_TOLERANCE_SECS)
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

pub fn log_summary(summary: &StoreSummary) {
    info!(
        total = summary.total_snapshots,
        complete = summary.complete_snapshots,
        incomplete = summary.incomplete_snapshots,
        completion_rate = format!("{:.1}%", summary.completion_rate * 100.0),
        coverage_hours = format!("{:.1}", summary.coverage_hours),
        latest = ?summary.latest_eth_timestamp,
        oldest = ?summary.oldest_eth_timestamp,
        "store summary"
    );
}
