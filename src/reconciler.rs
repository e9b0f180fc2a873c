//! Unified snapshot reconciliation
//!
//! One pass = one Ethereum block timestamp reconciled against both chains
//! and written as a single row. The Ethereum timestamp is the canonical
//! coordinate; the Layer height is resolved from it exactly once and that
//! same height feeds the supply, staking, and balance queries so every
//! figure in a row describes the same instant.
//!
//! Failure handling is tiered. Losing the bridge balance degrades the row
//! (ledger replay fallback, then null). Losing supply or staking data
//! aborts the pass; a row without them is not worth writing. A Layer
//! resolution whose drift exceeds the configured tolerance skips the pass
//! outright rather than attaching mismatched data.
//!
//! Re-collecting an incomplete row merges over what is already stored: any
//! field this pass cannot refresh keeps its previous value, so a retry can
//! only raise the completeness score, never lower it.

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::balances::BalanceEnumerator;
use crate::bridge_ledger::BridgeLedger;
use crate::chain::{EthereumClient, EthereumReader, LayerClient, LayerReader};
use crate::config::CollectorConfig;
use crate::error::ChainError;
use crate::finder::ethereum::EthBlockFinder;
use crate::finder::layer::LayerBlockFinder;
use crate::store::SnapshotStore;
use crate::types::{BalanceRecord, ResolvedBlock, UnifiedSnapshot, WEI_PER_TRB};

pub struct UnifiedReconciler {
    eth: Arc<dyn EthereumReader>,
    layer: Arc<dyn LayerReader>,
    eth_finder: EthBlockFinder,
    layer_finder: LayerBlockFinder,
    enumerator: BalanceEnumerator,
    store: SnapshotStore,
    config: CollectorConfig,
    ledger: Option<BridgeLedger>,
}

impl UnifiedReconciler {
    /// Build a reconciler backed by live HTTP clients.
    pub fn new(config: CollectorConfig, store: SnapshotStore) -> Result<Self> {
        let eth: Arc<dyn EthereumReader> = Arc::new(EthereumClient::new(&config)?);
        let layer: Arc<dyn LayerReader> = Arc::new(LayerClient::new(&config)?);

        let ledger = match &config.bridge_ledger_path {
            Some(path) => Some(BridgeLedger::load(path.as_ref())?),
            None => None,
        };

        Ok(Self::with_readers(config, store, eth, layer, ledger))
    }

    /// Assemble from pre-built readers. Used by tests and by callers that
    /// share clients across components.
    pub fn with_readers(
        config: CollectorConfig,
        store: SnapshotStore,
        eth: Arc<dyn EthereumReader>,
        layer: Arc<dyn LayerReader>,
        ledger: Option<BridgeLedger>,
    ) -> Self {
        let eth_finder = EthBlockFinder::new(Arc::clone(&eth));
        let layer_finder = LayerBlockFinder::new(Arc::clone(&layer));
        let enumerator = BalanceEnumerator::new(
            Arc::clone(&layer),
            Duration::from_millis(config.balance_request_delay_ms),
        );
        UnifiedReconciler {
            eth,
            layer,
            eth_finder,
            layer_finder,
            enumerator,
            store,
            config,
            ledger,
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn eth_reader(&self) -> Arc<dyn EthereumReader> {
        Arc::clone(&self.eth)
    }

    pub fn layer_reader(&self) -> Arc<dyn LayerReader> {
        Arc::clone(&self.layer)
    }

    /// Reconcile one snapshot at `eth_timestamp`.
    ///
    /// Callers that already know the Ethereum block pass its number;
    /// passing 0 makes the reconciler resolve it from the timestamp, and a
    /// failed resolution fails the whole pass. `layer_height` pre-pins the
    /// Layer side (gap filling resolves the height first and derives the
    /// timestamp from it), skipping the timestamp search.
    ///
    /// Returns true when a row was written or an equivalent complete row
    /// already exists. Never panics and never propagates an error; failures
    /// are logged and reported as false.
    pub async fn collect_unified_snapshot(
        &self,
        eth_block_number: u64,
        eth_timestamp: i64,
        layer_height: Option<u64>,
        cancel: &CancellationToken,
    ) -> bool {
        match self
            .try_collect(eth_block_number, eth_timestamp, layer_height, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    eth_timestamp,
                    eth_block_number,
                    error = %err,
                    "snapshot collection failed"
                );
                false
            }
        }
    }

    async fn try_collect(
        &self,
        eth_block_number: u64,
        eth_timestamp: i64,
        layer_height: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if cancel.is_cancelled() {
            return Ok(false);
        }

        // A complete row at this timestamp is final; re-collection would
        // only re-fetch identical data. An incomplete row stays in hand so
        // a retry can merge over it.
        let existing = self.store.get_by_eth_timestamp(eth_timestamp)?;
        if let Some(prev) = &existing {
            if prev.is_complete() {
                info!(eth_timestamp, "snapshot already complete, skipping");
                return Ok(true);
            }
            info!(
                eth_timestamp,
                score = prev.data_completeness_score,
                "re-collecting incomplete snapshot"
            );
        }

        let eth_block_number = if eth_block_number == 0 {
            self.eth_finder
                .find_block_by_timestamp(eth_timestamp, cancel)
                .await
                .context("resolving ethereum block number")?
                .height
        } else {
            eth_block_number
        };

        let resolved = self.resolve_layer_block(eth_timestamp, layer_height, cancel).await?;

        let resolved = match resolved {
            Some(r) => r,
            None => return Ok(false),
        };

        let mut snapshot = UnifiedSnapshot::new(eth_block_number, eth_timestamp);
        snapshot.layer_block_height = Some(resolved.height);
        snapshot.layer_block_timestamp = Some(resolved.timestamp);

        snapshot.bridge_balance_trb = self.fetch_bridge_balance(eth_block_number, eth_timestamp).await;

        // Supply and staking describe the heart of the row. Either failing
        // makes the whole pass pointless.
        let supply_loya = self
            .layer
            .total_supply_loya(resolved.height)
            .await
            .context("fetching total supply")?;
        snapshot.layer_total_supply_trb = Some(supply_loya as f64 / crate::types::LOYA_PER_TRB);

        let pool = self
            .layer
            .staking_pool(resolved.height)
            .await
            .context("fetching staking pool")?;
        snapshot.bonded_tokens = Some(pool.bonded_trb);
        snapshot.not_bonded_tokens = Some(pool.not_bonded_trb);
        snapshot.compute_free_floating();

        // A retry must never erase what an earlier pass captured: a failed
        // enumeration keeps the previous aggregates and their rows, and a
        // failed bridge fetch keeps the previous balance.
        let balance_rows = match self.fetch_balances(resolved.height, cancel).await? {
            Some(records) => {
                let agg = BalanceEnumerator::aggregates(&records);
                snapshot.total_addresses = Some(agg.total_addresses);
                snapshot.addresses_with_balance = Some(agg.addresses_with_balance);
                snapshot.total_balance_loya = Some(agg.total_balance_loya);
                snapshot.total_balance_trb = Some(agg.total_balance_trb);
                records
            }
            None => match &existing {
                Some(prev) if prev.total_addresses.is_some() => {
                    snapshot.total_addresses = prev.total_addresses;
                    snapshot.addresses_with_balance = prev.addresses_with_balance;
                    snapshot.total_balance_loya = prev.total_balance_loya;
                    snapshot.total_balance_trb = prev.total_balance_trb;
                    self.store.balances_for_timestamp(eth_timestamp)?
                }
                _ => Vec::new(),
            },
        };

        if snapshot.bridge_balance_trb.is_none() {
            if let Some(prev) = &existing {
                snapshot.bridge_balance_trb = prev.bridge_balance_trb;
            }
        }

        let score = self.store.upsert_snapshot(&snapshot, &balance_rows)?;

        info!(
            eth_timestamp,
            eth_block_number,
            layer_height = resolved.height,
            score,
            "snapshot stored"
        );
        Ok(true)
    }

    /// Pin the Layer side of the row. A pre-resolved height bypasses the
    /// search; otherwise the timestamp is resolved and checked against the
    /// configured tolerance. A None result means the pass should be skipped.
    async fn resolve_layer_block(
        &self,
        eth_timestamp: i64,
        layer_height: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<Option<ResolvedBlock>> {
        if let Some(height) = layer_height {
            let timestamp = self
                .layer
                .block_timestamp(height)
                .await
                .context("fetching pinned layer block")?;
            return Ok(Some(ResolvedBlock {
                height,
                timestamp,
                drift_secs: timestamp - eth_timestamp,
                extrapolated: false,
            }));
        }

        let resolved = self
            .layer_finder
            .find_block_by_timestamp(eth_timestamp, cancel)
            .await
            .context("resolving layer height")?;

        if !resolved.within_tolerance(self.config.tolerance_seconds) {
            warn!(
                eth_timestamp,
                layer_height = resolved.height,
                drift_secs = resolved.drift_secs,
                tolerance = self.config.tolerance_seconds,
                "layer block drift exceeds tolerance, skipping snapshot"
            );
            return Ok(None);
        }

        Ok(Some(resolved))
    }

    /// Bridge contract TRB balance at the Ethereum block, with the ledger
    /// replay as a deterministic fallback when the live call fails.
    async fn fetch_bridge_balance(&self, eth_block_number: u64, eth_timestamp: i64) -> Option<f64> {
        match self
            .eth
            .erc20_balance_of(&self.config.bridge_contract, eth_block_number)
            .await
        {
            Ok(wei) => Some(wei as f64 / WEI_PER_TRB),
            Err(err) => {
                warn!(
                    eth_block_number,
                    error = %err,
                    "bridge balance call failed, trying ledger fallback"
                );
                match &self.ledger {
                    Some(ledger) if !ledger.is_empty() => {
                        let balance = ledger.balance_at(eth_timestamp);
                        info!(eth_timestamp, balance, "bridge balance from ledger replay");
                        Some(balance)
                    }
                    _ => None,
                }
            }
        }
    }

    /// Per-address balances at the resolved height, or None when the
    /// enumeration as a whole fails. Cancellation aborts the pass.
    async fn fetch_balances(
        &self,
        height: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<BalanceRecord>>> {
        match self.enumerator.collect_at_height(height, cancel).await {
            Ok(records) => Ok(Some(records)),
            Err(ChainError::Cancelled) => Err(anyhow!("cancelled during balance enumeration")),
            Err(err) => {
                warn!(height, error = %err, "balance enumeration failed, storing partial snapshot");
                Ok(None)
            }
        }
    }
}
