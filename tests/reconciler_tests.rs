//! End-to-end reconciliation tests against scripted chain readers.
//!
//! The fake Layer chain spans heights 10..=20 with blocks 60 seconds apart
//! starting at 1_699_999_700, so height 15 lands exactly on 1_700_000_000.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use tellor_supply_analytics::balances::BalanceEnumerator;
use tellor_supply_analytics::bridge_ledger::{BridgeLedger, LedgerDirection, LedgerEntry};
use tellor_supply_analytics::chain::{
    AccountEntry, EthBlock, EthereumReader, LayerReader, LayerStatus,
};
use tellor_supply_analytics::error::ChainError;
use tellor_supply_analytics::types::StakingPool;
use tellor_supply_analytics::{
    CollectorConfig, SnapshotStore, UnifiedReconciler,
};

const EARLIEST: u64 = 10;
const LATEST: u64 = 20;

fn layer_timestamp(height: u64) -> i64 {
    1_699_999_700 + (height as i64 - EARLIEST as i64) * 60
}

#[derive(Default)]
struct FakeLayer {
    fail_supply: AtomicBool,
    fail_staking: AtomicBool,
    fail_listing: AtomicBool,
    status_calls: AtomicU32,
    supply_heights: Mutex<Vec<u64>>,
    staking_heights: Mutex<Vec<u64>>,
    balance_heights: Mutex<Vec<Option<u64>>>,
}

#[async_trait]
impl LayerReader for FakeLayer {
    async fn status(&self) -> Result<LayerStatus, ChainError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(LayerStatus {
            latest_height: LATEST,
            latest_timestamp: layer_timestamp(LATEST),
            earliest_height: EARLIEST,
            earliest_timestamp: layer_timestamp(EARLIEST),
        })
    }

    async fn block_timestamp(&self, height: u64) -> Result<i64, ChainError> {
        if !(EARLIEST..=LATEST).contains(&height) {
            return Err(ChainError::Pruned { height });
        }
        Ok(layer_timestamp(height))
    }

    async fn total_supply_loya(&self, height: u64) -> Result<i64, ChainError> {
        self.supply_heights.lock().unwrap().push(height);
        if self.fail_supply.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc {
                code: -1,
                message: "scripted supply failure".into(),
            });
        }
        Ok(1_000_000_000)
    }

    async fn staking_pool(&self, height: u64) -> Result<StakingPool, ChainError> {
        self.staking_heights.lock().unwrap().push(height);
        if self.fail_staking.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc {
                code: -1,
                message: "scripted staking failure".into(),
            });
        }
        Ok(StakingPool {
            bonded_trb: 400.0,
            not_bonded_trb: 50.0,
        })
    }

    async fn list_accounts(&self) -> Result<Vec<AccountEntry>, ChainError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc {
                code: -1,
                message: "scripted listing failure".into(),
            });
        }
        Ok(vec![
            AccountEntry {
                address: "tellor1a".into(),
                account_type: "BaseAccount".into(),
            },
            AccountEntry {
                address: "tellor1b".into(),
                account_type: "ModuleAccount(bonded_tokens_pool)".into(),
            },
        ])
    }

    async fn balance_loya(
        &self,
        address: &str,
        height: Option<u64>,
    ) -> Result<i64, ChainError> {
        self.balance_heights.lock().unwrap().push(height);
        match address {
            "tellor1a" => Ok(2_000_000),
            _ => Ok(0),
        }
    }
}

#[derive(Default)]
struct FakeEthereum {
    fail_bridge_balance: AtomicBool,
    fail_blocks: AtomicBool,
    bridge_calls: AtomicU32,
}

#[async_trait]
impl EthereumReader for FakeEthereum {
    async fn get_block(&self, number: u64) -> Result<EthBlock, ChainError> {
        if self.fail_blocks.load(Ordering::SeqCst) {
            return Err(ChainError::Timeout);
        }
        Ok(EthBlock {
            number,
            // 12s spacing anchored so block 1000 sits at 1_700_000_030
            timestamp: 1_700_000_030 + (number as i64 - 1000) * 12,
        })
    }

    async fn latest_block(&self) -> Result<EthBlock, ChainError> {
        self.get_block(1100).await
    }

    async fn erc20_balance_of(&self, _owner: &str, _at_block: u64) -> Result<u128, ChainError> {
        self.bridge_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_bridge_balance.load(Ordering::SeqCst) {
            return Err(ChainError::Timeout);
        }
        // 25 TRB in wei
        Ok(25_000_000_000_000_000_000)
    }
}

fn test_config(db_path: &std::path::Path) -> CollectorConfig {
    CollectorConfig {
        ethereum_rpc_url: "http://unused.invalid".into(),
        trb_contract: "0xtrb".into(),
        bridge_contract: "0xbridge".into(),
        layer_rpc_url: "http://unused.invalid".into(),
        layer_api_url: "http://unused.invalid".into(),
        db_path: db_path.to_string_lossy().into_owned(),
        tolerance_seconds: 300,
        request_timeout_secs: 30,
        balance_request_delay_ms: 0,
        collection_delay_secs: 0,
        bridge_ledger_path: None,
        monitor_interval_secs: 3600,
        max_backfill: 20,
        max_blocks: 50,
        hours_back: 24,
        block_interval_secs: 3600,
    }
}

struct Harness {
    _dir: TempDir,
    eth: Arc<FakeEthereum>,
    layer: Arc<FakeLayer>,
    reconciler: UnifiedReconciler,
}

fn harness_with(eth: FakeEthereum, layer: FakeLayer, ledger: Option<BridgeLedger>) -> Harness {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("test.db");
    let store = SnapshotStore::open(&db_path).unwrap();
    let config = test_config(&db_path);

    let eth = Arc::new(eth);
    let layer = Arc::new(layer);
    let reconciler = UnifiedReconciler::with_readers(
        config,
        store,
        Arc::clone(&eth) as Arc<dyn EthereumReader>,
        Arc::clone(&layer) as Arc<dyn LayerReader>,
        ledger,
    );

    Harness {
        _dir: dir,
        eth,
        layer,
        reconciler,
    }
}

fn harness() -> Harness {
    harness_with(FakeEthereum::default(), FakeLayer::default(), None)
}

#[tokio::test]
async fn test_full_snapshot_collection() {
    let h = harness();
    let cancel = CancellationToken::new();

    // Block 1000's timestamp sits 30s after layer height 15's block.
    let ok = h
        .reconciler
        .collect_unified_snapshot(1000, 1_700_000_030, None, &cancel)
        .await;
    assert!(ok);

    let snapshot = h
        .reconciler
        .store()
        .get_by_eth_timestamp(1_700_000_030)
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.eth_block_number, 1000);
    assert_eq!(snapshot.layer_block_height, Some(15));
    assert_eq!(snapshot.layer_block_timestamp, Some(1_700_000_000));
    assert_eq!(snapshot.bridge_balance_trb, Some(25.0));
    assert_eq!(snapshot.layer_total_supply_trb, Some(1_000.0));
    assert_eq!(snapshot.bonded_tokens, Some(400.0));
    assert_eq!(snapshot.not_bonded_tokens, Some(50.0));
    assert_eq!(snapshot.free_floating_trb, Some(550.0));
    assert_eq!(snapshot.total_addresses, Some(2));
    assert_eq!(snapshot.addresses_with_balance, Some(1));
    assert_eq!(snapshot.total_balance_loya, Some(2_000_000));
    assert_eq!(snapshot.data_completeness_score, 1.0);

    let balances = h
        .reconciler
        .store()
        .balances_for_timestamp(1_700_000_030)
        .unwrap();
    assert_eq!(balances.len(), 2);
}

#[tokio::test]
async fn test_supply_and_balances_use_the_same_height() {
    let h = harness();
    h.reconciler
        .collect_unified_snapshot(1000, 1_700_000_030, None, &CancellationToken::new())
        .await;

    assert_eq!(*h.layer.supply_heights.lock().unwrap(), vec![15]);
    assert_eq!(*h.layer.staking_heights.lock().unwrap(), vec![15]);
    let balance_heights = h.layer.balance_heights.lock().unwrap();
    assert_eq!(balance_heights.len(), 2);
    assert!(balance_heights.iter().all(|&height| height == Some(15)));
}

#[tokio::test]
async fn test_complete_snapshot_is_not_recollected() {
    let h = harness();
    let cancel = CancellationToken::new();

    assert!(
        h.reconciler
            .collect_unified_snapshot(1000, 1_700_000_030, None, &cancel)
            .await
    );
    let status_calls_after_first = h.layer.status_calls.load(Ordering::SeqCst);
    let bridge_calls_after_first = h.eth.bridge_calls.load(Ordering::SeqCst);

    // Second pass sees the complete row and does no chain work.
    assert!(
        h.reconciler
            .collect_unified_snapshot(1000, 1_700_000_030, None, &cancel)
            .await
    );
    assert_eq!(h.layer.status_calls.load(Ordering::SeqCst), status_calls_after_first);
    assert_eq!(h.eth.bridge_calls.load(Ordering::SeqCst), bridge_calls_after_first);
}

#[tokio::test]
async fn test_supply_failure_aborts_the_pass() {
    let h = harness_with(
        FakeEthereum::default(),
        FakeLayer {
            fail_supply: AtomicBool::new(true),
            ..FakeLayer::default()
        },
        None,
    );

    let ok = h
        .reconciler
        .collect_unified_snapshot(1000, 1_700_000_030, None, &CancellationToken::new())
        .await;
    assert!(!ok);
    assert!(h
        .reconciler
        .store()
        .get_by_eth_timestamp(1_700_000_030)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_staking_failure_aborts_the_pass() {
    let h = harness_with(
        FakeEthereum::default(),
        FakeLayer {
            fail_staking: AtomicBool::new(true),
            ..FakeLayer::default()
        },
        None,
    );

    let ok = h
        .reconciler
        .collect_unified_snapshot(1000, 1_700_000_030, None, &CancellationToken::new())
        .await;
    assert!(!ok);
}

#[tokio::test]
async fn test_bridge_failure_degrades_without_ledger() {
    let h = harness_with(
        FakeEthereum {
            fail_bridge_balance: AtomicBool::new(true),
            ..FakeEthereum::default()
        },
        FakeLayer::default(),
        None,
    );

    let ok = h
        .reconciler
        .collect_unified_snapshot(1000, 1_700_000_030, None, &CancellationToken::new())
        .await;
    assert!(ok);

    let snapshot = h
        .reconciler
        .store()
        .get_by_eth_timestamp(1_700_000_030)
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.bridge_balance_trb, None);
    assert!((snapshot.data_completeness_score - 6.0 / 7.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_bridge_failure_falls_back_to_ledger_replay() {
    let ledger = BridgeLedger::new(vec![
        LedgerEntry {
            timestamp: 1_600_000_000,
            amount_trb: 40.0,
            direction: LedgerDirection::Deposit,
        },
        LedgerEntry {
            timestamp: 1_650_000_000,
            amount_trb: 15.0,
            direction: LedgerDirection::Withdrawal,
        },
        // After the snapshot timestamp, must not be counted.
        LedgerEntry {
            timestamp: 1_800_000_000,
            amount_trb: 99.0,
            direction: LedgerDirection::Deposit,
        },
    ]);
    let h = harness_with(
        FakeEthereum {
            fail_bridge_balance: AtomicBool::new(true),
            ..FakeEthereum::default()
        },
        FakeLayer::default(),
        Some(ledger),
    );

    let ok = h
        .reconciler
        .collect_unified_snapshot(1000, 1_700_000_030, None, &CancellationToken::new())
        .await;
    assert!(ok);

    let snapshot = h
        .reconciler
        .store()
        .get_by_eth_timestamp(1_700_000_030)
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.bridge_balance_trb, Some(25.0));
    assert_eq!(snapshot.data_completeness_score, 1.0);
}

#[tokio::test]
async fn test_over_tolerance_resolution_skips_the_snapshot() {
    let h = harness();

    // 400s past the latest layer block: the search extrapolates to the
    // latest height with drift beyond the 300s tolerance.
    let target = layer_timestamp(LATEST) + 400;
    let ok = h
        .reconciler
        .collect_unified_snapshot(1000, target, None, &CancellationToken::new())
        .await;
    assert!(!ok);
    assert!(h
        .reconciler
        .store()
        .get_by_eth_timestamp(target)
        .unwrap()
        .is_none());
    // Nothing downstream of the resolution ran.
    assert!(h.layer.supply_heights.lock().unwrap().is_empty());
    assert_eq!(h.eth.bridge_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_listing_failure_stores_partial_snapshot() {
    let h = harness_with(
        FakeEthereum::default(),
        FakeLayer {
            fail_listing: AtomicBool::new(true),
            ..FakeLayer::default()
        },
        None,
    );

    let ok = h
        .reconciler
        .collect_unified_snapshot(1000, 1_700_000_030, None, &CancellationToken::new())
        .await;
    assert!(ok);

    let snapshot = h
        .reconciler
        .store()
        .get_by_eth_timestamp(1_700_000_030)
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.total_addresses, None);
    assert_eq!(snapshot.total_balance_loya, None);
    // Bridge, supply, bonded, not_bonded present: 4 of 7.
    assert!((snapshot.data_completeness_score - 4.0 / 7.0).abs() < 1e-9);
    assert!(h
        .reconciler
        .store()
        .balances_for_timestamp(1_700_000_030)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_pinned_layer_height_skips_the_search() {
    let h = harness();
    let ok = h
        .reconciler
        .collect_unified_snapshot(1000, 1_700_000_030, Some(17), &CancellationToken::new())
        .await;
    assert!(ok);

    // No status call means no timestamp search ran.
    assert_eq!(h.layer.status_calls.load(Ordering::SeqCst), 0);
    let snapshot = h
        .reconciler
        .store()
        .get_by_eth_timestamp(1_700_000_030)
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.layer_block_height, Some(17));
    assert_eq!(snapshot.layer_block_timestamp, Some(layer_timestamp(17)));
    assert_eq!(*h.layer.supply_heights.lock().unwrap(), vec![17]);
}

#[tokio::test]
async fn test_incomplete_snapshot_is_recollected() {
    let h = harness_with(
        FakeEthereum {
            fail_bridge_balance: AtomicBool::new(true),
            ..FakeEthereum::default()
        },
        FakeLayer::default(),
        None,
    );
    let cancel = CancellationToken::new();

    assert!(
        h.reconciler
            .collect_unified_snapshot(1000, 1_700_000_030, None, &cancel)
            .await
    );
    let first = h
        .reconciler
        .store()
        .get_by_eth_timestamp(1_700_000_030)
        .unwrap()
        .unwrap();
    assert!(first.data_completeness_score < 1.0);

    // An incomplete row is fair game for another pass.
    assert!(
        h.reconciler
            .collect_unified_snapshot(1000, 1_700_000_030, None, &cancel)
            .await
    );
    assert!(h.layer.supply_heights.lock().unwrap().len() >= 2);
    assert_eq!(
        h.reconciler.store().existing_eth_timestamps().unwrap(),
        vec![1_700_000_030]
    );
}

#[tokio::test]
async fn test_cancellation_before_start_collects_nothing() {
    let h = harness();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let ok = h
        .reconciler
        .collect_unified_snapshot(1000, 1_700_000_030, None, &cancel)
        .await;
    assert!(!ok);
    assert_eq!(h.layer.status_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_retry_never_lowers_completeness() {
    let h = harness_with(
        FakeEthereum {
            fail_bridge_balance: AtomicBool::new(true),
            ..FakeEthereum::default()
        },
        FakeLayer::default(),
        None,
    );
    let cancel = CancellationToken::new();

    // First pass: bridge down, enumeration fine.
    assert!(
        h.reconciler
            .collect_unified_snapshot(1000, 1_700_000_030, None, &cancel)
            .await
    );
    let first = h
        .reconciler
        .store()
        .get_by_eth_timestamp(1_700_000_030)
        .unwrap()
        .unwrap();
    assert!((first.data_completeness_score - 6.0 / 7.0).abs() < 1e-9);
    assert_eq!(
        h.reconciler
            .store()
            .balances_for_timestamp(1_700_000_030)
            .unwrap()
            .len(),
        2
    );

    // Retry: bridge recovers but the account listing goes down. The row
    // must keep the earlier enumeration and gain the bridge balance.
    h.eth.fail_bridge_balance.store(false, Ordering::SeqCst);
    h.layer.fail_listing.store(true, Ordering::SeqCst);

    assert!(
        h.reconciler
            .collect_unified_snapshot(1000, 1_700_000_030, None, &cancel)
            .await
    );
    let second = h
        .reconciler
        .store()
        .get_by_eth_timestamp(1_700_000_030)
        .unwrap()
        .unwrap();
    assert!(second.data_completeness_score >= first.data_completeness_score);
    assert_eq!(second.bridge_balance_trb, Some(25.0));
    assert_eq!(second.total_addresses, first.total_addresses);
    assert_eq!(second.addresses_with_balance, first.addresses_with_balance);
    assert_eq!(second.total_balance_loya, first.total_balance_loya);
    assert_eq!(second.data_completeness_score, 1.0);
    assert_eq!(
        h.reconciler
            .store()
            .balances_for_timestamp(1_700_000_030)
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_retry_keeps_bridge_balance_from_earlier_pass() {
    let h = harness_with(
        FakeEthereum::default(),
        FakeLayer {
            fail_listing: AtomicBool::new(true),
            ..FakeLayer::default()
        },
        None,
    );
    let cancel = CancellationToken::new();

    // First pass captures the bridge balance but not the enumeration.
    assert!(
        h.reconciler
            .collect_unified_snapshot(1000, 1_700_000_030, None, &cancel)
            .await
    );

    // Retry with the bridge down: its previously captured value survives
    // and the now-working enumeration completes the row.
    h.eth.fail_bridge_balance.store(true, Ordering::SeqCst);
    h.layer.fail_listing.store(false, Ordering::SeqCst);

    assert!(
        h.reconciler
            .collect_unified_snapshot(1000, 1_700_000_030, None, &cancel)
            .await
    );
    let snapshot = h
        .reconciler
        .store()
        .get_by_eth_timestamp(1_700_000_030)
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.bridge_balance_trb, Some(25.0));
    assert_eq!(snapshot.total_addresses, Some(2));
    assert_eq!(snapshot.data_completeness_score, 1.0);
}

#[tokio::test]
async fn test_zero_block_number_is_resolved_internally() {
    let h = harness();
    let ok = h
        .reconciler
        .collect_unified_snapshot(0, 1_700_000_030, None, &CancellationToken::new())
        .await;
    assert!(ok);

    // Block 1000 carries exactly this timestamp on the fake chain.
    let snapshot = h
        .reconciler
        .store()
        .get_by_eth_timestamp(1_700_000_030)
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.eth_block_number, 1000);
    assert_eq!(snapshot.layer_block_height, Some(15));
    assert_eq!(snapshot.data_completeness_score, 1.0);
}

#[tokio::test]
async fn test_zero_block_number_resolution_failure_fails_the_pass() {
    let h = harness_with(
        FakeEthereum {
            fail_blocks: AtomicBool::new(true),
            ..FakeEthereum::default()
        },
        FakeLayer::default(),
        None,
    );

    let ok = h
        .reconciler
        .collect_unified_snapshot(0, 1_700_000_030, None, &CancellationToken::new())
        .await;
    assert!(!ok);
    assert!(h
        .reconciler
        .store()
        .get_by_eth_timestamp(1_700_000_030)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_aggregates_match_stored_records() {
    let h = harness();
    h.reconciler
        .collect_unified_snapshot(1000, 1_700_000_030, None, &CancellationToken::new())
        .await;

    let snapshot = h
        .reconciler
        .store()
        .get_by_eth_timestamp(1_700_000_030)
        .unwrap()
        .unwrap();
    let records = h
        .reconciler
        .store()
        .balances_for_timestamp(1_700_000_030)
        .unwrap();
    let agg = BalanceEnumerator::aggregates(&records);
    assert_eq!(snapshot.total_addresses, Some(agg.total_addresses));
    assert_eq!(snapshot.total_balance_loya, Some(agg.total_balance_loya));
    assert_eq!(snapshot.addresses_with_balance, Some(agg.addresses_with_balance));
}
