//! Core data records
//!
//! Typed rows for the unified snapshot timeline. One `UnifiedSnapshot` per
//! unique Ethereum block timestamp; `BalanceRecord` children share that
//! timestamp and are replaced wholesale on re-collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// loya (smallest Layer unit) per TRB
pub const LOYA_PER_TRB: f64 = 1e6;
/// wei per TRB on the Ethereum side (18 decimals)
pub const WEI_PER_TRB: f64 = 1e18;

/// Number of scored field groups in the completeness calculation.
/// bridge + supply + bonded + not_bonded count one each; a successful
/// balance enumeration counts three (its three derived aggregates).
pub const COMPLETENESS_GROUPS: u32 = 7;

/// One reconciled row on the unified timeline, keyed by Ethereum block
/// timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedSnapshot {
    pub eth_block_number: u64,
    /// Canonical timeline coordinate (unique, seconds since epoch)
    pub eth_block_timestamp: i64,
    pub bridge_balance_trb: Option<f64>,
    pub layer_block_height: Option<u64>,
    pub layer_block_timestamp: Option<i64>,
    pub layer_total_supply_trb: Option<f64>,
    pub bonded_tokens: Option<f64>,
    pub not_bonded_tokens: Option<f64>,
    pub total_addresses: Option<u32>,
    pub addresses_with_balance: Option<u32>,
    pub total_balance_loya: Option<i64>,
    pub total_balance_trb: Option<f64>,
    /// total supply - bonded - not_bonded; circulating supply not locked in
    /// protocol modules
    pub free_floating_trb: Option<f64>,
    /// Wall-clock time of the fetch, distinct from either chain timestamp
    pub collection_time: DateTime<Utc>,
    pub data_completeness_score: f64,
}

impl UnifiedSnapshot {
    pub fn new(eth_block_number: u64, eth_block_timestamp: i64) -> Self {
        UnifiedSnapshot {
            eth_block_number,
            eth_block_timestamp,
            bridge_balance_trb: None,
            layer_block_height: None,
            layer_block_timestamp: None,
            layer_total_supply_trb: None,
            bonded_tokens: None,
            not_bonded_tokens: None,
            total_addresses: None,
            addresses_with_balance: None,
            total_balance_loya: None,
            total_balance_trb: None,
            free_floating_trb: None,
            collection_time: Utc::now(),
            data_completeness_score: 0.0,
        }
    }

    /// Recompute the completeness score from field presence.
    ///
    /// The three balance aggregates are populated together or not at all, so
    /// they contribute as a single 3-point group.
    pub fn completeness(&self) -> f64 {
        let mut populated = 0u32;
        if self.bridge_balance_trb.is_some() {
            populated += 1;
        }
        if self.layer_total_supply_trb.is_some() {
            populated += 1;
        }
        if self.bonded_tokens.is_some() {
            populated += 1;
        }
        if self.not_bonded_tokens.is_some() {
            populated += 1;
        }
        if self.total_addresses.is_some()
            && self.addresses_with_balance.is_some()
            && self.total_balance_loya.is_some()
        {
            populated += 3;
        }
        f64::from(populated) / f64::from(COMPLETENESS_GROUPS)
    }

    pub fn is_complete(&self) -> bool {
        self.data_completeness_score >= 1.0
    }

    /// Derive free-floating supply once supply and staking figures are in.
    pub fn compute_free_floating(&mut self) {
        self.free_floating_trb = match (
            self.layer_total_supply_trb,
            self.bonded_tokens,
            self.not_bonded_tokens,
        ) {
            (Some(supply), Some(bonded), Some(not_bonded)) => {
                Some(supply - bonded - not_bonded)
            }
            _ => None,
        };
    }
}

/// Per-address balance at a snapshot's resolved Layer height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub address: String,
    /// "BaseAccount", "ModuleAccount(name)", or the raw proto type suffix
    pub account_type: String,
    pub loya_balance: i64,
    pub trb_balance: f64,
}

impl BalanceRecord {
    pub fn new(address: String, account_type: String, loya_balance: i64) -> Self {
        let trb_balance = loya_balance as f64 / LOYA_PER_TRB;
        BalanceRecord {
            address,
            account_type,
            loya_balance,
            trb_balance,
        }
    }
}

/// Result of mapping a target timestamp to a block on one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBlock {
    pub height: u64,
    pub timestamp: i64,
    /// Signed difference resolved_timestamp - target_timestamp
    pub drift_secs: i64,
    /// True when the target lies beyond the latest known block and the
    /// latest block was returned as a best effort
    pub extrapolated: bool,
}

impl ResolvedBlock {
    pub fn within_tolerance(&self, tolerance_seconds: i64) -> bool {
        self.drift_secs.abs() <= tolerance_seconds
    }
}

/// Bonded / not-bonded token amounts from the staking module, in TRB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StakingPool {
    pub bonded_trb: f64,
    pub not_bonded_trb: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completeness_all_fields() {
        let mut snapshot = UnifiedSnapshot::new(100, 1_700_000_000);
        snapshot.bridge_balance_trb = Some(12.5);
        snapshot.layer_total_supply_trb = Some(1000.0);
        snapshot.bonded_tokens = Some(400.0);
        snapshot.not_bonded_tokens = Some(50.0);
        snapshot.total_addresses = Some(10);
        snapshot.addresses_with_balance = Some(8);
        snapshot.total_balance_loya = Some(900_000_000);
        assert_eq!(snapshot.completeness(), 1.0);
    }

    #[test]
    fn test_completeness_missing_bridge_is_six_sevenths() {
        let mut snapshot = UnifiedSnapshot::new(100, 1_700_000_000);
        snapshot.layer_total_supply_trb = Some(1000.0);
        snapshot.bonded_tokens = Some(400.0);
        snapshot.not_bonded_tokens = Some(50.0);
        snapshot.total_addresses = Some(10);
        snapshot.addresses_with_balance = Some(8);
        snapshot.total_balance_loya = Some(900_000_000);
        assert_eq!(snapshot.completeness(), 6.0 / 7.0);
    }

    #[test]
    fn test_completeness_partial_balance_group_scores_zero() {
        let mut snapshot = UnifiedSnapshot::new(100, 1_700_000_000);
        snapshot.total_addresses = Some(10);
        // addresses_with_balance and total_balance_loya absent
        assert_eq!(snapshot.completeness(), 0.0);
    }

    #[test]
    fn test_free_floating_requires_all_three_inputs() {
        let mut snapshot = UnifiedSnapshot::new(100, 1_700_000_000);
        snapshot.layer_total_supply_trb = Some(1000.0);
        snapshot.bonded_tokens = Some(400.0);
        snapshot.compute_free_floating();
        assert!(snapshot.free_floating_trb.is_none());

        snapshot.not_bonded_tokens = Some(50.0);
        snapshot.compute_free_floating();
        assert_eq!(snapshot.free_floating_trb, Some(550.0));
    }

    #[test]
    fn test_resolved_block_tolerance() {
        let resolved = ResolvedBlock {
            height: 15,
            timestamp: 1_700_000_200,
            drift_secs: -200,
            extrapolated: false,
        };
        assert!(resolved.within_tolerance(300));
        assert!(!resolved.within_tolerance(100));
    }
}
