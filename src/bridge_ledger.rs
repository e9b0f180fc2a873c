//! Bridge transaction ledger
//!
//! Deterministic fallback for the bridge balance: when the live ERC-20 call
//! fails, replay the known deposit/withdrawal history up to the snapshot's
//! timestamp. The ledger is an external artifact loaded once from a JSON
//! file; entries are summed in timestamp order.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerDirection {
    Deposit,
    Withdrawal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unix timestamp of the bridge transaction
    pub timestamp: i64,
    /// Amount in TRB
    pub amount_trb: f64,
    pub direction: LedgerDirection,
}

#[derive(Debug, Clone, Default)]
pub struct BridgeLedger {
    entries: Vec<LedgerEntry>,
}

impl BridgeLedger {
    pub fn new(mut entries: Vec<LedgerEntry>) -> Self {
        entries.sort_by_key(|e| e.timestamp);
        BridgeLedger { entries }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading bridge ledger {}", path.display()))?;
        let entries: Vec<LedgerEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing bridge ledger {}", path.display()))?;
        info!(count = entries.len(), path = %path.display(), "bridge ledger loaded");
        Ok(Self::new(entries))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Net bridge balance (deposits minus withdrawals) at `cutoff`,
    /// inclusive.
    pub fn balance_at(&self, cutoff: i64) -> f64 {
        self.entries
            .iter()
            .take_while(|e| e.timestamp <= cutoff)
            .map(|e| match e.direction {
                LedgerDirection::Deposit => e.amount_trb,
                LedgerDirection::Withdrawal => -e.amount_trb,
            })
            .sum()
    }
}
