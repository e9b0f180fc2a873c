//! Balance enumeration
//!
//! Lists every account the Layer auth module knows about and fetches each
//! one's loya balance at a specific height, one request at a time with a
//! small delay between them. An address the node cannot answer for at that
//! height (it did not exist yet, or the query is rejected) counts as a zero
//! balance, not a failure.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::{AccountEntry, LayerReader};
use crate::error::ChainError;
use crate::types::BalanceRecord;

pub struct BalanceEnumerator {
    reader: Arc<dyn LayerReader>,
    request_delay: Duration,
}

/// Aggregates derived from one full enumeration pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceAggregates {
    pub total_addresses: u32,
    pub addresses_with_balance: u32,
    pub total_balance_loya: i64,
    pub total_balance_trb: f64,
}

impl BalanceEnumerator {
    pub fn new(reader: Arc<dyn LayerReader>, request_delay: Duration) -> Self {
        BalanceEnumerator {
            reader,
            request_delay,
        }
    }

    /// Every known address with its balance at `height`.
    ///
    /// Fails only if the address listing itself fails; individual balance
    /// lookups degrade to zero.
    pub async fn collect_at_height(
        &self,
        height: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<BalanceRecord>, ChainError> {
        let accounts = self.reader.list_accounts().await?;
        info!(count = accounts.len(), height, "enumerating balances");

        let mut records = Vec::with_capacity(accounts.len());
        for (i, AccountEntry { address, account_type }) in accounts.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ChainError::Cancelled);
            }
            if i > 0 && i % 100 == 0 {
                info!(processed = i, "balance enumeration progress");
            }

            let loya = match self.reader.balance_loya(&address, Some(height)).await {
                Ok(amount) => amount,
                Err(err) if err.is_pruned() => return Err(err),
                Err(err) => {
                    debug!(%address, height, error = %err, "no balance at height, recording zero");
                    0
                }
            };

            records.push(BalanceRecord::new(address, account_type, loya));

            if !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }
        }

        Ok(records)
    }

    pub fn aggregates(records: &[BalanceRecord]) -> BalanceAggregates {
        let total_balance_loya: i64 = records.iter().map(|r| r.loya_balance).sum();
        let total_balance_trb: f64 = records.iter().map(|r| r.trb_balance).sum();
        let addresses_with_balance =
            records.iter().filter(|r| r.loya_balance > 0).count() as u32;

        if records.is_empty() {
            warn!("balance enumeration produced no records");
        }

        BalanceAggregates {
            total_addresses: records.len() as u32,
            addresses_with_balance,
            total_balance_loya,
            total_balance_trb,
        }
    }
}
