//! Chain reader interfaces
//!
//! Both chains are read through object-safe traits so the reconciliation
//! logic never cares which transport backs a query. Production
//! implementations live in `ethereum` and `layer`; tests substitute doubles.

use async_trait::async_trait;

use crate::error::ChainError;
use crate::types::StakingPool;

pub mod ethereum;
pub mod layer;

pub use ethereum::EthereumClient;
pub use layer::LayerClient;

/// A block header on the Ethereum side: number plus Unix timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthBlock {
    pub number: u64,
    pub timestamp: i64,
}

/// Node-reported chain extent on the Layer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerStatus {
    pub latest_height: u64,
    pub latest_timestamp: i64,
    pub earliest_height: u64,
    pub earliest_timestamp: i64,
}

impl LayerStatus {
    /// Average seconds per block across the node's available range.
    /// Falls back to a nominal figure when the range is degenerate.
    pub fn avg_block_time(&self) -> f64 {
        if self.latest_height > self.earliest_height {
            (self.latest_timestamp - self.earliest_timestamp) as f64
                / (self.latest_height - self.earliest_height) as f64
        } else {
            2.0
        }
    }
}

/// One entry from the Layer account listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountEntry {
    pub address: String,
    pub account_type: String,
}

/// Read-only view of an EVM chain.
#[async_trait]
pub trait EthereumReader: Send + Sync {
    /// Fetch a block header by number.
    async fn get_block(&self, number: u64) -> Result<EthBlock, ChainError>;

    /// Fetch the latest block header.
    async fn latest_block(&self) -> Result<EthBlock, ChainError>;

    /// ERC-20 `balanceOf(owner)` on the configured token contract at a
    /// specific block, in wei.
    async fn erc20_balance_of(&self, owner: &str, at_block: u64) -> Result<u128, ChainError>;
}

/// Read-only view of the Tellor Layer chain.
#[async_trait]
pub trait LayerReader: Send + Sync {
    /// Latest/earliest height and timestamps known to the node.
    async fn status(&self) -> Result<LayerStatus, ChainError>;

    /// Unix timestamp of the block at `height`.
    async fn block_timestamp(&self, height: u64) -> Result<i64, ChainError>;

    /// Total supply of loya at `height`.
    async fn total_supply_loya(&self, height: u64) -> Result<i64, ChainError>;

    /// Bonded / not-bonded staking pool figures at `height`.
    async fn staking_pool(&self, height: u64) -> Result<StakingPool, ChainError>;

    /// Every account known to the auth module, with its type tag.
    async fn list_accounts(&self) -> Result<Vec<AccountEntry>, ChainError>;

    /// loya balance of `address`, historical when `height` is given,
    /// current otherwise.
    async fn balance_loya(&self, address: &str, height: Option<u64>)
        -> Result<i64, ChainError>;
}
