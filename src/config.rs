//! Collector configuration
//!
//! One struct, built from the environment at startup and passed by reference
//! to every component constructor. No module-level endpoint globals.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Ethereum JSON-RPC endpoint
    pub ethereum_rpc_url: String,
    /// TRB token contract address (ERC-20)
    pub trb_contract: String,
    /// Bridge contract address whose TRB balance is tracked
    pub bridge_contract: String,

    /// Tellor Layer Tendermint RPC endpoint (status, block-by-height)
    pub layer_rpc_url: String,
    /// Tellor Layer LCD/REST endpoint (bank, staking, auth modules)
    pub layer_api_url: String,

    /// SQLite database path
    pub db_path: String,

    /// Acceptable drift between an Ethereum timestamp and the resolved
    /// Layer block, in seconds
    pub tolerance_seconds: i64,
    /// Per-request timeout for chain calls, in seconds
    pub request_timeout_secs: u64,
    /// Delay between per-address balance requests, in milliseconds
    pub balance_request_delay_ms: u64,
    /// Delay between snapshot collections in a batch, in seconds
    pub collection_delay_secs: u64,

    /// Optional path to a bridge transaction ledger (JSON) used as a
    /// fallback when the live balance call fails
    pub bridge_ledger_path: Option<String>,

    /// Monitoring loop interval, in seconds
    pub monitor_interval_secs: u64,
    /// Maximum snapshots to re-attempt per backfill pass
    pub max_backfill: usize,
    /// Maximum blocks to process per range collection
    pub max_blocks: usize,
    /// Hours-back window for range collection
    pub hours_back: u64,
    /// Target spacing between collected blocks, in seconds
    pub block_interval_secs: u64,
}

impl CollectorConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = CollectorConfig {
            ethereum_rpc_url: env::var("ETHEREUM_RPC_URL")
                .unwrap_or_else(|_| "https://rpc.sepolia.org".to_string()),

            trb_contract: env::var("SEPOLIA_TRB_CONTRACT")
                .unwrap_or_else(|_| "0x80fc34a2f9FfE86F41580F47368289C402DEc660".to_string()),

            bridge_contract: env::var("SEPOLIA_BRIDGE_CONTRACT")
                .unwrap_or_else(|_| "0x5acb5977f35b1A91C4fE0F4386eB669E046776F2".to_string()),

            layer_rpc_url: env::var("TELLOR_LAYER_RPC_URL")
                .unwrap_or_else(|_| "https://node-palmito.tellorlayer.com/rpc/".to_string()),

            layer_api_url: env::var("LAYER_API_URL")
                .unwrap_or_else(|_| "http://node-palmito.tellorlayer.com:1317".to_string()),

            db_path: env::var("DB_PATH").unwrap_or_else(|_| "tellor_balances.db".to_string()),

            tolerance_seconds: env::var("TOLERANCE_SECONDS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,

            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,

            balance_request_delay_ms: env::var("BALANCE_REQUEST_DELAY_MS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,

            collection_delay_secs: env::var("COLLECTION_DELAY_SECS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()?,

            bridge_ledger_path: env::var("BRIDGE_LEDGER_PATH").ok(),

            monitor_interval_secs: env::var("MONITOR_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,

            max_backfill: env::var("MAX_BACKFILL")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,

            max_blocks: env::var("MAX_BLOCKS")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,

            hours_back: env::var("HOURS_BACK")
                .unwrap_or_else(|_| "24".to_string())
                .parse()?,

            block_interval_secs: env::var("BLOCK_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("ETHEREUM_RPC_URL", &self.ethereum_rpc_url),
            ("TELLOR_LAYER_RPC_URL", &self.layer_rpc_url),
            ("LAYER_API_URL", &self.layer_api_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("invalid {}: {}", name, url);
            }
        }
        if self.tolerance_seconds <= 0 {
            bail!("TOLERANCE_SECONDS must be positive");
        }
        if self.db_path.is_empty() {
            bail!("DB_PATH must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> CollectorConfig {
        CollectorConfig {
            ethereum_rpc_url: "https://rpc.sepolia.org".into(),
            trb_contract: "0x80fc34a2f9FfE86F41580F47368289C402DEc660".into(),
            bridge_contract: "0x5acb5977f35b1A91C4fE0F4386eB669E046776F2".into(),
            layer_rpc_url: "https://node.example.com/rpc/".into(),
            layer_api_url: "http://node.example.com:1317".into(),
            db_path: "test.db".into(),
            tolerance_seconds: 300,
            request_timeout_secs: 30,
            balance_request_delay_ms: 10,
            collection_delay_secs: 0,
            bridge_ledger_path: None,
            monitor_interval_secs: 3600,
            max_backfill: 20,
            max_blocks: 50,
            hours_back: 24,
            block_interval_secs: 3600,
        }
    }

    #[test]
    fn test_validate_accepts_sane_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = base_config();
        config.layer_rpc_url = "node.example.com".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_tolerance() {
        let mut config = base_config();
        config.tolerance_seconds = 0;
        assert!(config.validate().is_err());
    }
}
