//! Ethereum JSON-RPC client
//!
//! Block-by-number queries and ERC-20 `balanceOf` calls against a single
//! HTTP endpoint. The TRB token contract is fixed at construction.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::chain::{EthBlock, EthereumReader};
use crate::config::CollectorConfig;
use crate::error::ChainError;

/// `balanceOf(address)` function selector
const BALANCE_OF_SELECTOR: &str = "70a08231";

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct EthBlockHeader {
    number: String,
    timestamp: String,
}

pub struct EthereumClient {
    rpc_url: String,
    trb_contract: String,
    http_client: reqwest::Client,
}

impl EthereumClient {
    pub fn new(config: &CollectorConfig) -> Result<Self, ChainError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(ChainError::from_reqwest)?;

        Ok(EthereumClient {
            rpc_url: config.ethereum_rpc_url.clone(),
            trb_contract: config.trb_contract.clone(),
            http_client,
        })
    }

    async fn rpc_call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        debug!(method, "ethereum rpc call");
        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(ChainError::from_reqwest)?;

        let envelope: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(ChainError::from_reqwest)?;

        if let Some(error) = envelope.error {
            // Archive gaps and pruned state show up as "missing trie node"
            // or "unknown block" server errors.
            let lowered = error.message.to_lowercase();
            if lowered.contains("missing trie node")
                || lowered.contains("pruned")
                || lowered.contains("unknown block")
            {
                return Err(ChainError::Pruned { height: 0 });
            }
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        envelope
            .result
            .ok_or_else(|| ChainError::NotFound(format!("{method}: empty result")))
    }

    async fn get_block_by_tag(&self, tag: &str) -> Result<EthBlock, ChainError> {
        let header: EthBlockHeader = self
            .rpc_call("eth_getBlockByNumber", json!([tag, false]))
            .await?;

        Ok(EthBlock {
            number: parse_hex_u64(&header.number)?,
            timestamp: parse_hex_u64(&header.timestamp)? as i64,
        })
    }
}

#[async_trait]
impl EthereumReader for EthereumClient {
    async fn get_block(&self, number: u64) -> Result<EthBlock, ChainError> {
        self.get_block_by_tag(&format!("0x{number:x}")).await
    }

    async fn latest_block(&self) -> Result<EthBlock, ChainError> {
        self.get_block_by_tag("latest").await
    }

    async fn erc20_balance_of(&self, owner: &str, at_block: u64) -> Result<u128, ChainError> {
        let owner_word = format!("{:0>64}", owner.trim_start_matches("0x").to_lowercase());
        let data = format!("0x{BALANCE_OF_SELECTOR}{owner_word}");

        let result: String = self
            .rpc_call(
                "eth_call",
                json!([
                    { "to": self.trb_contract, "data": data },
                    format!("0x{at_block:x}"),
                ]),
            )
            .await?;

        parse_hex_u128(&result)
    }
}

fn parse_hex_u64(hex: &str) -> Result<u64, ChainError> {
    u64::from_str_radix(hex.trim_start_matches("0x"), 16)
        .map_err(|e| ChainError::Parse(format!("invalid hex quantity '{hex}': {e}")))
}

fn parse_hex_u128(hex: &str) -> Result<u128, ChainError> {
    let stripped = hex.trim_start_matches("0x");
    // A uint256 return word; TRB amounts fit comfortably in u128, so reject
    // anything wider instead of truncating.
    let significant = stripped.trim_start_matches('0');
    if significant.len() > 32 {
        return Err(ChainError::Parse(format!(
            "balance word too wide for u128: {hex}"
        )));
    }
    if significant.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(significant, 16)
        .map_err(|e| ChainError::Parse(format!("invalid hex balance '{hex}': {e}")))
}
