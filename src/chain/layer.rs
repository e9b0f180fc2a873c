//! Tellor Layer client
//!
//! Tendermint RPC for block headers and chain status, Cosmos LCD/REST for
//! the bank, staking, and auth modules. Historical module queries pin the
//! height through the `x-cosmos-block-height` header.

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::chain::{AccountEntry, LayerReader, LayerStatus};
use crate::config::CollectorConfig;
use crate::error::ChainError;
use crate::types::{StakingPool, LOYA_PER_TRB};

const LOYA_DENOM: &str = "loya";
const HEIGHT_HEADER: &str = "x-cosmos-block-height";

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
struct SyncInfo {
    latest_block_height: String,
    latest_block_time: String,
    #[serde(default)]
    earliest_block_height: Option<String>,
    #[serde(default)]
    earliest_block_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockResult {
    block: BlockBody,
}

#[derive(Debug, Deserialize)]
struct BlockBody {
    header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    time: String,
}

#[derive(Debug, Deserialize)]
struct SupplyResponse {
    #[serde(default)]
    supply: Vec<Coin>,
}

#[derive(Debug, Deserialize)]
struct Coin {
    denom: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct StakingPoolResponse {
    pool: PoolBody,
}

#[derive(Debug, Deserialize)]
struct PoolBody {
    not_bonded_tokens: String,
    bonded_tokens: String,
}

#[derive(Debug, Deserialize)]
struct AccountsResponse {
    #[serde(default)]
    accounts: Vec<Value>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    next_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalancesResponse {
    #[serde(default)]
    balances: Vec<Coin>,
}

pub struct LayerClient {
    rpc_url: String,
    api_url: String,
    http_client: reqwest::Client,
}

impl LayerClient {
    pub fn new(config: &CollectorConfig) -> Result<Self, ChainError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(ChainError::from_reqwest)?;

        Ok(LayerClient {
            rpc_url: config.layer_rpc_url.trim_end_matches('/').to_string(),
            api_url: config.layer_api_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    async fn rpc_get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        height: Option<u64>,
    ) -> Result<T, ChainError> {
        let url = format!("{}/{}", self.rpc_url, path);
        debug!(%url, "layer rpc query");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(ChainError::from_reqwest)?;

        let envelope: RpcEnvelope<T> = response
            .json()
            .await
            .map_err(ChainError::from_reqwest)?;

        if let Some(error) = envelope.error {
            let detail = error.data.unwrap_or_default();
            if detail.contains("lowest height") || detail.contains("is not available") {
                return Err(ChainError::Pruned {
                    height: height.unwrap_or(0),
                });
            }
            return Err(ChainError::Rpc {
                code: error.code,
                message: format!("{} {}", error.message, detail),
            });
        }

        envelope
            .result
            .ok_or_else(|| ChainError::NotFound(format!("{path}: empty result")))
    }

    async fn lcd_get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        height: Option<u64>,
        query: &[(&str, &str)],
    ) -> Result<T, ChainError> {
        let url = format!("{}{}", self.api_url, path);
        debug!(%url, ?height, "layer lcd query");

        let mut request = self.http_client.get(&url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(h) = height {
            request = request.header(HEIGHT_HEADER, h.to_string());
        }

        let response = request.send().await.map_err(ChainError::from_reqwest)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if body.contains("lowest height") || body.contains("is not available") {
                return Err(ChainError::Pruned {
                    height: height.unwrap_or(0),
                });
            }
            return Err(ChainError::Rpc {
                code: i64::from(status.as_u16()),
                message: body,
            });
        }

        response.json().await.map_err(ChainError::from_reqwest)
    }
}

#[async_trait]
impl LayerReader for LayerClient {
    async fn status(&self) -> Result<LayerStatus, ChainError> {
        let status: StatusResult = self.rpc_get("status", None).await?;
        let sync = status.sync_info;

        let latest_height = parse_height(&sync.latest_block_height)?;
        let latest_timestamp = parse_block_time(&sync.latest_block_time)?;
        let earliest_height = sync
            .earliest_block_height
            .as_deref()
            .map(parse_height)
            .transpose()?
            .unwrap_or(1);
        let earliest_timestamp = sync
            .earliest_block_time
            .as_deref()
            .map(parse_block_time)
            .transpose()?
            .unwrap_or(latest_timestamp);

        Ok(LayerStatus {
            latest_height,
            latest_timestamp,
            earliest_height,
            earliest_timestamp,
        })
    }

    async fn block_timestamp(&self, height: u64) -> Result<i64, ChainError> {
        let result: BlockResult = self
            .rpc_get(&format!("block?height={height}"), Some(height))
            .await?;
        parse_block_time(&result.block.header.time)
    }

    async fn total_supply_loya(&self, height: u64) -> Result<i64, ChainError> {
        let response: SupplyResponse = self
            .lcd_get("/cosmos/bank/v1beta1/supply", Some(height), &[])
            .await?;

        response
            .supply
            .iter()
            .find(|coin| coin.denom == LOYA_DENOM)
            .ok_or_else(|| {
                ChainError::NotFound(format!("no {LOYA_DENOM} supply at height {height}"))
            })
            .and_then(|coin| parse_amount(&coin.amount))
    }

    async fn staking_pool(&self, height: u64) -> Result<StakingPool, ChainError> {
        let response: StakingPoolResponse = self
            .lcd_get("/cosmos/staking/v1beta1/pool", Some(height), &[])
            .await?;

        Ok(StakingPool {
            bonded_trb: parse_amount(&response.pool.bonded_tokens)? as f64 / LOYA_PER_TRB,
            not_bonded_trb: parse_amount(&response.pool.not_bonded_tokens)? as f64
                / LOYA_PER_TRB,
        })
    }

    async fn list_accounts(&self) -> Result<Vec<AccountEntry>, ChainError> {
        let mut entries = Vec::new();
        let mut next_key: Option<String> = None;
        let mut page = 0u32;

        loop {
            page += 1;
            let query: Vec<(&str, &str)> = match &next_key {
                Some(key) => vec![("pagination.key", key.as_str())],
                None => Vec::new(),
            };

            let response: AccountsResponse = self
                .lcd_get("/cosmos/auth/v1beta1/accounts", None, &query)
                .await?;
            debug!(page, count = response.accounts.len(), "accounts page");

            for account in &response.accounts {
                if let Some(entry) = classify_account(account) {
                    if !entries.iter().any(|e: &AccountEntry| e.address == entry.address) {
                        entries.push(entry);
                    }
                }
            }

            next_key = response.pagination.and_then(|p| p.next_key);
            if next_key.is_none() {
                break;
            }
        }

        Ok(entries)
    }

    async fn balance_loya(
        &self,
        address: &str,
        height: Option<u64>,
    ) -> Result<i64, ChainError> {
        let response: BalancesResponse = self
            .lcd_get(
                &format!("/cosmos/bank/v1beta1/balances/{address}"),
                height,
                &[],
            )
            .await?;

        for coin in &response.balances {
            if coin.denom == LOYA_DENOM {
                return parse_amount(&coin.amount);
            }
        }
        Ok(0)
    }
}

/// Map a raw auth-module account object to (address, type tag).
///
/// ModuleAccount wraps its address in `base_account` and carries a module
/// `name`; anything else is tagged with the proto type suffix.
fn classify_account(account: &Value) -> Option<AccountEntry> {
    let type_url = account.get("@type").and_then(Value::as_str).unwrap_or("unknown");

    let (address, account_type) = match type_url {
        "/cosmos.auth.v1beta1.BaseAccount" => (
            account.get("address").and_then(Value::as_str),
            "BaseAccount".to_string(),
        ),
        "/cosmos.auth.v1beta1.ModuleAccount" => {
            let name = account.get("name").and_then(Value::as_str).unwrap_or("unknown");
            (
                account
                    .get("base_account")
                    .and_then(|b| b.get("address"))
                    .and_then(Value::as_str),
                format!("ModuleAccount({name})"),
            )
        }
        other => {
            let address = account
                .get("address")
                .and_then(Value::as_str)
                .or_else(|| {
                    account
                        .get("base_account")
                        .and_then(|b| b.get("address"))
                        .and_then(Value::as_str)
                });
            let tag = other.rsplit('.').next().unwrap_or(other).to_string();
            (address, tag)
        }
    };

    address.map(|addr| AccountEntry {
        address: addr.to_string(),
        account_type,
    })
}

fn parse_height(raw: &str) -> Result<u64, ChainError> {
    raw.parse()
        .map_err(|e| ChainError::Parse(format!("invalid height '{raw}': {e}")))
}

fn parse_amount(raw: &str) -> Result<i64, ChainError> {
    raw.parse()
        .map_err(|e| ChainError::Parse(format!("invalid amount '{raw}': {e}")))
}

/// Tendermint emits RFC3339 with nanosecond precision
/// ("2025-06-23T17:23:55.344314112Z"); chrono handles that directly.
fn parse_block_time(raw: &str) -> Result<i64, ChainError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp())
        .map_err(|e| ChainError::Parse(format!("invalid block time '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_block_time_nanoseconds() {
        let ts = parse_block_time("2025-06-23T17:23:55.344314112Z").unwrap();
        assert_eq!(ts, 1750699435);
    }

    #[test]
    fn test_parse_block_time_rejects_garbage() {
        assert!(parse_block_time("not-a-time").is_err());
    }

    #[test]
    fn test_classify_base_account() {
        let account = json!({
            "@type": "/cosmos.auth.v1beta1.BaseAccount",
            "address": "tellor1abc",
        });
        let entry = classify_account(&account).unwrap();
        assert_eq!(entry.address, "tellor1abc");
        assert_eq!(entry.account_type, "BaseAccount");
    }

    #[test]
    fn test_classify_module_account() {
        let account = json!({
            "@type": "/cosmos.auth.v1beta1.ModuleAccount",
            "name": "bonded_tokens_pool",
            "base_account": { "address": "tellor1pool" },
        });
        let entry = classify_account(&account).unwrap();
        assert_eq!(entry.address, "tellor1pool");
        assert_eq!(entry.account_type, "ModuleAccount(bonded_tokens_pool)");
    }

    #[test]
    fn test_classify_unknown_type_uses_suffix() {
        let account = json!({
            "@type": "/cosmos.vesting.v1beta1.ContinuousVestingAccount",
            "base_account": { "address": "tellor1vest" },
        });
        let entry = classify_account(&account).unwrap();
        assert_eq!(entry.address, "tellor1vest");
        assert_eq!(entry.account_type, "ContinuousVestingAccount");
    }

    #[test]
    fn test_classify_account_without_address() {
        let account = json!({ "@type": "/cosmos.auth.v1beta1.BaseAccount" });
        assert!(classify_account(&account).is_none());
    }
}
