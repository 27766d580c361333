use super::types::{AccountBalance, AccountInfo, BlockCount, BlockInfo};
use super::LedgerClient;
use crate::config::LedgerConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use nanowallet_types::{Address, BlockHash, StateBlock, Subtype};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const ACCOUNT_NOT_FOUND: &str = "Account not found";

/// JSON-RPC client for a ledger node.
pub struct RpcClient {
    http: Client,
    url: String,
    max_retries: u32,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("url", &self.url)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Client bound to one endpoint.
    pub fn new(url: &str, config: &LedgerConfig) -> AppResult<Self> {
        let http = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
        })
    }

    /// Probe the configured endpoints in order and keep the first whose
    /// unchecked backlog is below `max_unchecked`. Falls back to the first
    /// endpoint that answered at all.
    pub async fn connect(config: &LedgerConfig) -> AppResult<Self> {
        let mut fallback = None;

        for url in &config.rpc_urls {
            let client = Self::new(url, config)?;
            match client.block_count().await {
                Ok(count) if count.unchecked < config.max_unchecked => {
                    info!(url = %url, count = count.count, unchecked = count.unchecked, "Selected RPC endpoint");
                    return Ok(client);
                }
                Ok(count) => {
                    warn!(url = %url, unchecked = count.unchecked, "RPC endpoint backlogged, trying next");
                    if fallback.is_none() {
                        fallback = Some(client);
                    }
                }
                Err(e) => warn!(url = %url, error = %e, "RPC endpoint unreachable"),
            }
        }

        fallback.ok_or_else(|| AppError::network("no RPC endpoint reachable"))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST one action with retries. An `{"error": ...}` document is not
    /// retried: the node answered, it just said no.
    async fn call<T: DeserializeOwned>(&self, body: Value) -> AppResult<T> {
        let action = body["action"].as_str().unwrap_or("?").to_string();
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(100 * 2u64.pow(attempt));
                warn!(action = %action, attempt, delay_ms = delay.as_millis() as u64, "Retrying RPC call");
                tokio::time::sleep(delay).await;
            }

            match self.http.post(&self.url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    let value: Value = match response.json().await {
                        Ok(v) => v,
                        Err(e) => {
                            error!(action = %action, error = %e, "Failed to parse RPC response");
                            last_error = Some(map_reqwest(e));
                            continue;
                        }
                    };
                    if let Some(msg) = value.get("error").and_then(Value::as_str) {
                        debug!(action = %action, error = msg, "RPC returned error");
                        return Err(AppError::rpc(msg));
                    }
                    return serde_json::from_value(value).map_err(|e| {
                        AppError::rpc(format!("unexpected {} response: {}", action, e))
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    error!(action = %action, %status, body = %body, "RPC request failed");
                    last_error = Some(AppError::network(format!("{} returned {}", action, status)));
                }
                Err(e) => {
                    error!(action = %action, error = %e, "RPC request failed");
                    last_error = Some(map_reqwest(e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::network("RPC request failed")))
    }
}

fn map_reqwest(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::Timeout
    } else {
        AppError::Http(e)
    }
}

fn is_account_not_found(err: &AppError) -> bool {
    matches!(err, AppError::Rpc(msg) if msg == ACCOUNT_NOT_FOUND)
}

fn parse_u128(s: &str) -> AppResult<u128> {
    s.parse()
        .map_err(|_| AppError::rpc(format!("bad amount: {}", s)))
}

fn parse_u64(s: &str) -> AppResult<u64> {
    s.parse()
        .map_err(|_| AppError::rpc(format!("bad integer: {}", s)))
}

#[derive(Deserialize)]
struct BlockCountResponse {
    count: String,
    unchecked: String,
}

/// Newer nodes send both `pending` and `receivable`; older ones only `pending`.
#[derive(Deserialize)]
struct BalanceResponse {
    balance: String,
    #[serde(default)]
    pending: Option<String>,
    #[serde(default)]
    receivable: Option<String>,
}

impl BalanceResponse {
    fn into_balance(self) -> AppResult<AccountBalance> {
        let receivable = self.receivable.or(self.pending).unwrap_or_else(|| "0".into());
        Ok(AccountBalance {
            balance: parse_u128(&self.balance)?,
            receivable: parse_u128(&receivable)?,
        })
    }
}

#[derive(Deserialize)]
struct BalancesResponse {
    #[serde(default)]
    balances: HashMap<Address, BalanceResponse>,
}

#[derive(Deserialize)]
struct RepresentativeResponse {
    representative: Address,
}

#[derive(Deserialize)]
struct AccountInfoResponse {
    frontier: BlockHash,
    open_block: BlockHash,
    representative: Address,
    balance: String,
    block_count: String,
    #[serde(default)]
    confirmation_height: Option<String>,
    #[serde(default)]
    confirmation_height_frontier: Option<BlockHash>,
}

#[derive(Deserialize)]
struct BlockInfoResponse {
    block_account: Address,
    height: String,
    #[serde(default)]
    subtype: Option<Subtype>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    confirmed: Value,
    contents: StateBlock,
}

/// Nodes differ on whether booleans are JSON booleans or "true"/"false".
fn parse_flag(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true",
        _ => false,
    }
}

/// The node carries no receive order: arrays come back in ledger order,
/// maps as object keys. Sort so both shapes agree.
fn receivable_hashes(v: &Value) -> AppResult<Vec<BlockHash>> {
    let mut hashes = parse_hash_list(v)?;
    hashes.sort();
    Ok(hashes)
}

/// Empty hash lists come back as `""` from some node versions.
fn parse_hash_list(v: &Value) -> AppResult<Vec<BlockHash>> {
    match v {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| AppError::rpc("hash list entry is not a string"))?
                    .parse()
                    .map_err(AppError::from)
            })
            .collect(),
        Value::Object(map) => map
            .keys()
            .map(|k| k.parse().map_err(AppError::from))
            .collect(),
        Value::String(s) if s.is_empty() => Ok(Vec::new()),
        Value::Null => Ok(Vec::new()),
        other => Err(AppError::rpc(format!("unexpected hash list: {}", other))),
    }
}

#[async_trait]
impl LedgerClient for RpcClient {
    async fn block_count(&self) -> AppResult<BlockCount> {
        let r: BlockCountResponse = self.call(json!({ "action": "block_count" })).await?;
        Ok(BlockCount {
            count: parse_u64(&r.count)?,
            unchecked: parse_u64(&r.unchecked)?,
        })
    }

    async fn account_balance(&self, account: &Address) -> AppResult<AccountBalance> {
        let r: BalanceResponse = self
            .call(json!({ "action": "account_balance", "account": account }))
            .await?;
        r.into_balance()
    }

    async fn accounts_balances(
        &self,
        accounts: &[Address],
    ) -> AppResult<HashMap<Address, AccountBalance>> {
        if accounts.is_empty() {
            return Ok(HashMap::new());
        }
        let r: BalancesResponse = self
            .call(json!({ "action": "accounts_balances", "accounts": accounts }))
            .await?;

        let mut out = HashMap::with_capacity(accounts.len());
        for (address, balance) in r.balances {
            out.insert(address, balance.into_balance()?);
        }
        for address in accounts {
            out.entry(*address).or_default();
        }
        Ok(out)
    }

    async fn account_representative(&self, account: &Address) -> AppResult<Address> {
        let r: RepresentativeResponse = self
            .call(json!({ "action": "account_representative", "account": account }))
            .await?;
        Ok(r.representative)
    }

    async fn account_info(&self, account: &Address) -> AppResult<Option<AccountInfo>> {
        let result: AppResult<AccountInfoResponse> = self
            .call(json!({
                "action": "account_info",
                "account": account,
                "representative": "true",
            }))
            .await;

        let r = match result {
            Ok(r) => r,
            Err(e) if is_account_not_found(&e) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(AccountInfo {
            frontier: r.frontier,
            open_block: r.open_block,
            representative: r.representative,
            balance: parse_u128(&r.balance)?,
            block_count: parse_u64(&r.block_count)?,
            confirmation_height: r
                .confirmation_height
                .as_deref()
                .map(parse_u64)
                .transpose()?
                .unwrap_or(0),
            confirmation_frontier: r.confirmation_height_frontier.unwrap_or_default(),
        }))
    }

    async fn block_info(&self, hash: &BlockHash) -> AppResult<BlockInfo> {
        let r: BlockInfoResponse = self
            .call(json!({ "action": "block_info", "json_block": "true", "hash": hash }))
            .await?;
        Ok(BlockInfo {
            account: r.block_account,
            height: parse_u64(&r.height)?,
            subtype: r.subtype,
            amount: r.amount.as_deref().map(parse_u128).transpose()?.unwrap_or(0),
            confirmed: parse_flag(&r.confirmed),
            contents: r.contents,
        })
    }

    async fn successors(&self, hash: &BlockHash, count: u64) -> AppResult<Vec<BlockHash>> {
        let r: Value = self
            .call(json!({ "action": "successors", "block": hash, "count": count.to_string() }))
            .await?;
        parse_hash_list(&r["blocks"])
    }

    async fn receivable(&self, account: &Address, count: u64) -> AppResult<Vec<BlockHash>> {
        let r: Value = self
            .call(json!({ "action": "receivable", "account": account, "count": count.to_string() }))
            .await?;
        receivable_hashes(&r["blocks"])
    }

    async fn work_generate(&self, root: &BlockHash) -> AppResult<u64> {
        let r: Value = self.call(json!({ "action": "work_generate", "hash": root })).await?;
        let work = r["work"]
            .as_str()
            .ok_or_else(|| AppError::rpc("work_generate returned no work"))?;
        u64::from_str_radix(work, 16).map_err(|_| AppError::rpc(format!("bad work: {}", work)))
    }

    async fn process(&self, block: &StateBlock, subtype: Subtype) -> AppResult<BlockHash> {
        let mut wire = serde_json::to_value(block)?;
        wire["type"] = json!("state");
        let r: Value = self
            .call(json!({
                "action": "process",
                "json_block": "true",
                "subtype": subtype,
                "block": wire,
            }))
            .await?;
        let hash = r["hash"]
            .as_str()
            .ok_or_else(|| AppError::rpc("process returned no hash"))?;
        Ok(hash.parse()?)
    }
}
