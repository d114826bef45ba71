//! JSON-RPC storage reader
//!
//! Reads words with `eth_getStorageAt`, batching multi-slot reads into a
//! single JSON-RPC batch request. All reads of one reader go to the same
//! block; [`RpcStorageReader::pin_block`] resolves `latest` to a concrete
//! number so a whole fetch sees one state.

use crate::reader::{with_retries, FetchSummary, ValueReader};
use alloy_primitives::{Address, B256, U256};
use serde::Deserialize;
use serde_json::{json, Value};
use slotscope_core::{BlockTag, ChainContext, LayoutStore, ReaderConfig, SlotScopeError, StorageReader};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

/// Requests per JSON-RPC batch
const MAX_BATCH: usize = 100;

/// Transport-level failures
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("RPC request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Malformed RPC response: {0}")]
    Malformed(String),
}

impl From<RpcError> for SlotScopeError {
    fn from(e: RpcError) -> Self {
        SlotScopeError::TransportFailure(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

impl RpcResponse {
    fn into_result(self) -> Result<Value, RpcError> {
        if let Some(err) = self.error {
            return Err(RpcError::Rpc { code: err.code, message: err.message });
        }
        self.result.ok_or_else(|| RpcError::Malformed("response has neither result nor error".to_string()))
    }
}

/// Storage reader backed by an Ethereum JSON-RPC endpoint
#[derive(Debug)]
pub struct RpcStorageReader {
    client: reqwest::Client,
    url: String,
    block: BlockTag,
    next_id: AtomicU64,
}

impl RpcStorageReader {
    pub fn new(url: impl Into<String>, block: BlockTag) -> Self {
        Self { client: reqwest::Client::new(), url: url.into(), block, next_id: AtomicU64::new(1) }
    }

    /// Build a reader for the endpoint and block of a chain context
    pub fn from_context(ctx: &ChainContext) -> Result<Self, SlotScopeError> {
        let url = ctx.rpc_url.as_deref().ok_or(SlotScopeError::MissingEndpoint)?;
        Ok(Self::new(url, ctx.block))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn block(&self) -> BlockTag {
        self.block
    }

    /// Current head block number
    pub async fn block_number(&self) -> Result<u64, SlotScopeError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| RpcError::Malformed(format!("block number is not a string: {}", result)))?;
        let number = u64::from_str_radix(hex_str.trim_start_matches("0x"), 16)
            .map_err(|e| RpcError::Malformed(format!("invalid block number {}: {}", hex_str, e)))?;
        Ok(number)
    }

    /// Replace `latest` with the current head so later reads agree
    ///
    /// The head lookup is retried and timed out like a storage read.
    pub async fn pin_block(&mut self, config: &ReaderConfig) -> Result<BlockTag, SlotScopeError> {
        if self.block == BlockTag::Latest {
            let timeout = config.timeout();
            let this = &*self;
            let number = with_retries(config.retries, config.initial_backoff(), config.max_backoff(), || async move {
                match tokio::time::timeout(timeout, this.block_number()).await {
                    Ok(result) => result,
                    Err(_) => Err(SlotScopeError::TransportFailure(format!(
                        "block number request timed out after {:?}",
                        timeout
                    ))),
                }
            })
            .await?;
            debug!(block = number, "Pinned latest block");
            self.block = BlockTag::Number(number);
        }
        Ok(self.block)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.next_id(),
        });
        let response: RpcResponse = self.client.post(&self.url).json(&request).send().await?.json().await?;
        response.into_result()
    }

    /// Send one batch, returning results in request order
    async fn batch(&self, method: &str, params: Vec<Value>) -> Result<Vec<Value>, RpcError> {
        let first = self.next_id.fetch_add(params.len() as u64, Ordering::Relaxed);
        let requests: Vec<Value> = params
            .into_iter()
            .enumerate()
            .map(|(i, p)| json!({ "jsonrpc": "2.0", "method": method, "params": p, "id": first + i as u64 }))
            .collect();
        let expected = requests.len();

        let mut responses: Vec<RpcResponse> =
            self.client.post(&self.url).json(&requests).send().await?.json().await?;
        if responses.len() != expected {
            return Err(RpcError::Malformed(format!(
                "batch of {} requests returned {} responses",
                expected,
                responses.len()
            )));
        }
        // servers may answer a batch in any order
        responses.sort_by_key(|r| r.id.unwrap_or(u64::MAX));
        responses
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                if r.id != Some(first + i as u64) {
                    return Err(RpcError::Malformed(format!("unexpected response id {:?}", r.id)));
                }
                r.into_result()
            })
            .collect()
    }

    fn storage_params(&self, address: Address, slot: U256) -> Value {
        json!([format!("{:#x}", address), format!("{:#x}", slot), self.block.to_rpc_param()])
    }
}

/// Parse a returned word, left-padding short hex values
fn parse_word(value: &Value) -> Result<B256, RpcError> {
    let hex_str = value
        .as_str()
        .ok_or_else(|| RpcError::Malformed(format!("storage value is not a string: {}", value)))?;
    let digits = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let digits = if digits.len() % 2 == 1 { format!("0{}", digits) } else { digits.to_string() };
    let bytes = hex::decode(&digits).map_err(|e| RpcError::Malformed(format!("invalid hex {}: {}", hex_str, e)))?;
    if bytes.len() > 32 {
        return Err(RpcError::Malformed(format!("storage value longer than 32 bytes: {}", hex_str)));
    }
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(B256::from(word))
}

impl StorageReader for RpcStorageReader {
    async fn read_word(&self, address: Address, slot: U256) -> Result<B256, SlotScopeError> {
        let result = self.call("eth_getStorageAt", self.storage_params(address, slot)).await?;
        Ok(parse_word(&result)?)
    }

    async fn read_words(&self, address: Address, slots: Vec<U256>) -> Result<Vec<B256>, SlotScopeError> {
        if slots.len() == 1 {
            return Ok(vec![self.read_word(address, slots[0]).await?]);
        }
        let mut words = Vec::with_capacity(slots.len());
        for chunk in slots.chunks(MAX_BATCH) {
            let params = chunk.iter().map(|slot| self.storage_params(address, *slot)).collect();
            for value in self.batch("eth_getStorageAt", params).await? {
                words.push(parse_word(&value)?);
            }
        }
        Ok(words)
    }
}

/// Fetch values for every readable record of `store` from the context's node
///
/// `latest` is pinned to a block number first so all reads agree.
pub async fn fetch_values(
    store: &mut LayoutStore,
    ctx: &ChainContext,
    config: ReaderConfig,
) -> Result<FetchSummary, SlotScopeError> {
    if ctx.storage_address.is_some() && store.is_empty() {
        return Err(SlotScopeError::InconsistentProxyConfig(
            "a storage address was given but no logic-contract layout was resolved".to_string(),
        ));
    }
    let mut reader = RpcStorageReader::from_context(ctx)?;
    let block = reader.pin_block(&config).await?;
    let ctx = ctx.clone().with_block(block);
    ValueReader::new(reader, config).fetch_values(store, &ctx).await
}
