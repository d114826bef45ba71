//! Chain context for value retrieval

use alloy_primitives::Address;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Block the reads are pinned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockTag {
    #[default]
    Latest,
    Number(u64),
}

impl BlockTag {
    /// JSON-RPC block parameter
    pub fn to_rpc_param(&self) -> String {
        match self {
            BlockTag::Latest => "latest".to_string(),
            BlockTag::Number(n) => format!("0x{:x}", n),
        }
    }
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockTag::Latest => f.write_str("latest"),
            BlockTag::Number(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for BlockTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("latest") {
            return Ok(BlockTag::Latest);
        }
        let parsed = match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => s.parse::<u64>(),
        };
        parsed
            .map(BlockTag::Number)
            .map_err(|e| format!("Invalid block '{}': {}", s, e))
    }
}

/// Where values are read from
///
/// With a proxy, the layout comes from the logic contract at `address`
/// while the words are read from `storage_address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainContext {
    /// Target (logic) contract address
    pub address: Address,
    /// Distinct storage address (proxy)
    #[serde(default)]
    pub storage_address: Option<Address>,
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub block: BlockTag,
}

impl ChainContext {
    pub fn new(address: Address) -> Self {
        Self { address, storage_address: None, rpc_url: None, block: BlockTag::Latest }
    }

    pub fn with_rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    pub fn with_storage_address(mut self, storage: Address) -> Self {
        self.storage_address = Some(storage);
        self
    }

    pub fn with_block(mut self, block: BlockTag) -> Self {
        self.block = block;
        self
    }

    /// Address whose storage is actually read
    pub fn storage_target(&self) -> Address {
        self.storage_address.unwrap_or(self.address)
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self.storage_address, Some(s) if s != self.address)
    }
}
