//! Storage access abstraction
//!
//! The resolver never talks to a node directly; it only needs "read the
//! 32-byte word at (address, slot)". Implementations live next to their
//! transport: [`MemoryStorageReader`] here, the JSON-RPC reader in
//! `slotscope-ethereum`.

use crate::error::SlotScopeError;
use alloy_primitives::{Address, B256, U256};
use std::collections::HashMap;
use std::future::Future;

/// Read raw storage words
pub trait StorageReader: Send + Sync {
    /// Read one word; unset slots read as zero
    fn read_word(&self, address: Address, slot: U256) -> impl Future<Output = Result<B256, SlotScopeError>> + Send;

    /// Read several words, returned in the order requested
    ///
    /// The default issues one `read_word` per slot; transports that can
    /// batch should override it.
    fn read_words(
        &self,
        address: Address,
        slots: Vec<U256>,
    ) -> impl Future<Output = Result<Vec<B256>, SlotScopeError>> + Send {
        async move {
            let mut words = Vec::with_capacity(slots.len());
            for slot in slots {
                words.push(self.read_word(address, slot).await?);
            }
            Ok(words)
        }
    }
}

/// Map-backed storage, for tests and offline snapshots
#[derive(Debug, Clone, Default)]
pub struct MemoryStorageReader {
    storage: HashMap<(Address, U256), B256>,
}

impl MemoryStorageReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, address: Address, slot: U256, word: B256) {
        self.storage.insert((address, slot), word);
    }

    /// Builder-style `set`
    pub fn with_word(mut self, address: Address, slot: U256, word: B256) -> Self {
        self.set(address, slot, word);
        self
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

impl StorageReader for MemoryStorageReader {
    async fn read_word(&self, address: Address, slot: U256) -> Result<B256, SlotScopeError> {
        Ok(self.storage.get(&(address, slot)).copied().unwrap_or(B256::ZERO))
    }
}
