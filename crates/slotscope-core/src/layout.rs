//! Slot records and the layout store
//!
//! The layout store is the accumulated mapping from `(contract, variable
//! path)` to [`SlotRecord`]. Records are created once, in resolution order,
//! and afterwards only their status, raw bytes and decoded value change.
//!
//! # Layout Commitment
//!
//! [`LayoutStore::commitment`] is a SHA256 hash over the ordered
//! `(contract, path, slot, offset, type)` tuples. Two resolutions of the
//! same contract model produce the same commitment, so an artifact can be
//! checked against a fresh resolution without comparing every entry.

use crate::error::SlotScopeError;
use crate::path::VariablePath;
use crate::types::TypeDescriptor;
use crate::value::DecodedValue;
use alloy_primitives::U256;
use core::fmt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// How far a record got
///
/// The artifact always carries this so a missing value is never mistaken
/// for a zero value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum RecordStatus {
    /// Placement known; value attached if it was fetched
    Resolved,
    /// Resolution stopped early (depth cap, oversized data)
    Partial(String),
    /// The type cannot be decoded from storage
    Unresolved(String),
    /// The node could not be read after all retries
    ReadFailed(String),
}

impl RecordStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(self, RecordStatus::Resolved)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::Resolved => f.write_str("resolved"),
            RecordStatus::Partial(reason) => write!(f, "partial: {}", reason),
            RecordStatus::Unresolved(reason) => write!(f, "unresolved: {}", reason),
            RecordStatus::ReadFailed(reason) => write!(f, "read-failed: {}", reason),
        }
    }
}

/// Key of a record in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub contract: String,
    pub path: String,
}

impl RecordKey {
    pub fn new(contract: impl Into<String>, path: impl Into<String>) -> Self {
        Self { contract: contract.into(), path: path.into() }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.contract, self.path)
    }
}

/// Placement (and eventually the value) of one logical storage value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRecord {
    /// Contract whose layout this record belongs to
    pub contract: String,
    pub path: VariablePath,
    /// Contract that declares the base variable (a base for inherited ones)
    pub declared_in: String,
    pub slot: U256,
    /// Byte offset inside `slot`, counted from the low-order end
    pub offset: u8,
    /// Bytes occupied starting at `slot`; 32 for dynamic types
    pub size: u64,
    pub ty: TypeDescriptor,
    pub status: RecordStatus,
    pub raw: Option<Vec<u8>>,
    pub value: Option<DecodedValue>,
}

impl SlotRecord {
    pub fn new(
        contract: impl Into<String>,
        declared_in: impl Into<String>,
        path: VariablePath,
        slot: U256,
        offset: u8,
        size: u64,
        ty: TypeDescriptor,
    ) -> Self {
        Self {
            contract: contract.into(),
            path,
            declared_in: declared_in.into(),
            slot,
            offset,
            size,
            ty,
            status: RecordStatus::Resolved,
            raw: None,
            value: None,
        }
    }

    pub fn with_status(mut self, status: RecordStatus) -> Self {
        self.status = status;
        self
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.contract.clone(), self.path.to_string())
    }

    /// Number of consecutive slots covered by this record
    pub fn slot_span(&self) -> u64 {
        (self.offset as u64 + self.size).div_ceil(32).max(1)
    }

    fn same_placement(&self, other: &SlotRecord) -> bool {
        self.slot == other.slot
            && self.offset == other.offset
            && self.size == other.size
            && self.ty == other.ty
            && self.declared_in == other.declared_in
    }
}

/// Accumulated records, insertion ordered
#[derive(Debug, Clone, Default)]
pub struct LayoutStore {
    records: Vec<SlotRecord>,
    index: HashMap<RecordKey, usize>,
}

impl LayoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record
    ///
    /// Returns `Ok(true)` for a new key and `Ok(false)` when an identical
    /// placement is already stored. A different placement under an existing
    /// key is an error; the stored record is left untouched.
    pub fn insert(&mut self, record: SlotRecord) -> Result<bool, SlotScopeError> {
        let key = record.key();
        if let Some(&idx) = self.index.get(&key) {
            let existing = &self.records[idx];
            if existing.same_placement(&record) {
                return Ok(false);
            }
            return Err(SlotScopeError::ConflictingRecord(format!(
                "{}: stored at slot {} offset {}, new placement slot {} offset {}",
                key, existing.slot, existing.offset, record.slot, record.offset
            )));
        }
        self.index.insert(key, self.records.len());
        self.records.push(record);
        Ok(true)
    }

    /// Move every record of `other` into this store
    pub fn merge(&mut self, other: LayoutStore) -> Result<(), SlotScopeError> {
        for record in other.records {
            self.insert(record)?;
        }
        Ok(())
    }

    pub fn get(&self, key: &RecordKey) -> Option<&SlotRecord> {
        self.index.get(key).map(|&idx| &self.records[idx])
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.index.contains_key(key)
    }

    /// Attach fetched bytes and their decoded value
    pub fn attach_value(
        &mut self,
        key: &RecordKey,
        raw: Vec<u8>,
        value: Option<DecodedValue>,
    ) -> Result<(), SlotScopeError> {
        let record = self.record_mut(key)?;
        record.raw = Some(raw);
        record.value = value;
        Ok(())
    }

    /// Replace the status of a record
    pub fn set_status(&mut self, key: &RecordKey, status: RecordStatus) -> Result<(), SlotScopeError> {
        self.record_mut(key)?.status = status;
        Ok(())
    }

    /// Mark a record read-failed, dropping anything half attached
    pub fn mark_failed(&mut self, key: &RecordKey, reason: impl Into<String>) -> Result<(), SlotScopeError> {
        let record = self.record_mut(key)?;
        record.raw = None;
        record.value = None;
        record.status = RecordStatus::ReadFailed(reason.into());
        Ok(())
    }

    fn record_mut(&mut self, key: &RecordKey) -> Result<&mut SlotRecord, SlotScopeError> {
        match self.index.get(key) {
            Some(&idx) => Ok(&mut self.records[idx]),
            None => Err(SlotScopeError::InvalidAccessPath(format!("No record for {}", key))),
        }
    }

    pub fn records(&self) -> &[SlotRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlotRecord> {
        self.records.iter()
    }

    pub fn for_contract<'a>(&'a self, contract: &'a str) -> impl Iterator<Item = &'a SlotRecord> + 'a {
        self.records.iter().filter(move |r| r.contract == contract)
    }

    /// Contract names in first-seen order
    pub fn contracts(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for record in &self.records {
            if !seen.contains(&record.contract.as_str()) {
                seen.push(&record.contract);
            }
        }
        seen
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Compute the layout commitment hash
    pub fn commitment(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();

        hasher.update((self.records.len() as u32).to_le_bytes());

        for record in &self.records {
            // length-prefixed strings keep the encoding unambiguous
            hasher.update((record.contract.len() as u32).to_le_bytes());
            hasher.update(record.contract.as_bytes());

            let path = record.path.to_string();
            hasher.update((path.len() as u32).to_le_bytes());
            hasher.update(path.as_bytes());

            hasher.update(record.slot.to_be_bytes::<32>());
            hasher.update((record.offset as u32).to_le_bytes());

            let type_string = record.ty.type_string();
            hasher.update((type_string.len() as u32).to_le_bytes());
            hasher.update(type_string.as_bytes());
        }

        hasher.finalize().into()
    }

    /// Check that top-level variables of each contract do not overlap
    ///
    /// Nested records (struct fields, elements) live inside their parent
    /// and are not compared against it.
    pub fn validate(&self) -> Result<(), SlotScopeError> {
        let mut by_contract: BTreeMap<&str, Vec<&SlotRecord>> = BTreeMap::new();
        for record in self.records.iter().filter(|r| r.path.steps.is_empty()) {
            if record.offset >= 32 || (record.size < 32 && record.offset as u64 + record.size > 32) {
                return Err(SlotScopeError::ConflictingRecord(format!(
                    "{} with offset {} and size {} exceeds slot boundary",
                    record.key(),
                    record.offset,
                    record.size
                )));
            }
            by_contract.entry(&record.contract).or_default().push(record);
        }

        for (contract, entries) in by_contract {
            for i in 0..entries.len() {
                for j in i + 1..entries.len() {
                    if overlaps(entries[i], entries[j]) {
                        return Err(SlotScopeError::ConflictingRecord(format!(
                            "Fields '{}' and '{}' overlap in contract {} at slot {}",
                            entries[i].path, entries[j].path, contract, entries[j].slot
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Serializable view, keyed by contract then variable path
    pub fn to_document(&self) -> LayoutDocument {
        let mut contracts: BTreeMap<String, BTreeMap<String, LayoutEntry>> = BTreeMap::new();
        for record in &self.records {
            contracts
                .entry(record.contract.clone())
                .or_default()
                .insert(record.path.to_string(), LayoutEntry::from(record));
        }
        LayoutDocument {
            layout_commitment: hex::encode(self.commitment()),
            contracts,
        }
    }
}

/// Byte ranges of two top-level records intersect
fn overlaps(a: &SlotRecord, b: &SlotRecord) -> bool {
    // absolute byte positions; top-level slots are small so this cannot wrap
    let start = |r: &SlotRecord| r.slot * U256::from(32) + U256::from(r.offset);
    let end = |r: &SlotRecord| start(r) + U256::from(r.size.max(1));
    start(a) < end(b) && start(b) < end(a)
}

/// Persisted form of a layout store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutDocument {
    /// Hex SHA256 commitment over the ordered records
    pub layout_commitment: String,
    pub contracts: BTreeMap<String, BTreeMap<String, LayoutEntry>>,
}

/// Persisted form of one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutEntry {
    /// Decimal, since slots exceed ordinary integer precision
    pub slot: String,
    pub offset: u8,
    pub type_string: String,
    pub size: u64,
    pub declared_in: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    pub status: String,
}

impl From<&SlotRecord> for LayoutEntry {
    fn from(record: &SlotRecord) -> Self {
        Self {
            slot: record.slot.to_string(),
            offset: record.offset,
            type_string: record.ty.type_string(),
            size: record.size,
            declared_in: record.declared_in.clone(),
            value: record.value.as_ref().map(|v| v.to_string()),
            raw: record.raw.as_ref().map(|r| format!("0x{}", hex::encode(r))),
            status: record.status.to_string(),
        }
    }
}
