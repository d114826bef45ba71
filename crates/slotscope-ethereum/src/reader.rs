//! Fetching and attaching storage values
//!
//! Records in a [`LayoutStore`] are turned into read jobs, fetched with
//! bounded fan-out and decoded. Every record finishes with exactly one
//! outcome which a single consumer applies to the store, so a record is
//! either untouched, marked partial/failed, or fully populated. Dropping
//! the fetch future part way through leaves the records already applied
//! intact and the rest untouched.
//!
//! A struct or fixed-array record is read once; the member and element
//! records lying inside its slots are decoded from the same words.

use crate::decode::{bytes_value, classify_bytes, decode, long_data_slots, ByteEncoding};
use crate::derivation::{dynamic_array_base, element_location};
use crate::size::{record_size, storage_slots};
use alloy_primitives::{Address, B256, U256};
use futures::stream::{self, StreamExt};
use slotscope_core::{
    AccessStep, ChainContext, DecodedValue, LayoutStore, ReaderConfig, RecordKey, RecordStatus, SlotRecord,
    SlotScopeError, StorageReader, TypeDescriptor,
};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Counts of what happened during a fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Records a read was attempted for
    pub requested: usize,
    pub resolved: usize,
    pub partial: usize,
    pub unresolved: usize,
    pub failed: usize,
    /// Storage words read from the node
    pub words_read: usize,
}

impl FetchSummary {
    fn absorb(&mut self, other: FetchSummary) {
        self.requested += other.requested;
        self.resolved += other.resolved;
        self.partial += other.partial;
        self.unresolved += other.unresolved;
        self.failed += other.failed;
        self.words_read += other.words_read;
    }
}

/// Retry a fallible async operation with exponential backoff
///
/// Only transient errors are retried; anything else is returned at once.
pub async fn with_retries<T, F, Fut>(
    retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    mut f: F,
) -> Result<T, SlotScopeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SlotScopeError>>,
{
    let mut attempt = 0u32;
    let mut backoff = initial_backoff;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= retries || !e.is_transient() {
                    return Err(e);
                }
                attempt += 1;
                warn!(attempt, retries, error = %e, "Node request failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, max_backoff);
            }
        }
    }
}

struct ReadJob {
    key: RecordKey,
    slot: U256,
    offset: u8,
    ty: TypeDescriptor,
    slots: u64,
    /// Records within this one's slots, decoded from the same words
    covered: Vec<ReadJob>,
}

impl ReadJob {
    fn is_composite(&self) -> bool {
        matches!(self.ty.storage_type(), TypeDescriptor::Struct(_) | TypeDescriptor::FixedArray { .. })
    }

    fn contains(&self, other: &ReadJob) -> bool {
        match other.slot.checked_sub(self.slot) {
            Some(rel) => rel.saturating_add(U256::from(other.slots)) <= U256::from(self.slots),
            None => false,
        }
    }
}

enum Outcome {
    Decoded { raw: Vec<u8>, value: Option<DecodedValue>, words: usize },
    Partial { raw: Vec<u8>, reason: String, words: usize },
    Unresolved(String),
    Failed(String),
}

/// Reads values for the records of a layout store
pub struct ValueReader<R> {
    reader: R,
    config: ReaderConfig,
}

impl<R: StorageReader> ValueReader<R> {
    pub fn new(reader: R, config: ReaderConfig) -> Self {
        Self { reader, config }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Read and decode every readable record of `store`
    ///
    /// Records that are partial, unresolved or already populated are
    /// skipped, as are mappings, which have no value of their own. Words
    /// are read from the context's storage address, falling back to the
    /// target address.
    pub async fn fetch_values(
        &self,
        store: &mut LayoutStore,
        ctx: &ChainContext,
    ) -> Result<FetchSummary, SlotScopeError> {
        if ctx.storage_address.is_some() && store.is_empty() {
            return Err(SlotScopeError::InconsistentProxyConfig(
                "a storage address was given but no logic-contract layout was resolved".to_string(),
            ));
        }

        let target = ctx.storage_target();
        info!(
            records = store.len(),
            address = %target,
            block = %ctx.block,
            concurrency = self.config.effective_concurrency(),
            "Fetching storage values"
        );

        let mut summary = self.fetch_round(store, target).await?;

        if self.config.expand_dynamic_arrays {
            let added = self.expand_dynamic_arrays(store)?;
            if added > 0 {
                debug!(added, "Expanded dynamic array elements");
                summary.absorb(self.fetch_round(store, target).await?);
            }
        }

        info!(
            resolved = summary.resolved,
            partial = summary.partial,
            unresolved = summary.unresolved,
            failed = summary.failed,
            words = summary.words_read,
            "Fetched storage values"
        );
        Ok(summary)
    }

    async fn fetch_round(&self, store: &mut LayoutStore, target: Address) -> Result<FetchSummary, SlotScopeError> {
        let mut summary = FetchSummary::default();
        let max_slots = (self.config.max_dynamic_bytes / 32).max(1);

        let mut pending = Vec::new();
        let mut paths = Vec::new();
        let mut oversized = Vec::new();
        for record in store.iter().filter(|r| readable(r)) {
            let slots = storage_slots(&record.ty).saturating_to::<u64>();
            if slots > max_slots {
                oversized.push((record.key(), slots));
                continue;
            }
            pending.push(ReadJob {
                key: record.key(),
                slot: record.slot,
                offset: record.offset,
                ty: record.ty.clone(),
                slots,
                covered: Vec::new(),
            });
            paths.push(record.path.clone());
        }

        for (key, slots) in oversized {
            store.set_status(
                &key,
                RecordStatus::Partial(format!("{} slots exceed the read limit of {}", slots, max_slots)),
            )?;
            summary.partial += 1;
        }

        // the outermost composite ancestor whose slots hold a record reads it
        let composites: HashMap<RecordKey, usize> = pending
            .iter()
            .enumerate()
            .filter(|(_, job)| job.is_composite())
            .map(|(i, job)| (job.key.clone(), i))
            .collect();
        let owners: Vec<Option<usize>> = pending
            .iter()
            .zip(&paths)
            .map(|(job, path)| {
                (0..path.depth()).find_map(|depth| {
                    let ancestor = RecordKey::new(job.key.contract.clone(), path.truncated(depth).to_string());
                    composites.get(&ancestor).copied().filter(|&owner| pending[owner].contains(job))
                })
            })
            .collect();

        summary.requested = pending.len();
        let mut grouped: Vec<Option<ReadJob>> = pending.into_iter().map(Some).collect();
        for (i, owner) in owners.into_iter().enumerate() {
            let Some(owner) = owner else { continue };
            if let Some(member) = grouped[i].take() {
                match grouped[owner].as_mut() {
                    Some(parent) => parent.covered.push(member),
                    None => grouped[i] = Some(member),
                }
            }
        }
        let jobs: Vec<ReadJob> = grouped.into_iter().flatten().collect();
        debug!(records = summary.requested, reads = jobs.len(), "Planned storage reads");

        let mut outcomes = stream::iter(jobs)
            .map(|job| self.run_job(job, target))
            .buffer_unordered(self.config.effective_concurrency());

        while let Some(results) = outcomes.next().await {
            for (key, outcome) in results {
                match outcome {
                    Outcome::Decoded { raw, value, words } => {
                        debug!(record = %key, "Read value");
                        store.attach_value(&key, raw, value)?;
                        summary.resolved += 1;
                        summary.words_read += words;
                    }
                    Outcome::Partial { raw, reason, words } => {
                        debug!(record = %key, reason = %reason, "Partially read value");
                        store.attach_value(&key, raw, None)?;
                        store.set_status(&key, RecordStatus::Partial(reason))?;
                        summary.partial += 1;
                        summary.words_read += words;
                    }
                    Outcome::Unresolved(reason) => {
                        store.set_status(&key, RecordStatus::Unresolved(reason))?;
                        summary.unresolved += 1;
                    }
                    Outcome::Failed(reason) => {
                        warn!(record = %key, reason = %reason, "Storage read failed");
                        store.mark_failed(&key, reason)?;
                        summary.failed += 1;
                    }
                }
            }
        }
        Ok(summary)
    }

    /// Read a job's slots once and settle it and every record it covers
    async fn run_job(&self, job: ReadJob, target: Address) -> Vec<(RecordKey, Outcome)> {
        let slots: Vec<U256> = (0..job.slots).map(|i| job.slot.wrapping_add(U256::from(i))).collect();
        let words = match self.read(target, slots).await {
            Ok(words) => words,
            Err(e) => {
                let reason = e.to_string();
                return std::iter::once(job.key)
                    .chain(job.covered.into_iter().map(|member| member.key))
                    .map(|key| (key, Outcome::Failed(reason.clone())))
                    .collect();
            }
        };

        let mut results = Vec::with_capacity(job.covered.len() + 1);
        results.push((job.key.clone(), self.settle(&job, &words, words.len(), target).await));
        for member in &job.covered {
            let start = member.slot.wrapping_sub(job.slot).saturating_to::<usize>();
            let outcome = match words.get(start..start.saturating_add(member.slots as usize)) {
                Some(member_words) => self.settle(member, member_words, 0, target).await,
                None => Outcome::Failed(format!("{} lies outside the slots read for {}", member.key, job.key)),
            };
            results.push((member.key.clone(), outcome));
        }
        results
    }

    /// Decode a record from its words, following long-form `bytes` /
    /// `string` data to its own slots
    ///
    /// `head_words` is how many of `words` this record read itself.
    async fn settle(&self, job: &ReadJob, words: &[B256], head_words: usize, target: Address) -> Outcome {
        let mut raw = concat(words);

        let value = match decode(&job.ty, words, job.offset) {
            Ok(value) => value,
            Err(e @ SlotScopeError::UnresolvedType(_)) => return Outcome::Unresolved(e.to_string()),
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        if value.is_some() || !matches!(job.ty.storage_type(), TypeDescriptor::Bytes | TypeDescriptor::String) {
            return Outcome::Decoded { raw, value, words: head_words };
        }

        // long-form bytes / string: the head word only carries the length
        let len = match words.first().map(classify_bytes) {
            Some(Ok(ByteEncoding::Long(len))) => len,
            Some(Ok(ByteEncoding::Short(data))) => {
                return Outcome::Decoded { raw, value: Some(bytes_value(&job.ty, data)), words: head_words }
            }
            Some(Err(e)) => return Outcome::Unresolved(e.to_string()),
            None => return Outcome::Failed("no storage word returned".to_string()),
        };
        if len > U256::from(self.config.max_dynamic_bytes) {
            return Outcome::Partial {
                raw,
                reason: format!(
                    "long-form data of {} bytes exceeds the limit of {}",
                    len, self.config.max_dynamic_bytes
                ),
                words: head_words,
            };
        }

        let len = len.to::<u64>();
        let data_words = match self.read(target, long_data_slots(job.slot, len)).await {
            Ok(words) => words,
            Err(e) => return Outcome::Failed(e.to_string()),
        };
        let mut data = concat(&data_words);
        data.truncate(len as usize);
        raw.extend_from_slice(&data);

        Outcome::Decoded {
            raw,
            value: Some(bytes_value(&job.ty, data)),
            words: head_words + data_words.len(),
        }
    }

    /// One batched read, retried and bounded by the per-attempt timeout
    async fn read(&self, address: Address, slots: Vec<U256>) -> Result<Vec<B256>, SlotScopeError> {
        let timeout = self.config.timeout();
        let words = with_retries(
            self.config.retries,
            self.config.initial_backoff(),
            self.config.max_backoff(),
            || {
                let slots = slots.clone();
                async move {
                    match tokio::time::timeout(timeout, self.reader.read_words(address, slots)).await {
                        Ok(result) => result,
                        Err(_) => Err(SlotScopeError::TransportFailure(format!(
                            "read timed out after {:?}",
                            timeout
                        ))),
                    }
                }
            },
        )
        .await?;

        if words.len() != slots.len() {
            return Err(SlotScopeError::TransportFailure(format!(
                "requested {} words, received {}",
                slots.len(),
                words.len()
            )));
        }
        Ok(words)
    }

    /// Add element records under every dynamic array whose length was read
    fn expand_dynamic_arrays(&self, store: &mut LayoutStore) -> Result<usize, SlotScopeError> {
        let mut additions = Vec::new();
        let mut limited = Vec::new();

        for record in store.iter() {
            let (TypeDescriptor::DynamicArray { element }, Some(DecodedValue::Length(len))) =
                (record.ty.storage_type(), &record.value)
            else {
                continue;
            };
            let count = if *len > U256::from(self.config.max_expanded_elements) {
                limited.push((record.key(), *len));
                self.config.max_expanded_elements
            } else {
                len.to::<u64>()
            };
            let base = dynamic_array_base(record.slot);
            for i in 0..count {
                let index = U256::from(i);
                let location = element_location(base, element, index);
                additions.push(SlotRecord::new(
                    record.contract.clone(),
                    record.declared_in.clone(),
                    record.path.child(AccessStep::Index(index)),
                    location.slot,
                    location.offset,
                    record_size(element),
                    (**element).clone(),
                ));
            }
        }

        for (key, len) in limited {
            store.set_status(
                &key,
                RecordStatus::Partial(format!(
                    "expanded {} of {} elements",
                    self.config.max_expanded_elements, len
                )),
            )?;
        }

        let mut added = 0;
        for record in additions {
            let record = match record.ty.storage_type() {
                TypeDescriptor::Function { .. } => {
                    let reason = SlotScopeError::UnresolvedType(format!("{} refers to code, not data", record.ty));
                    record.with_status(RecordStatus::Unresolved(reason.to_string()))
                }
                _ => record,
            };
            if store.insert(record)? {
                added += 1;
            }
        }
        Ok(added)
    }
}

/// A record still waiting for its value
fn readable(record: &SlotRecord) -> bool {
    record.status.is_resolved()
        && record.raw.is_none()
        && !matches!(record.ty.storage_type(), TypeDescriptor::Mapping { .. })
}

fn concat(words: &[B256]) -> Vec<u8> {
    words.iter().flat_map(|w| w.as_slice().iter().copied()).collect()
}
