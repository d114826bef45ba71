//! Run options passed explicitly into the resolver and the reader

use core::time::Duration;
use serde::{Deserialize, Serialize};

/// Options for layout resolution and slot derivation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Maximum number of access steps applied to one variable
    pub max_depth: usize,
    /// Fixed-array elements expanded per variable, nested arrays included
    pub max_array_elements: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { max_depth: 20, max_array_elements: 1024 }
    }
}

/// Options for fetching words from a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Records read concurrently
    pub concurrency: usize,
    /// Retries after the first failed attempt
    pub retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Per-attempt timeout
    pub timeout_ms: u64,
    /// Long-form bytes/strings above this length are not read
    pub max_dynamic_bytes: u64,
    /// Add one record per element of each dynamic array once its length is known
    pub expand_dynamic_arrays: bool,
    /// Elements added per dynamic array when expanding
    pub max_expanded_elements: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            retries: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
            timeout_ms: 10_000,
            max_dynamic_bytes: 1024 * 1024,
            expand_dynamic_arrays: false,
            max_expanded_elements: 1024,
        }
    }
}

impl ReaderConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Fan-out, never below one
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let resolver = ResolverConfig::default();
        assert_eq!(resolver.max_depth, 20);
        let reader = ReaderConfig::default();
        assert_eq!(reader.concurrency, 16);
        assert_eq!(reader.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let reader: ReaderConfig = serde_json::from_str(r#"{"retries": 0, "concurrency": 0}"#).unwrap();
        assert_eq!(reader.retries, 0);
        assert_eq!(reader.effective_concurrency(), 1);
        assert_eq!(reader.max_backoff_ms, 2_000);
    }
}
