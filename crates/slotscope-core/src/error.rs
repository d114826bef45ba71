//! Error types for slotscope-core
//!
//! This module defines the error types that can occur during layout
//! resolution, slot derivation and value retrieval.
//!
//! Not every variant is fatal. Layout-level problems (`UnresolvedType`,
//! `DepthExceeded`) are normally recorded on the affected [`SlotRecord`]
//! and the run continues; request-shape problems (`VariableNotFound`,
//! `MissingEndpoint`, `InconsistentProxyConfig`) abort before any network
//! access; `TransportFailure` is retried and then isolated to one record.
//!
//! [`SlotRecord`]: crate::SlotRecord

use thiserror::Error;

/// Errors that can occur during layout resolution and value retrieval
#[derive(Debug, Error)]
pub enum SlotScopeError {
    /// The descriptor cannot be decoded from storage (e.g. a function reference)
    #[error("Unresolved type: {0}")]
    UnresolvedType(String),

    /// An access path is longer than the configured maximum depth
    #[error("Max depth exceeded: path has {depth} steps, limit is {max}")]
    DepthExceeded { depth: usize, max: usize },

    /// The requested variable is not declared by the contract or its bases
    #[error("Variable '{variable}' not found in contract '{contract}'")]
    VariableNotFound { contract: String, variable: String },

    /// A contract (or one of its bases) is missing from the contract model
    #[error("Contract not found: {0}")]
    ContractNotFound(String),

    /// Node unreachable or malformed response
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Value retrieval requested without a chain endpoint
    #[error("Missing endpoint: value retrieval requires an RPC URL")]
    MissingEndpoint,

    /// A storage address was given without a resolvable logic-contract layout
    #[error("Inconsistent proxy configuration: {0}")]
    InconsistentProxyConfig(String),

    /// An access step does not apply to the type it was applied to
    #[error("Invalid access path: {0}")]
    InvalidAccessPath(String),

    /// A mapping key or array index could not be encoded for its type
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// A record key was re-inserted with a different placement
    #[error("Conflicting record for {0}")]
    ConflictingRecord(String),

    /// The contract model is malformed
    #[error("Invalid contract model: {0}")]
    InvalidModel(String),

    /// Serialization error with error details
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SlotScopeError {
    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SlotScopeError::TransportFailure(_))
    }
}

impl From<serde_json::Error> for SlotScopeError {
    fn from(err: serde_json::Error) -> Self {
        SlotScopeError::Serialization(err.to_string())
    }
}
