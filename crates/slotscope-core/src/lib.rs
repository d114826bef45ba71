//! Core types and traits for Solidity storage layout resolution
//!
//! This crate provides the chain-facing data model shared by the resolver,
//! the value reader and the CLI: type descriptors, state variables and
//! contracts, access paths, slot records and the layout store that
//! accumulates them.
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! slotscope-core = { version = "0.1" }
//! ```
//!
//! The algorithms (packing, slot derivation, decoding, transport) live in
//! `slotscope-ethereum`; this crate only holds what they exchange.

pub mod chain;
pub mod config;
pub mod error;
pub mod layout;
pub mod path;
pub mod traits;
pub mod types;
pub mod value;

pub use alloy_primitives::{Address, B256, I256, U256};
pub use chain::{BlockTag, ChainContext};
pub use config::{ReaderConfig, ResolverConfig};
pub use error::SlotScopeError;
pub use layout::{LayoutDocument, LayoutEntry, LayoutStore, RecordKey, RecordStatus, SlotRecord};
pub use path::{AccessStep, VariablePath};
pub use traits::{MemoryStorageReader, StorageReader};
pub use types::{Contract, ElementaryType, StateVariable, StructField, StructType, TypeDescriptor, UserDefinedKind};
pub use value::DecodedValue;
