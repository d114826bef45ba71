//! Ethereum storage layout resolution and value retrieval
//!
//! This crate computes the compiler-exact storage layout of Solidity
//! contracts from a typed contract model, derives keccak-based slots for
//! mapping keys, array indices and struct fields, and reads and decodes the
//! words behind each slot record.
//!
//! Resolution is pure and works offline; reading goes through any
//! [`StorageReader`](slotscope_core::StorageReader). The JSON-RPC reader is
//! behind the `rpc` feature (enabled by default).

pub mod decode;
pub mod derivation;
pub mod model;
pub mod packing;
pub mod reader;
pub mod resolver;
#[cfg(feature = "rpc")]
pub mod rpc;
pub mod size;

pub use decode::{decode, decode_value_type, ByteEncoding};
pub use derivation::{derive, dynamic_array_base, encode_key, keccak256, mapping_slot, materialize, Derived, Location};
pub use model::{ContractModel, StructTable};
pub use packing::{struct_layout, PackingCursor, StructLayout};
pub use reader::{with_retries, FetchSummary, ValueReader};
pub use resolver::{StorageLayoutResolver, VariablePlacement};
#[cfg(feature = "rpc")]
pub use rpc::{fetch_values, RpcError, RpcStorageReader};
pub use size::{storage_slots, TypeSize};
