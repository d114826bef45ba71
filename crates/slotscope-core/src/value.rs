//! Decoded storage values

use alloy_primitives::{Address, I256, U256};
use core::fmt;
use serde::{Deserialize, Serialize};

/// A value decoded from one or more storage words
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum DecodedValue {
    Uint(U256),
    Int(I256),
    Address(Address),
    Bool(bool),
    /// `bytesN`, exactly N bytes
    FixedBytes(Vec<u8>),
    /// `bytes`, short or long form
    Bytes(Vec<u8>),
    String(String),
    /// Element count of a dynamic array
    Length(U256),
    /// Members of a struct or fixed array in declaration order.
    /// Members that cannot be decoded inline (mappings, long-form bytes)
    /// are `None`.
    Composite(Vec<(String, Option<DecodedValue>)>),
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Uint(v) => write!(f, "{}", v),
            DecodedValue::Int(v) => write!(f, "{}", v),
            // Address Display is the EIP-55 checksummed form
            DecodedValue::Address(a) => write!(f, "{}", a),
            DecodedValue::Bool(b) => write!(f, "{}", b),
            DecodedValue::FixedBytes(b) | DecodedValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            DecodedValue::String(s) => write!(f, "{}", s),
            DecodedValue::Length(n) => write!(f, "length {}", n),
            DecodedValue::Composite(members) => {
                f.write_str("{ ")?;
                for (i, (name, value)) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match value {
                        Some(v) => write!(f, "{}: {}", name, v)?,
                        None => write!(f, "{}: <not inline>", name)?,
                    }
                }
                f.write_str(" }")
            }
        }
    }
}
