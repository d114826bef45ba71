//! Slot derivation for nested container access
//!
//! Given the location of a declared variable and a list of access steps,
//! compute where the addressed value lives:
//!
//! - Mappings: `keccak256(encode(key) ++ pad32(slot))`. Value-type keys are
//!   ABI-encoded to 32 bytes, `string`/`bytes` keys are hashed raw.
//! - Dynamic arrays: elements start at `keccak256(pad32(slot))`.
//! - Fixed arrays: elements are laid out contiguously from the declared slot.
//! - Structs: members sit at the struct slot plus their relative slot.
//!
//! Each step feeds the next one, so `allowances[a][b]` hashes `b` against
//! the slot produced for `allowances[a]`. All arithmetic wraps modulo 2^256.
//!
//! A struct that contains itself through a mapping or dynamic array is
//! carried as a [`TypeDescriptor::StructRef`]; [`materialize`] swaps in the
//! definition from the model's struct table one level at a time, as a path
//! steps into it.

use crate::model::StructTable;
use crate::packing::struct_layout;
use crate::size::{size_of, TypeSize};
use alloy_primitives::{Address, Sign, I256, U256};
use slotscope_core::{AccessStep, ElementaryType, SlotScopeError, TypeDescriptor};
use tiny_keccak::{Hasher, Keccak};

/// Compute keccak256 hash
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    output
}

/// A slot plus the byte offset inside it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub slot: U256,
    pub offset: u8,
}

impl Location {
    pub fn new(slot: U256, offset: u8) -> Self {
        Self { slot, offset }
    }
}

/// Slot of the value stored under `key` in a mapping declared at `slot`
pub fn mapping_slot(encoded_key: &[u8], slot: U256) -> U256 {
    let mut data = Vec::with_capacity(encoded_key.len() + 32);
    data.extend_from_slice(encoded_key);
    data.extend_from_slice(&slot.to_be_bytes::<32>());
    U256::from_be_bytes(keccak256(&data))
}

/// First data slot of a dynamic array, `bytes` or `string` declared at `slot`
pub fn dynamic_array_base(slot: U256) -> U256 {
    U256::from_be_bytes(keccak256(&slot.to_be_bytes::<32>()))
}

/// Location of element `index` of an array whose data starts at `base`
pub fn element_location(base: U256, element: &TypeDescriptor, index: U256) -> Location {
    let size = size_of(element);
    match size {
        TypeSize::Packed(bytes) => {
            let per_slot = U256::from(size.per_slot());
            let slot = base.wrapping_add(index / per_slot);
            let position: u64 = (index % per_slot).to::<u64>();
            Location::new(slot, (position * bytes as u64) as u8)
        }
        TypeSize::Slots(_) | TypeSize::Dynamic => {
            Location::new(base.wrapping_add(index.wrapping_mul(size.slots())), 0)
        }
    }
}

/// Expand struct references wherever `ty` is laid out in place
///
/// References behind a mapping or a nested dynamic array stay references.
/// The element of a top-level dynamic array is expanded too, so that its
/// elements can be located and decoded.
pub fn materialize(ty: &TypeDescriptor, structs: &StructTable) -> Result<TypeDescriptor, SlotScopeError> {
    match ty {
        TypeDescriptor::DynamicArray { element } => {
            Ok(TypeDescriptor::dynamic_array(expand_in_place(element, structs)?))
        }
        other => expand_in_place(other, structs),
    }
}

fn expand_in_place(ty: &TypeDescriptor, structs: &StructTable) -> Result<TypeDescriptor, SlotScopeError> {
    match ty {
        TypeDescriptor::StructRef { name } => structs
            .get(name)
            .map(|def| TypeDescriptor::Struct(def.clone()))
            .ok_or_else(|| SlotScopeError::UnresolvedType(format!("struct {} is not defined in the model", name))),
        TypeDescriptor::FixedArray { element, length } => {
            Ok(TypeDescriptor::fixed_array(expand_in_place(element, structs)?, *length))
        }
        TypeDescriptor::Struct(s) => {
            let mut expanded = s.clone();
            for field in &mut expanded.fields {
                field.ty = expand_in_place(&field.ty, structs)?;
            }
            Ok(TypeDescriptor::Struct(expanded))
        }
        other => Ok(other.clone()),
    }
}

/// Encode a mapping key literal the way the compiler hashes it
pub fn encode_key(key_type: &TypeDescriptor, literal: &str) -> Result<Vec<u8>, SlotScopeError> {
    let literal = literal.trim();
    match key_type.storage_type() {
        TypeDescriptor::Elementary(ElementaryType::Uint(bits)) => {
            let value = parse_uint(literal)?;
            if *bits < 256 && value >> (*bits as usize) != U256::ZERO {
                return Err(SlotScopeError::InvalidKey(format!(
                    "Key '{}' does not fit in uint{}",
                    literal, bits
                )));
            }
            Ok(value.to_be_bytes::<32>().to_vec())
        }
        TypeDescriptor::Elementary(ElementaryType::Int(bits)) => {
            let value = parse_int(literal)?;
            if *bits < 256 {
                let limit = I256::ONE << (*bits as usize - 1);
                if value >= limit || value < -limit {
                    return Err(SlotScopeError::InvalidKey(format!(
                        "Key '{}' does not fit in int{}",
                        literal, bits
                    )));
                }
            }
            // two's complement of a 256-bit value is already sign-extended
            Ok(value.into_raw().to_be_bytes::<32>().to_vec())
        }
        TypeDescriptor::Elementary(ElementaryType::Address) => {
            let address = parse_address(literal)?;
            let mut out = vec![0u8; 12];
            out.extend_from_slice(address.as_slice());
            Ok(out)
        }
        TypeDescriptor::Elementary(ElementaryType::Bool) => {
            let flag = match literal {
                "true" | "1" => 1u8,
                "false" | "0" => 0u8,
                _ => return Err(SlotScopeError::InvalidKey(format!("Invalid bool key '{}'", literal))),
            };
            let mut out = vec![0u8; 32];
            out[31] = flag;
            Ok(out)
        }
        TypeDescriptor::Elementary(ElementaryType::FixedBytes(n)) => {
            let bytes = parse_hex(literal)?;
            if bytes.len() > *n as usize {
                return Err(SlotScopeError::InvalidKey(format!(
                    "Key '{}' is longer than bytes{}",
                    literal, n
                )));
            }
            // bytesN is left-aligned
            let mut out = bytes;
            out.resize(32, 0);
            Ok(out)
        }
        TypeDescriptor::String => Ok(literal.as_bytes().to_vec()),
        TypeDescriptor::Bytes => {
            if literal.starts_with("0x") {
                parse_hex(literal)
            } else {
                Ok(literal.as_bytes().to_vec())
            }
        }
        other => Err(SlotScopeError::InvalidKey(format!(
            "Type '{}' cannot be used as a mapping key",
            other
        ))),
    }
}

/// Parse a decimal or `0x`-prefixed hex unsigned integer
pub fn parse_uint(literal: &str) -> Result<U256, SlotScopeError> {
    let parsed = match literal.strip_prefix("0x").or_else(|| literal.strip_prefix("0X")) {
        Some(hex) => U256::from_str_radix(hex, 16),
        None => U256::from_str_radix(literal, 10),
    };
    parsed.map_err(|e| SlotScopeError::InvalidKey(format!("Could not parse '{}' as an integer: {}", literal, e)))
}

fn parse_int(literal: &str) -> Result<I256, SlotScopeError> {
    let (negative, digits) = match literal.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, literal),
    };
    let magnitude = parse_uint(digits)?;
    let sign = if negative { Sign::Negative } else { Sign::Positive };
    I256::checked_from_sign_and_abs(sign, magnitude)
        .ok_or_else(|| SlotScopeError::InvalidKey(format!("Key '{}' does not fit in int256", literal)))
}

fn parse_address(literal: &str) -> Result<Address, SlotScopeError> {
    let bytes = parse_hex(literal)?;
    if bytes.len() != 20 {
        return Err(SlotScopeError::InvalidKey(format!(
            "Address key '{}' must be 20 bytes, got {}",
            literal,
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}

fn parse_hex(literal: &str) -> Result<Vec<u8>, SlotScopeError> {
    let hex_str = literal.strip_prefix("0x").unwrap_or(literal);
    hex::decode(hex_str).map_err(|e| SlotScopeError::InvalidKey(format!("Invalid hex key '{}': {}", literal, e)))
}

/// Result of walking an access path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derived {
    pub location: Location,
    /// Type of the value at `location`
    pub ty: TypeDescriptor,
    /// Steps actually applied, with array indices in canonical decimal form
    /// and mapping keys exactly as given
    pub steps: Vec<AccessStep>,
    pub applied: usize,
    /// The path was longer than the depth limit
    pub truncated: bool,
}

/// Walk `steps` starting from a variable of type `ty` at `base`
///
/// At most `max_depth` steps are applied; a longer path stops at the cap
/// and comes back with `truncated` set. Struct references met on the way
/// are expanded from `structs`.
pub fn derive(
    base: Location,
    ty: &TypeDescriptor,
    steps: &[AccessStep],
    max_depth: usize,
    structs: &StructTable,
) -> Result<Derived, SlotScopeError> {
    let mut location = base;
    let mut current = materialize(ty, structs)?;
    let limit = steps.len().min(max_depth);
    let mut applied = Vec::with_capacity(limit);

    for step in &steps[..limit] {
        let (next_location, next_ty, canonical) = apply_step(location, &current, step)?;
        location = next_location;
        current = materialize(&next_ty, structs)?;
        applied.push(canonical);
    }

    Ok(Derived { location, ty: current, steps: applied, applied: limit, truncated: steps.len() > max_depth })
}

fn apply_step(
    location: Location,
    ty: &TypeDescriptor,
    step: &AccessStep,
) -> Result<(Location, TypeDescriptor, AccessStep), SlotScopeError> {
    match (ty.storage_type(), step) {
        // the literal is encoded as written: `"007"` and `"7"` are distinct string keys
        (TypeDescriptor::Mapping { key, value }, AccessStep::Key(literal)) => {
            let encoded = encode_key(key, literal)?;
            Ok((Location::new(mapping_slot(&encoded, location.slot), 0), (**value).clone(), step.clone()))
        }
        (TypeDescriptor::Mapping { key, value }, AccessStep::Index(i)) => {
            let encoded = encode_key(key, &i.to_string())?;
            Ok((Location::new(mapping_slot(&encoded, location.slot), 0), (**value).clone(), step.clone()))
        }
        (TypeDescriptor::DynamicArray { element }, AccessStep::Index(_) | AccessStep::Key(_)) => {
            let index = step_index(step)?;
            let base = dynamic_array_base(location.slot);
            Ok((element_location(base, element, index), (**element).clone(), AccessStep::Index(index)))
        }
        (TypeDescriptor::FixedArray { element, length }, AccessStep::Index(_) | AccessStep::Key(_)) => {
            let index = step_index(step)?;
            if index >= U256::from(*length) {
                return Err(SlotScopeError::InvalidAccessPath(format!(
                    "Index {} out of bounds for {}",
                    index, ty
                )));
            }
            Ok((element_location(location.slot, element, index), (**element).clone(), AccessStep::Index(index)))
        }
        (TypeDescriptor::Struct(s), AccessStep::Field(name)) => {
            let layout = struct_layout(s);
            let field = layout.field(name).ok_or_else(|| {
                SlotScopeError::InvalidAccessPath(format!("Struct {} has no member '{}'", s.name, name))
            })?;
            Ok((
                Location::new(location.slot.wrapping_add(field.relative_slot), field.offset),
                field.ty.clone(),
                step.clone(),
            ))
        }
        (_, step) => Err(SlotScopeError::InvalidAccessPath(format!(
            "Cannot apply '{}' to a value of type {}",
            step, ty
        ))),
    }
}

fn step_index(step: &AccessStep) -> Result<U256, SlotScopeError> {
    match step {
        AccessStep::Index(i) => Ok(*i),
        AccessStep::Key(literal) => parse_uint(literal)
            .map_err(|_| SlotScopeError::InvalidAccessPath(format!("Array index '{}' is not a number", literal))),
        AccessStep::Field(name) => Err(SlotScopeError::InvalidAccessPath(format!(
            "Member access '.{}' used as an index",
            name
        ))),
    }
}
