//! Decoding raw storage words
//!
//! A packed value of `size` bytes at `offset` occupies bytes
//! `[32 - offset - size, 32 - offset)` of the big-endian word: offsets
//! count from the low-order end.
//!
//! `bytes` and `string` use two encodings distinguished by the low bit of
//! the head word. Short values (at most 31 bytes) sit inline with
//! `len * 2` in the lowest byte; long values keep `len * 2 + 1` in the head
//! slot and the data at `keccak256(slot)` onwards.

use crate::derivation::{dynamic_array_base, element_location};
use crate::packing::struct_layout;
use alloy_primitives::{Address, B256, I256, U256};
use slotscope_core::{DecodedValue, ElementaryType, SlotScopeError, TypeDescriptor};

/// How a `bytes` / `string` head word is encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ByteEncoding {
    /// Inline data
    Short(Vec<u8>),
    /// Length only; data lives at hash-derived slots
    Long(U256),
}

/// The `size`-byte window of a word at `offset`
pub fn window(word: &B256, offset: u8, size: u8) -> Result<&[u8], SlotScopeError> {
    let end = 32usize
        .checked_sub(offset as usize)
        .ok_or_else(|| SlotScopeError::InvalidAccessPath(format!("offset {} outside a slot", offset)))?;
    let start = end
        .checked_sub(size as usize)
        .ok_or_else(|| SlotScopeError::InvalidAccessPath(format!("{} bytes at offset {} cross a slot", size, offset)))?;
    Ok(&word.as_slice()[start..end])
}

/// Decode a value type at `offset` within `word`
pub fn decode_value_type(ty: &TypeDescriptor, word: &B256, offset: u8) -> Result<DecodedValue, SlotScopeError> {
    match ty.storage_type() {
        TypeDescriptor::Elementary(e) => {
            let bytes = window(word, offset, e.byte_width())?;
            Ok(match e {
                ElementaryType::Uint(_) => DecodedValue::Uint(U256::from_be_slice(bytes)),
                ElementaryType::Int(_) => DecodedValue::Int(sign_extend(bytes)),
                ElementaryType::Address => DecodedValue::Address(Address::from_slice(bytes)),
                ElementaryType::Bool => DecodedValue::Bool(bytes.iter().any(|b| *b != 0)),
                ElementaryType::FixedBytes(_) => DecodedValue::FixedBytes(bytes.to_vec()),
            })
        }
        TypeDescriptor::Function { .. } => Err(SlotScopeError::UnresolvedType(format!(
            "{} refers to code, not data",
            ty
        ))),
        other => Err(SlotScopeError::UnresolvedType(format!("{} is not a value type", other))),
    }
}

fn sign_extend(bytes: &[u8]) -> I256 {
    let negative = bytes.first().is_some_and(|b| b & 0x80 != 0);
    let mut full = if negative { [0xffu8; 32] } else { [0u8; 32] };
    full[32 - bytes.len()..].copy_from_slice(bytes);
    I256::from_raw(U256::from_be_bytes(full))
}

/// Classify a `bytes` / `string` head word
pub fn classify_bytes(word: &B256) -> Result<ByteEncoding, SlotScopeError> {
    let low = word[31];
    if low & 1 == 1 {
        let raw = U256::from_be_bytes(word.0);
        Ok(ByteEncoding::Long((raw - U256::from(1)) >> 1usize))
    } else {
        let len = (low / 2) as usize;
        if len > 31 {
            return Err(SlotScopeError::UnresolvedType(format!(
                "short-form length {} does not fit in a slot",
                len
            )));
        }
        Ok(ByteEncoding::Short(word[..len].to_vec()))
    }
}

/// Slots holding `len` bytes of long-form data for a value declared at `slot`
pub fn long_data_slots(slot: U256, len: u64) -> Vec<U256> {
    let base = dynamic_array_base(slot);
    (0..len.div_ceil(32)).map(|i| base.wrapping_add(U256::from(i))).collect()
}

/// Build the value of a `bytes` / `string` from its data
pub fn bytes_value(ty: &TypeDescriptor, data: Vec<u8>) -> DecodedValue {
    match ty.storage_type() {
        TypeDescriptor::String => DecodedValue::String(String::from_utf8_lossy(&data).into_owned()),
        _ => DecodedValue::Bytes(data),
    }
}

/// Decode whatever can be decoded from the words at a record's slots
///
/// `words` are the consecutive slots starting at the record's slot.
/// Mappings yield `None`; long-form `bytes` / `string` cannot be finished
/// from the head word alone and also yield `None`.
pub fn decode(ty: &TypeDescriptor, words: &[B256], offset: u8) -> Result<Option<DecodedValue>, SlotScopeError> {
    let head = words
        .first()
        .ok_or_else(|| SlotScopeError::TransportFailure("no storage word returned".to_string()))?;
    match ty.storage_type() {
        TypeDescriptor::Elementary(_) | TypeDescriptor::Function { .. } => {
            decode_value_type(ty, head, offset).map(Some)
        }
        TypeDescriptor::Bytes | TypeDescriptor::String => match classify_bytes(head)? {
            ByteEncoding::Short(data) => Ok(Some(bytes_value(ty, data))),
            ByteEncoding::Long(_) => Ok(None),
        },
        TypeDescriptor::DynamicArray { .. } => Ok(Some(DecodedValue::Length(U256::from_be_bytes(head.0)))),
        TypeDescriptor::Mapping { .. } => Ok(None),
        TypeDescriptor::Struct(_) | TypeDescriptor::FixedArray { .. } => decode_composite(ty, words).map(Some),
        TypeDescriptor::StructRef { name } => Err(SlotScopeError::UnresolvedType(format!(
            "struct {} was not expanded before decoding",
            name
        ))),
        TypeDescriptor::UserDefined { .. } => unreachable!("storage_type strips wrappers"),
    }
}

/// Decode a struct or fixed array from its consecutive slots
///
/// Members are decoded in declaration order. Nested composites are walked
/// with an explicit stack rather than recursion.
pub fn decode_composite(ty: &TypeDescriptor, words: &[B256]) -> Result<DecodedValue, SlotScopeError> {
    enum Frame {
        Open { ty: TypeDescriptor, slot: u64, offset: u8 },
        Close { names: Vec<String> },
    }

    let mut stack = vec![Frame::Open { ty: ty.clone(), slot: 0, offset: 0 }];
    let mut values: Vec<Option<DecodedValue>> = Vec::new();

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Open { ty, slot, offset } => {
                let members = composite_members(&ty);
                match members {
                    Some(members) => {
                        let names = members.iter().map(|(name, ..)| name.clone()).collect();
                        stack.push(Frame::Close { names });
                        for (_, member_ty, rel_slot, member_offset) in members.into_iter().rev() {
                            stack.push(Frame::Open {
                                ty: member_ty,
                                slot: slot.saturating_add(rel_slot),
                                offset: member_offset,
                            });
                        }
                    }
                    None => {
                        // function references and anything past the read words stay empty
                        let value = match words.get(slot as usize) {
                            None => None,
                            Some(_) if ty.is_dynamic() => decode(&ty, &words[slot as usize..], 0)?,
                            Some(word) => decode_value_type(&ty, word, offset).ok(),
                        };
                        values.push(value);
                    }
                }
            }
            Frame::Close { names } => {
                let split = values.len() - names.len();
                let members = values.split_off(split);
                values.push(Some(DecodedValue::Composite(names.into_iter().zip(members).collect())));
            }
        }
    }

    values
        .pop()
        .flatten()
        .ok_or_else(|| SlotScopeError::UnresolvedType(format!("{} has no members", ty)))
}

/// Members of a composite as `(name, type, relative slot, offset)`
fn composite_members(ty: &TypeDescriptor) -> Option<Vec<(String, TypeDescriptor, u64, u8)>> {
    match ty.storage_type() {
        TypeDescriptor::Struct(s) => Some(
            struct_layout(s)
                .fields
                .into_iter()
                .map(|f| (f.name, f.ty, f.relative_slot.saturating_to::<u64>(), f.offset))
                .collect(),
        ),
        TypeDescriptor::FixedArray { element, length } => Some(
            (0..*length)
                .map(|i| {
                    let loc = element_location(U256::ZERO, element, U256::from(i));
                    (format!("[{}]", i), (**element).clone(), loc.slot.saturating_to::<u64>(), loc.offset)
                })
                .collect(),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn word_with(bytes_at: &[(usize, u8)]) -> B256 {
        let mut w = [0u8; 32];
        for (i, b) in bytes_at {
            w[*i] = *b;
        }
        B256::from(w)
    }

    /// Place `value` (big-endian, `size` bytes) at `offset` in a zero word
    fn encode_at(value: &[u8], offset: u8) -> B256 {
        let mut w = [0u8; 32];
        let end = 32 - offset as usize;
        w[end - value.len()..end].copy_from_slice(value);
        B256::from(w)
    }

    #[test]
    fn test_packed_window() {
        // uint8 x = 1 @0, uint8 y = 2 @1, address z @2
        let mut w = [0u8; 32];
        w[31] = 1;
        w[30] = 2;
        w[10..30].copy_from_slice(&[0x11; 20]);
        let w = B256::from(w);
        assert_eq!(decode_value_type(&TypeDescriptor::uint(8), &w, 0).unwrap(), DecodedValue::Uint(U256::from(1)));
        assert_eq!(decode_value_type(&TypeDescriptor::uint(8), &w, 1).unwrap(), DecodedValue::Uint(U256::from(2)));
        assert_eq!(
            decode_value_type(&TypeDescriptor::address(), &w, 2).unwrap(),
            DecodedValue::Address(Address::repeat_byte(0x11))
        );
    }

    #[test]
    fn test_signed_window_sign_extends() {
        // int24 tick = -1 at offset 20
        let w = encode_at(&[0xff, 0xff, 0xff], 20);
        assert_eq!(decode_value_type(&TypeDescriptor::int(24), &w, 20).unwrap(), DecodedValue::Int(I256::MINUS_ONE));
        let w = encode_at(&[0x7f, 0xff], 0);
        assert_eq!(
            decode_value_type(&TypeDescriptor::int(16), &w, 0).unwrap(),
            DecodedValue::Int(I256::try_from(32767i64).unwrap())
        );
    }

    #[test]
    fn test_fixed_bytes_and_bool() {
        let w = encode_at(&[0xca, 0xfe], 4);
        assert_eq!(
            decode_value_type(&TypeDescriptor::fixed_bytes(2), &w, 4).unwrap(),
            DecodedValue::FixedBytes(vec![0xca, 0xfe])
        );
        let w = word_with(&[(31, 2)]);
        assert_eq!(decode_value_type(&TypeDescriptor::bool(), &w, 0).unwrap(), DecodedValue::Bool(true));
    }

    #[test]
    fn test_function_is_unresolved() {
        let err = decode(&TypeDescriptor::Function { external: false }, &[B256::ZERO], 0).unwrap_err();
        assert!(matches!(err, SlotScopeError::UnresolvedType(_)));
    }

    #[test]
    fn test_short_string() {
        let mut w = [0u8; 32];
        w[..5].copy_from_slice(b"hello");
        w[31] = 10;
        let value = decode(&TypeDescriptor::String, &[B256::from(w)], 0).unwrap();
        assert_eq!(value, Some(DecodedValue::String("hello".into())));
    }

    #[test]
    fn test_long_bytes_classification() {
        // 100 bytes: head = 201
        let w = word_with(&[(31, 201)]);
        assert_eq!(classify_bytes(&w).unwrap(), ByteEncoding::Long(U256::from(100)));
        assert_eq!(decode(&TypeDescriptor::Bytes, &[w], 0).unwrap(), None);
        let slots = long_data_slots(U256::from(4), 100);
        assert_eq!(slots.len(), 4);
        assert_eq!(slots[0], dynamic_array_base(U256::from(4)));
        assert_eq!(slots[3], dynamic_array_base(U256::from(4)) + U256::from(3));
    }

    #[test]
    fn test_unexpanded_struct_reference_is_unresolved() {
        let err = decode(&TypeDescriptor::struct_ref("Node"), &[B256::ZERO], 0).unwrap_err();
        assert!(matches!(err, SlotScopeError::UnresolvedType(_)));
    }

    #[test]
    fn test_malformed_short_length() {
        let w = word_with(&[(31, 0x40)]);
        assert!(classify_bytes(&w).is_err());
    }

    #[test]
    fn test_dynamic_array_length() {
        let w = word_with(&[(31, 7)]);
        let value = decode(&TypeDescriptor::dynamic_array(TypeDescriptor::uint(256)), &[w], 0).unwrap();
        assert_eq!(value, Some(DecodedValue::Length(U256::from(7))));
    }

    #[test]
    fn test_composite_struct_over_two_slots() {
        let ty = TypeDescriptor::structure(
            "Position",
            vec![
                ("owner", TypeDescriptor::address()),
                ("active", TypeDescriptor::bool()),
                ("amount", TypeDescriptor::uint(256)),
                ("approvals", TypeDescriptor::mapping(TypeDescriptor::address(), TypeDescriptor::bool())),
            ],
        );
        let mut first = [0u8; 32];
        first[12..32].copy_from_slice(&[0x22; 20]);
        first[11] = 1;
        let second = encode_at(&[0x03, 0xe8], 0);
        let value = decode(&ty, &[B256::from(first), second, B256::ZERO], 0).unwrap().unwrap();
        assert_eq!(
            value,
            DecodedValue::Composite(vec![
                ("owner".into(), Some(DecodedValue::Address(Address::repeat_byte(0x22)))),
                ("active".into(), Some(DecodedValue::Bool(true))),
                ("amount".into(), Some(DecodedValue::Uint(U256::from(1000)))),
                ("approvals".into(), None),
            ])
        );
    }

    #[test]
    fn test_composite_packed_array() {
        let ty = TypeDescriptor::fixed_array(TypeDescriptor::uint(128), 3);
        let mut first = [0u8; 32];
        first[31] = 1;
        first[15] = 2;
        let second = encode_at(&[3], 0);
        let value = decode(&ty, &[B256::from(first), second], 0).unwrap().unwrap();
        assert_eq!(
            value,
            DecodedValue::Composite(vec![
                ("[0]".into(), Some(DecodedValue::Uint(U256::from(1)))),
                ("[1]".into(), Some(DecodedValue::Uint(U256::from(2)))),
                ("[2]".into(), Some(DecodedValue::Uint(U256::from(3)))),
            ])
        );
    }

    #[test]
    fn test_nested_composite() {
        let inner = TypeDescriptor::structure("Inner", vec![("v", TypeDescriptor::uint(8))]);
        let ty = TypeDescriptor::fixed_array(inner, 2);
        let value = decode(&ty, &[encode_at(&[5], 0), encode_at(&[6], 0)], 0).unwrap().unwrap();
        let DecodedValue::Composite(members) = value else { panic!("expected composite") };
        assert_eq!(
            members[1],
            ("[1]".to_string(), Some(DecodedValue::Composite(vec![("v".into(), Some(DecodedValue::Uint(U256::from(6))))])))
        );
    }

    proptest! {
        #[test]
        fn prop_uint_round_trip(value in any::<u64>(), width in 1u8..=8, offset in 0u8..=24) {
            let bits = width as u16 * 8;
            let masked = if width == 8 { value } else { value & ((1u64 << bits) - 1) };
            let bytes = masked.to_be_bytes();
            let w = encode_at(&bytes[8 - width as usize..], offset);
            prop_assert_eq!(
                decode_value_type(&TypeDescriptor::uint(bits), &w, offset).unwrap(),
                DecodedValue::Uint(U256::from(masked))
            );
        }

        #[test]
        fn prop_int_round_trip(value in any::<i32>(), offset in 0u8..=28) {
            let w = encode_at(&value.to_be_bytes(), offset);
            prop_assert_eq!(
                decode_value_type(&TypeDescriptor::int(32), &w, offset).unwrap(),
                DecodedValue::Int(I256::try_from(value as i64).unwrap())
            );
        }

        #[test]
        fn prop_neighbours_do_not_bleed(a in any::<u16>(), b in any::<u16>(), slot_pos in 0u8..15) {
            // two uint16 array elements sharing a slot
            let offset_a = slot_pos * 2;
            let mut w = [0u8; 32];
            let end_a = 32 - offset_a as usize;
            w[end_a - 2..end_a].copy_from_slice(&a.to_be_bytes());
            w[end_a - 4..end_a - 2].copy_from_slice(&b.to_be_bytes());
            let w = B256::from(w);
            prop_assert_eq!(decode_value_type(&TypeDescriptor::uint(16), &w, offset_a).unwrap(), DecodedValue::Uint(U256::from(a)));
            prop_assert_eq!(decode_value_type(&TypeDescriptor::uint(16), &w, offset_a + 2).unwrap(), DecodedValue::Uint(U256::from(b)));
        }

        #[test]
        fn prop_short_string_round_trip(s in "[a-zA-Z0-9 ]{0,31}") {
            let mut w = [0u8; 32];
            w[..s.len()].copy_from_slice(s.as_bytes());
            w[31] = (s.len() * 2) as u8;
            prop_assert_eq!(
                decode(&TypeDescriptor::String, &[B256::from(w)], 0).unwrap(),
                Some(DecodedValue::String(s.clone()))
            );
        }

        #[test]
        fn prop_address_round_trip(bytes in any::<[u8; 20]>(), offset in 0u8..=12) {
            let w = encode_at(&bytes, offset);
            prop_assert_eq!(
                decode_value_type(&TypeDescriptor::address(), &w, offset).unwrap(),
                DecodedValue::Address(Address::from(bytes))
            );
        }

        #[test]
        fn prop_bool_round_trip(flag in any::<bool>(), offset in 0u8..=31) {
            let w = encode_at(&[flag as u8], offset);
            prop_assert_eq!(decode_value_type(&TypeDescriptor::bool(), &w, offset).unwrap(), DecodedValue::Bool(flag));
        }

        #[test]
        fn prop_fixed_bytes_round_trip(data in proptest::collection::vec(any::<u8>(), 1..=32), seed in any::<u8>()) {
            let offset = seed % (33 - data.len() as u8);
            let w = encode_at(&data, offset);
            prop_assert_eq!(
                decode_value_type(&TypeDescriptor::fixed_bytes(data.len() as u8), &w, offset).unwrap(),
                DecodedValue::FixedBytes(data.clone())
            );
        }

        #[test]
        fn prop_short_bytes_round_trip(data in proptest::collection::vec(any::<u8>(), 0..=31)) {
            let mut w = [0u8; 32];
            w[..data.len()].copy_from_slice(&data);
            w[31] = (data.len() * 2) as u8;
            prop_assert_eq!(
                decode(&TypeDescriptor::Bytes, &[B256::from(w)], 0).unwrap(),
                Some(DecodedValue::Bytes(data.clone()))
            );
        }

        #[test]
        fn prop_long_bytes_round_trip(data in proptest::collection::vec(any::<u8>(), 32..400), slot in any::<u64>()) {
            let len = data.len() as u64;
            let head = B256::from(U256::from(len * 2 + 1).to_be_bytes::<32>());
            prop_assert_eq!(decode(&TypeDescriptor::Bytes, &[head], 0).unwrap(), None);
            prop_assert_eq!(classify_bytes(&head).unwrap(), ByteEncoding::Long(U256::from(len)));

            // data words as the node would return them: zero-padded 32-byte chunks
            let slots = long_data_slots(U256::from(slot), len);
            let words: Vec<B256> = data
                .chunks(32)
                .map(|chunk| {
                    let mut w = [0u8; 32];
                    w[..chunk.len()].copy_from_slice(chunk);
                    B256::from(w)
                })
                .collect();
            prop_assert_eq!(slots.len(), words.len());
            prop_assert_eq!(slots[0], dynamic_array_base(U256::from(slot)));

            let mut reassembled: Vec<u8> = words.iter().flat_map(|w| w.as_slice().to_vec()).collect();
            reassembled.truncate(len as usize);
            prop_assert_eq!(bytes_value(&TypeDescriptor::Bytes, reassembled), DecodedValue::Bytes(data.clone()));
        }
    }
}
