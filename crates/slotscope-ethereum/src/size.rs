//! Storage sizes of Solidity types
//!
//! Value types report their packed byte width; everything else occupies
//! whole slots. Dynamic types reserve exactly one slot at their declared
//! position and keep their contents at hash-derived slots.

use crate::packing::struct_layout;
use alloy_primitives::U256;
use slotscope_core::TypeDescriptor;

/// Bytes in one storage slot
pub const SLOT_BYTES: u8 = 32;

/// Storage footprint of a type at its declared position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeSize {
    /// A value type packed into `n` bytes of a slot
    Packed(u8),
    /// An inline static array or struct spanning whole slots
    Slots(U256),
    /// A mapping, dynamic array, `bytes` or `string`; one reserved slot
    Dynamic,
}

impl TypeSize {
    /// Everything except a value type begins at offset 0 of a fresh slot
    pub fn starts_new_slot(self) -> bool {
        !matches!(self, TypeSize::Packed(_))
    }

    /// Bytes the packing cursor reserves; 32 for anything that is not packed
    pub fn bytes(self) -> u8 {
        match self {
            TypeSize::Packed(n) => n,
            TypeSize::Slots(_) | TypeSize::Dynamic => SLOT_BYTES,
        }
    }

    /// Whole slots reserved at the declared position
    pub fn slots(self) -> U256 {
        match self {
            TypeSize::Packed(_) | TypeSize::Dynamic => U256::from(1),
            TypeSize::Slots(n) => n,
        }
    }

    /// Size reported on a record: packed width, or slots × 32
    pub fn record_bytes(self) -> u64 {
        match self {
            TypeSize::Packed(n) => n as u64,
            TypeSize::Dynamic => SLOT_BYTES as u64,
            TypeSize::Slots(n) => n.saturating_mul(U256::from(SLOT_BYTES)).saturating_to::<u64>(),
        }
    }

    /// Elements of this size sharing one slot; 1 for anything that does not pack
    pub fn per_slot(self) -> u64 {
        match self {
            TypeSize::Packed(n) => (SLOT_BYTES / n.max(1)) as u64,
            TypeSize::Slots(_) | TypeSize::Dynamic => 1,
        }
    }
}

pub fn size_of(ty: &TypeDescriptor) -> TypeSize {
    match ty.storage_type() {
        TypeDescriptor::Elementary(e) => TypeSize::Packed(e.byte_width()),
        TypeDescriptor::Function { external } => TypeSize::Packed(if *external { 24 } else { 8 }),
        TypeDescriptor::FixedArray { element, length } => TypeSize::Slots(fixed_array_slots(element, *length)),
        TypeDescriptor::Struct(s) => TypeSize::Slots(struct_layout(s).slots),
        TypeDescriptor::DynamicArray { .. }
        | TypeDescriptor::Mapping { .. }
        | TypeDescriptor::Bytes
        | TypeDescriptor::String => TypeSize::Dynamic,
        // only legal behind a mapping or dynamic array; expanded before any in-place use
        TypeDescriptor::StructRef { .. } => TypeSize::Dynamic,
        TypeDescriptor::UserDefined { .. } => unreachable!("storage_type strips wrappers"),
    }
}

pub fn starts_new_slot(ty: &TypeDescriptor) -> bool {
    size_of(ty).starts_new_slot()
}

pub fn storage_bytes(ty: &TypeDescriptor) -> u8 {
    size_of(ty).bytes()
}

pub fn storage_slots(ty: &TypeDescriptor) -> U256 {
    size_of(ty).slots()
}

pub fn record_size(ty: &TypeDescriptor) -> u64 {
    size_of(ty).record_bytes()
}

pub fn elements_per_slot(element: &TypeDescriptor) -> u64 {
    size_of(element).per_slot()
}

fn fixed_array_slots(element: &TypeDescriptor, length: u64) -> U256 {
    let size = size_of(element);
    match size {
        TypeSize::Packed(_) => U256::from(length.div_ceil(size.per_slot())),
        TypeSize::Slots(_) | TypeSize::Dynamic => U256::from(length).saturating_mul(size.slots()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elementary_sizes() {
        assert_eq!(size_of(&TypeDescriptor::uint(8)), TypeSize::Packed(1));
        assert_eq!(size_of(&TypeDescriptor::int(24)), TypeSize::Packed(3));
        assert_eq!(size_of(&TypeDescriptor::uint(256)), TypeSize::Packed(32));
        assert_eq!(size_of(&TypeDescriptor::address()), TypeSize::Packed(20));
        assert_eq!(size_of(&TypeDescriptor::bool()), TypeSize::Packed(1));
        assert_eq!(size_of(&TypeDescriptor::fixed_bytes(4)), TypeSize::Packed(4));
        assert_eq!(size_of(&TypeDescriptor::contract("IERC20")), TypeSize::Packed(20));
        assert_eq!(size_of(&TypeDescriptor::enumeration("Status")), TypeSize::Packed(1));
        assert_eq!(size_of(&TypeDescriptor::Function { external: true }), TypeSize::Packed(24));
        assert_eq!(size_of(&TypeDescriptor::Function { external: false }), TypeSize::Packed(8));
    }

    #[test]
    fn test_dynamic_types_reserve_one_slot() {
        for ty in [
            TypeDescriptor::Bytes,
            TypeDescriptor::String,
            TypeDescriptor::dynamic_array(TypeDescriptor::uint(8)),
            TypeDescriptor::mapping(TypeDescriptor::address(), TypeDescriptor::uint(256)),
        ] {
            assert_eq!(size_of(&ty), TypeSize::Dynamic);
            assert!(starts_new_slot(&ty));
            assert_eq!(storage_slots(&ty), U256::from(1));
            assert_eq!(storage_bytes(&ty), 32);
        }
    }

    #[test]
    fn test_fixed_array_slots() {
        // 32 uint8 per slot
        assert_eq!(storage_slots(&TypeDescriptor::fixed_array(TypeDescriptor::uint(8), 33)), U256::from(2));
        // a 20-byte address does not share a slot with another address
        assert_eq!(storage_slots(&TypeDescriptor::fixed_array(TypeDescriptor::address(), 3)), U256::from(3));
        // uint128 pairs
        assert_eq!(storage_slots(&TypeDescriptor::fixed_array(TypeDescriptor::uint(128), 3)), U256::from(2));
        // uint24: 10 per slot, 2 bytes wasted
        assert_eq!(storage_slots(&TypeDescriptor::fixed_array(TypeDescriptor::uint(24), 11)), U256::from(2));
        // nested static arrays
        let inner = TypeDescriptor::fixed_array(TypeDescriptor::uint(256), 2);
        assert_eq!(storage_slots(&TypeDescriptor::fixed_array(inner, 3)), U256::from(6));
        // dynamic elements take one slot each
        let strings = TypeDescriptor::fixed_array(TypeDescriptor::String, 4);
        assert_eq!(storage_slots(&strings), U256::from(4));
        assert_eq!(record_size(&strings), 128);
    }

    #[test]
    fn test_struct_slots() {
        let packed = TypeDescriptor::structure(
            "Packed",
            vec![
                ("a", TypeDescriptor::uint(128)),
                ("b", TypeDescriptor::uint(64)),
                ("c", TypeDescriptor::address()),
            ],
        );
        assert_eq!(storage_slots(&packed), U256::from(2));
        assert!(starts_new_slot(&packed));
    }

    #[test]
    fn test_deeply_nested_structs() {
        // every level wraps the one below next to a bool; 40 levels only
        // finish if each layout is walked once per sizing
        let mut ty = TypeDescriptor::structure("L0", vec![("v", TypeDescriptor::uint(256))]);
        for depth in 1..=40 {
            ty = TypeDescriptor::structure(
                format!("L{}", depth),
                vec![("inner", ty), ("flag", TypeDescriptor::bool())],
            );
        }
        assert_eq!(storage_slots(&ty), U256::from(41));
        assert_eq!(record_size(&ty), 41 * 32);
    }

    #[test]
    fn test_huge_array_saturates_record_size() {
        let huge = TypeDescriptor::fixed_array(TypeDescriptor::uint(256), u64::MAX);
        assert_eq!(storage_slots(&huge), U256::from(u64::MAX));
        assert_eq!(record_size(&huge), u64::MAX);
    }
}
