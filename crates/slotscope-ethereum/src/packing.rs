//! Slot and offset assignment
//!
//! The cursor walks declarations in order and hands out `(slot, offset)`
//! pairs exactly as the compiler does: value types pack from the low-order
//! end of a slot, anything else starts a fresh slot and the next
//! declaration after it starts a fresh slot as well.

use crate::size::{size_of, SLOT_BYTES};
use alloy_primitives::U256;
use slotscope_core::{StructType, TypeDescriptor};

/// Where one declaration landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub slot: U256,
    pub offset: u8,
}

/// Stateful slot/offset allocator
#[derive(Debug, Clone, Default)]
pub struct PackingCursor {
    slot: U256,
    offset: u8,
}

impl PackingCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place the next declaration and advance past it
    pub fn place(&mut self, ty: &TypeDescriptor) -> Placement {
        let size = size_of(ty);
        let bytes = size.bytes();
        let fresh = size.starts_new_slot();

        if (fresh || self.offset + bytes > SLOT_BYTES) && self.offset > 0 {
            self.slot += U256::from(1);
            self.offset = 0;
        }

        let placement = Placement { slot: self.slot, offset: self.offset };

        if fresh {
            self.slot += size.slots();
            self.offset = 0;
        } else {
            self.offset += bytes;
        }
        placement
    }

    /// Slots touched so far, counting a partially filled one
    pub fn slots_used(&self) -> U256 {
        if self.offset > 0 {
            self.slot + U256::from(1)
        } else {
            self.slot
        }
    }
}

/// A struct member placed relative to the struct's first slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPlacement {
    pub name: String,
    pub relative_slot: U256,
    pub offset: u8,
    pub ty: TypeDescriptor,
}

/// Member placements and total slots of a struct
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    pub fields: Vec<FieldPlacement>,
    pub slots: U256,
}

impl StructLayout {
    pub fn field(&self, name: &str) -> Option<&FieldPlacement> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Run a nested cursor over the struct's members
pub fn struct_layout(s: &StructType) -> StructLayout {
    let mut cursor = PackingCursor::new();
    let fields = s
        .fields
        .iter()
        .map(|field| {
            let placement = cursor.place(&field.ty);
            FieldPlacement {
                name: field.name.clone(),
                relative_slot: placement.slot,
                offset: placement.offset,
                ty: field.ty.clone(),
            }
        })
        .collect();
    // a struct always owns at least one slot
    let slots = cursor.slots_used().max(U256::from(1));
    StructLayout { fields, slots }
}
