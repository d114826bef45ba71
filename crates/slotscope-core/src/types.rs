//! Type descriptors, state variables and contracts
//!
//! These are the inputs handed over by the contract-model collaborator.
//! Nothing in the resolver or the reader mutates them.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Elementary (value) types that fit in a single storage word
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", tag = "kind", content = "width")]
pub enum ElementaryType {
    /// `uintN`, width in bits (8..=256, multiple of 8)
    Uint(u16),
    /// `intN`, width in bits (8..=256, multiple of 8)
    Int(u16),
    /// `address` / `address payable`
    Address,
    /// `bool`
    Bool,
    /// `bytesN`, width in bytes (1..=32)
    FixedBytes(u8),
}

impl ElementaryType {
    /// Packed width in bytes, rounded up to a whole byte and capped at 32
    pub fn byte_width(&self) -> u8 {
        match self {
            ElementaryType::Uint(bits) | ElementaryType::Int(bits) => {
                (bits.div_ceil(8)).clamp(1, 32) as u8
            }
            ElementaryType::Address => 20,
            ElementaryType::Bool => 1,
            ElementaryType::FixedBytes(n) => (*n).clamp(1, 32),
        }
    }
}

impl fmt::Display for ElementaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementaryType::Uint(bits) => write!(f, "uint{}", bits),
            ElementaryType::Int(bits) => write!(f, "int{}", bits),
            ElementaryType::Address => write!(f, "address"),
            ElementaryType::Bool => write!(f, "bool"),
            ElementaryType::FixedBytes(n) => write!(f, "bytes{}", n),
        }
    }
}

/// What a named user-defined type stands for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UserDefinedKind {
    /// A contract or interface reference, stored as an address
    Contract,
    /// An enum, stored as the smallest unsigned integer holding its members
    Enum,
    /// A user-defined value type (`type Price is uint128`)
    ValueType,
}

/// A named member of a struct
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StructField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeDescriptor,
}

/// A struct definition with its members in declaration order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<StructField>,
}

impl StructType {
    /// Look up a member by name
    pub fn field(&self, name: &str) -> Option<(usize, &StructField)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }
}

/// Storage type of a state variable
///
/// The set of shapes is closed: the size model, the packing cursor, slot
/// derivation and the decoder all match on it exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", tag = "shape")]
pub enum TypeDescriptor {
    Elementary(ElementaryType),
    FixedArray {
        element: Box<TypeDescriptor>,
        length: u64,
    },
    DynamicArray {
        element: Box<TypeDescriptor>,
    },
    Mapping {
        key: Box<TypeDescriptor>,
        value: Box<TypeDescriptor>,
    },
    Struct(StructType),
    Bytes,
    String,
    UserDefined {
        name: String,
        kind: UserDefinedKind,
        underlying: Box<TypeDescriptor>,
    },
    /// A function reference: executable code, never decoded as data
    Function {
        external: bool,
    },
    /// A struct named by reference where it contains itself through a
    /// mapping or dynamic array; expanded from the model's struct table
    /// when a path steps into it
    StructRef {
        name: String,
    },
}

impl TypeDescriptor {
    pub fn uint(bits: u16) -> Self {
        TypeDescriptor::Elementary(ElementaryType::Uint(bits))
    }

    pub fn int(bits: u16) -> Self {
        TypeDescriptor::Elementary(ElementaryType::Int(bits))
    }

    pub fn address() -> Self {
        TypeDescriptor::Elementary(ElementaryType::Address)
    }

    pub fn bool() -> Self {
        TypeDescriptor::Elementary(ElementaryType::Bool)
    }

    pub fn fixed_bytes(n: u8) -> Self {
        TypeDescriptor::Elementary(ElementaryType::FixedBytes(n))
    }

    pub fn fixed_array(element: TypeDescriptor, length: u64) -> Self {
        TypeDescriptor::FixedArray { element: Box::new(element), length }
    }

    pub fn dynamic_array(element: TypeDescriptor) -> Self {
        TypeDescriptor::DynamicArray { element: Box::new(element) }
    }

    pub fn mapping(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        TypeDescriptor::Mapping { key: Box::new(key), value: Box::new(value) }
    }

    pub fn structure(name: impl Into<String>, fields: Vec<(&str, TypeDescriptor)>) -> Self {
        TypeDescriptor::Struct(StructType {
            name: name.into(),
            fields: fields
                .into_iter()
                .map(|(name, ty)| StructField { name: name.to_string(), ty })
                .collect(),
        })
    }

    /// A contract reference, stored as a 20-byte address
    pub fn contract(name: impl Into<String>) -> Self {
        TypeDescriptor::UserDefined {
            name: name.into(),
            kind: UserDefinedKind::Contract,
            underlying: Box::new(TypeDescriptor::address()),
        }
    }

    pub fn struct_ref(name: impl Into<String>) -> Self {
        TypeDescriptor::StructRef { name: name.into() }
    }

    /// An enum; at most 256 members, so always stored as `uint8`
    pub fn enumeration(name: impl Into<String>) -> Self {
        TypeDescriptor::UserDefined {
            name: name.into(),
            kind: UserDefinedKind::Enum,
            underlying: Box::new(TypeDescriptor::uint(8)),
        }
    }

    /// Strip user-defined wrappers down to the type actually stored
    pub fn storage_type(&self) -> &TypeDescriptor {
        let mut current = self;
        while let TypeDescriptor::UserDefined { underlying, .. } = current {
            current = underlying;
        }
        current
    }

    /// Value types pack into a slot next to each other
    pub fn is_value_type(&self) -> bool {
        match self.storage_type() {
            TypeDescriptor::Elementary(_) | TypeDescriptor::Function { .. } => true,
            TypeDescriptor::FixedArray { .. }
            | TypeDescriptor::DynamicArray { .. }
            | TypeDescriptor::Mapping { .. }
            | TypeDescriptor::Struct(_)
            | TypeDescriptor::StructRef { .. }
            | TypeDescriptor::Bytes
            | TypeDescriptor::String => false,
            TypeDescriptor::UserDefined { .. } => unreachable!("storage_type strips wrappers"),
        }
    }

    /// Dynamic types keep their contents at hash-derived slots
    pub fn is_dynamic(&self) -> bool {
        matches!(
            self.storage_type(),
            TypeDescriptor::DynamicArray { .. }
                | TypeDescriptor::Mapping { .. }
                | TypeDescriptor::Bytes
                | TypeDescriptor::String
        )
    }

    /// Solidity spelling of the type, used as the `type_string` of records
    pub fn type_string(&self) -> String {
        match self {
            TypeDescriptor::Elementary(ty) => ty.to_string(),
            TypeDescriptor::FixedArray { element, length } => {
                format!("{}[{}]", element.type_string(), length)
            }
            TypeDescriptor::DynamicArray { element } => format!("{}[]", element.type_string()),
            TypeDescriptor::Mapping { key, value } => {
                format!("mapping({} => {})", key.type_string(), value.type_string())
            }
            TypeDescriptor::Struct(s) => format!("struct {}", s.name),
            TypeDescriptor::StructRef { name } => format!("struct {}", name),
            TypeDescriptor::Bytes => "bytes".to_string(),
            TypeDescriptor::String => "string".to_string(),
            TypeDescriptor::UserDefined { name, kind, .. } => match kind {
                UserDefinedKind::Contract => format!("contract {}", name),
                UserDefinedKind::Enum => format!("enum {}", name),
                UserDefinedKind::ValueType => name.clone(),
            },
            TypeDescriptor::Function { external } => {
                if *external {
                    "function external".to_string()
                } else {
                    "function internal".to_string()
                }
            }
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_string())
    }
}

/// A state variable as declared in a contract
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateVariable {
    pub name: String,
    /// Contract that declares the variable
    pub contract: String,
    /// Position within the declaring contract
    pub index: usize,
    #[serde(rename = "type")]
    pub ty: TypeDescriptor,
    #[serde(default)]
    pub constant: bool,
    #[serde(default)]
    pub immutable: bool,
}

impl StateVariable {
    pub fn new(contract: impl Into<String>, index: usize, name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            contract: contract.into(),
            index,
            ty,
            constant: false,
            immutable: false,
        }
    }

    /// Constant and immutable variables live in bytecode, not in storage
    pub fn occupies_storage(&self) -> bool {
        !self.constant && !self.immutable
    }
}

/// A contract with its own variables and its linearized bases
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contract {
    pub name: String,
    /// Variables declared by this contract itself, in declaration order
    pub variables: Vec<StateVariable>,
    /// Linearized inheritance, most-base first, excluding the contract itself
    #[serde(default)]
    pub bases: Vec<String>,
}

impl Contract {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), variables: Vec::new(), bases: Vec::new() }
    }

    /// Builder-style helper used by tests and the model loader
    pub fn with_variable(mut self, name: &str, ty: TypeDescriptor) -> Self {
        let index = self.variables.len();
        self.variables.push(StateVariable::new(self.name.clone(), index, name, ty));
        self
    }

    pub fn with_bases(mut self, bases: &[&str]) -> Self {
        self.bases = bases.iter().map(|b| b.to_string()).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_strings() {
        let ty = TypeDescriptor::mapping(
            TypeDescriptor::address(),
            TypeDescriptor::mapping(TypeDescriptor::uint(256), TypeDescriptor::dynamic_array(TypeDescriptor::bool())),
        );
        assert_eq!(ty.type_string(), "mapping(address => mapping(uint256 => bool[]))");
        assert_eq!(TypeDescriptor::fixed_array(TypeDescriptor::fixed_bytes(4), 3).type_string(), "bytes4[3]");
    }

    #[test]
    fn test_user_defined_unwraps_to_storage_type() {
        let token = TypeDescriptor::contract("IERC20");
        assert_eq!(token.storage_type(), &TypeDescriptor::address());
        assert!(token.is_value_type());
        assert_eq!(token.type_string(), "contract IERC20");
    }

    #[test]
    fn test_struct_ref_spells_like_struct() {
        let node = TypeDescriptor::dynamic_array(TypeDescriptor::struct_ref("Node"));
        assert_eq!(node.type_string(), "struct Node[]");
        assert!(!TypeDescriptor::struct_ref("Node").is_value_type());
        assert!(!TypeDescriptor::struct_ref("Node").is_dynamic());
    }

    #[test]
    fn test_enum_width() {
        let status = TypeDescriptor::enumeration("Status");
        assert_eq!(status.storage_type(), &TypeDescriptor::uint(8));
        assert_eq!(status.type_string(), "enum Status");
    }

    #[test]
    fn test_excluded_variables() {
        let mut var = StateVariable::new("A", 0, "FEE", TypeDescriptor::uint(256));
        assert!(var.occupies_storage());
        var.constant = true;
        assert!(!var.occupies_storage());
    }

    #[test]
    fn test_descriptor_json_shape() {
        let ty = TypeDescriptor::fixed_array(TypeDescriptor::uint(8), 2);
        let json = serde_json::to_value(&ty).unwrap();
        assert_eq!(json["shape"], "fixed_array");
        assert_eq!(json["element"]["kind"], "uint");
        let back: TypeDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, ty);
    }
}
