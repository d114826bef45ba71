//! Contract model loading
//!
//! The resolver consumes contracts, their linearized bases and typed state
//! variables. Those come from a JSON document produced by a compiler front
//! end:
//!
//! ```json
//! {
//!   "contracts": [
//!     { "name": "Token", "bases": ["Ownable"],
//!       "variables": [ { "name": "balances", "type": "mapping(address => uint256)" } ] }
//!   ],
//!   "structs": { "Position": [ { "name": "owner", "type": "address" } ] },
//!   "enums": ["Status"],
//!   "value_types": { "Price": "uint128" }
//! }
//! ```
//!
//! Type strings use Solidity syntax. Bare names resolve to a declared
//! struct, enum, user-defined value type or contract, in that order.
//!
//! A struct may refer to itself through a mapping or dynamic array
//! (`struct Node { Node[] children; }`); that inner use becomes a
//! [`TypeDescriptor::StructRef`] resolved against [`ContractModel::structs`].
//! A struct holding itself in place, directly or through static arrays,
//! has no finite layout and is rejected.

use serde::Deserialize;
use slotscope_core::{Contract, SlotScopeError, StateVariable, StructField, StructType, TypeDescriptor};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct RawModel {
    contracts: Vec<RawContract>,
    #[serde(default)]
    structs: BTreeMap<String, Vec<RawField>>,
    #[serde(default)]
    enums: Vec<String>,
    #[serde(default)]
    value_types: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawContract {
    name: String,
    #[serde(default)]
    bases: Vec<String>,
    #[serde(default)]
    variables: Vec<RawVariable>,
}

#[derive(Debug, Deserialize)]
struct RawVariable {
    name: String,
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    constant: bool,
    #[serde(default)]
    immutable: bool,
}

#[derive(Debug, Deserialize)]
struct RawField {
    name: String,
    #[serde(rename = "type")]
    ty: String,
}

/// Struct definitions by name
pub type StructTable = BTreeMap<String, StructType>;

/// Contracts available to the resolver
#[derive(Debug, Clone, Default)]
pub struct ContractModel {
    contracts: Vec<Contract>,
    structs: StructTable,
}

impl ContractModel {
    pub fn new(contracts: Vec<Contract>) -> Self {
        Self { contracts, structs: StructTable::new() }
    }

    /// Register a struct definition for references to it
    pub fn with_struct(mut self, def: StructType) -> Self {
        self.structs.insert(def.name.clone(), def);
        self
    }

    /// Load a model from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SlotScopeError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Parse a model document
    pub fn from_json_str(json: &str) -> Result<Self, SlotScopeError> {
        let raw: RawModel = serde_json::from_str(json)?;
        let types = TypeTable::new(&raw);

        let mut structs = StructTable::new();
        for name in raw.structs.keys() {
            match types.parse_struct(name, &mut Vec::new(), 0) {
                Ok(TypeDescriptor::Struct(def)) => {
                    structs.insert(name.clone(), def);
                }
                Ok(other) => {
                    return Err(SlotScopeError::InvalidModel(format!("struct {} parsed as {}", name, other)))
                }
                Err(e) => return Err(SlotScopeError::InvalidModel(format!("struct {}: {}", name, e))),
            }
        }

        let mut contracts = Vec::with_capacity(raw.contracts.len());
        for rc in &raw.contracts {
            let mut variables = Vec::with_capacity(rc.variables.len());
            for (index, rv) in rc.variables.iter().enumerate() {
                let ty = types.parse(&rv.ty).map_err(|e| {
                    SlotScopeError::InvalidModel(format!("{}.{}: {}", rc.name, rv.name, e))
                })?;
                let mut var = StateVariable::new(rc.name.clone(), index, rv.name.clone(), ty);
                var.constant = rv.constant;
                var.immutable = rv.immutable;
                variables.push(var);
            }
            contracts.push(Contract { name: rc.name.clone(), variables, bases: rc.bases.clone() });
        }

        debug!(contracts = contracts.len(), structs = structs.len(), "Loaded contract model");
        Ok(Self { contracts, structs })
    }

    pub fn contracts(&self) -> &[Contract] {
        &self.contracts
    }

    pub fn structs(&self) -> &StructTable {
        &self.structs
    }

    pub fn names(&self) -> Vec<String> {
        self.contracts.iter().map(|c| c.name.clone()).collect()
    }

    pub fn contract(&self, name: &str) -> Result<&Contract, SlotScopeError> {
        self.contracts
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| SlotScopeError::ContractNotFound(name.to_string()))
    }

    /// Storage variables of a contract in layout order
    ///
    /// Each base contributes its own variables, most-base first, followed
    /// by the contract's own. Constants and immutables are skipped.
    pub fn storage_variables(&self, name: &str) -> Result<Vec<&StateVariable>, SlotScopeError> {
        let contract = self.contract(name)?;
        let mut vars = Vec::new();
        for base in &contract.bases {
            if base == name {
                continue;
            }
            vars.extend(self.contract(base)?.variables.iter().filter(|v| v.occupies_storage()));
        }
        vars.extend(contract.variables.iter().filter(|v| v.occupies_storage()));
        Ok(vars)
    }
}

/// Named types declared in a model document
struct TypeTable<'a> {
    structs: &'a BTreeMap<String, Vec<RawField>>,
    enums: BTreeSet<&'a str>,
    value_types: &'a BTreeMap<String, String>,
    contracts: BTreeSet<&'a str>,
}

impl<'a> TypeTable<'a> {
    fn new(raw: &'a RawModel) -> Self {
        Self {
            structs: &raw.structs,
            enums: raw.enums.iter().map(String::as_str).collect(),
            value_types: &raw.value_types,
            contracts: raw.contracts.iter().map(|c| c.name.as_str()).collect(),
        }
    }

    fn parse(&self, ty: &str) -> Result<TypeDescriptor, String> {
        let mut resolving = Vec::new();
        self.parse_inner(ty, &mut resolving, 0)
    }

    /// `resolving` holds the structs being expanded, outermost first;
    /// those below index `boundary` sit outside the nearest enclosing
    /// mapping or dynamic array.
    fn parse_inner(&self, ty: &str, resolving: &mut Vec<String>, boundary: usize) -> Result<TypeDescriptor, String> {
        let ty = ty.trim();
        if ty.is_empty() {
            return Err("empty type".to_string());
        }

        // array suffixes bind last: `uint8[2][]` is a dynamic array of uint8[2]
        if ty.ends_with(']') {
            let open = matching_open_bracket(ty).ok_or_else(|| format!("unbalanced brackets in '{}'", ty))?;
            let len = ty[open + 1..ty.len() - 1].trim();
            if len.is_empty() {
                let inside = resolving.len();
                let element = self.parse_inner(&ty[..open], resolving, inside)?;
                return Ok(TypeDescriptor::dynamic_array(element));
            }
            let length = len.parse::<u64>().map_err(|_| format!("invalid array length '{}'", len))?;
            let element = self.parse_inner(&ty[..open], resolving, boundary)?;
            return Ok(TypeDescriptor::fixed_array(element, length));
        }

        if let Some(inner) = ty.strip_prefix("mapping").map(str::trim) {
            let inner = inner
                .strip_prefix('(')
                .and_then(|s| s.strip_suffix(')'))
                .ok_or_else(|| format!("malformed mapping '{}'", ty))?;
            let arrow = top_level_arrow(inner).ok_or_else(|| format!("mapping without '=>' in '{}'", ty))?;
            // named mapping parameters (`address owner => uint256`) drop the name
            let key = strip_param_name(&inner[..arrow]);
            let value = strip_param_name(&inner[arrow + 2..]);
            let inside = resolving.len();
            return Ok(TypeDescriptor::mapping(
                self.parse_inner(key, resolving, inside)?,
                self.parse_inner(value, resolving, inside)?,
            ));
        }

        if ty.starts_with("function") {
            let external = ty.split_whitespace().any(|w| w == "external");
            return Ok(TypeDescriptor::Function { external });
        }

        if let Some(elementary) = parse_elementary(ty) {
            return Ok(elementary);
        }

        if let Some(name) = ty.strip_prefix("struct ") {
            return self.parse_struct(name.trim(), resolving, boundary);
        }
        if let Some(name) = ty.strip_prefix("enum ") {
            return Ok(TypeDescriptor::enumeration(name.trim()));
        }
        if let Some(name) = ty.strip_prefix("contract ").or_else(|| ty.strip_prefix("interface ")) {
            return Ok(TypeDescriptor::contract(name.trim()));
        }

        if self.structs.contains_key(ty) {
            return self.parse_struct(ty, resolving, boundary);
        }
        if self.enums.contains(ty) {
            return Ok(TypeDescriptor::enumeration(ty));
        }
        if let Some(underlying) = self.value_types.get(ty) {
            let underlying = self.parse_inner(underlying, resolving, boundary)?;
            if !underlying.is_value_type() {
                return Err(format!("value type '{}' wraps non-value type {}", ty, underlying));
            }
            return Ok(TypeDescriptor::UserDefined {
                name: ty.to_string(),
                kind: slotscope_core::UserDefinedKind::ValueType,
                underlying: Box::new(underlying),
            });
        }
        if self.contracts.contains(ty) {
            return Ok(TypeDescriptor::contract(ty));
        }

        Err(format!("unknown type '{}'", ty))
    }

    fn parse_struct(&self, name: &str, resolving: &mut Vec<String>, boundary: usize) -> Result<TypeDescriptor, String> {
        let fields = self.structs.get(name).ok_or_else(|| format!("unknown struct '{}'", name))?;
        if let Some(pos) = resolving.iter().position(|r| r == name) {
            return if pos < boundary {
                Ok(TypeDescriptor::struct_ref(name))
            } else {
                Err(format!("struct '{}' contains itself without a mapping or dynamic array in between", name))
            };
        }
        resolving.push(name.to_string());
        let mut parsed = Vec::with_capacity(fields.len());
        for field in fields {
            let ty = self.parse_inner(&field.ty, resolving, boundary)?;
            parsed.push(StructField { name: field.name.clone(), ty });
        }
        resolving.pop();
        if parsed.is_empty() {
            return Err(format!("struct '{}' has no members", name));
        }
        Ok(TypeDescriptor::Struct(StructType { name: name.to_string(), fields: parsed }))
    }
}

/// Parse a built-in value type or `bytes` / `string`
fn parse_elementary(ty: &str) -> Option<TypeDescriptor> {
    match ty {
        "address" | "address payable" => return Some(TypeDescriptor::address()),
        "bool" => return Some(TypeDescriptor::bool()),
        "string" => return Some(TypeDescriptor::String),
        "bytes" => return Some(TypeDescriptor::Bytes),
        "byte" => return Some(TypeDescriptor::fixed_bytes(1)),
        "uint" => return Some(TypeDescriptor::uint(256)),
        "int" => return Some(TypeDescriptor::int(256)),
        _ => {}
    }
    if let Some(bits) = ty.strip_prefix("uint").and_then(|b| b.parse::<u16>().ok()) {
        return valid_int_width(bits).then(|| TypeDescriptor::uint(bits));
    }
    if let Some(bits) = ty.strip_prefix("int").and_then(|b| b.parse::<u16>().ok()) {
        return valid_int_width(bits).then(|| TypeDescriptor::int(bits));
    }
    if let Some(n) = ty.strip_prefix("bytes").and_then(|b| b.parse::<u8>().ok()) {
        return (1..=32).contains(&n).then(|| TypeDescriptor::fixed_bytes(n));
    }
    None
}

fn valid_int_width(bits: u16) -> bool {
    bits >= 8 && bits <= 256 && bits % 8 == 0
}

/// Index of the `[` matching the final `]`
fn matching_open_bracket(ty: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in ty.char_indices().rev() {
        match c {
            ']' => depth += 1,
            '[' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Position of the `=>` that separates key and value, outside any parens
fn top_level_arrow(inner: &str) -> Option<usize> {
    let bytes = inner.as_bytes();
    let mut depth = 0i32;
    for i in 0..bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b'=' if depth == 0 && bytes.get(i + 1) == Some(&b'>') => return Some(i),
            _ => {}
        }
    }
    None
}

fn strip_param_name(part: &str) -> &str {
    let part = part.trim();
    if part.starts_with("mapping") {
        return match part.rfind(')') {
            Some(close) => &part[..=close],
            None => part,
        };
    }
    if part.ends_with(']') {
        return part;
    }
    // `address owner` → `address`, but keep two-word types intact
    match part.rsplit_once(' ') {
        Some((head, tail))
            if !matches!(head, "struct" | "enum" | "contract" | "interface")
                && tail != "payable" =>
        {
            head.trim()
        }
        _ => part,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"{
        "contracts": [
            { "name": "Ownable", "variables": [ { "name": "owner", "type": "address" } ] },
            {
                "name": "Vault",
                "bases": ["Ownable"],
                "variables": [
                    { "name": "FEE", "type": "uint256", "constant": true },
                    { "name": "status", "type": "Status" },
                    { "name": "price", "type": "Price" },
                    { "name": "positions", "type": "mapping(address => Position[])" },
                    { "name": "token", "type": "Ownable" },
                    { "name": "grid", "type": "uint8[2][3]" }
                ]
            }
        ],
        "structs": {
            "Position": [
                { "name": "owner", "type": "address" },
                { "name": "amount", "type": "uint128" }
            ]
        },
        "enums": ["Status"],
        "value_types": { "Price": "uint128" }
    }"#;

    #[test]
    fn test_load_model() {
        let model = ContractModel::from_json_str(MODEL).unwrap();
        assert_eq!(model.names(), vec!["Ownable".to_string(), "Vault".to_string()]);

        let vars = model.storage_variables("Vault").unwrap();
        let names: Vec<&str> = vars.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["owner", "status", "price", "positions", "token", "grid"]);
        assert_eq!(vars[0].contract, "Ownable");
    }

    #[test]
    fn test_named_types_resolve() {
        let model = ContractModel::from_json_str(MODEL).unwrap();
        let vault = model.contract("Vault").unwrap();
        let ty = |name: &str| vault.variables.iter().find(|v| v.name == name).unwrap().ty.clone();

        assert_eq!(ty("status").type_string(), "enum Status");
        assert_eq!(ty("price").storage_type(), &TypeDescriptor::uint(128));
        assert_eq!(ty("token").type_string(), "contract Ownable");
        assert_eq!(ty("positions").type_string(), "mapping(address => struct Position[])");
        assert_eq!(
            ty("grid"),
            TypeDescriptor::fixed_array(TypeDescriptor::fixed_array(TypeDescriptor::uint(8), 2), 3)
        );
    }

    #[test]
    fn test_missing_base_is_reported() {
        let json = r#"{ "contracts": [ { "name": "A", "bases": ["Missing"], "variables": [] } ] }"#;
        let model = ContractModel::from_json_str(json).unwrap();
        assert!(matches!(model.storage_variables("A"), Err(SlotScopeError::ContractNotFound(_))));
        assert!(matches!(model.contract("B"), Err(SlotScopeError::ContractNotFound(_))));
    }

    #[test]
    fn test_unknown_type_is_invalid_model() {
        let json = r#"{ "contracts": [ { "name": "A", "variables": [ { "name": "x", "type": "Widget" } ] } ] }"#;
        let err = ContractModel::from_json_str(json).unwrap_err();
        assert!(matches!(err, SlotScopeError::InvalidModel(msg) if msg.contains("A.x")));
    }

    #[test]
    fn test_struct_containing_itself_in_place_is_rejected() {
        for inner in ["Node", "Node[2]", "Wrapper"] {
            let json = format!(
                r#"{{
                    "contracts": [ {{ "name": "T", "variables": [ {{ "name": "root", "type": "uint256" }} ] }} ],
                    "structs": {{
                        "Node": [ {{ "name": "value", "type": "uint256" }}, {{ "name": "next", "type": "{}" }} ],
                        "Wrapper": [ {{ "name": "node", "type": "Node" }} ]
                    }}
                }}"#,
                inner
            );
            let err = ContractModel::from_json_str(&json).unwrap_err();
            assert!(matches!(err, SlotScopeError::InvalidModel(ref msg) if msg.contains("contains itself")), "{}", inner);
        }
    }

    #[test]
    fn test_struct_recursing_through_containers() {
        let json = r#"{
            "contracts": [ {
                "name": "Tree",
                "variables": [
                    { "name": "count", "type": "uint256" },
                    { "name": "nodes", "type": "mapping(uint256 => Node)" },
                    { "name": "forest", "type": "Forest" }
                ]
            } ],
            "structs": {
                "Node": [ { "name": "value", "type": "uint256" }, { "name": "children", "type": "Node[]" } ],
                "Forest": [ { "name": "trees", "type": "Grove[]" } ],
                "Grove": [ { "name": "forest", "type": "Forest" }, { "name": "byId", "type": "mapping(uint256 => Node)" } ]
            }
        }"#;
        let model = ContractModel::from_json_str(json).unwrap();
        let node = &model.structs()["Node"];
        assert_eq!(node.fields[1].ty, TypeDescriptor::dynamic_array(TypeDescriptor::struct_ref("Node")));

        let tree = model.contract("Tree").unwrap();
        let TypeDescriptor::Mapping { value, .. } = &tree.variables[1].ty else { panic!("expected mapping") };
        assert!(matches!(value.as_ref(), TypeDescriptor::Struct(s) if s.name == "Node"));

        // mutual recursion: Forest -> Grove[] -> Forest
        let TypeDescriptor::Struct(forest) = &tree.variables[2].ty else { panic!("expected struct") };
        let TypeDescriptor::DynamicArray { element } = &forest.fields[0].ty else { panic!("expected array") };
        let TypeDescriptor::Struct(grove) = element.as_ref() else { panic!("expected struct") };
        assert_eq!(grove.fields[0].ty, TypeDescriptor::struct_ref("Forest"));
    }

    #[test]
    fn test_type_string_forms() {
        let raw: RawModel = serde_json::from_str(r#"{ "contracts": [] }"#).unwrap();
        let table = TypeTable::new(&raw);
        assert_eq!(table.parse("uint").unwrap(), TypeDescriptor::uint(256));
        assert_eq!(table.parse("address payable").unwrap(), TypeDescriptor::address());
        assert_eq!(table.parse("bytes32").unwrap(), TypeDescriptor::fixed_bytes(32));
        assert_eq!(table.parse("function external").unwrap(), TypeDescriptor::Function { external: true });
        assert_eq!(
            table.parse("mapping(address owner => mapping(uint256 => bool) approvals)").unwrap(),
            TypeDescriptor::mapping(
                TypeDescriptor::address(),
                TypeDescriptor::mapping(TypeDescriptor::uint(256), TypeDescriptor::bool())
            )
        );
        assert!(table.parse("uint7").is_err());
        assert!(table.parse("bytes33").is_err());
        assert!(table.parse("uint8[").is_err());
    }
}
