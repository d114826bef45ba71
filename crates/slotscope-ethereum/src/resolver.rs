//! Storage layout resolution
//!
//! Turns a [`ContractModel`] into [`SlotRecord`]s. Two phases share the
//! same machinery:
//!
//! - the full layout: one record per declared variable, plus one per struct
//!   member and fixed-array element nested inside it;
//! - targeted resolution: exactly the records of one logical value reached
//!   through keys, indices and member names (`balances[0xabc…]`,
//!   `positions[3].owner`).
//!
//! # Examples
//!
//! ```rust,ignore
//! use slotscope_ethereum::{ContractModel, StorageLayoutResolver};
//! use slotscope_core::ResolverConfig;
//!
//! let model = ContractModel::from_file("model.json")?;
//! let resolver = StorageLayoutResolver::new(&model, ResolverConfig::default());
//!
//! let layout = resolver.resolve_full_layout(&model.names())?;
//! let balance = resolver.resolve_query("Token", "balances[0x742d35Cc6634C0532925a3b8D97C2e0D8b2D9C00]")?;
//! ```

use crate::derivation::{derive, element_location, materialize, Location};
use crate::model::ContractModel;
use crate::packing::{struct_layout, PackingCursor};
use crate::size::{record_size, TypeSize};
use alloy_primitives::U256;
use slotscope_core::path::parse_bracket;
use slotscope_core::{
    AccessStep, LayoutStore, RecordStatus, ResolverConfig, SlotRecord, SlotScopeError, StateVariable,
    TypeDescriptor, VariablePath,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// A storage variable with its assigned position
#[derive(Debug, Clone)]
pub struct VariablePlacement<'a> {
    pub variable: &'a StateVariable,
    /// Name used in record paths; `Declarer.name` when a base variable is
    /// shadowed by a later declaration of the same name
    pub name: String,
    /// Declared type with struct references expanded where laid out in place
    pub ty: TypeDescriptor,
    pub location: Location,
}

/// Resolves layouts and access paths against a contract model
pub struct StorageLayoutResolver<'a> {
    model: &'a ContractModel,
    config: ResolverConfig,
}

impl<'a> StorageLayoutResolver<'a> {
    pub fn new(model: &'a ContractModel, config: ResolverConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn model(&self) -> &'a ContractModel {
        self.model
    }

    /// Run the packing cursor over the contract's linearized variables
    pub fn placements(&self, contract: &str) -> Result<Vec<VariablePlacement<'a>>, SlotScopeError> {
        let variables = self.model.storage_variables(contract)?;

        let mut last_index: HashMap<&str, usize> = HashMap::new();
        for (i, var) in variables.iter().enumerate() {
            last_index.insert(var.name.as_str(), i);
        }

        let mut cursor = PackingCursor::new();
        let mut placements = Vec::with_capacity(variables.len());
        for (i, var) in variables.iter().enumerate() {
            let ty = materialize(&var.ty, self.model.structs())?;
            let placed = cursor.place(&ty);
            let name = if last_index.get(var.name.as_str()) == Some(&i) {
                var.name.clone()
            } else {
                format!("{}.{}", var.contract, var.name)
            };
            placements.push(VariablePlacement {
                variable: *var,
                name,
                ty,
                location: Location::new(placed.slot, placed.offset),
            });
        }
        Ok(placements)
    }

    /// One record per declared variable, member and element of `contracts`
    pub fn resolve_full_layout(&self, contracts: &[String]) -> Result<LayoutStore, SlotScopeError> {
        let mut store = LayoutStore::new();
        for contract in contracts {
            let before = store.len();
            let placements = self.placements(contract)?;
            for placement in &placements {
                debug!(
                    contract = %contract,
                    variable = %placement.name,
                    slot = %placement.location.slot,
                    offset = placement.location.offset,
                    "Placed variable"
                );
                self.emit(
                    &mut store,
                    contract,
                    &placement.variable.contract,
                    VariablePath::new(placement.name.clone()),
                    placement.location,
                    placement.ty.clone(),
                )?;
            }
            info!(
                contract = %contract,
                variables = placements.len(),
                records = store.len() - before,
                "Resolved storage layout"
            );
        }
        store.validate()?;
        Ok(store)
    }

    /// Records for one variable, optionally reached through a key, a
    /// second-level key and a struct member
    pub fn resolve_target(
        &self,
        contract: &str,
        variable: &str,
        key: Option<&str>,
        deep_key: Option<&str>,
        struct_field: Option<&str>,
    ) -> Result<LayoutStore, SlotScopeError> {
        let mut path = VariablePath::new(variable);
        match (key, deep_key) {
            (None, Some(_)) => {
                return Err(SlotScopeError::InvalidAccessPath(
                    "A deep key requires a key for the first level".to_string(),
                ))
            }
            (Some(k), deep) => {
                path.steps.push(parse_bracket(k)?);
                if let Some(dk) = deep {
                    path.steps.push(parse_bracket(dk)?);
                }
            }
            (None, None) => {}
        }
        if let Some(field) = struct_field {
            path.steps.push(AccessStep::Field(field.to_string()));
        }
        self.resolve_path(contract, &path)
    }

    /// Records for a path expression such as `positions[3].owner`
    pub fn resolve_query(&self, contract: &str, query: &str) -> Result<LayoutStore, SlotScopeError> {
        let path = VariablePath::parse(query)?;
        self.resolve_path(contract, &path)
    }

    /// Records for the value at `path`
    ///
    /// A path with more steps than `max_depth` stops at the cap; the
    /// resulting record is flagged partial instead of failing.
    pub fn resolve_path(&self, contract: &str, path: &VariablePath) -> Result<LayoutStore, SlotScopeError> {
        let placements = self.placements(contract)?;
        let placement = placements
            .iter()
            .find(|p| p.name == path.base)
            .ok_or_else(|| SlotScopeError::VariableNotFound {
                contract: contract.to_string(),
                variable: path.base.clone(),
            })?;

        let max_depth = self.config.max_depth;
        let derived = derive(placement.location, &placement.ty, &path.steps, max_depth, self.model.structs())?;
        let declared_in = &placement.variable.contract;
        let mut store = LayoutStore::new();
        let resolved = VariablePath { base: placement.name.clone(), steps: derived.steps };

        if derived.truncated {
            let reason = SlotScopeError::DepthExceeded { depth: path.depth(), max: max_depth }.to_string();
            warn!(contract = %contract, path = %path, "{}", reason);
            let record = SlotRecord::new(
                contract,
                declared_in.clone(),
                resolved,
                derived.location.slot,
                derived.location.offset,
                record_size(&derived.ty),
                derived.ty,
            )
            .with_status(RecordStatus::Partial(reason));
            store.insert(record)?;
            return Ok(store);
        }

        let path = resolved;
        debug!(
            contract = %contract,
            path = %path,
            slot = %derived.location.slot,
            offset = derived.location.offset,
            "Resolved access path"
        );
        self.emit(&mut store, contract, declared_in, path, derived.location, derived.ty)?;
        Ok(store)
    }

    /// Insert the record for a value and, for static composites, its members
    ///
    /// Walks with an explicit stack; nesting beyond `max_depth` steps stops
    /// expanding and flags the record partial. Fixed-array elements share
    /// one budget of `max_array_elements` across the whole value, nested
    /// arrays included; an array whose elements would overrun it keeps
    /// only its own record, flagged partial.
    fn emit(
        &self,
        store: &mut LayoutStore,
        contract: &str,
        declared_in: &str,
        path: VariablePath,
        location: Location,
        ty: TypeDescriptor,
    ) -> Result<(), SlotScopeError> {
        let limit = self.config.max_array_elements;
        let mut budget = limit;
        let mut work = vec![(path, location, ty)];

        while let Some((path, location, ty)) = work.pop() {
            let ty = materialize(&ty, self.model.structs())?;
            let mut status = match ty.storage_type() {
                TypeDescriptor::Function { .. } => RecordStatus::Unresolved(
                    SlotScopeError::UnresolvedType(format!("{} refers to code, not data", ty)).to_string(),
                ),
                _ => RecordStatus::Resolved,
            };
            let mut size = None;

            let mut children: Vec<(VariablePath, Location, TypeDescriptor)> = match ty.storage_type() {
                TypeDescriptor::Struct(s) => {
                    let layout = struct_layout(s);
                    size = Some(TypeSize::Slots(layout.slots).record_bytes());
                    layout
                        .fields
                        .into_iter()
                        .map(|f| {
                            (
                                path.child(AccessStep::Field(f.name)),
                                Location::new(location.slot.wrapping_add(f.relative_slot), f.offset),
                                f.ty,
                            )
                        })
                        .collect()
                }
                TypeDescriptor::FixedArray { element, length } => {
                    let elements = expanded_elements(&ty);
                    if elements > budget {
                        status = RecordStatus::Partial(format!(
                            "{} elements exceed the expansion limit of {} ({} left)",
                            elements, limit, budget
                        ));
                        Vec::new()
                    } else {
                        budget -= length;
                        (0..*length)
                            .map(|i| {
                                let index = U256::from(i);
                                (
                                    path.child(AccessStep::Index(index)),
                                    element_location(location.slot, element, index),
                                    (**element).clone(),
                                )
                            })
                            .collect()
                    }
                }
                _ => Vec::new(),
            };

            if !children.is_empty() && path.depth() >= self.config.max_depth {
                status = RecordStatus::Partial(
                    SlotScopeError::DepthExceeded { depth: path.depth() + 1, max: self.config.max_depth }
                        .to_string(),
                );
                children.clear();
            }

            let size = size.unwrap_or_else(|| record_size(&ty));
            let record = SlotRecord::new(contract, declared_in, path, location.slot, location.offset, size, ty)
                .with_status(status);
            store.insert(record)?;

            work.extend(children.into_iter().rev());
        }
        Ok(())
    }
}

/// Fixed-array elements a value expands into, nested arrays included
fn expanded_elements(ty: &TypeDescriptor) -> u64 {
    match ty.storage_type() {
        TypeDescriptor::FixedArray { element, length } => {
            length.saturating_mul(expanded_elements(element).saturating_add(1))
        }
        TypeDescriptor::Struct(s) => s.fields.iter().map(|f| expanded_elements(&f.ty)).fold(0, u64::saturating_add),
        _ => 0,
    }
}
