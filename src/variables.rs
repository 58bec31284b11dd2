//! Variable reference registry.
//!
//! A handle is a 32-bit nonzero `(generation, index)` pair. `0` means "no
//! children". Every transition into `Stopped` bumps the generation, which
//! invalidates every handle issued during the previous epoch without
//! needing to track or free them individually — generational handles
//! replace any scheme that would rely on garbage-collected reference
//! identity.
//!
//! Cycle safety (§4.5, §9): expansion is lazy and one level deep, so the
//! only cycle that can occur within a single `variables()` call is a value
//! that is its own child (e.g. an array containing itself via a pointer).
//! That's detected by comparing a child's identity to its parent's before
//! allocating a handle for it, rather than by eagerly walking the whole
//! graph.

use std::collections::BTreeMap;

use crate::lang::interp::ScopeKind;
use crate::lang::value::{Kind, Value};

pub type VarRef = u32;

const MAX_MEMBERS: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid variable reference")]
    InvalidReference,
    #[error("setting nested fields is not supported; set a top-level scope variable instead")]
    NestedAssignmentUnsupported,
}

#[derive(Clone)]
enum HandleKind {
    Scope { frame_depth: usize, scope: ScopeKind },
    Value(Value),
}

pub struct VariableEntry {
    pub name: String,
    pub value: String,
    pub type_name: &'static str,
    pub variables_reference: VarRef,
}

#[derive(Default)]
pub struct VariableRegistry {
    generation: u16,
    entries: Vec<HandleKind>,
}

fn pack(generation: u16, index: u16) -> VarRef {
    ((generation as u32) << 16) | (index as u32 + 1)
}

fn unpack(reference: VarRef) -> (u16, u16) {
    ((reference >> 16) as u16, (reference & 0xFFFF) as u16 - 1)
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumps the generation and discards all previously issued handles.
    /// Called on every entry to `Stopped`.
    pub fn new_epoch(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.entries.clear();
    }

    pub fn scope_handle(&mut self, frame_depth: usize, scope: ScopeKind) -> VarRef {
        self.alloc(HandleKind::Scope { frame_depth, scope })
    }

    fn value_handle(&mut self, value: Value) -> VarRef {
        match value.kind() {
            Kind::Primitive => 0,
            _ => self.alloc(HandleKind::Value(value)),
        }
    }

    fn alloc(&mut self, kind: HandleKind) -> VarRef {
        let index = self.entries.len();
        assert!(index < u16::MAX as usize, "variable registry exhausted");
        self.entries.push(kind);
        pack(self.generation, index as u16)
    }

    fn lookup(&self, reference: VarRef) -> Result<&HandleKind, RegistryError> {
        if reference == 0 {
            return Err(RegistryError::InvalidReference);
        }
        let (generation, index) = unpack(reference);
        if generation != self.generation {
            return Err(RegistryError::InvalidReference);
        }
        self.entries
            .get(index as usize)
            .ok_or(RegistryError::InvalidReference)
    }

    /// Answers a `variables` request, enumerating the named bindings of a
    /// scope handle or the members of an aggregate value handle. `start`
    /// and `count` page through the result; `start + count` beyond the end
    /// is clamped rather than erroring.
    pub fn variables(
        &mut self,
        reference: VarRef,
        bindings_of_scope: impl FnOnce(usize, ScopeKind) -> Vec<(String, Value)>,
        start: Option<usize>,
        count: Option<usize>,
    ) -> Result<Vec<VariableEntry>, RegistryError> {
        let kind = self.lookup(reference)?.clone();
        let members: Vec<(String, Value)> = match kind {
            HandleKind::Scope { frame_depth, scope } => bindings_of_scope(frame_depth, scope),
            HandleKind::Value(ref parent) => aggregate_members(parent),
        };

        let start = start.unwrap_or(0).min(members.len());
        let end = match count {
            Some(c) => (start + c).min(members.len()),
            None => members.len(),
        };

        let parent_identity = match &kind {
            HandleKind::Value(v) => v.identity(),
            HandleKind::Scope { .. } => None,
        };

        Ok(members[start..end]
            .iter()
            .map(|(name, value)| {
                let is_cycle = parent_identity.is_some() && value.identity() == parent_identity;
                let variables_reference = if is_cycle {
                    0
                } else {
                    self.value_handle(value.clone())
                };
                VariableEntry {
                    name: name.clone(),
                    value: if is_cycle {
                        "<cycle>".to_string()
                    } else {
                        value.render()
                    },
                    type_name: value.type_name(),
                    variables_reference,
                }
            })
            .collect())
    }

    /// Resolves a handle to the `(frame_depth, scope)` it was issued for,
    /// needed by `setVariable` to know which frame to assign in. Returns
    /// `None` for a value handle — nested assignment is unsupported, see
    /// [`RegistryError::NestedAssignmentUnsupported`].
    pub fn scope_of(&self, reference: VarRef) -> Result<(usize, ScopeKind), RegistryError> {
        match self.lookup(reference)? {
            HandleKind::Scope { frame_depth, scope } => Ok((*frame_depth, *scope)),
            HandleKind::Value(_) => Err(RegistryError::NestedAssignmentUnsupported),
        }
    }
}

fn aggregate_members(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, r)| (i.to_string(), r.lock().unwrap().clone()))
            .take(MAX_MEMBERS)
            .collect(),
        Value::Record(fields) => fields
            .iter()
            .map(|(k, r)| (k.clone(), r.lock().unwrap().clone()))
            .take(MAX_MEMBERS)
            .collect(),
        Value::Pointer(r) => vec![("*".to_string(), r.lock().unwrap().clone())],
        _ => Vec::new(),
    }
}

/// Builds the `BTreeMap` form `lang::Interpreter::bindings` doesn't return
/// directly but `variables()`'s generic closure parameter expects sorted,
/// stable iteration for — kept here rather than in `lang` since DAP's
/// ordering expectations are this module's concern, not the interpreter's.
pub fn sorted(bindings: Vec<(String, Value)>) -> Vec<(String, Value)> {
    let map: BTreeMap<String, Value> = bindings.into_iter().collect();
    map.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::value::Value;

    #[test]
    fn scope_handles_survive_within_an_epoch() {
        let mut reg = VariableRegistry::new();
        reg.new_epoch();
        let h = reg.scope_handle(0, ScopeKind::Local);
        assert!(reg.scope_of(h).is_ok());
    }

    #[test]
    fn handles_from_prior_epoch_are_invalid() {
        let mut reg = VariableRegistry::new();
        reg.new_epoch();
        let h = reg.scope_handle(0, ScopeKind::Local);
        reg.new_epoch();
        assert!(matches!(reg.scope_of(h), Err(RegistryError::InvalidReference)));
    }

    #[test]
    fn primitive_members_get_no_handle() {
        let mut reg = VariableRegistry::new();
        reg.new_epoch();
        let scope = reg.scope_handle(0, ScopeKind::Local);
        let entries = reg
            .variables(scope, |_, _| vec![("x".to_string(), Value::Int(1))], None, None)
            .unwrap();
        assert_eq!(entries[0].variables_reference, 0);
    }

    #[test]
    fn aggregate_members_get_a_fresh_handle() {
        let mut reg = VariableRegistry::new();
        reg.new_epoch();
        let scope = reg.scope_handle(0, ScopeKind::Local);
        let arr = Value::Array(std::sync::Arc::new(vec![Value::Int(1).new_ref(), Value::Int(2).new_ref()]));
        let entries = reg
            .variables(scope, move |_, _| vec![("xs".to_string(), arr.clone())], None, None)
            .unwrap();
        assert_ne!(entries[0].variables_reference, 0);
    }

    #[test]
    fn paging_clamps_past_the_end() {
        let mut reg = VariableRegistry::new();
        reg.new_epoch();
        let scope = reg.scope_handle(0, ScopeKind::Local);
        let bindings = vec![
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::Int(2)),
        ];
        let entries = reg
            .variables(scope, move |_, _| bindings.clone(), Some(1), Some(10))
            .unwrap();
        assert_eq!(entries.len(), 1);
    }
}
