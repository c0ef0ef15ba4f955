//! The authoritative container of typed values for one scope.
//!
//! The store is deliberately dumb: it holds entries and former-value
//! snapshots. All mutation policy (flags, operations, notification)
//! lives in `Scene`, the sole writer.

use std::collections::HashMap;

use tracing::warn;

use crate::error::VarError;
use crate::value::{Value, Var, VarId, VarKind};

/// id -> Var map plus the snapshot taken before each mutation pass
#[derive(Debug, Default)]
pub struct VariableStore {
    entries: HashMap<VarId, Var>,
    /// Previous values, overwritten on every mutation pass. Used to
    /// report `former_value` in change events; not retained history.
    former: HashMap<VarId, Value>,
}

impl VariableStore {
    pub fn new() -> VariableStore {
        VariableStore {
            entries: HashMap::new(),
            former: HashMap::new(),
        }
    }

    pub fn get(&self, id: VarId) -> Result<&Var, VarError> {
        self.entries.get(&id).ok_or(VarError::UnknownId(id))
    }

    pub fn contains(&self, id: VarId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = VarId> + '_ {
        self.entries.keys().copied()
    }

    pub fn vars(&self) -> impl Iterator<Item = &Var> {
        self.entries.values()
    }

    /// Insert or replace an entry wholesale (build/replication path)
    pub fn insert(&mut self, var: Var) {
        self.entries.insert(var.id, var);
    }

    pub fn remove(&mut self, id: VarId) -> Option<Var> {
        self.former.remove(&id);
        self.entries.remove(&id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.former.clear();
    }

    /// Record the current value as the former value for `id`
    pub fn snapshot_former(&mut self, id: VarId) {
        if let Some(var) = self.entries.get(&id) {
            self.former.insert(id, var.value.clone());
        }
    }

    pub fn former_value(&self, id: VarId) -> Option<&Value> {
        self.former.get(&id)
    }

    /// Overwrite the scalar payload. Callers are responsible for having
    /// gone through the operation engine and flag checks first.
    pub(crate) fn write_value(&mut self, id: VarId, value: Value) {
        if let Some(var) = self.entries.get_mut(&id) {
            var.value = value;
        }
    }

    /// Typed getter: `None` (with a diagnostic) on unknown id or kind
    /// mismatch. Never panics.
    pub fn bool_value(&self, id: VarId) -> Option<bool> {
        match self.typed_value(id, VarKind::Bool)? {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn int_value(&self, id: VarId) -> Option<i32> {
        match self.typed_value(id, VarKind::Int)? {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn float_value(&self, id: VarId) -> Option<f32> {
        match self.typed_value(id, VarKind::Float)? {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn string_value(&self, id: VarId) -> Option<String> {
        match self.typed_value(id, VarKind::Str)? {
            Value::Str(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn typed_value(&self, id: VarId, expected: VarKind) -> Option<&Value> {
        match self.entries.get(&id) {
            None => {
                warn!(target: "store", "Typed get on unknown variable {}", id);
                None
            }
            Some(var) if var.kind != expected => {
                warn!(target: "store",
                    "Typed get on variable {}: expected {}, stored {}",
                    id, expected, var.kind
                );
                None
            }
            Some(var) => Some(&var.value),
        }
    }
}
