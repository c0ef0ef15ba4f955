//! Complex (derived) variables.
//!
//! A complex variable computes its value from a set of base variables
//! and is exposed through a read-only linked `Var` carrying the same id.
//! The linked var is the only thing the store ever holds; the complex
//! variable itself lives in a side table and is consulted whenever one
//! of its dependencies fires.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::VarError;
use crate::store::VariableStore;
use crate::value::{Value, Var, VarFlags, VarId, VarKind};

/// The closed set of derivation rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DerivationRule {
    // numeric bases -> numeric result
    Sum,
    Product,
    Min,
    Max,
    Average,
    // bool bases -> bool result
    AllTrue,
    AnyTrue,
    NoneTrue,
    // bool bases -> int result
    CountTrue,
    // any non-event bases -> string result
    Concat,
}

impl DerivationRule {
    /// Whether the rule can produce a value of `kind`
    pub fn produces(&self, kind: VarKind) -> bool {
        match self {
            DerivationRule::Sum
            | DerivationRule::Product
            | DerivationRule::Min
            | DerivationRule::Max
            | DerivationRule::Average => matches!(kind, VarKind::Int | VarKind::Float),
            DerivationRule::AllTrue | DerivationRule::AnyTrue | DerivationRule::NoneTrue => {
                kind == VarKind::Bool
            }
            DerivationRule::CountTrue => kind == VarKind::Int,
            DerivationRule::Concat => kind == VarKind::Str,
        }
    }
}

/// A derived variable definition: id, declared result kind, rule and the
/// base ids it reads. Shape is immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexVariable {
    pub id: VarId,
    pub kind: VarKind,
    pub rule: DerivationRule,
    pub dependencies: Vec<VarId>,
}

impl ComplexVariable {
    /// The read-only projection stored in place of this complex variable
    pub fn link_var(&self) -> Var {
        Var::new(self.id, self.kind.default_value()).with_flags(VarFlags::LINK)
    }

    /// Recompute the derived value from the current base values.
    ///
    /// Bases missing from the store or of an unusable kind are skipped
    /// with a diagnostic rather than failing the whole derivation.
    pub fn evaluate(&self, store: &VariableStore) -> Value {
        match self.rule {
            DerivationRule::Sum => self.fold_numeric(store, 0.0, |acc, v| acc + v),
            DerivationRule::Product => self.fold_numeric(store, 1.0, |acc, v| acc * v),
            DerivationRule::Min => {
                self.fold_numeric(store, f32::INFINITY, |acc, v| acc.min(v))
            }
            DerivationRule::Max => {
                self.fold_numeric(store, f32::NEG_INFINITY, |acc, v| acc.max(v))
            }
            DerivationRule::Average => {
                let values = self.numeric_bases(store);
                let avg = if values.is_empty() {
                    0.0
                } else {
                    values.iter().sum::<f32>() / values.len() as f32
                };
                self.numeric_result(avg)
            }
            DerivationRule::AllTrue => Value::Bool(self.bool_bases(store).iter().all(|b| *b)),
            DerivationRule::AnyTrue => Value::Bool(self.bool_bases(store).iter().any(|b| *b)),
            DerivationRule::NoneTrue => Value::Bool(!self.bool_bases(store).iter().any(|b| *b)),
            DerivationRule::CountTrue => {
                Value::Int(self.bool_bases(store).iter().filter(|b| **b).count() as i32)
            }
            DerivationRule::Concat => {
                let mut out = String::new();
                for dep in &self.dependencies {
                    match store.get(*dep) {
                        Ok(var) if var.kind != VarKind::Event => {
                            out.push_str(&var.value.to_string());
                        }
                        Ok(_) => {}
                        Err(_) => {
                            warn!(target: "store", "Complex {} skipping missing base {}", self.id, dep);
                        }
                    }
                }
                Value::Str(out)
            }
        }
    }

    /// Rule/kind congruence check used by template validation
    pub fn validate_kind(&self) -> Result<(), VarError> {
        if self.rule.produces(self.kind) {
            Ok(())
        } else {
            Err(VarError::TypeMismatch {
                id: self.id,
                expected: self.kind,
                got: match self.rule {
                    DerivationRule::Concat => VarKind::Str,
                    DerivationRule::CountTrue => VarKind::Int,
                    DerivationRule::AllTrue
                    | DerivationRule::AnyTrue
                    | DerivationRule::NoneTrue => VarKind::Bool,
                    _ => VarKind::Float,
                },
            })
        }
    }

    fn numeric_bases(&self, store: &VariableStore) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dependencies.len());
        for dep in &self.dependencies {
            match store.get(*dep) {
                Ok(var) => match var.value.as_f32() {
                    Some(v) => out.push(v),
                    None => {
                        warn!(target: "store", "Complex {} skipping non-numeric base {}", self.id, dep);
                    }
                },
                Err(_) => {
                    warn!(target: "store", "Complex {} skipping missing base {}", self.id, dep);
                }
            }
        }
        out
    }

    fn bool_bases(&self, store: &VariableStore) -> Vec<bool> {
        let mut out = Vec::with_capacity(self.dependencies.len());
        for dep in &self.dependencies {
            match store.get(*dep) {
                Ok(Var {
                    value: Value::Bool(b),
                    ..
                }) => out.push(*b),
                Ok(_) => {
                    warn!(target: "store", "Complex {} skipping non-bool base {}", self.id, dep);
                }
                Err(_) => {
                    warn!(target: "store", "Complex {} skipping missing base {}", self.id, dep);
                }
            }
        }
        out
    }

    fn fold_numeric(&self, store: &VariableStore, init: f32, f: fn(f32, f32) -> f32) -> Value {
        let values = self.numeric_bases(store);
        if values.is_empty() {
            return self.numeric_result(0.0);
        }
        let acc = values.into_iter().fold(init, f);
        self.numeric_result(acc)
    }

    fn numeric_result(&self, v: f32) -> Value {
        match self.kind {
            VarKind::Int => Value::Int(v as i32),
            _ => Value::Float(v),
        }
    }
}
