//! Pure, stateless application of operations and comparisons to typed
//! values. Nothing in here touches the store; callers get back the new
//! value plus whether anything actually changed.

use serde::{Deserialize, Serialize};

use crate::error::VarError;
use crate::value::{Bounds, Value, Var, VarKind};

/// A named mutation over a typed value. Each value kind supports a fixed
/// closed subset of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    // all kinds except Event
    Set(Value),
    // bool
    Inverse,
    ToTrue,
    ToFalse,
    // int/float
    Add(Value),
    Subtract(Value),
    Multiply(Value),
    Divide(Value),
    Power(Value),
    ToMin,
    ToMax,
    ToNull,
    Increment,
    Decrement,
    // string
    Append(String),
    Remove(String),
}

impl Operation {
    /// Human-readable description used in causal trails, e.g. `ADD(5)`
    pub fn describe(&self) -> String {
        match self {
            Operation::Set(v)
            | Operation::Add(v)
            | Operation::Subtract(v)
            | Operation::Multiply(v)
            | Operation::Divide(v)
            | Operation::Power(v) => format!("{}({})", self, v),
            Operation::Append(s) | Operation::Remove(s) => format!("{}({})", self, s),
            _ => self.to_string(),
        }
    }

    /// Whether this operation may be applied to a variable of `kind`
    pub fn applies_to(&self, kind: VarKind) -> bool {
        match self {
            Operation::Set(v) => match kind {
                VarKind::Bool => v.kind() == VarKind::Bool,
                VarKind::Str => v.kind() == VarKind::Str,
                // numeric SET accepts either numeric operand kind
                VarKind::Int | VarKind::Float => v.is_numeric(),
                VarKind::Event => false,
            },
            Operation::Inverse | Operation::ToTrue | Operation::ToFalse => kind == VarKind::Bool,
            Operation::Add(v)
            | Operation::Subtract(v)
            | Operation::Multiply(v)
            | Operation::Divide(v)
            | Operation::Power(v) => {
                matches!(kind, VarKind::Int | VarKind::Float) && v.is_numeric()
            }
            Operation::ToMin
            | Operation::ToMax
            | Operation::ToNull
            | Operation::Increment
            | Operation::Decrement => matches!(kind, VarKind::Int | VarKind::Float),
            Operation::Append(_) | Operation::Remove(_) => kind == VarKind::Str,
        }
    }

    /// Kind the operation expects, used for diagnostics when it does not
    /// apply. SET reports the kind of its operand.
    fn expected_kind(&self) -> VarKind {
        match self {
            Operation::Set(v) => v.kind(),
            Operation::Inverse | Operation::ToTrue | Operation::ToFalse => VarKind::Bool,
            Operation::Append(_) | Operation::Remove(_) => VarKind::Str,
            _ => VarKind::Float,
        }
    }
}

fn clamp_int(value: i32, bounds: &Bounds) -> i32 {
    match bounds {
        Bounds::Int { min, max } => {
            let mut v = value;
            if let Some(min) = min {
                v = v.max(*min);
            }
            if let Some(max) = max {
                v = v.min(*max);
            }
            v
        }
        _ => value,
    }
}

fn clamp_float(value: f32, bounds: &Bounds) -> f32 {
    match bounds {
        Bounds::Float { min, max } => {
            let mut v = value;
            if let Some(min) = min {
                v = v.max(*min);
            }
            if let Some(max) = max {
                v = v.min(*max);
            }
            v
        }
        _ => value,
    }
}

/// Apply an operation to a variable's current value.
///
/// Returns the new value and whether it differs from the old one. After
/// arithmetic the result is clamped to the variable's bounds and the
/// changed flag is recomputed from the clamped value, not the unclamped
/// intermediate.
pub fn apply(var: &Var, op: &Operation) -> Result<(Value, bool), VarError> {
    if !op.applies_to(var.kind) {
        return Err(VarError::TypeMismatch {
            id: var.id,
            expected: var.kind,
            got: op.expected_kind(),
        });
    }

    let new = match (&var.value, op) {
        (Value::Bool(_), Operation::Set(Value::Bool(b))) => Value::Bool(*b),
        (Value::Bool(b), Operation::Inverse) => Value::Bool(!b),
        (Value::Bool(_), Operation::ToTrue) => Value::Bool(true),
        (Value::Bool(_), Operation::ToFalse) => Value::Bool(false),

        (Value::Int(old), _) => Value::Int(apply_int(*old, op, &var.bounds)),
        (Value::Float(old), _) => Value::Float(apply_float(*old, op, &var.bounds)),

        (Value::Str(_), Operation::Set(Value::Str(s))) => Value::Str(s.clone()),
        (Value::Str(old), Operation::Append(s)) => Value::Str(format!("{}{}", old, s)),
        (Value::Str(old), Operation::Remove(s)) => Value::Str(old.replace(s.as_str(), "")),

        // applies_to already filtered everything else out
        _ => var.value.clone(),
    };

    let changed = new != var.value;
    Ok((new, changed))
}

/// Int arithmetic. A Float-typed operand promotes the computation to f32
/// and the result truncates back toward zero.
fn apply_int(old: i32, op: &Operation, bounds: &Bounds) -> i32 {
    let raw = match op {
        Operation::Set(v) => coerce_to_int(v),
        Operation::Add(v) => combine_int(old, v, |a, b| a.wrapping_add(b), |a, b| a + b),
        Operation::Subtract(v) => combine_int(old, v, |a, b| a.wrapping_sub(b), |a, b| a - b),
        Operation::Multiply(v) => combine_int(old, v, |a, b| a.wrapping_mul(b), |a, b| a * b),
        Operation::Divide(v) => {
            let divisor = v.as_f32().unwrap_or(0.0);
            if divisor == 0.0 {
                tracing::warn!(target: "store", "DIVIDE by zero ignored");
                old
            } else {
                match v {
                    // checked_div catches MIN / -1 overflow
                    Value::Int(i) => old.checked_div(*i).unwrap_or_else(|| {
                        tracing::warn!(target: "store", "DIVIDE overflow ignored");
                        old
                    }),
                    _ => (old as f32 / divisor) as i32,
                }
            }
        }
        Operation::Power(v) => {
            let exp = v.as_f32().unwrap_or(0.0);
            let raised = (old as f32).powf(exp);
            if raised.is_finite() {
                raised as i32
            } else {
                tracing::warn!(target: "store", "POWER produced a non-finite result, ignored");
                old
            }
        }
        Operation::ToMin => match bounds {
            Bounds::Int { min: Some(min), .. } => *min,
            _ => return old, // no bound, no-op
        },
        Operation::ToMax => match bounds {
            Bounds::Int { max: Some(max), .. } => *max,
            _ => return old,
        },
        Operation::ToNull => 0,
        Operation::Increment => old.wrapping_add(1),
        Operation::Decrement => old.wrapping_sub(1),
        _ => old,
    };
    clamp_int(raw, bounds)
}

fn apply_float(old: f32, op: &Operation, bounds: &Bounds) -> f32 {
    let operand = |v: &Value| v.as_f32().unwrap_or(0.0);
    let raw = match op {
        Operation::Set(v) => operand(v),
        Operation::Add(v) => old + operand(v),
        Operation::Subtract(v) => old - operand(v),
        Operation::Multiply(v) => old * operand(v),
        Operation::Divide(v) => {
            let divisor = operand(v);
            if divisor == 0.0 {
                tracing::warn!(target: "store", "DIVIDE by zero ignored");
                old
            } else {
                old / divisor
            }
        }
        Operation::Power(v) => {
            let raised = old.powf(operand(v));
            if raised.is_finite() {
                raised
            } else {
                tracing::warn!(target: "store", "POWER produced a non-finite result, ignored");
                old
            }
        }
        Operation::ToMin => match bounds {
            Bounds::Float { min: Some(min), .. } => *min,
            _ => return old,
        },
        Operation::ToMax => match bounds {
            Bounds::Float { max: Some(max), .. } => *max,
            _ => return old,
        },
        Operation::ToNull => 0.0,
        Operation::Increment => old + 1.0,
        Operation::Decrement => old - 1.0,
        _ => old,
    };
    clamp_float(raw, bounds)
}

fn coerce_to_int(v: &Value) -> i32 {
    match v {
        Value::Int(i) => *i,
        Value::Float(f) => *f as i32,
        _ => 0,
    }
}

/// Pick pure-int or promoted-float arithmetic depending on the operand kind
fn combine_int(old: i32, v: &Value, int_op: fn(i32, i32) -> i32, float_op: fn(f32, f32) -> f32) -> i32 {
    match v {
        Value::Int(i) => int_op(old, *i),
        Value::Float(f) => float_op(old as f32, *f) as i32,
        _ => old,
    }
}

/// A named condition over a typed value, used by the timeline scheduler
/// and configuration tooling. Comparisons never mutate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Comparison {
    Equal(Value),
    Diff(Value),
    // numeric
    Sup(Value),
    SupEqual(Value),
    Inf(Value),
    InfEqual(Value),
    IsNull,
    IsPositive,
    IsNegative,
    IsMin,
    IsMax,
    // string
    Contains(String),
    ContainedIn(String),
    NullEmpty,
    // bool
    IsTrue,
    IsFalse,
}

impl Comparison {
    /// Whether this comparator carries a second operand
    pub fn needs_operand(&self) -> bool {
        matches!(
            self,
            Comparison::Equal(_)
                | Comparison::Diff(_)
                | Comparison::Sup(_)
                | Comparison::SupEqual(_)
                | Comparison::Inf(_)
                | Comparison::InfEqual(_)
                | Comparison::Contains(_)
                | Comparison::ContainedIn(_)
        )
    }
}

/// Evaluate a comparison against a variable's current value.
///
/// Numeric comparisons against a Float-typed operand are performed in
/// floating point regardless of the stored kind.
pub fn compare(var: &Var, cmp: &Comparison) -> Result<bool, VarError> {
    let mismatch = |expected: VarKind| VarError::TypeMismatch {
        id: var.id,
        expected,
        got: var.kind,
    };

    match cmp {
        Comparison::Equal(v) => equal(var, v).ok_or_else(|| mismatch(v.kind())),
        Comparison::Diff(v) => equal(var, v).map(|e| !e).ok_or_else(|| mismatch(v.kind())),
        Comparison::Sup(v) => numeric_pair(var, v, |a, b| a > b).ok_or_else(|| mismatch(v.kind())),
        Comparison::SupEqual(v) => {
            numeric_pair(var, v, |a, b| a >= b).ok_or_else(|| mismatch(v.kind()))
        }
        Comparison::Inf(v) => numeric_pair(var, v, |a, b| a < b).ok_or_else(|| mismatch(v.kind())),
        Comparison::InfEqual(v) => {
            numeric_pair(var, v, |a, b| a <= b).ok_or_else(|| mismatch(v.kind()))
        }
        Comparison::IsNull => var
            .value
            .as_f32()
            .map(|a| a == 0.0)
            .ok_or_else(|| mismatch(VarKind::Float)),
        Comparison::IsPositive => var
            .value
            .as_f32()
            .map(|a| a > 0.0)
            .ok_or_else(|| mismatch(VarKind::Float)),
        Comparison::IsNegative => var
            .value
            .as_f32()
            .map(|a| a < 0.0)
            .ok_or_else(|| mismatch(VarKind::Float)),
        // IS_MIN/IS_MAX read the bound fields directly; an absent bound
        // can never be reached, so the comparison is false
        Comparison::IsMin => match (&var.value, &var.bounds) {
            (Value::Int(v), Bounds::Int { min: Some(min), .. }) => Ok(v == min),
            (Value::Float(v), Bounds::Float { min: Some(min), .. }) => Ok(v == min),
            (Value::Int(_) | Value::Float(_), _) => Ok(false),
            _ => Err(mismatch(VarKind::Float)),
        },
        Comparison::IsMax => match (&var.value, &var.bounds) {
            (Value::Int(v), Bounds::Int { max: Some(max), .. }) => Ok(v == max),
            (Value::Float(v), Bounds::Float { max: Some(max), .. }) => Ok(v == max),
            (Value::Int(_) | Value::Float(_), _) => Ok(false),
            _ => Err(mismatch(VarKind::Float)),
        },
        Comparison::Contains(s) => match &var.value {
            Value::Str(v) => Ok(v.contains(s.as_str())),
            _ => Err(mismatch(VarKind::Str)),
        },
        Comparison::ContainedIn(s) => match &var.value {
            Value::Str(v) => Ok(s.contains(v.as_str())),
            _ => Err(mismatch(VarKind::Str)),
        },
        Comparison::NullEmpty => match &var.value {
            Value::Str(v) => Ok(v.is_empty()),
            _ => Err(mismatch(VarKind::Str)),
        },
        Comparison::IsTrue => match &var.value {
            Value::Bool(v) => Ok(*v),
            _ => Err(mismatch(VarKind::Bool)),
        },
        Comparison::IsFalse => match &var.value {
            Value::Bool(v) => Ok(!*v),
            _ => Err(mismatch(VarKind::Bool)),
        },
    }
}

/// Equality across kinds: numeric pairs compare in f32, everything else
/// must match kinds exactly
fn equal(var: &Var, operand: &Value) -> Option<bool> {
    match (&var.value, operand) {
        (Value::Bool(a), Value::Bool(b)) => Some(a == b),
        (Value::Str(a), Value::Str(b)) => Some(a == b),
        (a, b) if a.is_numeric() && b.is_numeric() => Some(a.as_f32() == b.as_f32()),
        _ => None,
    }
}

fn numeric_pair(var: &Var, operand: &Value, f: fn(f32, f32) -> bool) -> Option<bool> {
    match (var.value.as_f32(), operand.as_f32()) {
        (Some(a), Some(b)) => Some(f(a, b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::VarFlags;

    #[test]
    fn test_bool_ops() {
        let v = Var::bool(1, false);
        assert_eq!(apply(&v, &Operation::ToTrue).unwrap(), (Value::Bool(true), true));
        assert_eq!(apply(&v, &Operation::ToFalse).unwrap(), (Value::Bool(false), false));
        assert_eq!(apply(&v, &Operation::Inverse).unwrap(), (Value::Bool(true), true));
        assert_eq!(
            apply(&v, &Operation::Set(Value::Bool(false))).unwrap(),
            (Value::Bool(false), false)
        );
    }

    #[test]
    fn test_add_clamps_to_max() {
        // Scenario from the test plan: id=5, value=10, max=12, ADD(5) twice
        let v = Var::int(5, 10).with_bounds(Bounds::Int {
            min: None,
            max: Some(12),
        });
        let (new, changed) = apply(&v, &Operation::Add(Value::Int(5))).unwrap();
        assert_eq!(new, Value::Int(12));
        assert!(changed);

        let clamped = Var::int(5, 12).with_bounds(Bounds::Int {
            min: None,
            max: Some(12),
        });
        let (new, changed) = apply(&clamped, &Operation::Add(Value::Int(5))).unwrap();
        assert_eq!(new, Value::Int(12));
        assert!(!changed, "pushing past the bound must report no change");
    }

    #[test]
    fn test_to_min_without_bound_is_noop() {
        let v = Var::int(1, 7);
        let (new, changed) = apply(&v, &Operation::ToMin).unwrap();
        assert_eq!(new, Value::Int(7));
        assert!(!changed);

        let bounded = Var::int(1, 7).with_bounds(Bounds::Int {
            min: Some(2),
            max: None,
        });
        let (new, changed) = apply(&bounded, &Operation::ToMin).unwrap();
        assert_eq!(new, Value::Int(2));
        assert!(changed);
    }

    #[test]
    fn test_divide_by_zero_is_noop() {
        let v = Var::int(1, 9);
        let (new, changed) = apply(&v, &Operation::Divide(Value::Int(0))).unwrap();
        assert_eq!(new, Value::Int(9));
        assert!(!changed);

        let f = Var::float(2, 9.0);
        let (new, changed) = apply(&f, &Operation::Divide(Value::Float(0.0))).unwrap();
        assert_eq!(new, Value::Float(9.0));
        assert!(!changed);
    }

    #[test]
    fn test_divide_overflow_is_noop() {
        // MIN / -1 does not fit in i32; the store keeps its value
        let v = Var::int(1, i32::MIN);
        let (new, changed) = apply(&v, &Operation::Divide(Value::Int(-1))).unwrap();
        assert_eq!(new, Value::Int(i32::MIN));
        assert!(!changed);
    }

    #[test]
    fn test_power_nonfinite_is_noop() {
        // 0^-1 is infinite; the store keeps its last-good value
        let v = Var::int(1, 0);
        let (new, changed) = apply(&v, &Operation::Power(Value::Int(-1))).unwrap();
        assert_eq!(new, Value::Int(0));
        assert!(!changed);
    }

    #[test]
    fn test_int_with_float_operand_promotes() {
        let v = Var::int(1, 10);
        let (new, _) = apply(&v, &Operation::Multiply(Value::Float(0.5))).unwrap();
        assert_eq!(new, Value::Int(5));
    }

    #[test]
    fn test_string_ops() {
        let v = Var::string(1, "hello world");
        let (new, changed) = apply(&v, &Operation::Append(" again".into())).unwrap();
        assert_eq!(new, Value::Str("hello world again".into()));
        assert!(changed);

        let (new, changed) = apply(&v, &Operation::Remove("world".into())).unwrap();
        assert_eq!(new, Value::Str("hello ".into()));
        assert!(changed);

        // removing a substring that isn't there changes nothing
        let (_, changed) = apply(&v, &Operation::Remove("xyz".into())).unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_type_mismatch() {
        let v = Var::int(1, 10);
        let err = apply(&v, &Operation::Inverse).unwrap_err();
        assert_eq!(
            err,
            VarError::TypeMismatch {
                id: 1,
                expected: VarKind::Int,
                got: VarKind::Bool
            }
        );

        let b = Var::bool(2, true);
        assert!(apply(&b, &Operation::Add(Value::Int(1))).is_err());
    }

    #[test]
    fn test_comparisons() {
        let v = Var::int(1, 10);
        assert!(compare(&v, &Comparison::Equal(Value::Int(10))).unwrap());
        assert!(compare(&v, &Comparison::Equal(Value::Float(10.0))).unwrap());
        assert!(compare(&v, &Comparison::Sup(Value::Int(5))).unwrap());
        assert!(!compare(&v, &Comparison::Inf(Value::Int(5))).unwrap());
        assert!(compare(&v, &Comparison::IsPositive).unwrap());
        assert!(!compare(&v, &Comparison::IsNull).unwrap());

        let s = Var::string(2, "hello");
        assert!(compare(&s, &Comparison::Contains("ell".into())).unwrap());
        assert!(compare(&s, &Comparison::ContainedIn("hello there".into())).unwrap());
        assert!(!compare(&s, &Comparison::NullEmpty).unwrap());

        let b = Var::bool(3, true);
        assert!(compare(&b, &Comparison::IsTrue).unwrap());
        assert!(compare(&b, &Comparison::Equal(Value::Bool(true))).unwrap());
    }

    #[test]
    fn test_is_min_is_max_read_bounds() {
        let v = Var::int(1, 12).with_bounds(Bounds::Int {
            min: Some(0),
            max: Some(12),
        });
        assert!(compare(&v, &Comparison::IsMax).unwrap());
        assert!(!compare(&v, &Comparison::IsMin).unwrap());

        // absent bound is never reached
        let unbounded = Var::int(2, 12);
        assert!(!compare(&unbounded, &Comparison::IsMax).unwrap());
        assert!(!Comparison::IsMax.needs_operand());
        assert!(Comparison::Sup(Value::Int(1)).needs_operand());
    }

    #[test]
    fn test_describe_names() {
        assert_eq!(Operation::Add(Value::Int(5)).describe(), "ADD(5)");
        assert_eq!(Operation::ToMax.describe(), "TO_MAX");
        assert_eq!(Operation::Inverse.describe(), "INVERSE");
    }

    #[test]
    fn test_flags_do_not_affect_pure_apply() {
        // apply() is pure; modifiability is the store's concern
        let v = Var::int(1, 1).with_flags(VarFlags::STATIC);
        let (new, changed) = apply(&v, &Operation::Add(Value::Int(1))).unwrap();
        assert_eq!(new, Value::Int(2));
        assert!(changed);
    }
}
