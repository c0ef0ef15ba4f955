use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Identifier for a variable within a scope
pub type VarId = i32;

/// Ids at or above this threshold resolve against the global scope,
/// regardless of which local scene receives the call.
pub const GLOBAL_ID_MIN: VarId = 100_000;

/// Check whether an id belongs to the global/interscene range
pub fn is_global_id(id: VarId) -> bool {
    id >= GLOBAL_ID_MIN
}

/// The closed set of value kinds a variable can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
pub enum VarKind {
    Bool,
    Int,
    Float,
    Str,
    Event,
}

impl VarKind {
    /// Stable tag used on the wire (one byte per entry)
    pub fn wire_tag(&self) -> u8 {
        match self {
            VarKind::Bool => 0,
            VarKind::Int => 1,
            VarKind::Float => 2,
            VarKind::Str => 3,
            VarKind::Event => 4,
        }
    }

    pub fn from_wire_tag(tag: u8) -> Option<VarKind> {
        match tag {
            0 => Some(VarKind::Bool),
            1 => Some(VarKind::Int),
            2 => Some(VarKind::Float),
            3 => Some(VarKind::Str),
            4 => Some(VarKind::Event),
            _ => None,
        }
    }

    /// Default payload for this kind, used when a replica has to invent
    /// a placeholder entry for an unknown key.
    pub fn default_value(&self) -> Value {
        match self {
            VarKind::Bool => Value::Bool(false),
            VarKind::Int => Value::Int(0),
            VarKind::Float => Value::Float(0.0),
            VarKind::Str => Value::Str(String::new()),
            VarKind::Event => Value::Event,
        }
    }
}

/// A typed scalar payload. `Event` carries no value, only a trigger edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Float(f32),
    Str(String),
    Event,
}

impl Value {
    pub fn kind(&self) -> VarKind {
        match self {
            Value::Bool(_) => VarKind::Bool,
            Value::Int(_) => VarKind::Int,
            Value::Float(_) => VarKind::Float,
            Value::Str(_) => VarKind::Str,
            Value::Event => VarKind::Event,
        }
    }

    /// Numeric view of the value, used for cross-kind comparison and
    /// arithmetic (Int combined with a Float operand computes in f32)
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Int(i) => Some(*i as f32),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
            Value::Event => write!(f, "<event>"),
        }
    }
}

bitflags! {
    /// Behavior flags fixed at build time
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VarFlags: u8 {
        /// Value is fixed at store-build time; mutations become
        /// diagnostic no-ops
        const STATIC = 0x01;
        /// Value was picked from a range at build time; informational
        /// only, no runtime effect
        const RANDOM = 0x02;
        /// Read-only projection of a complex variable; mutations fail
        const LINK = 0x04;
    }
}

/// Optional numeric bounds. Non-numeric kinds are always `None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bounds {
    None,
    Int { min: Option<i32>, max: Option<i32> },
    Float { min: Option<f32>, max: Option<f32> },
}

impl Bounds {
    pub fn has_min(&self) -> bool {
        match self {
            Bounds::None => false,
            Bounds::Int { min, .. } => min.is_some(),
            Bounds::Float { min, .. } => min.is_some(),
        }
    }

    pub fn has_max(&self) -> bool {
        match self {
            Bounds::None => false,
            Bounds::Int { max, .. } => max.is_some(),
            Bounds::Float { max, .. } => max.is_some(),
        }
    }
}

/// A single typed, mutable scalar slot identified by an integer id.
///
/// Id, kind, flags and bounds are set once at construction and never
/// change; only the scalar payload mutates.
#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub id: VarId,
    pub kind: VarKind,
    pub value: Value,
    pub flags: VarFlags,
    pub bounds: Bounds,
}

impl Var {
    pub fn new(id: VarId, value: Value) -> Var {
        Var {
            id,
            kind: value.kind(),
            value,
            flags: VarFlags::empty(),
            bounds: Bounds::None,
        }
    }

    pub fn bool(id: VarId, value: bool) -> Var {
        Var::new(id, Value::Bool(value))
    }

    pub fn int(id: VarId, value: i32) -> Var {
        Var::new(id, Value::Int(value))
    }

    pub fn float(id: VarId, value: f32) -> Var {
        Var::new(id, Value::Float(value))
    }

    pub fn string(id: VarId, value: impl Into<String>) -> Var {
        Var::new(id, Value::Str(value.into()))
    }

    pub fn event(id: VarId) -> Var {
        Var::new(id, Value::Event)
    }

    pub fn with_flags(mut self, flags: VarFlags) -> Var {
        self.flags = flags;
        self
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Var {
        self.bounds = bounds;
        self
    }

    /// Static and link variables reject every mutation attempt
    pub fn is_modifiable(&self) -> bool {
        !self.flags.intersects(VarFlags::STATIC | VarFlags::LINK)
    }

    pub fn is_link(&self) -> bool {
        self.flags.contains(VarFlags::LINK)
    }
}
