use thiserror::Error;

use crate::value::{VarId, VarKind};

/// Errors surfaced by the variable store and replication layer.
///
/// All of these are recovered locally: the failing call returns, a
/// diagnostic is logged, and the store keeps its last-good state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VarError {
    /// Mutation or read against an id absent from the resolved scope
    #[error("unknown variable id {0}")]
    UnknownId(VarId),

    /// Operation's value kind does not match the stored kind
    #[error("type mismatch on variable {id}: expected {expected}, got {got}")]
    TypeMismatch {
        id: VarId,
        expected: VarKind,
        got: VarKind,
    },

    /// Target is static or a complex-variable link
    #[error("variable {0} is not modifiable")]
    NotModifiable(VarId),

    /// A read-only replica attempted a local write
    #[error("replica is read-only, local writes are not allowed")]
    NotAuthorized,

    /// A complex variable depends (transitively) on itself.
    /// Only surfaced by template validation, never at runtime.
    #[error("cyclic dependency involving variable {0}")]
    CyclicDependency(VarId),

    /// Template rejected at build time (duplicate ids, bad bounds, ...)
    #[error("invalid template: {0}")]
    InvalidTemplate(String),
}
