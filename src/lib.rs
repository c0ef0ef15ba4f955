//! Reactive scene-variable engine: a typed variable store with change
//! notification, derived (complex) variables, timeline-driven step
//! sequencing and one-writer/N-replica state sync.

pub mod bus;
pub mod complex;
pub mod config;
pub mod error;
pub mod graph;
pub mod ops;
pub mod runner;
pub mod scene;
pub mod store;
pub mod sync;
pub mod timeline;
pub mod trail;
pub mod value;

pub use bus::{ChangeEvent, ChangeHandler, EventBus, SubscriptionToken};
pub use complex::{ComplexVariable, DerivationRule};
pub use config::{SceneTemplate, TimelineTemplate, VariableTemplate};
pub use error::VarError;
pub use ops::{Comparison, Operation};
pub use runner::SceneAction;
pub use scene::{Scene, SharedScene, VariableScope};
pub use store::VariableStore;
pub use sync::{ChangeOp, SyncRole, SyncedScene};
pub use timeline::{Step, Timeline};
pub use trail::CausalTrail;
pub use value::{Bounds, Value, Var, VarFlags, VarId, VarKind, GLOBAL_ID_MIN};
