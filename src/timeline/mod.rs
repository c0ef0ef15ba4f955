pub mod scheduler;
pub mod step;

pub use scheduler::{Timeline, TimelineState};
pub use step::{
    ConditionClause, ConditionMode, ConditionSet, EndRule, StartGate, Step, StepAction,
};
