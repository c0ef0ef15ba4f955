//! Step definitions: the declarative half of a timeline. Everything in
//! here is plain data, loaded from the scene template; the scheduler
//! gives it time.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ops::{Comparison, Operation};
use crate::scene::VariableScope;
use crate::value::VarId;

/// How a set of clauses combines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionMode {
    All,
    Any,
}

/// One variable/comparator pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionClause {
    pub id: VarId,
    pub compare: Comparison,
}

/// A combined condition over several variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSet {
    pub mode: ConditionMode,
    pub clauses: Vec<ConditionClause>,
}

impl ConditionSet {
    pub fn all(clauses: Vec<ConditionClause>) -> ConditionSet {
        ConditionSet {
            mode: ConditionMode::All,
            clauses,
        }
    }

    pub fn any(clauses: Vec<ConditionClause>) -> ConditionSet {
        ConditionSet {
            mode: ConditionMode::Any,
            clauses,
        }
    }

    /// A clause that fails to evaluate (unknown id, kind mismatch)
    /// counts as false with a diagnostic; the set never errors out.
    pub fn evaluate<S: VariableScope + ?Sized>(&self, scene: &S) -> bool {
        let clause_value = |clause: &ConditionClause| match scene.compare(clause.id, &clause.compare)
        {
            Ok(v) => v,
            Err(e) => {
                warn!(target: "timeline", "Condition on variable {} failed: {}", clause.id, e);
                false
            }
        };

        match self.mode {
            ConditionMode::All => self.clauses.iter().all(clause_value),
            ConditionMode::Any => self.clauses.iter().any(clause_value),
        }
    }
}

/// What a step waits for before firing its actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StartGate {
    /// Fixed delay in seconds from the moment the step is armed
    Delay { seconds: f32 },
    /// Proceed once the set evaluates true
    WaitUntil(ConditionSet),
    /// Proceed once the set evaluates false
    WaitWhile(ConditionSet),
    /// Proceed when the Event variable fires
    WaitEvent { id: VarId },
}

/// When a repeating step stops re-arming
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum EndRule {
    /// Fire once and move on
    #[default]
    None,
    /// Repeat gate+actions until this much time has passed
    Duration { seconds: f32 },
    /// Repeat until the set evaluates true
    Condition(ConditionSet),
    /// Repeat a fixed number of times
    Iterations { count: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepAction {
    Modify { id: VarId, op: Operation },
    Trigger { id: VarId },
    Trace { message: String },
}

/// One timeline step: a gate, the actions it releases and an end rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub gate: StartGate,
    #[serde(default)]
    pub actions: Vec<StepAction>,
    #[serde(default)]
    pub end: EndRule,
}

impl Step {
    pub fn new(name: impl Into<String>, gate: StartGate) -> Step {
        Step {
            name: name.into(),
            gate,
            actions: Vec::new(),
            end: EndRule::None,
        }
    }

    pub fn with_actions(mut self, actions: Vec<StepAction>) -> Step {
        self.actions = actions;
        self
    }

    pub fn with_end(mut self, end: EndRule) -> Step {
        self.end = end;
        self
    }
}
