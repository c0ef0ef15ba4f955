//! One variable scope: the store, its event bus, the dependency graph
//! and the complex variable side table, driven as a unit.
//!
//! Mutation is the sole publication path. Every successful change goes
//! store write -> change event -> dependent recompute, in that order,
//! synchronously on the calling thread. Handlers that need to mutate in
//! response send a `SceneAction` through the runner instead of calling
//! back in.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::bus::{ChangeEvent, ChangeHandler, EventBus, SubscriptionToken};
use crate::complex::ComplexVariable;
use crate::config::SceneTemplate;
use crate::error::VarError;
use crate::ops::{self, Comparison, Operation};
use crate::store::VariableStore;
use crate::trail::CausalTrail;
use crate::value::{is_global_id, Value, Var, VarId, VarKind};

/// Shared handle to a scene. One per scope; the global scope is one more
/// of these, handed to local scenes at construction.
pub type SharedScene = Arc<Mutex<Scene>>;

/// The mutation/query surface timelines and tooling drive a scope
/// through. `Scene` implements it directly; `SyncedScene` wraps it with
/// replication bookkeeping.
pub trait VariableScope {
    fn modify_traced(
        &mut self,
        id: VarId,
        op: &Operation,
        originator: &str,
        trail: CausalTrail,
    ) -> Result<bool, VarError>;

    fn trigger_traced(
        &mut self,
        id: VarId,
        originator: &str,
        trail: CausalTrail,
    ) -> Result<(), VarError>;

    fn compare(&self, id: VarId, cmp: &Comparison) -> Result<bool, VarError>;

    fn subscribe(&mut self, id: VarId, handler: ChangeHandler) -> SubscriptionToken;

    fn unsubscribe(&mut self, token: SubscriptionToken);
}

pub struct Scene {
    name: String,
    store: VariableStore,
    bus: EventBus,
    graph: crate::graph::DependencyGraph,
    complexes: HashMap<VarId, ComplexVariable>,
    /// Receives any call whose id falls in the global range
    global: Option<SharedScene>,
}

impl Scene {
    pub fn new(name: impl Into<String>) -> Scene {
        Scene {
            name: name.into(),
            store: VariableStore::new(),
            bus: EventBus::new(),
            graph: crate::graph::DependencyGraph::new(),
            complexes: HashMap::new(),
            global: None,
        }
    }

    pub fn into_shared(self) -> SharedScene {
        Arc::new(Mutex::new(self))
    }

    /// Attach the global scope. Calls on ids in the global range are
    /// forwarded there from then on.
    pub fn set_global(&mut self, global: SharedScene) {
        self.global = Some(global);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// All ids in this scope, sorted
    pub fn ids(&self) -> Vec<VarId> {
        let mut ids: Vec<VarId> = self.store.ids().collect();
        ids.sort_unstable();
        ids
    }

    /// Populate the scope from a template. Clears any previous content
    /// first, so calling it again is a full re-entry, not an overlay.
    pub fn build(&mut self, template: &SceneTemplate) -> Result<(), VarError> {
        template.validate()?;
        self.teardown();

        for var in &template.variables {
            self.store.insert(var.build_var());
        }
        for complex in &template.complex {
            self.store.insert(complex.link_var());
            self.complexes.insert(complex.id, complex.clone());
        }
        self.graph.rebuild(&self.complexes);

        // seed link values from the freshly built bases, silently.
        // Repeated passes so complex-on-complex chains settle whatever
        // the map iteration order; acyclic sets converge within
        // complexes.len() passes.
        let ids: Vec<VarId> = self.complexes.keys().copied().collect();
        for _ in 0..self.complexes.len() {
            let mut moved = false;
            for id in &ids {
                let Some(complex) = self.complexes.get(id) else {
                    continue;
                };
                let value = complex.evaluate(&self.store);
                if self.store.get(*id).map(|v| v.value != value).unwrap_or(false) {
                    self.store.write_value(*id, value);
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }

        info!(target: "store",
            "Scene '{}' built: {} variables, {} complex",
            self.name, self.store.len(), self.complexes.len()
        );
        Ok(())
    }

    /// Scene re-entry: same as `build`, named for the host lifecycle
    pub fn rebuild(&mut self, template: &SceneTemplate) -> Result<(), VarError> {
        self.build(template)
    }

    /// Drop all variables, complex definitions and subscriptions.
    /// Safe to call repeatedly.
    pub fn teardown(&mut self) {
        self.store.clear();
        self.complexes.clear();
        self.graph.rebuild(&self.complexes);
        self.bus = EventBus::new();
        debug!(target: "store", "Scene '{}' torn down", self.name);
    }

    /// Apply an operation to a variable. Returns whether the stored
    /// value actually changed; notifications fire only when it did.
    pub fn modify(
        &mut self,
        id: VarId,
        op: &Operation,
        originator: &str,
    ) -> Result<bool, VarError> {
        self.modify_traced(id, op, originator, CausalTrail::from_originator(originator))
    }

    /// `modify` with an externally accumulated causal trail (timeline
    /// steps and replication pass theirs through here)
    pub fn modify_traced(
        &mut self,
        id: VarId,
        op: &Operation,
        originator: &str,
        mut trail: CausalTrail,
    ) -> Result<bool, VarError> {
        if is_global_id(id) {
            if let Some(global) = self.global.clone() {
                trail.push(&self.name, &format!("forward {} to global scope", id));
                return global.lock().unwrap().modify_traced(id, op, originator, trail);
            }
        }

        let var = self.store.get(id)?;
        if !var.is_modifiable() {
            warn!(target: "store",
                "Mutation {} on non-modifiable variable {} ignored",
                op.describe(), id
            );
            return Err(VarError::NotModifiable(id));
        }

        let (new, changed) = ops::apply(var, op)?;
        if !changed {
            return Ok(false);
        }

        trail.push(&self.name, &format!("{} on {}", op.describe(), id));
        self.commit(id, new, originator, trail);
        Ok(true)
    }

    /// Fire an Event variable. Always counts as a change.
    pub fn trigger(&mut self, id: VarId, originator: &str) -> Result<(), VarError> {
        self.trigger_traced(id, originator, CausalTrail::from_originator(originator))
    }

    pub fn trigger_traced(
        &mut self,
        id: VarId,
        originator: &str,
        mut trail: CausalTrail,
    ) -> Result<(), VarError> {
        if is_global_id(id) {
            if let Some(global) = self.global.clone() {
                trail.push(&self.name, &format!("forward {} to global scope", id));
                return global.lock().unwrap().trigger_traced(id, originator, trail);
            }
        }

        let var = self.store.get(id)?;
        if var.kind != VarKind::Event {
            return Err(VarError::TypeMismatch {
                id,
                expected: VarKind::Event,
                got: var.kind,
            });
        }
        if !var.is_modifiable() {
            warn!(target: "store", "Trigger on non-modifiable variable {} ignored", id);
            return Err(VarError::NotModifiable(id));
        }

        trail.push(&self.name, &format!("TRIGGER on {}", id));
        self.commit(id, Value::Event, originator, trail);
        Ok(())
    }

    /// Write the new value, publish the change and recompute dependents.
    /// Callers have already validated kind, flags and changed-ness.
    fn commit(&mut self, id: VarId, new: Value, originator: &str, trail: CausalTrail) {
        self.store.snapshot_former(id);
        self.store.write_value(id, new.clone());

        let former = self
            .store
            .former_value(id)
            .cloned()
            .unwrap_or_else(|| new.kind().default_value());

        let event = ChangeEvent {
            id,
            kind: new.kind(),
            new_value: new,
            former_value: former,
            originator: originator.to_string(),
            trail: trail.clone(),
        };
        self.bus.publish(&event);
        self.notify_dependents(id, originator, trail);
    }

    /// Recompute every complex variable registered against `base` and
    /// publish one event per dependent that actually moved. Recurses so
    /// a chain of complex-on-complex definitions settles in one pass.
    fn notify_dependents(&mut self, base: VarId, originator: &str, trail: CausalTrail) {
        let dependents: Vec<VarId> = self.graph.dependents(base).to_vec();
        for dep in dependents {
            let Some(complex) = self.complexes.get(&dep) else {
                continue;
            };
            let new = complex.evaluate(&self.store);
            let old = match self.store.get(dep) {
                Ok(var) => var.value.clone(),
                Err(_) => continue,
            };
            if new == old {
                continue;
            }

            self.store.snapshot_former(dep);
            self.store.write_value(dep, new.clone());

            let mut dep_trail = trail.clone();
            dep_trail.push(&self.name, &format!("recompute {}", dep));

            let event = ChangeEvent {
                id: dep,
                kind: new.kind(),
                new_value: new,
                former_value: old,
                originator: originator.to_string(),
                trail: dep_trail.clone(),
            };
            self.bus.publish(&event);
            self.notify_dependents(dep, originator, dep_trail);
        }
    }

    /// Evaluate a condition against the current value
    pub fn compare(&self, id: VarId, cmp: &Comparison) -> Result<bool, VarError> {
        if is_global_id(id) {
            if let Some(global) = &self.global {
                return global.lock().unwrap().compare(id, cmp);
            }
        }
        ops::compare(self.store.get(id)?, cmp)
    }

    pub fn subscribe(&mut self, id: VarId, handler: ChangeHandler) -> SubscriptionToken {
        if is_global_id(id) {
            if let Some(global) = self.global.clone() {
                return global.lock().unwrap().subscribe(id, handler);
            }
        }
        self.bus.subscribe(id, handler)
    }

    pub fn unsubscribe(&mut self, token: SubscriptionToken) {
        if is_global_id(token.variable_id()) {
            if let Some(global) = self.global.clone() {
                global.lock().unwrap().unsubscribe(token);
                return;
            }
        }
        self.bus.unsubscribe(token);
    }

    pub fn subscriber_count(&self, id: VarId) -> usize {
        self.bus.subscriber_count(id)
    }

    /// Snapshot of one entry. Resolves against the global scope for
    /// global-range ids.
    pub fn var(&self, id: VarId) -> Result<Var, VarError> {
        if is_global_id(id) {
            if let Some(global) = &self.global {
                return global.lock().unwrap().var(id);
            }
        }
        self.store.get(id).cloned()
    }

    pub fn bool_value(&self, id: VarId) -> Option<bool> {
        self.resolved(id, |store| store.bool_value(id))
    }

    pub fn int_value(&self, id: VarId) -> Option<i32> {
        self.resolved(id, |store| store.int_value(id))
    }

    pub fn float_value(&self, id: VarId) -> Option<f32> {
        self.resolved(id, |store| store.float_value(id))
    }

    pub fn string_value(&self, id: VarId) -> Option<String> {
        self.resolved(id, |store| store.string_value(id))
    }

    fn resolved<T>(&self, id: VarId, f: impl Fn(&VariableStore) -> Option<T>) -> Option<T> {
        if is_global_id(id) {
            if let Some(global) = &self.global {
                return f(&global.lock().unwrap().store);
            }
        }
        f(&self.store)
    }

    /// Base ids a new complex variable with id `forbidden` could read
    /// without creating a cycle
    pub fn candidates(&self, forbidden: VarId) -> Vec<VarId> {
        self.graph.candidates(self.store.ids(), forbidden)
    }

    pub fn dependencies(&self, complex_id: VarId) -> Option<&[VarId]> {
        self.complexes.get(&complex_id).map(|c| c.dependencies.as_slice())
    }

    /// Complex variable ids recomputed when `id` moves
    pub fn transitive_dependents(&self, id: VarId) -> Vec<VarId> {
        self.graph.transitive_dependents(id).into_iter().collect()
    }

    pub(crate) fn store(&self) -> &VariableStore {
        &self.store
    }

    /// Replication ingress: overwrite-or-insert one entry and fire the
    /// same notifications a local mutation would.
    pub(crate) fn apply_remote_set(&mut self, var: Var, originator: &str) {
        let id = var.id;
        let new = var.value.clone();
        if self.store.contains(id) {
            let old = self.store.get(id).map(|v| v.value.clone()).ok();
            if old.as_ref() == Some(&new) && new.kind() != VarKind::Event {
                return;
            }
            self.store.snapshot_former(id);
            self.store.write_value(id, new.clone());
        } else {
            self.store.insert(var);
        }

        let former = self
            .store
            .former_value(id)
            .cloned()
            .unwrap_or_else(|| new.kind().default_value());
        let trail = CausalTrail::from_originator(originator);
        let event = ChangeEvent {
            id,
            kind: new.kind(),
            new_value: new,
            former_value: former,
            originator: originator.to_string(),
            trail: trail.clone(),
        };
        self.bus.publish(&event);
        self.notify_dependents(id, originator, trail);
    }

    pub(crate) fn apply_remote_remove(&mut self, id: VarId) {
        if self.store.remove(id).is_none() {
            warn!(target: "sync", "Remove for unknown variable {} ignored", id);
        }
        self.complexes.remove(&id);
        self.graph.rebuild(&self.complexes);
    }

    pub(crate) fn apply_remote_clear(&mut self) {
        self.store.clear();
        self.complexes.clear();
        self.graph.rebuild(&self.complexes);
    }
}

impl VariableScope for Scene {
    fn modify_traced(
        &mut self,
        id: VarId,
        op: &Operation,
        originator: &str,
        trail: CausalTrail,
    ) -> Result<bool, VarError> {
        Scene::modify_traced(self, id, op, originator, trail)
    }

    fn trigger_traced(
        &mut self,
        id: VarId,
        originator: &str,
        trail: CausalTrail,
    ) -> Result<(), VarError> {
        Scene::trigger_traced(self, id, originator, trail)
    }

    fn compare(&self, id: VarId, cmp: &Comparison) -> Result<bool, VarError> {
        Scene::compare(self, id, cmp)
    }

    fn subscribe(&mut self, id: VarId, handler: ChangeHandler) -> SubscriptionToken {
        Scene::subscribe(self, id, handler)
    }

    fn unsubscribe(&mut self, token: SubscriptionToken) {
        Scene::unsubscribe(self, token)
    }
}
