//! Dependency link table between base variables and the complex
//! variables that read them.
//!
//! The table is rebuilt whenever a scene is (re)initialized, never
//! incrementally patched.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::complex::ComplexVariable;
use crate::error::VarError;
use crate::value::VarId;

/// base id -> dependent complex variable ids
#[derive(Debug, Default)]
pub struct DependencyGraph {
    links: HashMap<VarId, Vec<VarId>>,
}

impl DependencyGraph {
    pub fn new() -> DependencyGraph {
        DependencyGraph {
            links: HashMap::new(),
        }
    }

    /// Clear and rescan all complex variables' dependency sets
    pub fn rebuild(&mut self, complexes: &HashMap<VarId, ComplexVariable>) {
        self.links.clear();
        for complex in complexes.values() {
            for base in &complex.dependencies {
                let dependents = self.links.entry(*base).or_default();
                if !dependents.contains(&complex.id) {
                    dependents.push(complex.id);
                }
            }
        }
        // deterministic fan-out order
        for dependents in self.links.values_mut() {
            dependents.sort_unstable();
        }
        debug!(target: "store", "Dependency graph rebuilt, {} base entries", self.links.len());
    }

    /// Complex variable ids registered against `base`
    pub fn dependents(&self, base: VarId) -> &[VarId] {
        self.links.get(&base).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Everything that transitively reads `base`
    pub fn transitive_dependents(&self, base: VarId) -> HashSet<VarId> {
        let mut seen = HashSet::new();
        let mut stack = vec![base];
        while let Some(id) = stack.pop() {
            for dep in self.dependents(id) {
                if seen.insert(*dep) {
                    stack.push(*dep);
                }
            }
        }
        seen
    }

    /// Candidate list for configuration tooling: `all` minus the
    /// forbidden id and everything that transitively depends on it.
    /// Used to keep cyclic references out of selection lists.
    pub fn candidates(&self, all: impl IntoIterator<Item = VarId>, forbidden: VarId) -> Vec<VarId> {
        let excluded = self.transitive_dependents(forbidden);
        let mut out: Vec<VarId> = all
            .into_iter()
            .filter(|id| *id != forbidden && !excluded.contains(id))
            .collect();
        out.sort_unstable();
        out
    }
}

/// Reject complex variable sets where any definition depends
/// (transitively) on its own id. Configuration-time check only.
pub fn validate_acyclic(complexes: &HashMap<VarId, ComplexVariable>) -> Result<(), VarError> {
    for complex in complexes.values() {
        let mut seen = HashSet::new();
        let mut stack: Vec<VarId> = complex.dependencies.clone();
        while let Some(id) = stack.pop() {
            if id == complex.id {
                return Err(VarError::CyclicDependency(complex.id));
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(dep) = complexes.get(&id) {
                stack.extend(dep.dependencies.iter().copied());
            }
        }
    }
    Ok(())
}
