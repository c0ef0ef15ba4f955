//! Accumulating causal trail carried alongside change events.
//!
//! The trail is display-only diagnostics: who touched what, in order.
//! It is not part of the functional contract.

/// Human-readable record of what triggered a mutation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CausalTrail {
    lines: Vec<String>,
}

impl CausalTrail {
    pub fn new() -> CausalTrail {
        CausalTrail { lines: Vec::new() }
    }

    /// Start a trail from an originating object name
    pub fn from_originator(originator: &str) -> CausalTrail {
        let mut trail = CausalTrail::new();
        trail.push(originator, "origin");
        trail
    }

    /// Append one step: the acting object and what it did
    pub fn push(&mut self, actor: &str, description: &str) {
        let stamp = chrono::Local::now().format("%H:%M:%S%.3f");
        self.lines.push(format!("[{}] {}: {}", stamp, actor, description));
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl std::fmt::Display for CausalTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.lines.join(" | "))
    }
}
