//! Scene templates: the configuration surface supplied at store-build
//! time. Variables, complex variables and timelines are all described
//! here and validated before a scene is built.

use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::complex::ComplexVariable;
use crate::error::VarError;
use crate::graph;
use crate::timeline::step::Step;
use crate::value::{Bounds, Value, Var, VarFlags, VarId, VarKind};

/// Build-time description of one variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableTemplate {
    pub id: VarId,
    pub kind: VarKind,
    /// Initial value; defaults to the kind's zero value when absent
    #[serde(default)]
    pub value: Option<Value>,
    /// Value is fixed at build time, mutations become no-ops
    #[serde(default)]
    pub is_static: bool,
    /// Pick the initial value from the bounds range at build time
    #[serde(default)]
    pub is_random: bool,
    #[serde(default)]
    pub min_int: Option<i32>,
    #[serde(default)]
    pub max_int: Option<i32>,
    #[serde(default)]
    pub min_float: Option<f32>,
    #[serde(default)]
    pub max_float: Option<f32>,
}

impl VariableTemplate {
    pub fn new(id: VarId, kind: VarKind) -> VariableTemplate {
        VariableTemplate {
            id,
            kind,
            value: None,
            is_static: false,
            is_random: false,
            min_int: None,
            max_int: None,
            min_float: None,
            max_float: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> VariableTemplate {
        self.value = Some(value);
        self
    }

    pub fn bounds(&self) -> Bounds {
        match self.kind {
            VarKind::Int if self.min_int.is_some() || self.max_int.is_some() => Bounds::Int {
                min: self.min_int,
                max: self.max_int,
            },
            VarKind::Float if self.min_float.is_some() || self.max_float.is_some() => {
                Bounds::Float {
                    min: self.min_float,
                    max: self.max_float,
                }
            }
            _ => Bounds::None,
        }
    }

    fn validate(&self) -> Result<(), VarError> {
        if let Some(value) = &self.value {
            if value.kind() != self.kind {
                return Err(VarError::TypeMismatch {
                    id: self.id,
                    expected: self.kind,
                    got: value.kind(),
                });
            }
        }
        let has_int_bounds = self.min_int.is_some() || self.max_int.is_some();
        let has_float_bounds = self.min_float.is_some() || self.max_float.is_some();
        match self.kind {
            VarKind::Int if has_float_bounds => Err(VarError::InvalidTemplate(format!(
                "variable {} is Int but carries float bounds",
                self.id
            ))),
            VarKind::Float if has_int_bounds => Err(VarError::InvalidTemplate(format!(
                "variable {} is Float but carries int bounds",
                self.id
            ))),
            VarKind::Bool | VarKind::Str | VarKind::Event if has_int_bounds || has_float_bounds => {
                Err(VarError::InvalidTemplate(format!(
                    "variable {} kind {} cannot carry bounds",
                    self.id, self.kind
                )))
            }
            _ => Ok(()),
        }
    }

    /// Materialize the runtime `Var`, picking a random initial value
    /// from the bounds range for RANDOM entries
    pub fn build_var(&self) -> Var {
        let value = if self.is_random {
            self.random_value()
        } else {
            self.value
                .clone()
                .unwrap_or_else(|| self.kind.default_value())
        };

        let mut flags = VarFlags::empty();
        if self.is_static {
            flags |= VarFlags::STATIC;
        }
        if self.is_random {
            flags |= VarFlags::RANDOM;
        }

        Var::new(self.id, value)
            .with_flags(flags)
            .with_bounds(self.bounds())
    }

    fn random_value(&self) -> Value {
        let mut rng = rand::thread_rng();
        match self.kind {
            VarKind::Bool => Value::Bool(rng.gen()),
            VarKind::Int => match (self.min_int, self.max_int) {
                (Some(min), Some(max)) if min <= max => Value::Int(rng.gen_range(min..=max)),
                _ => {
                    warn!(target: "config", "Random Int {} without a usable range", self.id);
                    self.kind.default_value()
                }
            },
            VarKind::Float => match (self.min_float, self.max_float) {
                (Some(min), Some(max)) if min <= max => Value::Float(rng.gen_range(min..=max)),
                _ => {
                    warn!(target: "config", "Random Float {} without a usable range", self.id);
                    self.kind.default_value()
                }
            },
            _ => {
                warn!(target: "config", "Random flag ignored for {} variable {}", self.kind, self.id);
                self.kind.default_value()
            }
        }
    }
}

/// Build-time description of one timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineTemplate {
    pub name: String,
    /// Rebuild the queue from the first step when the sequence runs out
    #[serde(default)]
    pub looping: bool,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Template list for one scene scope, loaded from toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneTemplate {
    pub name: String,
    #[serde(default)]
    pub variables: Vec<VariableTemplate>,
    #[serde(default)]
    pub complex: Vec<ComplexVariable>,
    #[serde(default)]
    pub timelines: Vec<TimelineTemplate>,
}

impl SceneTemplate {
    pub fn new(name: impl Into<String>) -> SceneTemplate {
        SceneTemplate {
            name: name.into(),
            variables: Vec::new(),
            complex: Vec::new(),
            timelines: Vec::new(),
        }
    }

    /// Default template location under the platform config directory
    pub fn template_path() -> PathBuf {
        use directories::ProjectDirs;
        let proj_dirs =
            ProjectDirs::from("", "", "scenevar").expect("Failed to determine config directory");
        proj_dirs.config_dir().join("scene.toml")
    }

    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Err(format!("Template file not found: {}", path.display()).into());
        }

        let content = fs::read_to_string(path)?;
        let template: SceneTemplate = toml::from_str(&content)?;
        template.validate()?;
        info!(target: "config", "Loaded scene template from {}", path.display());
        Ok(template)
    }

    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(&self)?;
        fs::write(path, content)?;
        info!(target: "config", "Saved scene template to {}", path.display());
        Ok(())
    }

    /// Reject templates a scene cannot be built from: duplicate ids,
    /// bounds on the wrong kind, complex variables with unknown bases,
    /// kind/rule mismatches and cyclic dependencies.
    pub fn validate(&self) -> Result<(), VarError> {
        let mut seen = std::collections::HashSet::new();
        for var in &self.variables {
            var.validate()?;
            if !seen.insert(var.id) {
                return Err(VarError::InvalidTemplate(format!(
                    "duplicate variable id {}",
                    var.id
                )));
            }
        }

        let mut complexes = std::collections::HashMap::new();
        for complex in &self.complex {
            complex.validate_kind()?;
            if !seen.insert(complex.id) {
                return Err(VarError::InvalidTemplate(format!(
                    "duplicate id {} between variables and complex variables",
                    complex.id
                )));
            }
            for dep in &complex.dependencies {
                if !self.variables.iter().any(|v| v.id == *dep)
                    && !self.complex.iter().any(|c| c.id == *dep)
                {
                    return Err(VarError::InvalidTemplate(format!(
                        "complex variable {} depends on unknown id {}",
                        complex.id, dep
                    )));
                }
            }
            complexes.insert(complex.id, complex.clone());
        }

        graph::validate_acyclic(&complexes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complex::DerivationRule;

    fn int_var(id: VarId, value: i32) -> VariableTemplate {
        VariableTemplate::new(id, VarKind::Int).with_value(Value::Int(value))
    }

    #[test]
    fn test_build_var_carries_flags_and_bounds() {
        let mut t = int_var(5, 10);
        t.is_static = true;
        t.max_int = Some(12);

        let var = t.build_var();
        assert_eq!(var.value, Value::Int(10));
        assert!(!var.is_modifiable());
        assert!(var.bounds.has_max());
        assert!(!var.bounds.has_min());
    }

    #[test]
    fn test_random_int_within_range() {
        let mut t = VariableTemplate::new(1, VarKind::Int);
        t.is_random = true;
        t.min_int = Some(3);
        t.max_int = Some(6);

        for _ in 0..20 {
            match t.build_var().value {
                Value::Int(v) => assert!((3..=6).contains(&v)),
                other => panic!("unexpected value {:?}", other),
            }
        }
    }

    #[test]
    fn test_validate_rejects_value_kind_mismatch() {
        let t = VariableTemplate::new(1, VarKind::Bool).with_value(Value::Int(3));
        let template = SceneTemplate {
            name: "test".into(),
            variables: vec![t],
            complex: vec![],
            timelines: vec![],
        };
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let template = SceneTemplate {
            name: "test".into(),
            variables: vec![int_var(1, 0), int_var(1, 1)],
            complex: vec![],
            timelines: vec![],
        };
        assert!(matches!(
            template.validate(),
            Err(VarError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn test_validate_rejects_cycle() {
        let template = SceneTemplate {
            name: "test".into(),
            variables: vec![int_var(1, 0)],
            complex: vec![
                ComplexVariable {
                    id: 100,
                    kind: VarKind::Int,
                    rule: DerivationRule::Sum,
                    dependencies: vec![200],
                },
                ComplexVariable {
                    id: 200,
                    kind: VarKind::Int,
                    rule: DerivationRule::Sum,
                    dependencies: vec![100],
                },
            ],
            timelines: vec![],
        };
        assert!(template.validate().is_err(), "cyclic complex deps must be rejected");
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut template = SceneTemplate::new("intro");
        template.variables.push(int_var(5, 10));
        template.complex.push(ComplexVariable {
            id: 100,
            kind: VarKind::Int,
            rule: DerivationRule::Sum,
            dependencies: vec![5],
        });

        let text = toml::to_string_pretty(&template).unwrap();
        let parsed: SceneTemplate = toml::from_str(&text).unwrap();
        assert_eq!(parsed.name, "intro");
        assert_eq!(parsed.variables.len(), 1);
        assert_eq!(parsed.complex[0].dependencies, vec![5]);
    }
}
