//! Edge and Edge Group model.
//!
//! Groups are static topology descriptors: serializable, with predicates
//! and selection functions serialized by *name* only. A deserialized
//! group's predicate is a placeholder that fails loudly if ever invoked, so
//! a missing registration is diagnosed at the point it matters instead of
//! silently routing messages wrong.

use crate::error::{Result, WorkflowError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A pure boolean function of a message payload. Allowed to fail; the
/// failure propagates (switch/case logs and tries the next case; single
/// edges propagate it as a routing error).
pub type PredicateFn = Arc<dyn Fn(&Value) -> Result<bool> + Send + Sync>;

/// `(payload, all_target_ids) -> active_target_ids`, used by fan-out and
/// multi-select groups.
pub type SelectionFn = Arc<dyn Fn(&Value, &[String]) -> Vec<String> + Send + Sync>;

/// A named predicate. Only `name` survives serialization; the function
/// itself must be re-attached by the caller that rebuilds the workflow
/// after deserializing.
#[derive(Clone)]
pub struct NamedPredicate {
    pub name: String,
    func: Option<PredicateFn>,
}

impl NamedPredicate {
    pub fn new(name: impl Into<String>, func: PredicateFn) -> Self {
        Self {
            name: name.into(),
            func: Some(func),
        }
    }

    /// A predicate with no attached implementation — the shape produced by
    /// deserializing a group without re-registering its functions.
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            func: None,
        }
    }

    pub fn evaluate(&self, payload: &Value) -> Result<bool> {
        match &self.func {
            Some(f) => f(payload),
            None => Err(WorkflowError::Runner(format!(
                "predicate '{}' has no registered implementation (was this group deserialized without re-attaching its functions?)",
                self.name
            ))),
        }
    }
}

impl fmt::Debug for NamedPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedPredicate").field("name", &self.name).finish()
    }
}

impl Serialize for NamedPredicate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.name.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NamedPredicate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(NamedPredicate::placeholder(String::deserialize(deserializer)?))
    }
}

/// A named selection function, serialized the same way as
/// [`NamedPredicate`].
#[derive(Clone)]
pub struct NamedSelection {
    pub name: String,
    func: Option<SelectionFn>,
}

impl NamedSelection {
    pub fn new(name: impl Into<String>, func: SelectionFn) -> Self {
        Self {
            name: name.into(),
            func: Some(func),
        }
    }

    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            func: None,
        }
    }

    pub fn evaluate(&self, payload: &Value, all_target_ids: &[String]) -> Result<Vec<String>> {
        match &self.func {
            Some(f) => Ok(f(payload, all_target_ids)),
            None => Err(WorkflowError::Runner(format!(
                "selection function '{}' has no registered implementation",
                self.name
            ))),
        }
    }
}

impl fmt::Debug for NamedSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedSelection").field("name", &self.name).finish()
    }
}

impl Serialize for NamedSelection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.name.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NamedSelection {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(NamedSelection::placeholder(String::deserialize(deserializer)?))
    }
}

/// A single directed edge, identity `source_id -> target_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source_id: String,
    pub target_id: String,
}

impl Edge {
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
        }
    }

    pub fn identity(&self) -> String {
        format!("{}->{}", self.source_id, self.target_id)
    }
}

/// One of the five routing policies an edge group may implement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EdgeGroup {
    Single {
        id: String,
        source_id: String,
        target_id: String,
        predicate: Option<NamedPredicate>,
    },
    FanOut {
        id: String,
        source_id: String,
        target_ids: Vec<String>,
        selection: Option<NamedSelection>,
    },
    FanIn {
        id: String,
        source_ids: Vec<String>,
        target_id: String,
    },
    SwitchCase {
        id: String,
        source_id: String,
        cases: Vec<(NamedPredicate, String)>,
        default_target_id: String,
    },
    MultiSelect {
        id: String,
        source_id: String,
        target_ids: Vec<String>,
        selection: NamedSelection,
    },
}

impl EdgeGroup {
    pub fn id(&self) -> &str {
        match self {
            EdgeGroup::Single { id, .. }
            | EdgeGroup::FanOut { id, .. }
            | EdgeGroup::FanIn { id, .. }
            | EdgeGroup::SwitchCase { id, .. }
            | EdgeGroup::MultiSelect { id, .. } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EdgeGroup::Single { .. } => "single",
            EdgeGroup::FanOut { .. } => "fan_out",
            EdgeGroup::FanIn { .. } => "fan_in",
            EdgeGroup::SwitchCase { .. } => "switch_case",
            EdgeGroup::MultiSelect { .. } => "multi_select",
        }
    }

    /// All source ids this group reads from.
    pub fn source_ids(&self) -> Vec<String> {
        match self {
            EdgeGroup::Single { source_id, .. }
            | EdgeGroup::FanOut { source_id, .. }
            | EdgeGroup::SwitchCase { source_id, .. }
            | EdgeGroup::MultiSelect { source_id, .. } => vec![source_id.clone()],
            EdgeGroup::FanIn { source_ids, .. } => source_ids.clone(),
        }
    }

    /// All target ids this group may deliver to.
    pub fn target_ids(&self) -> Vec<String> {
        match self {
            EdgeGroup::Single { target_id, .. } | EdgeGroup::FanIn { target_id, .. } => vec![target_id.clone()],
            EdgeGroup::FanOut { target_ids, .. } | EdgeGroup::MultiSelect { target_ids, .. } => target_ids.clone(),
            EdgeGroup::SwitchCase {
                cases, default_target_id, ..
            } => {
                let mut ids: Vec<String> = cases.iter().map(|(_, t)| t.clone()).collect();
                ids.push(default_target_id.clone());
                ids
            }
        }
    }

    /// The individual `source -> target` edges this group expands to, used
    /// by the validator for duplicate-edge and connectivity checks.
    pub fn edges(&self) -> Vec<Edge> {
        let sources = self.source_ids();
        let targets = self.target_ids();
        let mut out = Vec::new();
        for s in &sources {
            for t in &targets {
                out.push(Edge::new(s.clone(), t.clone()));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_group_round_trips_through_json_as_a_placeholder() {
        let group = EdgeGroup::Single {
            id: "g1".to_string(),
            source_id: "a".to_string(),
            target_id: "b".to_string(),
            predicate: Some(NamedPredicate::new("is_even", Arc::new(|v: &Value| Ok(v.as_i64().unwrap_or(0) % 2 == 0)))),
        };
        let json = serde_json::to_string(&group).unwrap();
        let restored: EdgeGroup = serde_json::from_str(&json).unwrap();
        if let EdgeGroup::Single { predicate, .. } = restored {
            let predicate = predicate.unwrap();
            assert_eq!(predicate.name, "is_even");
            assert!(predicate.evaluate(&serde_json::json!(1)).is_err());
        } else {
            panic!("expected Single variant");
        }
    }

    #[test]
    fn fan_in_source_ids_preserve_declaration_order() {
        let group = EdgeGroup::FanIn {
            id: "g2".to_string(),
            source_ids: vec!["s1".to_string(), "s2".to_string()],
            target_id: "t".to_string(),
        };
        assert_eq!(group.source_ids(), vec!["s1", "s2"]);
        assert_eq!(group.edges().len(), 2);
    }

    #[test]
    fn switch_case_targets_include_default() {
        let group = EdgeGroup::SwitchCase {
            id: "g3".to_string(),
            source_id: "s".to_string(),
            cases: vec![(NamedPredicate::placeholder("is_a"), "a".to_string())],
            default_target_id: "d".to_string(),
        };
        assert_eq!(group.target_ids(), vec!["a".to_string(), "d".to_string()]);
    }
}
