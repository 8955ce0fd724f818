//! Build-time validator.
//!
//! Runs once, inside [`crate::builder::WorkflowBuilder::build`]. Fatal
//! findings become a [`ValidationError`]; self-loops and cycles are logged
//! as warnings (deduplicated per distinct cycle across the process's
//! lifetime); dead-ends are reported as info.

use crate::edge::EdgeGroup;
use crate::edge_runner::ExecutorMap;
use crate::error::{Result, ValidationError};
use crate::types::{is_compatible, TypeRegistry, TypeSpec};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, OnceLock};

/// Non-fatal findings surfaced alongside a successful validation.
#[derive(Debug, Default)]
pub struct ValidationReport {
    /// Dead-end executor ids: no outgoing edges. Reported as info, not an
    /// error.
    pub dead_ends: Vec<String>,
}

fn seen_cycles() -> &'static Mutex<HashSet<String>> {
    static SEEN: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    SEEN.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Validates a workflow topology. `declared_ids` includes every id as the
/// builder saw it (duplicates and all), so duplicate-id detection doesn't
/// depend on [`ExecutorMap`] already having deduplicated them away.
pub fn validate(
    declared_ids: &[String],
    executors: &ExecutorMap,
    groups: &[EdgeGroup],
    start_id: &str,
    registry: &TypeRegistry,
) -> Result<ValidationReport> {
    check_duplicate_executor_ids(declared_ids)?;
    check_duplicate_edges(groups)?;
    check_type_compatibility(groups, executors, registry)?;
    check_connectivity(executors, groups, start_id)?;

    warn_self_loops(groups);
    warn_cycles(groups);

    Ok(ValidationReport {
        dead_ends: dead_end_executors(executors, groups),
    })
}

fn check_duplicate_executor_ids(declared_ids: &[String]) -> Result<()> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for id in declared_ids {
        *counts.entry(id.as_str()).or_insert(0) += 1;
    }
    let duplicates: Vec<&str> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(id, _)| id)
        .collect();
    if duplicates.is_empty() {
        return Ok(());
    }
    let mut duplicates = duplicates;
    duplicates.sort_unstable();
    Err(ValidationError::ExecutorDuplication(duplicates.join(", ")).into())
}

fn check_duplicate_edges(groups: &[EdgeGroup]) -> Result<()> {
    let mut seen = HashSet::new();
    for group in groups {
        for edge in group.edges() {
            let identity = edge.identity();
            if !seen.insert(identity) {
                return Err(ValidationError::EdgeDuplication(edge.source_id, edge.target_id).into());
            }
        }
    }
    Ok(())
}

fn check_connectivity(executors: &ExecutorMap, groups: &[EdgeGroup], start_id: &str) -> Result<()> {
    let mut touched: HashSet<&str> = HashSet::new();
    let edges: Vec<(String, String)> = groups.iter().flat_map(|g| g.edges()).map(|e| (e.source_id, e.target_id)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for (s, t) in &edges {
        adjacency.entry(s.as_str()).or_default().push(t.as_str());
        touched.insert(s.as_str());
        touched.insert(t.as_str());
    }

    if !edges.is_empty() && !touched.contains(start_id) {
        return Err(ValidationError::GraphConnectivity(format!(
            "start executor '{start_id}' does not appear in any edge"
        ))
        .into());
    }

    let mut reachable: HashSet<&str> = HashSet::new();
    let mut stack = vec![start_id];
    while let Some(node) = stack.pop() {
        if !reachable.insert(node) {
            continue;
        }
        if let Some(neighbors) = adjacency.get(node) {
            for n in neighbors {
                stack.push(n);
            }
        }
    }

    let mut unreachable: Vec<&str> = executors
        .keys()
        .map(String::as_str)
        .filter(|id| *id != start_id && *id != crate::request_info::REQUEST_INFO_EXECUTOR_ID && !reachable.contains(id))
        .collect();
    // Isolated executors (no edges at all, not the start) are a distinct
    // case of the same error: a single-node workflow (no edges anywhere)
    // is allowed, so only flag isolation when other edges exist.
    if !edges.is_empty() {
        unreachable.sort_unstable();
        if !unreachable.is_empty() {
            return Err(ValidationError::GraphConnectivity(format!(
                "unreachable or isolated executor(s) from start '{start_id}': {}",
                unreachable.join(", ")
            ))
            .into());
        }
    }
    Ok(())
}

fn check_type_compatibility(groups: &[EdgeGroup], executors: &ExecutorMap, registry: &TypeRegistry) -> Result<()> {
    for group in groups {
        let is_fan_in = matches!(group, EdgeGroup::FanIn { .. });
        for edge in group.edges() {
            let Some(source) = executors.get(&edge.source_id) else {
                continue;
            };
            let Some(target) = executors.get(&edge.target_id) else {
                continue;
            };
            let source_outputs = source.output_types();
            let target_inputs = target.input_types();
            // An empty list here means "no handler registered at all" (the
            // common mistake of wiring an edge before calling
            // `.with_handler()`), not "accepts anything" — that has to be
            // spelled with an explicit `TypeSpec::Any` entry, so an empty
            // list falls straight through to the incompatible branch below
            // via the `.any()` over zero candidates.
            let compatible = source_outputs.iter().any(|source_output| {
                let effective_source = if is_fan_in {
                    source_output.clone().list_of()
                } else {
                    source_output.clone()
                };
                target_inputs
                    .iter()
                    .any(|target_input| is_compatible(&effective_source, target_input, registry))
            });
            if !compatible {
                return Err(ValidationError::TypeCompatibility {
                    source: edge.source_id.clone(),
                    target: edge.target_id.clone(),
                    detail: format!(
                        "no output type of '{}' is compatible with any input type of '{}'",
                        edge.source_id, edge.target_id
                    ),
                }
                .into());
            }
        }
    }
    Ok(())
}

fn warn_self_loops(groups: &[EdgeGroup]) {
    for group in groups {
        for edge in group.edges() {
            if edge.source_id == edge.target_id {
                tracing::warn!(executor_id = %edge.source_id, "self-loop edge");
            }
        }
    }
}

/// Detects strongly connected components with more than one node (or a
/// self-loop already warned above) via Tarjan's algorithm, and warns once
/// per distinct SCC signature, ever, for this process.
fn warn_cycles(groups: &[EdgeGroup]) {
    let edges: Vec<(String, String)> = groups.iter().flat_map(|g| g.edges()).map(|e| (e.source_id, e.target_id)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut nodes: HashSet<&str> = HashSet::new();
    for (s, t) in &edges {
        adjacency.entry(s.as_str()).or_default().push(t.as_str());
        nodes.insert(s.as_str());
        nodes.insert(t.as_str());
    }

    for scc in tarjan_sccs(&nodes, &adjacency) {
        if scc.len() < 2 {
            continue;
        }
        let mut sorted = scc.clone();
        sorted.sort_unstable();
        let signature = sorted.join(",");
        let mut seen = seen_cycles().lock().unwrap();
        if seen.insert(signature.clone()) {
            tracing::warn!(cycle = %signature, "cycle detected in workflow graph");
        }
    }
}

fn tarjan_sccs<'a>(nodes: &HashSet<&'a str>, adjacency: &HashMap<&'a str, Vec<&'a str>>) -> Vec<Vec<String>> {
    struct State<'a> {
        index: HashMap<&'a str, usize>,
        lowlink: HashMap<&'a str, usize>,
        on_stack: HashSet<&'a str>,
        stack: Vec<&'a str>,
        counter: usize,
        sccs: Vec<Vec<String>>,
    }

    fn strongconnect<'a>(node: &'a str, adjacency: &HashMap<&'a str, Vec<&'a str>>, state: &mut State<'a>) {
        state.index.insert(node, state.counter);
        state.lowlink.insert(node, state.counter);
        state.counter += 1;
        state.stack.push(node);
        state.on_stack.insert(node);

        if let Some(neighbors) = adjacency.get(node) {
            for &neighbor in neighbors {
                if !state.index.contains_key(neighbor) {
                    strongconnect(neighbor, adjacency, state);
                    let low = (*state.lowlink.get(node).unwrap()).min(*state.lowlink.get(neighbor).unwrap());
                    state.lowlink.insert(node, low);
                } else if state.on_stack.contains(neighbor) {
                    let low = (*state.lowlink.get(node).unwrap()).min(*state.index.get(neighbor).unwrap());
                    state.lowlink.insert(node, low);
                }
            }
        }

        if state.lowlink.get(node) == state.index.get(node) {
            let mut component = Vec::new();
            loop {
                let w = state.stack.pop().unwrap();
                state.on_stack.remove(w);
                component.push(w.to_string());
                if w == node {
                    break;
                }
            }
            state.sccs.push(component);
        }
    }

    let mut state = State {
        index: HashMap::new(),
        lowlink: HashMap::new(),
        on_stack: HashSet::new(),
        stack: Vec::new(),
        counter: 0,
        sccs: Vec::new(),
    };
    for &node in nodes {
        if !state.index.contains_key(node) {
            strongconnect(node, adjacency, &mut state);
        }
    }
    state.sccs
}

fn dead_end_executors(executors: &ExecutorMap, groups: &[EdgeGroup]) -> Vec<String> {
    let sources_with_outgoing: HashSet<String> = groups.iter().flat_map(|g| g.source_ids()).collect();
    let mut dead_ends: Vec<String> = executors
        .keys()
        .filter(|id| !sources_with_outgoing.contains(id.as_str()))
        .cloned()
        .collect();
    dead_ends.sort_unstable();
    dead_ends
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::HandlerExecutor;
    use std::sync::Arc;

    fn executor(id: &str, input: TypeSpec, output: Option<TypeSpec>) -> Arc<dyn crate::executor::Executor> {
        let mut base = HandlerExecutor::new(id);
        if let Some(output) = output {
            base = base.with_handler(crate::executor::HandlerRegistration {
                message_type: input,
                output_types: vec![output],
                workflow_output_types: vec![],
                handler: Arc::new(|_v, _ctx| Box::pin(async { Ok(()) })),
            });
        } else {
            base = base.with_handler(crate::executor::HandlerRegistration {
                message_type: input,
                output_types: vec![],
                workflow_output_types: vec![],
                handler: Arc::new(|_v, _ctx| Box::pin(async { Ok(()) })),
            });
        }
        Arc::new(base)
    }

    #[test]
    fn rejects_duplicate_executor_ids() {
        let ids = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        assert!(check_duplicate_executor_ids(&ids).is_err());
    }

    #[test]
    fn rejects_duplicate_edges() {
        let groups = vec![
            EdgeGroup::Single {
                id: "g1".to_string(),
                source_id: "a".to_string(),
                target_id: "b".to_string(),
                predicate: None,
            },
            EdgeGroup::Single {
                id: "g2".to_string(),
                source_id: "a".to_string(),
                target_id: "b".to_string(),
                predicate: None,
            },
        ];
        assert!(check_duplicate_edges(&groups).is_err());
    }

    #[test]
    fn rejects_type_incompatible_edge() {
        let mut executors = ExecutorMap::new();
        executors.insert("a".to_string(), executor("a", TypeSpec::concrete("String"), Some(TypeSpec::concrete("Int"))));
        executors.insert("b".to_string(), executor("b", TypeSpec::concrete("String"), None));
        let groups = vec![EdgeGroup::Single {
            id: "g".to_string(),
            source_id: "a".to_string(),
            target_id: "b".to_string(),
            predicate: None,
        }];
        let registry = TypeRegistry::new();
        assert!(check_type_compatibility(&groups, &executors, &registry).is_err());
    }

    #[test]
    fn rejects_edge_into_executor_with_no_registered_handler() {
        let mut executors = ExecutorMap::new();
        executors.insert("a".to_string(), executor("a", TypeSpec::concrete("String"), Some(TypeSpec::concrete("Int"))));
        executors.insert("b".to_string(), Arc::new(HandlerExecutor::new("b")));
        let groups = vec![EdgeGroup::Single {
            id: "g".to_string(),
            source_id: "a".to_string(),
            target_id: "b".to_string(),
            predicate: None,
        }];
        let registry = TypeRegistry::new();
        assert!(check_type_compatibility(&groups, &executors, &registry).is_err());
    }

    #[test]
    fn accepts_compatible_edge() {
        let mut executors = ExecutorMap::new();
        executors.insert("a".to_string(), executor("a", TypeSpec::concrete("String"), Some(TypeSpec::concrete("Int"))));
        executors.insert("b".to_string(), executor("b", TypeSpec::concrete("Int"), None));
        let groups = vec![EdgeGroup::Single {
            id: "g".to_string(),
            source_id: "a".to_string(),
            target_id: "b".to_string(),
            predicate: None,
        }];
        let registry = TypeRegistry::new();
        assert!(check_type_compatibility(&groups, &executors, &registry).is_ok());
    }

    #[test]
    fn fan_in_target_sees_list_of_source_output() {
        let mut executors = ExecutorMap::new();
        executors.insert("s1".to_string(), executor("s1", TypeSpec::concrete("String"), Some(TypeSpec::concrete("Int"))));
        executors.insert("s2".to_string(), executor("s2", TypeSpec::concrete("String"), Some(TypeSpec::concrete("Int"))));
        executors.insert("t".to_string(), executor("t", TypeSpec::list(TypeSpec::concrete("Int")), None));
        let groups = vec![EdgeGroup::FanIn {
            id: "g".to_string(),
            source_ids: vec!["s1".to_string(), "s2".to_string()],
            target_id: "t".to_string(),
        }];
        let registry = TypeRegistry::new();
        assert!(check_type_compatibility(&groups, &executors, &registry).is_ok());
    }

    #[test]
    fn detects_unreachable_executor() {
        let mut executors = ExecutorMap::new();
        executors.insert("a".to_string(), executor("a", TypeSpec::Any, None));
        executors.insert("b".to_string(), executor("b", TypeSpec::Any, None));
        executors.insert("orphan".to_string(), executor("orphan", TypeSpec::Any, None));
        let groups = vec![EdgeGroup::Single {
            id: "g".to_string(),
            source_id: "a".to_string(),
            target_id: "b".to_string(),
            predicate: None,
        }];
        assert!(check_connectivity(&executors, &groups, "a").is_err());
    }

    #[test]
    fn single_node_workflow_with_no_edges_is_allowed() {
        let mut executors = ExecutorMap::new();
        executors.insert("a".to_string(), executor("a", TypeSpec::Any, None));
        assert!(check_connectivity(&executors, &[], "a").is_ok());
    }

    #[test]
    fn dead_ends_lists_executors_with_no_outgoing_edges() {
        let mut executors = ExecutorMap::new();
        executors.insert("a".to_string(), executor("a", TypeSpec::Any, None));
        executors.insert("b".to_string(), executor("b", TypeSpec::Any, None));
        let groups = vec![EdgeGroup::Single {
            id: "g".to_string(),
            source_id: "a".to_string(),
            target_id: "b".to_string(),
            predicate: None,
        }];
        assert_eq!(dead_end_executors(&executors, &groups), vec!["b".to_string()]);
    }
}
