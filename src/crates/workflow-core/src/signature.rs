//! Graph Signature.
//!
//! A canonical fingerprint of a workflow's topology: used to refuse a
//! checkpoint restore against an incompatible graph. Group ids and
//! predicate/selection function *identities* are deliberately excluded from
//! the payload — only their declared names — so two workflows built from
//! the same topology hash identically regardless of closure identity.

use crate::edge::EdgeGroup;
use crate::edge_runner::ExecutorMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Serialize)]
struct GroupSignature {
    kind: &'static str,
    sources: Vec<String>,
    targets: Vec<String>,
    edges: Vec<String>,
    condition_names: Vec<String>,
}

#[derive(Serialize)]
struct GraphSignaturePayload {
    start_id: String,
    executors: BTreeMap<String, String>,
    groups: Vec<GroupSignature>,
    iteration_cap: u64,
}

fn condition_names(group: &EdgeGroup) -> Vec<String> {
    let mut names = match group {
        EdgeGroup::Single { predicate, .. } => predicate.iter().map(|p| p.name.clone()).collect(),
        EdgeGroup::FanOut { selection, .. } => selection.iter().map(|s| s.name.clone()).collect(),
        EdgeGroup::SwitchCase { cases, .. } => cases.iter().map(|(p, _)| p.name.clone()).collect(),
        EdgeGroup::MultiSelect { selection, .. } => vec![selection.name.clone()],
        EdgeGroup::FanIn { .. } => Vec::new(),
    };
    names.sort_unstable();
    names
}

fn group_signature(group: &EdgeGroup) -> GroupSignature {
    let mut sources = group.source_ids();
    sources.sort_unstable();
    let mut targets = group.target_ids();
    targets.sort_unstable();
    let mut edges: Vec<String> = group.edges().iter().map(|e| e.identity()).collect();
    edges.sort_unstable();
    GroupSignature {
        kind: group.kind(),
        sources,
        targets,
        edges,
        condition_names: condition_names(group),
    }
}

/// Builds the canonical topology payload for `start_id`/`executors`/`groups`
/// at the given `iteration_cap`.
pub fn canonical_payload(start_id: &str, executors: &ExecutorMap, groups: &[EdgeGroup], iteration_cap: u64) -> String {
    let executors_by_id: BTreeMap<String, String> = executors.iter().map(|(id, e)| (id.clone(), e.kind().to_string())).collect();
    let mut group_sigs: Vec<GroupSignature> = groups.iter().map(group_signature).collect();
    group_sigs.sort_by(|a, b| a.edges.cmp(&b.edges).then_with(|| a.kind.cmp(b.kind)));

    let payload = GraphSignaturePayload {
        start_id: start_id.to_string(),
        executors: executors_by_id,
        groups: group_sigs,
        iteration_cap,
    };
    serde_json::to_string(&payload).expect("graph signature payload serializes")
}

/// SHA-256 hex digest of [`canonical_payload`].
pub fn compute_signature(start_id: &str, executors: &ExecutorMap, groups: &[EdgeGroup], iteration_cap: u64) -> String {
    let payload = canonical_payload(start_id, executors, groups, iteration_cap);
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Executor, HandlerExecutor, HandlerRegistration};
    use crate::edge::NamedPredicate;
    use crate::types::TypeSpec;
    use std::sync::Arc;

    fn executor_map() -> ExecutorMap {
        let mut map = ExecutorMap::new();
        let a = HandlerExecutor::new("a").with_handler(HandlerRegistration {
            message_type: TypeSpec::concrete("String"),
            output_types: vec![TypeSpec::concrete("String")],
            workflow_output_types: vec![],
            handler: Arc::new(|_v, _ctx| Box::pin(async { Ok(()) })),
        });
        map.insert("a".to_string(), Arc::new(a) as Arc<dyn Executor>);
        map
    }

    #[test]
    fn same_topology_produces_the_same_signature() {
        let executors = executor_map();
        let groups = vec![EdgeGroup::Single {
            id: "g1".to_string(),
            source_id: "a".to_string(),
            target_id: "a".to_string(),
            predicate: Some(NamedPredicate::new("always", Arc::new(|_| Ok(true)))),
        }];
        let sig1 = compute_signature("a", &executors, &groups, 100);

        let groups2 = vec![EdgeGroup::Single {
            id: "some-other-random-group-id".to_string(),
            source_id: "a".to_string(),
            target_id: "a".to_string(),
            predicate: Some(NamedPredicate::new("always", Arc::new(|_| Ok(false)))),
        }];
        let sig2 = compute_signature("a", &executors, &groups2, 100);
        assert_eq!(sig1, sig2, "group id and predicate closure identity must not affect the signature");
    }

    #[test]
    fn different_iteration_cap_changes_signature() {
        let executors = executor_map();
        let groups = vec![];
        let sig1 = compute_signature("a", &executors, &groups, 100);
        let sig2 = compute_signature("a", &executors, &groups, 50);
        assert_ne!(sig1, sig2);
    }
}
