//! Structural type compatibility.
//!
//! Executors advertise their input/output/workflow-output types as data
//! (`TypeSpec`), not as Rust generic parameters: the validator needs to
//! introspect them before anything runs, and handlers match a payload's
//! runtime tag rather than relying on Rust's static type system — a
//! tagged-union `Value` plus a registry is preferable to open reflection.
//!
//! Subtyping between concrete type ids is data too: a [`TypeRegistry`]
//! records which type ids declare themselves subtypes of which others, and
//! the compatibility rule below consults it instead of Rust's trait system.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// The container origin for a generic container type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerKind {
    List,
    Set,
    /// Fixed-arity tuple; `elements` in the owning [`TypeSpec::Container`]
    /// has one entry per position.
    Tuple,
    /// Variable-length tuple (`Tuple[T, ...]`); `elements` has exactly one
    /// entry, the repeated element type.
    VariadicTuple,
    Dict,
}

/// A type, as data. This is what executors declare for their handlers and
/// what the validator compares across an edge.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeSpec {
    /// Matches anything as a target, regardless of the source.
    Any,
    /// A named, non-generic type, e.g. `"String"` or `"DraftReview"`.
    Concrete(String),
    /// A union of alternatives.
    Union(Vec<TypeSpec>),
    /// A generic container over element/value types.
    Container {
        kind: ContainerKind,
        elements: Vec<TypeSpec>,
    },
}

impl TypeSpec {
    pub fn concrete(name: impl Into<String>) -> Self {
        TypeSpec::Concrete(name.into())
    }

    pub fn list(element: TypeSpec) -> Self {
        TypeSpec::Container {
            kind: ContainerKind::List,
            elements: vec![element],
        }
    }

    pub fn dict(key: TypeSpec, value: TypeSpec) -> Self {
        TypeSpec::Container {
            kind: ContainerKind::Dict,
            elements: vec![key, value],
        }
    }

    /// The type a fan-in edge's target must accept: `list<source_output>`.
    pub fn list_of(self) -> Self {
        TypeSpec::list(self)
    }
}

/// Registry of subtype relationships between concrete type ids.
///
/// Types are opaque strings here; the registry just records edges of an
/// "is-subtype-of" DAG and answers ancestor queries. Executors register
/// their own types (and any supertypes they want recognized) when they are
/// constructed; there is no implicit reflection.
#[derive(Default, Debug, Clone)]
pub struct TypeRegistry {
    // type id -> direct supertypes
    supertypes: HashMap<String, HashSet<String>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares that `subtype` is a direct subtype of `supertype`.
    pub fn declare_subtype(&mut self, subtype: impl Into<String>, supertype: impl Into<String>) {
        self.supertypes
            .entry(subtype.into())
            .or_default()
            .insert(supertype.into());
    }

    /// Whether `subtype == supertype` or `subtype` transitively declares
    /// `supertype` as an ancestor.
    pub fn is_subtype(&self, subtype: &str, supertype: &str) -> bool {
        if subtype == supertype {
            return true;
        }
        let mut visited = HashSet::new();
        let mut stack = vec![subtype.to_string()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(parents) = self.supertypes.get(&current) {
                for parent in parents {
                    if parent == supertype {
                        return true;
                    }
                    stack.push(parent.clone());
                }
            }
        }
        false
    }
}

/// The recursive compatibility rule used to match a payload against a
/// declared handler type.
pub fn is_compatible(source: &TypeSpec, target: &TypeSpec, registry: &TypeRegistry) -> bool {
    if source == target {
        return true;
    }
    match target {
        TypeSpec::Any => true,
        TypeSpec::Union(members) => members.iter().any(|m| is_compatible(source, m, registry)),
        _ => match source {
            TypeSpec::Union(members) => members.iter().all(|m| is_compatible(m, target, registry)),
            TypeSpec::Concrete(source_name) => match target {
                TypeSpec::Concrete(target_name) => registry.is_subtype(source_name, target_name),
                _ => false,
            },
            TypeSpec::Container {
                kind: source_kind,
                elements: source_elems,
            } => match target {
                TypeSpec::Container {
                    kind: target_kind,
                    elements: target_elems,
                } => container_compatible(*source_kind, source_elems, *target_kind, target_elems, registry),
                _ => false,
            },
            TypeSpec::Any => matches!(target, TypeSpec::Any),
        },
    }
}

fn container_compatible(
    source_kind: ContainerKind,
    source_elems: &[TypeSpec],
    target_kind: ContainerKind,
    target_elems: &[TypeSpec],
    registry: &TypeRegistry,
) -> bool {
    use ContainerKind::*;
    let same_origin = matches!(
        (source_kind, target_kind),
        (List, List) | (Set, Set) | (Dict, Dict) | (Tuple, Tuple) | (VariadicTuple, VariadicTuple)
    ) || matches!((source_kind, target_kind), (Tuple, VariadicTuple) | (VariadicTuple, Tuple));
    if !same_origin {
        return false;
    }
    match target_kind {
        Dict => {
            source_elems.len() == 2
                && target_elems.len() == 2
                && is_compatible(&source_elems[0], &target_elems[0], registry)
                && is_compatible(&source_elems[1], &target_elems[1], registry)
        }
        VariadicTuple => {
            let target_elem = &target_elems[0];
            match source_kind {
                VariadicTuple => is_compatible(&source_elems[0], target_elem, registry),
                Tuple => source_elems.iter().all(|e| is_compatible(e, target_elem, registry)),
                _ => false,
            }
        }
        Tuple => {
            source_elems.len() == target_elems.len()
                && source_elems
                    .iter()
                    .zip(target_elems)
                    .all(|(s, t)| is_compatible(s, t, registry))
        }
        List | Set => {
            source_elems.len() == 1
                && target_elems.len() == 1
                && is_compatible(&source_elems[0], &target_elems[0], registry)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_concrete_types_are_compatible() {
        let r = TypeRegistry::new();
        assert!(is_compatible(
            &TypeSpec::concrete("Str"),
            &TypeSpec::concrete("Str"),
            &r
        ));
    }

    #[test]
    fn any_target_accepts_everything() {
        let r = TypeRegistry::new();
        assert!(is_compatible(&TypeSpec::concrete("Foo"), &TypeSpec::Any, &r));
    }

    #[test]
    fn subtype_is_compatible_with_declared_supertype() {
        let mut r = TypeRegistry::new();
        r.declare_subtype("Dog", "Animal");
        assert!(is_compatible(
            &TypeSpec::concrete("Dog"),
            &TypeSpec::concrete("Animal"),
            &r
        ));
        assert!(!is_compatible(
            &TypeSpec::concrete("Animal"),
            &TypeSpec::concrete("Dog"),
            &r
        ));
    }

    #[test]
    fn union_target_matches_any_member() {
        let r = TypeRegistry::new();
        let target = TypeSpec::Union(vec![TypeSpec::concrete("A"), TypeSpec::concrete("B")]);
        assert!(is_compatible(&TypeSpec::concrete("B"), &target, &r));
        assert!(!is_compatible(&TypeSpec::concrete("C"), &target, &r));
    }

    #[test]
    fn union_source_requires_every_member_compatible() {
        let r = TypeRegistry::new();
        let source = TypeSpec::Union(vec![TypeSpec::concrete("A"), TypeSpec::concrete("B")]);
        assert!(is_compatible(&source, &TypeSpec::Any, &r));
        assert!(!is_compatible(&source, &TypeSpec::concrete("A"), &r));
    }

    #[test]
    fn list_containers_recurse_on_element() {
        let mut r = TypeRegistry::new();
        r.declare_subtype("Int", "Number");
        let source = TypeSpec::list(TypeSpec::concrete("Int"));
        let target = TypeSpec::list(TypeSpec::concrete("Number"));
        assert!(is_compatible(&source, &target, &r));
        assert!(!is_compatible(&source, &TypeSpec::list(TypeSpec::concrete("Str")), &r));
    }

    #[test]
    fn fan_in_list_of_wraps_source_output() {
        let r = TypeRegistry::new();
        let source_output = TypeSpec::concrete("Int");
        let target_input = TypeSpec::list(TypeSpec::concrete("Int"));
        assert!(is_compatible(&source_output.list_of(), &target_input, &r));
    }

    #[test]
    fn dict_requires_both_key_and_value_compatible() {
        let r = TypeRegistry::new();
        let source = TypeSpec::dict(TypeSpec::concrete("Str"), TypeSpec::concrete("Int"));
        let target_ok = TypeSpec::dict(TypeSpec::concrete("Str"), TypeSpec::concrete("Int"));
        let target_bad = TypeSpec::dict(TypeSpec::concrete("Str"), TypeSpec::concrete("Str"));
        assert!(is_compatible(&source, &target_ok, &r));
        assert!(!is_compatible(&source, &target_bad, &r));
    }

    #[test]
    fn variadic_tuple_treats_ellipsis_as_variable_length() {
        let r = TypeRegistry::new();
        let source = TypeSpec::Container {
            kind: ContainerKind::Tuple,
            elements: vec![TypeSpec::concrete("Int"), TypeSpec::concrete("Int")],
        };
        let target = TypeSpec::Container {
            kind: ContainerKind::VariadicTuple,
            elements: vec![TypeSpec::concrete("Int")],
        };
        assert!(is_compatible(&source, &target, &r));
    }
}
