//! Dependency Resolver
//!
//! Cycle-detecting topological sort over any collection whose elements
//! expose the [`DependencyNode`] capability. One generic sorter serves
//! pipelines, jobs, tasks, stacks and services alike, so no two kinds can
//! diverge in dependency semantics.
//!
//! Names compare case-insensitively. The emitted order is stable modulo
//! input order of independents: the ready queue is FIFO and is seeded in
//! input order.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::dependency::DependencyNode;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DependencyError {
    #[error("self-dependency: '{name}' depends on itself")]
    SelfDependency { name: String },

    #[error("missing dependency: '{name}' referenced by '{referenced_by}' is not declared")]
    Missing { name: String, referenced_by: String },

    #[error("circular dependency involving '{name}' referenced by '{referenced_by}'")]
    Cycle { name: String, referenced_by: String },

    // Safety net: Kahn emitted fewer nodes than it was given even though
    // the pre-checks passed.
    #[error("unresolvable dependency graph (possible cycle or missing node)")]
    Unresolvable,
}

/// How names referenced but not present in the collection are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// The collection is the whole graph: an unknown name is an error.
    Complete,
    /// The collection is a selection taken from a larger graph: unknown
    /// names are satisfied outside the selection and ignored.
    Subset,
}

/// Validate references without sorting: self-dependencies, missing names
/// and cycles are all rejected.
pub fn check_references<T: DependencyNode>(items: &[T]) -> Result<(), DependencyError> {
    check_scoped(items, Scope::Complete)
}

fn check_scoped<T: DependencyNode>(items: &[T], scope: Scope) -> Result<(), DependencyError> {
    let index = build_index(items);

    for item in items {
        let own = item.name().to_lowercase();
        for dep in item.dependencies() {
            let dep_lower = dep.to_lowercase();
            if dep_lower == own {
                return Err(DependencyError::SelfDependency {
                    name: item.name().to_string(),
                });
            }
            if scope == Scope::Complete && !index.contains_key(&dep_lower) {
                return Err(DependencyError::Missing {
                    name: dep.clone(),
                    referenced_by: item.name().to_string(),
                });
            }
        }
    }

    detect_cycles(items, &index)
}

/// Kahn topological sort: dependencies come before their dependents.
pub fn sort<T: DependencyNode + Clone>(items: &[T]) -> Result<Vec<T>, DependencyError> {
    sort_scoped(items, Scope::Complete)
}

/// The sorted order reversed: dependents first. Used for teardown.
pub fn sort_reverse<T: DependencyNode + Clone>(items: &[T]) -> Result<Vec<T>, DependencyError> {
    let mut sorted = sort(items)?;
    sorted.reverse();
    Ok(sorted)
}

/// Sort a selection taken from a larger collection. References to items
/// outside the selection are treated as already satisfied, so a selected
/// item whose dependency was not selected still sorts; self-dependencies
/// and cycles within the selection are rejected as usual.
pub fn sort_subset<T: DependencyNode + Clone>(items: &[T]) -> Result<Vec<T>, DependencyError> {
    sort_scoped(items, Scope::Subset)
}

/// [`sort_subset`] reversed: dependents first.
pub fn sort_subset_reverse<T: DependencyNode + Clone>(
    items: &[T],
) -> Result<Vec<T>, DependencyError> {
    let mut sorted = sort_subset(items)?;
    sorted.reverse();
    Ok(sorted)
}

fn sort_scoped<T: DependencyNode + Clone>(
    items: &[T],
    scope: Scope,
) -> Result<Vec<T>, DependencyError> {
    // Reference checks run on every size; a singleton self-dependency is
    // as invalid as any other.
    check_scoped(items, scope)?;
    if items.len() <= 1 {
        return Ok(items.to_vec());
    }

    let index = build_index(items);

    // in_degree[i] counts unresolved dependencies of item i;
    // dependents[i] lists the items that wait on item i.
    let mut in_degree = vec![0usize; items.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
    for (i, item) in items.iter().enumerate() {
        for dep in item.dependencies() {
            let Some(&d) = index.get(&dep.to_lowercase()) else {
                continue;
            };
            in_degree[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut queue: VecDeque<usize> = (0..items.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(items.len());

    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &dependent in &dependents[i] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() != items.len() {
        return Err(DependencyError::Unresolvable);
    }

    Ok(order.into_iter().map(|i| items[i].clone()).collect())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    /// When set, the caller is expected to rewrite the returned fragment
    /// files so `requiredBy` survives on disk. Off by default; nothing in
    /// the live code path persists.
    pub persist: bool,
}

/// After sorting, record the inverse relation: for every dependency `D` of
/// element `E`, `D.required_by` gains `E`. Returns the fragment sources of
/// the touched elements when persistence was requested, empty otherwise.
pub fn reconcile<T: DependencyNode>(
    items: &mut [T],
    options: ReconcileOptions,
) -> Result<Vec<PathBuf>, DependencyError> {
    check_references(items)?;
    let index = build_index(items);

    // (dependency index, dependent name) pairs, gathered first so the
    // mutable pass stays simple.
    let mut edges = Vec::new();
    for item in items.iter() {
        for dep in item.dependencies() {
            edges.push((index[&dep.to_lowercase()], item.name().to_string()));
        }
    }

    let mut touched = Vec::new();
    for (target, dependent) in edges {
        items[target].add_required_by(dependent);
        if options.persist {
            let source = items[target].source().to_path_buf();
            if !touched.contains(&source) {
                touched.push(source);
            }
        }
    }

    Ok(touched)
}

fn build_index<T: DependencyNode>(items: &[T]) -> HashMap<String, usize> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| (item.name().to_lowercase(), i))
        .collect()
}

fn detect_cycles<T: DependencyNode>(
    items: &[T],
    index: &HashMap<String, usize>,
) -> Result<(), DependencyError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    fn visit<T: DependencyNode>(
        i: usize,
        items: &[T],
        index: &HashMap<String, usize>,
        marks: &mut [Mark],
    ) -> Result<(), DependencyError> {
        marks[i] = Mark::OnStack;
        for dep in items[i].dependencies() {
            // Unknown names only reach here on subset sorts; they resolve
            // outside the collection and cannot be part of a cycle in it.
            let Some(&d) = index.get(&dep.to_lowercase()) else {
                continue;
            };
            match marks[d] {
                Mark::OnStack => {
                    return Err(DependencyError::Cycle {
                        name: items[d].name().to_string(),
                        referenced_by: items[i].name().to_string(),
                    });
                }
                Mark::Unvisited => visit(d, items, index, marks)?,
                Mark::Done => {}
            }
        }
        marks[i] = Mark::Done;
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; items.len()];
    for i in 0..items.len() {
        if marks[i] == Mark::Unvisited {
            visit(i, items, index, &mut marks)?;
        }
    }
    Ok(())
}
