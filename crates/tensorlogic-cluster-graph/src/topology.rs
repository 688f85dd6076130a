//! Separator selection with the running intersection property.
//!
//! For every variable, the clusters containing it are joined by a minimum
//! spanning tree over the candidate edges that could carry it. The variable
//! is placed on exactly the tree edges, so the edges carrying any variable
//! form a tree over the clusters that contain it.
//!
//! # References
//!
//! - Koller & Friedman, "Probabilistic Graphical Models", Section 11.3.2

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::{connected_components, min_spanning_tree};
use petgraph::data::Element;
use petgraph::graph::{NodeIndex, UnGraph};

use crate::cluster::Separator;

/// Separators keyed by `(lower, higher)` cluster index.
pub type SepsetMap = BTreeMap<(usize, usize), Separator>;

/// Normalised key for the undirected edge between `a` and `b`.
pub fn edge_key(a: usize, b: usize) -> (usize, usize) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Candidate separators for every unordered pair of clusters.
///
/// `(scope_i ∩ scope_j) − excluded`, recorded even when empty.
pub fn raw_sepsets(scopes: &[BTreeSet<String>], excluded: &BTreeSet<String>) -> SepsetMap {
    let mut sepsets = SepsetMap::new();
    for i in 0..scopes.len() {
        for j in (i + 1)..scopes.len() {
            let shared: Separator = scopes[i]
                .intersection(&scopes[j])
                .filter(|v| !excluded.contains(*v))
                .cloned()
                .collect();
            sepsets.insert((i, j), shared);
        }
    }
    sepsets
}

/// Minimum spanning forest over the clusters that could carry `var`.
fn variable_spanning_tree(var: &str, raw: &SepsetMap) -> Vec<(usize, usize)> {
    let mut graph: UnGraph<usize, u32> = UnGraph::new_undirected();
    let mut nodes: HashMap<usize, NodeIndex> = HashMap::new();

    for (&(i, j), sepset) in raw {
        if !sepset.contains(var) {
            continue;
        }
        let a = *nodes.entry(i).or_insert_with(|| graph.add_node(i));
        let b = *nodes.entry(j).or_insert_with(|| graph.add_node(j));
        graph.add_edge(a, b, 1);
    }

    min_spanning_tree(&graph)
        .filter_map(|element| match element {
            Element::Edge { source, target, .. } => Some(edge_key(
                graph[NodeIndex::new(source)],
                graph[NodeIndex::new(target)],
            )),
            Element::Node { .. } => None,
        })
        .collect()
}

/// Separators satisfying the running intersection property.
///
/// Only edges with a non-empty accumulated separator are returned.
pub fn running_intersection_sepsets(raw: &SepsetMap) -> SepsetMap {
    let variables: BTreeSet<&String> = raw.values().flatten().collect();

    let mut sepsets = SepsetMap::new();
    for var in variables {
        for edge in variable_spanning_tree(var, raw) {
            sepsets.entry(edge).or_default().insert(var.clone());
        }
    }

    sepsets.retain(|_, sepset| !sepset.is_empty());
    sepsets
}

/// Whether the edges carrying each variable form a tree over exactly the
/// clusters containing it.
///
/// Variables in `excluded` never travel on edges and are skipped.
pub fn verify_running_intersection(
    scopes: &[BTreeSet<String>],
    edges: &SepsetMap,
    excluded: &BTreeSet<String>,
) -> bool {
    let variables: BTreeSet<&String> = scopes.iter().flatten().collect();

    variables
        .into_iter()
        .filter(|var| !excluded.contains(*var))
        .all(|var| {
            let mut graph: UnGraph<usize, ()> = UnGraph::new_undirected();
            let nodes: HashMap<usize, NodeIndex> = scopes
                .iter()
                .enumerate()
                .filter(|(_, scope)| scope.contains(var))
                .map(|(index, _)| (index, graph.add_node(index)))
                .collect();

            for (&(i, j), sepset) in edges {
                if !sepset.contains(var) {
                    continue;
                }
                match (nodes.get(&i), nodes.get(&j)) {
                    (Some(&a), Some(&b)) => {
                        graph.add_edge(a, b, ());
                    }
                    _ => return false,
                }
            }

            graph.edge_count() + 1 == graph.node_count() && connected_components(&graph) == 1
        })
}
