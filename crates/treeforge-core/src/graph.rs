//! Dependency graph construction
//!
//! Builds forward (node → what it depends on) and reverse (node → its
//! dependents) adjacency by resolving each reference through a
//! [`TitleIndex`]. Self references are ignored. References that resolve to
//! nothing are kept in [`DependencyGraph::unresolved`] rather than dropped.

use crate::matcher::TitleIndex;
use crate::proposal::DependencyRef;
use crate::tree::DependencyType;
use indexmap::IndexSet;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use std::fmt::Debug;
use std::hash::Hash;

/// Resolved, type-checked dependency edge. `from` depends on `to`.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyEdge<K> {
    /// Dependent node
    pub from: K,
    /// Node it depends on
    pub to: K,
    /// Normalized dependency type
    pub dependency_type: DependencyType,
    /// The declared type was invalid and got corrected to `requires`
    pub type_corrected: bool,
    /// Phrase the extractor quoted as evidence
    pub evidence: Option<String>,
    /// Extractor confidence for this edge
    pub confidence: Option<f64>,
}

/// Reference that matched no known title
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedReference<K> {
    /// Node holding the reference
    pub from: K,
    /// Title as written by the extractor
    pub referenced_title: String,
    /// Declared dependency type, unvalidated
    pub dependency_type: Option<String>,
}

/// Resolved dependency graph. Edges point from a node to what it depends on.
#[derive(Debug, Clone)]
pub struct DependencyGraph<K: Copy + Ord + Hash> {
    graph: DiGraphMap<K, DependencyType>,
    edges: Vec<DependencyEdge<K>>,
    unresolved: Vec<UnresolvedReference<K>>,
}

impl<K: Copy + Ord + Hash + Debug> DependencyGraph<K> {
    /// Build the graph from `(node, references)` pairs.
    ///
    /// Every node is registered, even with no dependencies, in input order.
    /// Identical `(from, to, type)` triples are kept once.
    pub fn build<'a, I>(entries: I, index: &TitleIndex<K>) -> Self
    where
        I: IntoIterator<Item = (K, &'a [DependencyRef])>,
    {
        let entries: Vec<(K, &[DependencyRef])> = entries.into_iter().collect();
        let mut graph = DiGraphMap::with_capacity(entries.len(), entries.len());
        for (from, _) in &entries {
            graph.add_node(*from);
        }

        let mut seen: IndexSet<(K, K, DependencyType)> = IndexSet::new();
        let mut edges = Vec::new();
        let mut unresolved = Vec::new();

        for (from, refs) in entries {
            for reference in refs {
                let Some(to) = index.resolve(&reference.referenced_title) else {
                    unresolved.push(UnresolvedReference {
                        from,
                        referenced_title: reference.referenced_title.clone(),
                        dependency_type: reference.dependency_type.clone(),
                    });
                    continue;
                };
                if to == from {
                    continue;
                }

                let (dependency_type, type_corrected) =
                    DependencyType::normalize(reference.dependency_type.as_deref());

                // adjacency keeps the first type seen for a pair
                if !graph.contains_edge(from, to) {
                    graph.add_edge(from, to, dependency_type);
                }

                if seen.insert((from, to, dependency_type)) {
                    edges.push(DependencyEdge {
                        from,
                        to,
                        dependency_type,
                        type_corrected,
                        evidence: reference.evidence.clone(),
                        confidence: reference.confidence,
                    });
                }
            }
        }

        Self {
            graph,
            edges,
            unresolved,
        }
    }

    /// Nodes `node` depends on, in resolution order
    pub fn dependencies_of(&self, node: K) -> impl Iterator<Item = K> + '_ {
        self.graph.neighbors_directed(node, Direction::Outgoing)
    }

    /// Nodes depending on `node`
    pub fn dependents_of(&self, node: K) -> impl Iterator<Item = K> + '_ {
        self.graph.neighbors_directed(node, Direction::Incoming)
    }

    /// Nodes in registration order
    pub fn nodes(&self) -> impl Iterator<Item = K> + '_ {
        self.graph.nodes()
    }

    /// Underlying adjacency, one edge per dependent/dependency pair
    #[inline]
    #[must_use]
    pub fn adjacency(&self) -> &DiGraphMap<K, DependencyType> {
        &self.graph
    }

    /// Deduplicated edges in resolution order
    #[inline]
    #[must_use]
    pub fn edges(&self) -> &[DependencyEdge<K>] {
        &self.edges
    }

    /// References that matched no title
    #[inline]
    #[must_use]
    pub fn unresolved(&self) -> &[UnresolvedReference<K>] {
        &self.unresolved
    }

    /// Number of deduplicated edges
    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn refs(titles: &[&str]) -> Vec<DependencyRef> {
        titles.iter().map(|t| DependencyRef::to_title(*t)).collect()
    }

    #[test]
    fn builds_forward_and_reverse() {
        let mut idx = TitleIndex::new();
        idx.insert_title("A", 1u8);
        idx.insert_title("B", 2);
        idx.insert_title("C", 3);

        let a = refs(&[]);
        let b = refs(&["A"]);
        let c = refs(&["A", "B"]);
        let graph = DependencyGraph::build(
            vec![(1u8, a.as_slice()), (2, b.as_slice()), (3, c.as_slice())],
            &idx,
        );

        assert_eq!(graph.dependencies_of(3).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(graph.dependents_of(1).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(graph.edge_count(), 3);
        assert!(graph.unresolved().is_empty());
        assert_eq!(graph.nodes().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn self_references_are_ignored() {
        let mut idx = TitleIndex::new();
        idx.insert_title("Loop", 1u8);
        let r = refs(&["loop"]);
        let graph = DependencyGraph::build(vec![(1u8, r.as_slice())], &idx);
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.unresolved().is_empty());
    }

    #[test]
    fn unmatched_references_are_recorded() {
        let mut idx = TitleIndex::new();
        idx.insert_title("A", 1u8);
        let r = refs(&["Nowhere"]);
        let graph = DependencyGraph::build(vec![(1u8, r.as_slice())], &idx);
        assert_eq!(graph.unresolved().len(), 1);
        assert_eq!(graph.unresolved()[0].referenced_title, "Nowhere");
    }

    #[test]
    fn duplicate_triples_collapse_and_types_are_corrected() {
        let mut idx = TitleIndex::new();
        idx.insert_title("A", 1u8);
        idx.insert_title("B", 2);
        let r = vec![
            DependencyRef::to_title("A").with_type("uses_output"),
            DependencyRef::to_title("a").with_type("uses_output"),
            DependencyRef::to_title("A").with_type("bogus"),
        ];
        let graph = DependencyGraph::build(vec![(2u8, r.as_slice())], &idx);

        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.adjacency().edge_count(), 1);
        assert_eq!(graph.adjacency().edge_weight(2, 1), Some(&DependencyType::UsesOutput));
        assert_eq!(graph.edges()[0].dependency_type, DependencyType::UsesOutput);
        assert_eq!(graph.edges()[1].dependency_type, DependencyType::Requires);
        assert!(graph.edges()[1].type_corrected);
    }
}
