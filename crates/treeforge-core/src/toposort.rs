//! Cycle-tolerant topological ordering
//!
//! Post-order depth-first walk over the dependency adjacency, so
//! dependencies are emitted before their dependents. The walk keeps its own
//! stack, so chain length is bounded by memory, not by the thread stack.
//! An edge whose dependency finishes after its dependent closes a cycle: it
//! is logged and skipped, so the result is a best-effort order that may not
//! respect every edge. Every input node appears exactly once regardless.

use crate::graph::DependencyGraph;
use petgraph::visit::{DfsPostOrder, NodeFiltered};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

/// Result of [`topological_order`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopoOrder<K> {
    /// Nodes with dependencies first
    pub order: Vec<K>,
    /// Back-edges skipped because of cycles
    pub cycles_skipped: usize,
}

/// Order `nodes` so dependencies come first, ignoring edges to nodes
/// outside `nodes`. Roots are visited in input order.
#[must_use]
pub fn topological_order<K>(nodes: &[K], graph: &DependencyGraph<K>) -> TopoOrder<K>
where
    K: Copy + Ord + Hash + Debug,
{
    let members: HashSet<K> = nodes.iter().copied().collect();
    let view = NodeFiltered::from_fn(graph.adjacency(), |n: K| members.contains(&n));

    let mut order = Vec::with_capacity(members.len());
    let mut dfs = DfsPostOrder::empty(&view);
    for root in nodes {
        dfs.move_to(*root);
        while let Some(node) = dfs.next(&view) {
            order.push(node);
        }
    }

    let finished: HashMap<K, usize> = order.iter().enumerate().map(|(i, n)| (*n, i)).collect();
    let mut cycles_skipped = 0;
    for (dependent, dependency, _) in graph.adjacency().all_edges() {
        let (Some(from), Some(to)) = (finished.get(&dependent), finished.get(&dependency)) else {
            continue;
        };
        if to > from {
            tracing::warn!(
                dependent = ?dependent,
                dependency = ?dependency,
                "dependency cycle detected, skipping back-edge"
            );
            cycles_skipped += 1;
        }
    }

    TopoOrder {
        order,
        cycles_skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::TitleIndex;
    use crate::proposal::DependencyRef;
    use pretty_assertions::assert_eq;

    /// `deps` is a comma-separated list of referenced titles
    fn graph(rows: &[(u8, &str, &str)]) -> DependencyGraph<u8> {
        let mut idx = TitleIndex::new();
        for (key, title, _) in rows {
            idx.insert_title(title, *key);
        }
        let refs: Vec<(u8, Vec<DependencyRef>)> = rows
            .iter()
            .map(|(k, _, deps)| {
                let parsed = deps
                    .split(',')
                    .filter(|d| !d.trim().is_empty())
                    .map(DependencyRef::to_title)
                    .collect();
                (*k, parsed)
            })
            .collect();
        DependencyGraph::build(refs.iter().map(|(k, r)| (*k, r.as_slice())), &idx)
    }

    #[test]
    fn dependencies_come_first() {
        let g = graph(&[
            (3, "Analyze", "Run"),
            (2, "Run", "Extract"),
            (1, "Extract", ""),
        ]);
        let topo = topological_order(&[3, 2, 1], &g);
        assert_eq!(topo.order, vec![1, 2, 3]);
        assert_eq!(topo.cycles_skipped, 0);
    }

    #[test]
    fn shared_dependency_is_emitted_once() {
        let g = graph(&[
            (4, "Report", "Left,Right"),
            (2, "Left", "Base"),
            (3, "Right", "Base"),
            (1, "Base", ""),
        ]);
        let topo = topological_order(&[4, 2, 3, 1], &g);
        assert_eq!(topo.order.len(), 4);
        assert_eq!(topo.order[0], 1);
        assert_eq!(topo.order[3], 4);
        assert_eq!(topo.cycles_skipped, 0);
    }

    #[test]
    fn long_chain_fits_a_worker_sized_stack() {
        const LEN: usize = 50_000;
        let titles: Vec<String> = (0..LEN).map(|i| format!("step {i}")).collect();
        let mut idx = TitleIndex::new();
        for (i, title) in titles.iter().enumerate() {
            idx.insert_title(title, i);
        }
        let refs: Vec<Vec<DependencyRef>> = (0..LEN)
            .map(|i| match i {
                0 => Vec::new(),
                _ => vec![DependencyRef::to_title(titles[i - 1].clone())],
            })
            .collect();
        let g = DependencyGraph::build(refs.iter().enumerate().map(|(i, r)| (i, r.as_slice())), &idx);
        // newest step first, so the walk descends the whole chain from the first root
        let nodes: Vec<usize> = (0..LEN).rev().collect();

        let topo = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || topological_order(&nodes, &g))
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(topo.order.len(), LEN);
        assert_eq!(topo.cycles_skipped, 0);
        assert!(topo.order.windows(2).all(|w| w[0] + 1 == w[1]));
    }

    #[test]
    fn two_cycle_terminates_with_each_node_once() {
        let g = graph(&[(1, "A", "B"), (2, "B", "A")]);
        let topo = topological_order(&[1, 2], &g);
        assert_eq!(topo.order.len(), 2);
        assert!(topo.order.contains(&1));
        assert!(topo.order.contains(&2));
        assert_eq!(topo.cycles_skipped, 1);
    }

    #[test]
    fn independent_nodes_keep_input_order() {
        let g = graph(&[(5, "E", ""), (4, "D", ""), (9, "I", "")]);
        assert_eq!(topological_order(&[5, 4, 9], &g).order, vec![5, 4, 9]);
    }

    #[test]
    fn edges_outside_the_node_set_are_ignored() {
        let g = graph(&[(1, "A", "B"), (2, "B", "")]);
        assert_eq!(topological_order(&[1], &g).order, vec![1]);
    }
}
