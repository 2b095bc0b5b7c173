//! Property tests for the planning primitives.

use proptest::prelude::*;
use std::collections::HashSet;
use treeforge_core::{
    map_to_valid_node_type, topological_order, BlockStrategy, DependencyGraph, DependencyRef,
    NodeJson, NodeType, ProjectId, ProposedNode, TitleIndex, TypeBlockStrategy, UserId,
};

fn proposal(title: String, node_type: Option<String>, deps: Vec<String>) -> ProposedNode {
    let mut json = NodeJson {
        title,
        ..NodeJson::default()
    };
    json.metadata.node_type = node_type;
    json.dependencies = deps.into_iter().map(DependencyRef::to_title).collect();
    ProposedNode::new(ProjectId::new(), UserId::new(), json)
}

fn type_strategy() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        Just(Some("protocol".to_string())),
        Just(Some("data".to_string())),
        Just(Some("Bioinformatics".to_string())),
        Just(Some("results".to_string())),
        Just(Some("software".to_string())),
        "[a-z]{3,8}".prop_map(Some),
    ]
}

proptest! {
    #[test]
    fn prop_node_type_mapping_is_idempotent(raw in ".{0,24}") {
        let once = map_to_valid_node_type(&raw);
        let twice = map_to_valid_node_type(once.as_str());
        prop_assert_eq!(once, twice);
        prop_assert!(NodeType::ALL.contains(&once));
    }

    #[test]
    fn prop_type_blocks_are_dense_and_complete(types in proptest::collection::vec(type_strategy(), 1..40)) {
        let proposals: Vec<ProposedNode> = types
            .into_iter()
            .enumerate()
            .map(|(i, t)| proposal(format!("node {i}"), t, vec![]))
            .collect();
        let refs: Vec<&ProposedNode> = proposals.iter().collect();

        let plan = TypeBlockStrategy.partition(&refs);

        let positions: Vec<u32> = plan.blocks.iter().map(|b| b.position).collect();
        let expected: Vec<u32> = (1..=plan.blocks.len() as u32).collect();
        prop_assert_eq!(positions, expected);

        let groups: HashSet<&str> = plan.blocks.iter().map(|b| b.group.as_str()).collect();
        prop_assert_eq!(groups.len(), plan.blocks.len());

        let member_count: usize = plan.blocks.iter().map(|b| b.members.len()).sum();
        prop_assert_eq!(member_count, proposals.len());
        prop_assert_eq!(plan.assignment.len(), proposals.len());
    }

    #[test]
    fn prop_toposort_emits_every_node_once(
        edges in proptest::collection::vec((0..12usize, 0..12usize), 0..40)
    ) {
        let titles: Vec<String> = (0..12).map(|i| format!("step-{i:02}")).collect();
        let mut index = TitleIndex::new();
        for (i, title) in titles.iter().enumerate() {
            index.insert_title(title, i);
        }
        let mut refs: Vec<Vec<DependencyRef>> = vec![Vec::new(); titles.len()];
        for (from, to) in edges {
            refs[from].push(DependencyRef::to_title(titles[to].clone()));
        }
        let graph = DependencyGraph::build(refs.iter().enumerate().map(|(i, r)| (i, r.as_slice())), &index);

        let nodes: Vec<usize> = (0..titles.len()).collect();
        let topo = topological_order(&nodes, &graph);

        prop_assert_eq!(topo.order.len(), nodes.len());
        let unique: HashSet<usize> = topo.order.iter().copied().collect();
        prop_assert_eq!(unique.len(), nodes.len());
    }

    #[test]
    fn prop_exact_titles_resolve_to_their_node(
        names in proptest::collection::hash_set("[a-z]{4,10}", 1..10)
    ) {
        let names: Vec<String> = names.into_iter().collect();
        let mut index = TitleIndex::new();
        for (i, name) in names.iter().enumerate() {
            index.insert_title(name, i);
        }
        for (i, name) in names.iter().enumerate() {
            prop_assert_eq!(index.resolve(&name.to_uppercase()), Some(i));
        }
    }
}

#[test]
fn acyclic_chain_orders_dependencies_first() {
    let extract = proposal("Extract RNA".into(), Some("data".into()), vec![]);
    let pcr = proposal("Run PCR".into(), Some("protocol".into()), vec!["Extract RNA".into()]);
    let analyze = proposal("Analyze Results".into(), Some("analysis".into()), vec!["Run PCR".into()]);

    let all = [&analyze, &pcr, &extract];
    let mut index = TitleIndex::new();
    for p in all {
        index.insert_title(p.title(), p.id);
    }
    let graph = DependencyGraph::build(all.iter().map(|p| (p.id, p.dependencies())), &index);
    assert_eq!(graph.edge_count(), 2);
    assert!(graph.unresolved().is_empty());

    let ids: Vec<_> = all.iter().map(|p| p.id).collect();
    let topo = topological_order(&ids, &graph);
    assert_eq!(topo.order, vec![extract.id, pcr.id, analyze.id]);
}
