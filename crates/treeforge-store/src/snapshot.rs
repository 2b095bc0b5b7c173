//! Full read of a persisted tree

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use treeforge_core::{
    BlockId, ExperimentTree, NodeAttachment, NodeContent, NodeDependency, NodeId, NodeLink,
    TreeBlock, TreeNode,
};

/// Node together with its child rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    /// Node row
    #[serde(flatten)]
    pub node: TreeNode,
    /// Stored content text, if any
    pub content: Option<String>,
    /// Links of the node
    pub links: Vec<NodeLink>,
    /// Attachments of the node
    pub attachments: Vec<NodeAttachment>,
    /// Outgoing edges (this node depends on `to_node_id`)
    pub dependencies: Vec<NodeDependency>,
}

/// Totals for a snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    /// Blocks in the tree
    pub total_blocks: usize,
    /// Nodes in the tree
    pub total_nodes: usize,
    /// Dependency edges in the tree
    pub total_dependencies: usize,
    /// Links across all nodes
    pub total_links: usize,
    /// Attachments across all nodes
    pub total_attachments: usize,
    /// Nodes carrying a content row
    pub nodes_with_content: usize,
    /// Node count per node type
    pub nodes_by_type: BTreeMap<String, usize>,
    /// Node count per block name, in block order
    pub nodes_by_block: IndexMap<String, usize>,
}

/// Tree with blocks ordered by position and nodes ordered by
/// (block position, node position)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    /// Tree header
    pub tree: ExperimentTree,
    /// Blocks in position order
    pub blocks: Vec<TreeBlock>,
    /// Nodes with their content, links and attachments
    pub nodes: Vec<SnapshotNode>,
    /// Aggregate counts
    pub summary: SnapshotSummary,
}

/// Rows belonging to one tree, in any order
#[derive(Debug, Default)]
pub struct SnapshotParts {
    /// Staged blocks
    pub blocks: Vec<TreeBlock>,
    /// Staged nodes
    pub nodes: Vec<TreeNode>,
    /// Staged content rows
    pub contents: Vec<NodeContent>,
    /// Staged links
    pub links: Vec<NodeLink>,
    /// Staged attachments
    pub attachments: Vec<NodeAttachment>,
    /// Staged dependency edges
    pub dependencies: Vec<NodeDependency>,
}

impl TreeSnapshot {
    /// Order the rows and compute the summary
    #[must_use]
    pub fn assemble(tree: ExperimentTree, parts: SnapshotParts) -> Self {
        let SnapshotParts {
            mut blocks,
            mut nodes,
            contents,
            mut links,
            mut attachments,
            dependencies,
        } = parts;

        blocks.sort_by_key(|b| b.position);
        let block_rank: HashMap<BlockId, usize> =
            blocks.iter().enumerate().map(|(i, b)| (b.id, i)).collect();
        nodes.sort_by_key(|n| {
            (
                block_rank.get(&n.block_id).copied().unwrap_or(usize::MAX),
                n.position,
            )
        });
        links.sort_by_key(|l| l.position);
        attachments.sort_by_key(|a| a.position);

        let mut content_by_node: HashMap<NodeId, String> = contents
            .into_iter()
            .map(|c| (c.node_id, c.content))
            .collect();

        let mut summary = SnapshotSummary {
            total_blocks: blocks.len(),
            total_nodes: nodes.len(),
            total_dependencies: dependencies.len(),
            total_links: links.len(),
            total_attachments: attachments.len(),
            ..SnapshotSummary::default()
        };
        for block in &blocks {
            summary.nodes_by_block.insert(block.name.clone(), 0);
        }
        let block_names: HashMap<BlockId, &str> =
            blocks.iter().map(|b| (b.id, b.name.as_str())).collect();

        let nodes = nodes
            .into_iter()
            .map(|node| {
                *summary
                    .nodes_by_type
                    .entry(node.node_type.as_str().to_string())
                    .or_default() += 1;
                if let Some(name) = block_names.get(&node.block_id) {
                    *summary.nodes_by_block.entry((*name).to_string()).or_default() += 1;
                }
                let content = content_by_node.remove(&node.id);
                if content.is_some() {
                    summary.nodes_with_content += 1;
                }
                SnapshotNode {
                    content,
                    links: links.iter().filter(|l| l.node_id == node.id).cloned().collect(),
                    attachments: attachments
                        .iter()
                        .filter(|a| a.node_id == node.id)
                        .cloned()
                        .collect(),
                    dependencies: dependencies
                        .iter()
                        .filter(|d| d.from_node_id == node.id)
                        .cloned()
                        .collect(),
                    node,
                }
            })
            .collect();

        Self {
            tree,
            blocks,
            nodes,
            summary,
        }
    }

    /// Node by name, first match in snapshot order
    #[must_use]
    pub fn node_named(&self, name: &str) -> Option<&SnapshotNode> {
        self.nodes.iter().find(|n| n.node.name == name)
    }

    /// Every dependency edge in the tree
    pub fn dependencies(&self) -> impl Iterator<Item = &NodeDependency> {
        self.nodes.iter().flat_map(|n| n.dependencies.iter())
    }
}
