//! Tree persistence contract and in-memory backend
//!
//! Every bulk insert is one atomic statement: the whole batch is validated
//! against the table constraints before any row is written, and generated
//! rows come back in input order.

use crate::error::{StoreError, Table};
use crate::snapshot::{SnapshotParts, TreeSnapshot};
use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use treeforge_core::{
    BlockId, ExperimentTree, MetadataEntry, NewAttachment, NewBlock, NewContent, NewDependency,
    NewLink, NewNode, NewTree, NodeAttachment, NodeContent, NodeDependency, NodeId, NodeLink,
    RecordStatus, TreeBlock, TreeId, TreeNode,
};
use uuid::Uuid;

/// Insert/select interface for experiment trees and their child tables
#[async_trait]
pub trait TreeStore: Send + Sync + std::fmt::Debug {
    /// Create a tree header
    async fn insert_tree(&self, tree: NewTree) -> Result<ExperimentTree, StoreError>;

    /// Tree header by id
    async fn get_tree(&self, tree_id: TreeId) -> Result<ExperimentTree, StoreError>;

    /// Insert blocks, returning the stored rows
    async fn insert_blocks(&self, blocks: Vec<NewBlock>) -> Result<Vec<TreeBlock>, StoreError>;

    /// Insert nodes, returning the stored rows
    async fn insert_nodes(&self, nodes: Vec<NewNode>) -> Result<Vec<TreeNode>, StoreError>;

    /// Insert content rows
    async fn insert_contents(
        &self,
        contents: Vec<NewContent>,
    ) -> Result<Vec<NodeContent>, StoreError>;

    /// Insert node links
    async fn insert_links(&self, links: Vec<NewLink>) -> Result<Vec<NodeLink>, StoreError>;

    /// Insert node attachments
    async fn insert_attachments(
        &self,
        attachments: Vec<NewAttachment>,
    ) -> Result<Vec<NodeAttachment>, StoreError>;

    /// Insert dependency edges
    async fn insert_dependencies(
        &self,
        dependencies: Vec<NewDependency>,
    ) -> Result<Vec<NodeDependency>, StoreError>;

    /// Append to the tree's diagnostic metadata
    async fn append_tree_metadata(
        &self,
        tree_id: TreeId,
        entry: MetadataEntry,
    ) -> Result<(), StoreError>;

    /// Overwrite the tree's recorded node count
    async fn set_node_count(&self, tree_id: TreeId, node_count: usize) -> Result<(), StoreError>;

    /// Record that `node_id` points at a nested tree
    async fn add_referenced_tree(
        &self,
        node_id: NodeId,
        tree_id: TreeId,
    ) -> Result<(), StoreError>;

    /// Overwrite (or create) the content row of a node
    async fn replace_content(
        &self,
        node_id: NodeId,
        content: String,
    ) -> Result<NodeContent, StoreError>;

    /// Delete a tree and every row hanging off it
    async fn delete_tree(&self, tree_id: TreeId) -> Result<(), StoreError>;

    /// Full tree view for retrieval
    async fn snapshot(&self, tree_id: TreeId) -> Result<TreeSnapshot, StoreError>;
}

#[derive(Debug, Default)]
struct Tables {
    trees: IndexMap<TreeId, ExperimentTree>,
    blocks: IndexMap<BlockId, TreeBlock>,
    nodes: IndexMap<NodeId, TreeNode>,
    contents: IndexMap<NodeId, NodeContent>,
    links: Vec<NodeLink>,
    attachments: Vec<NodeAttachment>,
    dependencies: Vec<NodeDependency>,
}

impl Tables {
    fn require_tree(&self, table: Table, tree_id: TreeId) -> Result<(), StoreError> {
        if self.trees.contains_key(&tree_id) {
            Ok(())
        } else {
            Err(StoreError::constraint(
                table,
                format!("tree {tree_id} does not exist"),
            ))
        }
    }

    fn require_node(&self, table: Table, node_id: NodeId) -> Result<(), StoreError> {
        if self.nodes.contains_key(&node_id) {
            Ok(())
        } else {
            Err(StoreError::constraint(
                table,
                format!("node {node_id} does not exist"),
            ))
        }
    }
}

/// Process-local tree store with server-generated ids
#[derive(Debug, Default)]
pub struct InMemoryTreeStore {
    tables: RwLock<Tables>,
}

impl InMemoryTreeStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every stored tree, in creation order
    #[must_use]
    pub fn tree_ids(&self) -> Vec<TreeId> {
        self.tables.read().trees.keys().copied().collect()
    }

    /// Node row by id
    #[must_use]
    pub fn node(&self, node_id: NodeId) -> Option<TreeNode> {
        self.tables.read().nodes.get(&node_id).cloned()
    }

    /// Content row of a node
    #[must_use]
    pub fn content_of(&self, node_id: NodeId) -> Option<NodeContent> {
        self.tables.read().contents.get(&node_id).cloned()
    }

    /// Total rows across all node-level tables, for leak checks in tests
    #[must_use]
    pub fn row_count(&self) -> usize {
        let t = self.tables.read();
        t.trees.len()
            + t.blocks.len()
            + t.nodes.len()
            + t.contents.len()
            + t.links.len()
            + t.attachments.len()
            + t.dependencies.len()
    }
}

#[async_trait]
impl TreeStore for InMemoryTreeStore {
    async fn insert_tree(&self, tree: NewTree) -> Result<ExperimentTree, StoreError> {
        let row = ExperimentTree {
            id: TreeId::new(),
            project_id: tree.project_id,
            name: tree.name,
            description: tree.description,
            created_by: tree.created_by,
            status: RecordStatus::Draft,
            node_count: 0,
            metadata: tree.metadata,
            created_at: Utc::now(),
        };
        self.tables.write().trees.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_tree(&self, tree_id: TreeId) -> Result<ExperimentTree, StoreError> {
        self.tables
            .read()
            .trees
            .get(&tree_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(Table::Trees, tree_id))
    }

    async fn insert_blocks(&self, blocks: Vec<NewBlock>) -> Result<Vec<TreeBlock>, StoreError> {
        let mut tables = self.tables.write();

        let mut taken: HashSet<(TreeId, u32)> =
            tables.blocks.values().map(|b| (b.tree_id, b.position)).collect();
        for block in &blocks {
            tables.require_tree(Table::Blocks, block.tree_id)?;
            if !taken.insert((block.tree_id, block.position)) {
                return Err(StoreError::constraint(
                    Table::Blocks,
                    format!("duplicate position {} in tree {}", block.position, block.tree_id),
                ));
            }
        }

        let rows: Vec<TreeBlock> = blocks
            .into_iter()
            .map(|b| TreeBlock {
                id: BlockId::new(),
                tree_id: b.tree_id,
                name: b.name,
                position: b.position,
                description: b.description,
                block_type: b.block_type,
            })
            .collect();
        for row in &rows {
            tables.blocks.insert(row.id, row.clone());
        }
        Ok(rows)
    }

    async fn insert_nodes(&self, nodes: Vec<NewNode>) -> Result<Vec<TreeNode>, StoreError> {
        let mut tables = self.tables.write();

        let mut taken: HashSet<(BlockId, u32)> =
            tables.nodes.values().map(|n| (n.block_id, n.position)).collect();
        for node in &nodes {
            tables.require_tree(Table::Nodes, node.tree_id)?;
            match tables.blocks.get(&node.block_id) {
                Some(block) if block.tree_id == node.tree_id => {}
                _ => {
                    return Err(StoreError::constraint(
                        Table::Nodes,
                        format!("block {} is not part of tree {}", node.block_id, node.tree_id),
                    ))
                }
            }
            if !taken.insert((node.block_id, node.position)) {
                return Err(StoreError::constraint(
                    Table::Nodes,
                    format!("duplicate position {} in block {}", node.position, node.block_id),
                ));
            }
        }

        let rows: Vec<TreeNode> = nodes
            .into_iter()
            .map(|n| TreeNode {
                id: NodeId::new(),
                tree_id: n.tree_id,
                block_id: n.block_id,
                name: n.name,
                description: n.description,
                node_type: n.node_type,
                position: n.position,
                status: n.status,
                provenance: n.provenance,
                confidence: n.confidence,
                referenced_tree_ids: Vec::new(),
            })
            .collect();
        for row in &rows {
            tables.nodes.insert(row.id, row.clone());
        }
        Ok(rows)
    }

    async fn insert_contents(
        &self,
        contents: Vec<NewContent>,
    ) -> Result<Vec<NodeContent>, StoreError> {
        let mut tables = self.tables.write();

        let mut seen = HashSet::new();
        for content in &contents {
            tables.require_node(Table::Contents, content.node_id)?;
            if tables.contents.contains_key(&content.node_id) || !seen.insert(content.node_id) {
                return Err(StoreError::constraint(
                    Table::Contents,
                    format!("node {} already has content", content.node_id),
                ));
            }
        }

        let rows: Vec<NodeContent> = contents
            .into_iter()
            .map(|c| NodeContent {
                id: Uuid::new_v4(),
                node_id: c.node_id,
                content: c.content,
                status: c.status,
            })
            .collect();
        for row in &rows {
            tables.contents.insert(row.node_id, row.clone());
        }
        Ok(rows)
    }

    async fn insert_links(&self, links: Vec<NewLink>) -> Result<Vec<NodeLink>, StoreError> {
        let mut tables = self.tables.write();
        for link in &links {
            tables.require_node(Table::Links, link.node_id)?;
        }
        let rows: Vec<NodeLink> = links
            .into_iter()
            .map(|l| NodeLink {
                id: Uuid::new_v4(),
                node_id: l.node_id,
                name: l.name,
                url: l.url,
                description: l.description,
                link_type: l.link_type,
                position: l.position,
            })
            .collect();
        tables.links.extend(rows.iter().cloned());
        Ok(rows)
    }

    async fn insert_attachments(
        &self,
        attachments: Vec<NewAttachment>,
    ) -> Result<Vec<NodeAttachment>, StoreError> {
        let mut tables = self.tables.write();
        for attachment in &attachments {
            tables.require_node(Table::Attachments, attachment.node_id)?;
        }
        let rows: Vec<NodeAttachment> = attachments
            .into_iter()
            .map(|a| NodeAttachment {
                id: Uuid::new_v4(),
                node_id: a.node_id,
                name: a.name,
                description: a.description,
                file_type: a.file_type,
                file_url: a.file_url,
                position: a.position,
            })
            .collect();
        tables.attachments.extend(rows.iter().cloned());
        Ok(rows)
    }

    async fn insert_dependencies(
        &self,
        dependencies: Vec<NewDependency>,
    ) -> Result<Vec<NodeDependency>, StoreError> {
        let mut tables = self.tables.write();
        for dep in &dependencies {
            tables.require_node(Table::Dependencies, dep.from_node_id)?;
            tables.require_node(Table::Dependencies, dep.to_node_id)?;
        }
        let rows: Vec<NodeDependency> = dependencies
            .into_iter()
            .map(|d| NodeDependency {
                id: Uuid::new_v4(),
                from_node_id: d.from_node_id,
                to_node_id: d.to_node_id,
                dependency_type: d.dependency_type,
                evidence_text: d.evidence_text,
                confidence: d.confidence,
            })
            .collect();
        tables.dependencies.extend(rows.iter().cloned());
        Ok(rows)
    }

    async fn append_tree_metadata(
        &self,
        tree_id: TreeId,
        entry: MetadataEntry,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let tree = tables
            .trees
            .get_mut(&tree_id)
            .ok_or_else(|| StoreError::not_found(Table::Trees, tree_id))?;
        tree.metadata.append(entry);
        Ok(())
    }

    async fn set_node_count(&self, tree_id: TreeId, node_count: usize) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let tree = tables
            .trees
            .get_mut(&tree_id)
            .ok_or_else(|| StoreError::not_found(Table::Trees, tree_id))?;
        tree.node_count = node_count;
        Ok(())
    }

    async fn add_referenced_tree(
        &self,
        node_id: NodeId,
        tree_id: TreeId,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if !tables.trees.contains_key(&tree_id) {
            return Err(StoreError::not_found(Table::Trees, tree_id));
        }
        let node = tables
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| StoreError::not_found(Table::Nodes, node_id))?;
        if !node.referenced_tree_ids.contains(&tree_id) {
            node.referenced_tree_ids.push(tree_id);
        }
        Ok(())
    }

    async fn replace_content(
        &self,
        node_id: NodeId,
        content: String,
    ) -> Result<NodeContent, StoreError> {
        let mut tables = self.tables.write();
        tables.require_node(Table::Contents, node_id)?;
        let row = match tables.contents.get_mut(&node_id) {
            Some(existing) => {
                existing.content = content;
                existing.clone()
            }
            None => {
                let row = NodeContent {
                    id: Uuid::new_v4(),
                    node_id,
                    content,
                    status: RecordStatus::Active,
                };
                tables.contents.insert(node_id, row.clone());
                row
            }
        };
        Ok(row)
    }

    async fn delete_tree(&self, tree_id: TreeId) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.trees.shift_remove(&tree_id).is_none() {
            return Err(StoreError::not_found(Table::Trees, tree_id));
        }

        let doomed: HashSet<NodeId> = tables
            .nodes
            .values()
            .filter(|n| n.tree_id == tree_id)
            .map(|n| n.id)
            .collect();

        tables.blocks.retain(|_, b| b.tree_id != tree_id);
        tables.nodes.retain(|id, _| !doomed.contains(id));
        tables.contents.retain(|id, _| !doomed.contains(id));
        tables.links.retain(|l| !doomed.contains(&l.node_id));
        tables.attachments.retain(|a| !doomed.contains(&a.node_id));
        tables
            .dependencies
            .retain(|d| !doomed.contains(&d.from_node_id) && !doomed.contains(&d.to_node_id));
        for node in tables.nodes.values_mut() {
            node.referenced_tree_ids.retain(|t| *t != tree_id);
        }

        tracing::debug!(%tree_id, nodes = doomed.len(), "deleted tree");
        Ok(())
    }

    async fn snapshot(&self, tree_id: TreeId) -> Result<TreeSnapshot, StoreError> {
        let tables = self.tables.read();
        let tree = tables
            .trees
            .get(&tree_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(Table::Trees, tree_id))?;

        let nodes: Vec<TreeNode> = tables
            .nodes
            .values()
            .filter(|n| n.tree_id == tree_id)
            .cloned()
            .collect();
        let ids: HashSet<NodeId> = nodes.iter().map(|n| n.id).collect();

        let parts = SnapshotParts {
            blocks: tables
                .blocks
                .values()
                .filter(|b| b.tree_id == tree_id)
                .cloned()
                .collect(),
            contents: tables
                .contents
                .values()
                .filter(|c| ids.contains(&c.node_id))
                .cloned()
                .collect(),
            links: tables
                .links
                .iter()
                .filter(|l| ids.contains(&l.node_id))
                .cloned()
                .collect(),
            attachments: tables
                .attachments
                .iter()
                .filter(|a| ids.contains(&a.node_id))
                .cloned()
                .collect(),
            dependencies: tables
                .dependencies
                .iter()
                .filter(|d| ids.contains(&d.from_node_id))
                .cloned()
                .collect(),
            nodes,
        };
        Ok(TreeSnapshot::assemble(tree, parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use treeforge_core::{
        DependencyType, InsertionIssue, NodeProvenance, NodeType, ProjectId, TreeMetadata, UserId,
    };

    fn new_tree(name: &str) -> NewTree {
        NewTree {
            project_id: ProjectId::new(),
            name: name.to_string(),
            description: String::new(),
            created_by: UserId::new(),
            metadata: TreeMetadata::default(),
        }
    }

    fn new_block(tree_id: TreeId, name: &str, position: u32) -> NewBlock {
        NewBlock {
            tree_id,
            name: name.to_string(),
            position,
            description: String::new(),
            block_type: "custom".to_string(),
        }
    }

    fn new_node(tree_id: TreeId, block_id: BlockId, name: &str, position: u32) -> NewNode {
        NewNode {
            tree_id,
            block_id,
            name: name.to_string(),
            description: String::new(),
            node_type: NodeType::Protocol,
            position,
            status: RecordStatus::Draft,
            provenance: NodeProvenance::default(),
            confidence: 0.0,
        }
    }

    async fn seeded() -> (InMemoryTreeStore, ExperimentTree, TreeBlock, Vec<TreeNode>) {
        let store = InMemoryTreeStore::new();
        let tree = store.insert_tree(new_tree("t")).await.unwrap();
        let block = store
            .insert_blocks(vec![new_block(tree.id, "Protocol Block", 1)])
            .await
            .unwrap()
            .remove(0);
        let nodes = store
            .insert_nodes(vec![
                new_node(tree.id, block.id, "a", 0),
                new_node(tree.id, block.id, "b", 1),
            ])
            .await
            .unwrap();
        (store, tree, block, nodes)
    }

    #[tokio::test]
    async fn bulk_insert_returns_rows_in_input_order() {
        let (_, _, _, nodes) = seeded().await;
        let names: Vec<_> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_ne!(nodes[0].id, nodes[1].id);
    }

    #[tokio::test]
    async fn node_positions_are_unique_per_block() {
        let (store, tree, block, _) = seeded().await;
        let err = store
            .insert_nodes(vec![new_node(tree.id, block.id, "c", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint { table: Table::Nodes, .. }));
    }

    #[tokio::test]
    async fn content_is_one_row_per_node() {
        let (store, _, _, nodes) = seeded().await;
        let content = |text: &str| NewContent {
            node_id: nodes[0].id,
            content: text.to_string(),
            status: RecordStatus::Active,
        };

        let err = store
            .insert_contents(vec![content("x"), content("y")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint { table: Table::Contents, .. }));
        assert!(store.content_of(nodes[0].id).is_none());

        store.insert_contents(vec![content("x")]).await.unwrap();
        let replaced = store.replace_content(nodes[0].id, "z".into()).await.unwrap();
        assert_eq!(replaced.content, "z");
    }

    #[tokio::test]
    async fn dependency_endpoints_must_exist() {
        let (store, _, _, nodes) = seeded().await;
        let err = store
            .insert_dependencies(vec![NewDependency {
                from_node_id: nodes[0].id,
                to_node_id: NodeId::new(),
                dependency_type: DependencyType::Requires,
                evidence_text: None,
                confidence: 1.0,
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint { table: Table::Dependencies, .. }));
    }

    #[tokio::test]
    async fn delete_tree_cascades() {
        let (store, tree, _, nodes) = seeded().await;
        store
            .insert_dependencies(vec![NewDependency {
                from_node_id: nodes[1].id,
                to_node_id: nodes[0].id,
                dependency_type: DependencyType::Follows,
                evidence_text: None,
                confidence: 1.0,
            }])
            .await
            .unwrap();

        store.delete_tree(tree.id).await.unwrap();
        assert_eq!(store.row_count(), 0);
        assert!(store.get_tree(tree.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn metadata_appends_accumulate() {
        let (store, tree, _, _) = seeded().await;
        store
            .append_tree_metadata(
                tree.id,
                MetadataEntry::Issue(InsertionIssue::new("links", "a", "boom")),
            )
            .await
            .unwrap();
        store
            .append_tree_metadata(
                tree.id,
                MetadataEntry::Issue(InsertionIssue::new("attachments", "b", "boom")),
            )
            .await
            .unwrap();
        let tree = store.get_tree(tree.id).await.unwrap();
        assert_eq!(tree.metadata.insertion_errors.len(), 2);
    }

    #[tokio::test]
    async fn snapshot_orders_and_summarizes() {
        let (store, tree, _, nodes) = seeded().await;
        store
            .insert_contents(vec![NewContent {
                node_id: nodes[1].id,
                content: "body".into(),
                status: RecordStatus::Active,
            }])
            .await
            .unwrap();

        let snap = store.snapshot(tree.id).await.unwrap();
        assert_eq!(snap.summary.total_blocks, 1);
        assert_eq!(snap.summary.total_nodes, 2);
        assert_eq!(snap.summary.nodes_with_content, 1);
        assert_eq!(snap.summary.nodes_by_type.get("protocol"), Some(&2));
        assert_eq!(snap.summary.nodes_by_block.get("Protocol Block"), Some(&2));
        assert_eq!(snap.nodes[0].node.name, "a");
        assert_eq!(snap.node_named("b").and_then(|n| n.content.as_deref()), Some("body"));
    }
}
