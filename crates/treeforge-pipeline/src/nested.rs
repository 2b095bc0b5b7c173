//! Nested sub-trees for proposals flagged as nested protocols
//!
//! A nested tree is created as a separate [`ExperimentTree`] with one block
//! and one node per numbered step. The parent node is then linked to it and
//! its content replaced by a reference sentence. If any write fails the
//! partially built nested tree is deleted again.

use crate::textgen::truncate_at_word;
use once_cell::sync::Lazy;
use regex::Regex;
use treeforge_core::blocks::{display_title, CUSTOM_BLOCK_TYPE};
use treeforge_core::{
    ExperimentTree, NewBlock, NewContent, NewNode, NewTree, NodeProvenance, ProposedNode,
    RecordStatus, TreeMetadata, TreeNode,
};
use treeforge_store::{StoreError, TreeStore};

static STEP_MARKER: Lazy<Option<Regex>> = Lazy::new(|| match Regex::new(r"^\s*(\d+)[.)]\s+(.*)$") {
    Ok(re) => Some(re),
    Err(err) => {
        tracing::error!(error = %err, "step marker pattern rejected, nested steps disabled");
        None
    }
});

const MAX_STEP_TITLE_CHARS: usize = 80;

/// One numbered step of a procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberedStep {
    /// Step number as written, or its ordinal when unnumbered
    pub number: u32,
    /// First line of the step, truncated
    pub title: String,
    /// Step text with continuation lines
    pub body: String,
}

/// Split `N. `-prefixed text into steps.
///
/// Lines before the first marker are ignored; lines after a marker belong
/// to that step. Returns an empty vec when there are fewer than two steps.
#[must_use]
pub fn split_numbered_steps(text: &str) -> Vec<NumberedStep> {
    let Some(marker) = STEP_MARKER.as_ref() else {
        return Vec::new();
    };
    let mut steps: Vec<NumberedStep> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = marker.captures(line) {
            let number = caps[1]
                .parse()
                .unwrap_or_else(|_| u32::try_from(steps.len() + 1).unwrap_or(u32::MAX));
            let first = caps[2].trim().to_string();
            steps.push(NumberedStep {
                number,
                title: truncate_at_word(&first, MAX_STEP_TITLE_CHARS),
                body: first,
            });
        } else if let Some(current) = steps.last_mut() {
            let line = line.trim();
            if !line.is_empty() {
                current.body.push('\n');
                current.body.push_str(line);
            }
        }
    }
    if steps.len() < 2 {
        steps.clear();
    }
    steps
}

/// Sentence that replaces the parent node's content
#[must_use]
pub fn reference_sentence(tree: &ExperimentTree, step_count: usize) -> String {
    format!(
        "View nested protocol \"{}\" ({} steps) for the detailed procedure.",
        tree.name, step_count
    )
}

/// Nested tree that was created and linked
#[derive(Debug, Clone, PartialEq)]
pub struct NestedTree {
    /// Nested tree header
    pub tree: ExperimentTree,
    /// Step nodes in order
    pub nodes: Vec<TreeNode>,
}

/// Nested tree failure; `rolled_back` tells whether cleanup succeeded
#[derive(Debug, thiserror::Error)]
#[error("nested tree for \"{parent}\" failed: {source}")]
pub struct NestedTreeError {
    /// Title of the parent node
    pub parent: String,
    /// Partial rows were removed
    pub rolled_back: bool,
    /// Underlying store failure
    #[source]
    pub source: StoreError,
}

/// Builds step-by-step trees for protocol nodes
#[derive(Debug, Clone, Copy)]
pub struct NestedTreeBuilder<'a> {
    trees: &'a dyn TreeStore,
    split_steps: bool,
}

impl<'a> NestedTreeBuilder<'a> {
    /// Builder writing to `trees`
    #[must_use]
    pub fn new(trees: &'a dyn TreeStore, split_steps: bool) -> Self {
        Self { trees, split_steps }
    }

    /// Build the nested tree for `parent`, link it, and rewrite the parent's
    /// content. Rolls back on any failure.
    pub async fn build(
        &self,
        parent: &TreeNode,
        proposal: &ProposedNode,
        content: &str,
    ) -> Result<NestedTree, NestedTreeError> {
        let name = format!("{} (Nested Protocol)", parent.name);
        let metadata = TreeMetadata {
            parent_node_id: Some(parent.id),
            source_proposal_id: Some(proposal.id),
            ..TreeMetadata::default()
        };

        let tree = self
            .trees
            .insert_tree(NewTree {
                project_id: proposal.project_id,
                name,
                description: format!("Nested protocol expanded from \"{}\"", parent.name),
                created_by: proposal.user_id,
                metadata,
            })
            .await
            .map_err(|source| NestedTreeError {
                parent: parent.name.clone(),
                rolled_back: true,
                source,
            })?;

        match self.populate(&tree, parent, proposal, content).await {
            Ok(nodes) => {
                tracing::info!(
                    parent_node_id = %parent.id,
                    nested_tree_id = %tree.id,
                    steps = nodes.len(),
                    "nested tree created"
                );
                Ok(NestedTree { tree, nodes })
            }
            Err(source) => {
                let rolled_back = match self.trees.delete_tree(tree.id).await {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::error!(
                            nested_tree_id = %tree.id,
                            error = %err,
                            "nested tree rollback failed"
                        );
                        false
                    }
                };
                tracing::warn!(
                    parent_node_id = %parent.id,
                    error = %source,
                    rolled_back,
                    "nested tree failed"
                );
                Err(NestedTreeError {
                    parent: parent.name.clone(),
                    rolled_back,
                    source,
                })
            }
        }
    }

    async fn populate(
        &self,
        tree: &ExperimentTree,
        parent: &TreeNode,
        proposal: &ProposedNode,
        content: &str,
    ) -> Result<Vec<TreeNode>, StoreError> {
        let steps = if self.split_steps {
            split_numbered_steps(content)
        } else {
            Vec::new()
        };
        let steps = if steps.is_empty() {
            vec![NumberedStep {
                number: 1,
                title: parent.name.clone(),
                body: content.to_string(),
            }]
        } else {
            steps
        };

        let group = parent.node_type.as_str();
        let block = self
            .trees
            .insert_blocks(vec![NewBlock {
                tree_id: tree.id,
                name: format!("{} Block", display_title(group)),
                position: 1,
                description: format!("Block containing {group} nodes"),
                block_type: CUSTOM_BLOCK_TYPE.to_string(),
            }])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("block insert returned no rows".to_string()))?;

        let nodes = self
            .trees
            .insert_nodes(
                steps
                    .iter()
                    .zip(0u32..)
                    .map(|(step, position)| NewNode {
                        tree_id: tree.id,
                        block_id: block.id,
                        name: step.title.clone(),
                        description: format!("Step {} of {}", step.number, parent.name),
                        node_type: parent.node_type,
                        position,
                        status: RecordStatus::Draft,
                        provenance: NodeProvenance {
                            proposal_id: Some(proposal.id),
                            confidence: proposal.confidence,
                        },
                        confidence: proposal.confidence,
                    })
                    .collect(),
            )
            .await?;

        self.trees
            .insert_contents(
                nodes
                    .iter()
                    .zip(&steps)
                    .map(|(node, step)| NewContent {
                        node_id: node.id,
                        content: step.body.clone(),
                        status: RecordStatus::Draft,
                    })
                    .collect(),
            )
            .await?;

        self.trees.set_node_count(tree.id, nodes.len()).await?;
        self.trees.add_referenced_tree(parent.id, tree.id).await?;
        self.trees
            .replace_content(parent.id, reference_sentence(tree, nodes.len()))
            .await?;

        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn step_marker_pattern_compiles() {
        assert!(STEP_MARKER.is_some());
    }

    #[test]
    fn splits_numbered_lines() {
        let steps = split_numbered_steps("1. Step one\n2. Step two\n3. Step three");
        let titles: Vec<_> = steps.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Step one", "Step two", "Step three"]);
        assert_eq!(steps[2].number, 3);
    }

    #[test]
    fn continuation_lines_join_their_step() {
        let steps = split_numbered_steps("Intro text\n1) Mix buffer\n   at 4C\n2) Spin down");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].body, "Mix buffer\nat 4C");
        assert_eq!(steps[0].title, "Mix buffer");
    }

    #[test]
    fn single_step_is_not_split() {
        assert!(split_numbered_steps("1. Only step").is_empty());
        assert!(split_numbered_steps("No numbering at all").is_empty());
    }
}
