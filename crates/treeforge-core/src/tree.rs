//! Experiment tree records
//!
//! `New*` structs are insert payloads; the store assigns ids and returns the
//! persisted counterpart. Trees, blocks and nodes are created once per
//! accept operation and never updated afterwards, except for the
//! append-only [`TreeMetadata`] side channel and nested-tree references.

use crate::error::CoreError;
use crate::types::{BlockId, NodeId, ProjectId, ProposalId, TreeId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Persisted node type. Nothing outside these four values may be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Procedure or equipment setup
    Protocol,
    /// Step that produces data
    DataCreation,
    /// Processing of produced data
    Analysis,
    /// Findings and conclusions
    Results,
}

impl NodeType {
    /// All storable node types in canonical order
    pub const ALL: [NodeType; 4] = [
        NodeType::Protocol,
        NodeType::DataCreation,
        NodeType::Analysis,
        NodeType::Results,
    ];

    /// Storage literal
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Protocol => "protocol",
            Self::DataCreation => "data_creation",
            Self::Analysis => "analysis",
            Self::Results => "results",
        }
    }
}

impl Default for NodeType {
    fn default() -> Self {
        NodeType::Protocol
    }
}

impl FromStr for NodeType {
    type Err = CoreError;

    /// Strict parse; use [`crate::node_type::map_to_valid_node_type`] for
    /// untrusted input.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::InvalidNodeType(s.to_string()))
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship carried by a dependency edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// Cannot start before the target exists
    #[default]
    Requires,
    /// Consumes the target's output
    UsesOutput,
    /// Ordered after the target
    Follows,
    /// Checks the target's result
    Validates,
}

impl DependencyType {
    /// Every dependency type
    pub const ALL: [DependencyType; 4] = [
        DependencyType::Requires,
        DependencyType::UsesOutput,
        DependencyType::Follows,
        DependencyType::Validates,
    ];

    /// Storage literal
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requires => "requires",
            Self::UsesOutput => "uses_output",
            Self::Follows => "follows",
            Self::Validates => "validates",
        }
    }

    /// Validate a declared type, correcting anything unknown to `requires`.
    ///
    /// Returns the type and whether a correction happened. A missing type is
    /// not a correction.
    #[must_use]
    pub fn normalize(raw: Option<&str>) -> (DependencyType, bool) {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return (DependencyType::Requires, false);
        };
        let key = raw.to_ascii_lowercase().replace([' ', '-'], "_");
        match DependencyType::ALL.into_iter().find(|t| t.as_str() == key) {
            Some(t) => (t, false),
            None => (DependencyType::Requires, true),
        }
    }
}

impl FromStr for DependencyType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DependencyType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::InvalidDependencyType(s.to_string()))
    }
}

impl std::fmt::Display for DependencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status shared by trees, nodes and content rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Freshly created by a build
    #[default]
    Draft,
    /// Picked up by the project team
    Active,
    /// Finished
    Completed,
}

/// Why a dependency reference did not become an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// No title in the batch matched the reference
    NoMatchingTitle,
    /// The reference matched, but the target was not created in this batch
    TargetNotCreated,
}

/// Dependency that was dropped instead of inserted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedDependency {
    /// Created node holding the reference, when there is one
    pub from_node_id: Option<NodeId>,
    /// Title of the referencing node
    pub from_title: String,
    /// Reference as written by the extractor
    pub referenced_title: String,
    /// Declared type, unvalidated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_type: Option<String>,
    /// Why no edge was inserted
    pub reason: UnresolvedReason,
}

/// Non-fatal insertion failure recorded for operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertionIssue {
    /// Build stage that hit the failure
    pub stage: String,
    /// What was being written, e.g. a table or node name
    pub entity: String,
    /// Underlying error text
    pub message: String,
    /// When the issue was recorded
    pub recorded_at: DateTime<Utc>,
}

impl InsertionIssue {
    /// Issue stamped with the current time
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        entity: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            entity: entity.into(),
            message: message.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Diagnostic side channel on a tree. Entries are only ever appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeMetadata {
    /// References that did not become edges
    #[serde(default, rename = "unresolvedDependencies")]
    pub unresolved_dependencies: Vec<UnresolvedDependency>,

    /// Best-effort writes that failed
    #[serde(default, rename = "insertionErrors")]
    pub insertion_errors: Vec<InsertionIssue>,

    /// Node this nested tree expands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_node_id: Option<NodeId>,

    /// Proposal the nested tree was built from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_proposal_id: Option<ProposalId>,

    /// Keys written by other tools, kept as-is
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Single append to [`TreeMetadata`]
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataEntry {
    /// Dropped dependency references
    Unresolved(Vec<UnresolvedDependency>),
    /// A failed best-effort write
    Issue(InsertionIssue),
}

impl TreeMetadata {
    /// Append an entry; existing entries are never touched
    pub fn append(&mut self, entry: MetadataEntry) {
        match entry {
            MetadataEntry::Unresolved(mut deps) => self.unresolved_dependencies.append(&mut deps),
            MetadataEntry::Issue(issue) => self.insertion_errors.push(issue),
        }
    }
}

/// Insert payload for [`ExperimentTree`]
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTree {
    pub project_id: ProjectId,
    pub name: String,
    pub description: String,
    pub created_by: UserId,
    pub metadata: TreeMetadata,
}

/// Persisted experiment tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentTree {
    /// Server-generated id
    pub id: TreeId,
    /// Owning project
    pub project_id: ProjectId,
    /// Display name, generated or fallback
    pub name: String,
    /// Free-text description
    pub description: String,
    /// User who accepted the proposals
    pub created_by: UserId,
    /// `draft` on creation
    pub status: RecordStatus,
    /// Nodes created by the builds that wrote to this tree
    pub node_count: usize,
    /// Append-only diagnostics
    pub metadata: TreeMetadata,
    /// Insert time
    pub created_at: DateTime<Utc>,
}

/// Insert payload for [`TreeBlock`]
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBlock {
    pub tree_id: TreeId,
    pub name: String,
    pub position: u32,
    pub description: String,
    pub block_type: String,
}

/// Persisted block; `position` is dense from 1 within a tree
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeBlock {
    pub id: BlockId,
    pub tree_id: TreeId,
    pub name: String,
    pub position: u32,
    pub description: String,
    pub block_type: String,
}

/// Back-reference from a node to the proposal it came from
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeProvenance {
    /// Source proposal; `None` for nodes not built from one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<ProposalId>,
    /// Extractor confidence carried over from the proposal
    pub confidence: f64,
}

/// Insert payload for [`TreeNode`]
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNode {
    pub tree_id: TreeId,
    pub block_id: BlockId,
    pub name: String,
    pub description: String,
    pub node_type: NodeType,
    pub position: u32,
    pub status: RecordStatus,
    pub provenance: NodeProvenance,
    pub confidence: f64,
}

/// Persisted node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Server-generated id
    pub id: NodeId,
    /// Tree the node belongs to
    pub tree_id: TreeId,
    /// Block the node belongs to
    pub block_id: BlockId,
    /// Display name
    pub name: String,
    /// Short description
    pub description: String,
    /// One of the four storable types
    pub node_type: NodeType,
    /// Zero-based, unique and contiguous within the block
    pub position: u32,
    /// Lifecycle status
    pub status: RecordStatus,
    /// Where the node came from
    pub provenance: NodeProvenance,
    /// Extractor confidence
    pub confidence: f64,
    /// Nested trees this node expands into
    #[serde(default)]
    pub referenced_tree_ids: Vec<TreeId>,
}

/// Insert payload for [`NodeContent`]
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContent {
    pub node_id: NodeId,
    pub content: String,
    pub status: RecordStatus,
}

/// Body of a node; exactly one row per node
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeContent {
    pub id: Uuid,
    pub node_id: NodeId,
    pub content: String,
    pub status: RecordStatus,
}

/// Insert payload for [`NodeLink`]
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLink {
    pub node_id: NodeId,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub link_type: Option<String>,
    pub position: u32,
}

/// Persisted link, ordered by `position` within its node
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeLink {
    pub id: Uuid,
    pub node_id: NodeId,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub link_type: Option<String>,
    pub position: u32,
}

/// Insert payload for [`NodeAttachment`]
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAttachment {
    pub node_id: NodeId,
    pub name: String,
    pub description: Option<String>,
    pub file_type: Option<String>,
    pub file_url: Option<String>,
    pub position: u32,
}

/// Persisted attachment, ordered by `position` within its node
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAttachment {
    pub id: Uuid,
    pub node_id: NodeId,
    pub name: String,
    pub description: Option<String>,
    pub file_type: Option<String>,
    pub file_url: Option<String>,
    pub position: u32,
}

/// Insert payload for [`NodeDependency`]
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDependency {
    pub from_node_id: NodeId,
    pub to_node_id: NodeId,
    pub dependency_type: DependencyType,
    pub evidence_text: Option<String>,
    pub confidence: f64,
}

/// Persisted edge; `from_node_id` depends on `to_node_id`
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDependency {
    pub id: Uuid,
    pub from_node_id: NodeId,
    pub to_node_id: NodeId,
    pub dependency_type: DependencyType,
    pub evidence_text: Option<String>,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_strict_parse() {
        assert_eq!("data_creation".parse::<NodeType>(), Ok(NodeType::DataCreation));
        assert!("software".parse::<NodeType>().is_err());
    }

    #[test]
    fn dependency_type_normalization() {
        assert_eq!(DependencyType::normalize(None), (DependencyType::Requires, false));
        assert_eq!(
            DependencyType::normalize(Some("Uses Output")),
            (DependencyType::UsesOutput, false)
        );
        assert_eq!(
            DependencyType::normalize(Some("inspired_by")),
            (DependencyType::Requires, true)
        );
    }

    #[test]
    fn metadata_is_append_only() {
        let mut meta = TreeMetadata::default();
        meta.append(MetadataEntry::Issue(InsertionIssue::new("links", "node", "boom")));
        meta.append(MetadataEntry::Issue(InsertionIssue::new("content", "node", "again")));
        assert_eq!(meta.insertion_errors.len(), 2);
        assert_eq!(meta.insertion_errors[0].stage, "links");
    }

    #[test]
    fn metadata_serializes_camel_case_channels() {
        let meta = TreeMetadata::default();
        let value = serde_json::to_value(&meta).unwrap();
        assert!(value.get("unresolvedDependencies").is_some());
        assert!(value.get("insertionErrors").is_some());
    }
}
