//! treeforge core - experiment tree model and planning
//!
//! The synchronous, I/O-free half of the proposal-to-tree pipeline:
//! - Data model for proposals and persisted tree records
//! - Node type normalization
//! - Title matching for free-text dependency references
//! - Dependency graph construction and cycle-tolerant ordering
//! - Block partitioning strategies
//!
//! # Example
//!
//! ```rust
//! use treeforge_core::{map_to_valid_node_type, NodeType};
//!
//! assert_eq!(map_to_valid_node_type("Bioinformatics"), NodeType::Analysis);
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

pub mod blocks;
pub mod error;
pub mod graph;
pub mod matcher;
pub mod node_type;
pub mod proposal;
pub mod toposort;
pub mod tree;
pub mod types;

pub use blocks::{
    BlockKey, BlockPlan, BlockStrategy, BlockStrategyKind, PhaseBlockStrategy, PlannedBlock,
    TypeBlockStrategy,
};
pub use error::CoreError;
pub use graph::{DependencyEdge, DependencyGraph, UnresolvedReference};
pub use matcher::{normalize_title, TitleIndex};
pub use node_type::{
    canonical_type_label, infer_from_block_name, map_optional_node_type, map_to_valid_node_type,
    resolve_node_type,
};
pub use proposal::{
    AttachmentSpec, DependencyRef, LinkSpec, NodeJson, NodeMetadata, NodeText, ProposalStatus,
    ProposedNode,
};
pub use toposort::{topological_order, TopoOrder};
pub use tree::{
    DependencyType, ExperimentTree, InsertionIssue, MetadataEntry, NewAttachment, NewBlock,
    NewContent, NewDependency, NewLink, NewNode, NewTree, NodeAttachment, NodeContent,
    NodeDependency, NodeLink, NodeProvenance, NodeType, RecordStatus, TreeBlock, TreeMetadata,
    TreeNode, UnresolvedDependency, UnresolvedReason,
};
pub use types::{BlockId, JobId, NodeId, ProjectId, ProposalId, TreeId, UserId};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
