//! treeforge store - persistence collaborators
//!
//! Contracts for the proposal and tree stores the pipeline writes through,
//! plus in-memory implementations used by the CLI and tests:
//! - [`ProposalStore`] / [`InMemoryProposalStore`]
//! - [`TreeStore`] / [`InMemoryTreeStore`]
//! - [`CachedProposalStore`], an optional moka TTL cache over any proposal store
//! - [`TreeSnapshot`], a full ordered read of one tree

#![warn(unreachable_pub)]
#![warn(missing_docs)]

pub mod cache;
pub mod error;
pub mod proposals;
pub mod snapshot;
pub mod trees;

pub use cache::{CachedProposalStore, ListingKey};
pub use error::{StoreError, Table};
pub use proposals::{DeleteSelection, InMemoryProposalStore, ProposalQuery, ProposalStore};
pub use snapshot::{SnapshotNode, SnapshotParts, SnapshotSummary, TreeSnapshot};
pub use trees::{InMemoryTreeStore, TreeStore};
