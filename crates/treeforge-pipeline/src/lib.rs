//! treeforge pipeline - proposal-to-tree assembly
//!
//! Turns a set of accepted proposals into a persisted experiment tree:
//! - [`BatchContentProcessor`]: bounded fan-out over the text generator
//! - [`TreeAssembler`]: the stage machine that writes tree, blocks, nodes,
//!   content, links, attachments, dependencies and nested trees
//! - [`ProposalService`]: validation and job handling for the HTTP surface
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use treeforge_pipeline::{
//!     HeuristicTextGenerator, InMemoryProgressTracker, PipelineConfig, TreeAssembler,
//! };
//! use treeforge_store::InMemoryTreeStore;
//!
//! let assembler = TreeAssembler::new(
//!     Arc::new(InMemoryTreeStore::new()),
//!     Arc::new(HeuristicTextGenerator),
//!     Arc::new(InMemoryProgressTracker::new()),
//!     PipelineConfig::default(),
//! );
//! assert_eq!(assembler.config().batch_size, 10);
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

pub mod assembler;
pub mod batch;
pub mod config;
pub mod error;
pub mod nested;
pub mod progress;
pub mod service;
pub mod stage;
pub mod textgen;

pub use assembler::{AssemblyReport, AssemblyRequest, TreeAssembler};
pub use batch::{BatchContentProcessor, ProcessedContent};
pub use config::{ConfigError, ContentMode, PipelineConfig, PositionMode, ProcessingMode};
pub use error::{AssemblyError, ServiceError};
pub use nested::{split_numbered_steps, NestedTree, NestedTreeBuilder, NestedTreeError, NumberedStep};
pub use progress::{
    InMemoryProgressTracker, JobRecord, JobStatus, ProgressSink, ProgressTracker, ProgressUpdate,
};
pub use service::{AcceptOutcome, AcceptRequest, ProposalService, SubmissionKey};
pub use stage::{BuildStage, IllegalTransition};
pub use textgen::{HeuristicTextGenerator, TextGenError, TextGenerator};
