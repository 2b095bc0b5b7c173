//! Error types for the pipeline

use crate::stage::{BuildStage, IllegalTransition};
use treeforge_store::StoreError;

/// Fatal assembly failure
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    /// A store write in a fatal stage failed
    #[error("{stage} failed: {source}")]
    Stage {
        /// Stage that failed
        stage: BuildStage,
        /// Store failure
        #[source]
        source: StoreError,
    },

    /// Stage machine was driven out of order
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    /// Empty proposal selection
    #[error("no proposals to assemble")]
    NoProposals,
}

impl AssemblyError {
    /// Stage the failure happened in, if known
    #[must_use]
    pub fn stage(&self) -> Option<BuildStage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            Self::IllegalTransition(t) => Some(t.from),
            Self::NoProposals => None,
        }
    }
}

/// Errors surfaced by [`crate::service::ProposalService`]
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Bad request shape or a selection that cannot be built
    #[error("validation failed: {0}")]
    Validation(String),

    /// Requested entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Store failure outside a build
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Build failure
    #[error("assembly failed: {0}")]
    Assembly(#[from] AssemblyError),
}

impl ServiceError {
    /// Validation error from a message
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Not-found error from a message
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// True for validation failures
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// HTTP status the error maps to
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Assembly(AssemblyError::NoProposals) => 400,
            Self::NotFound(_) => 404,
            Self::Store(err) if err.is_not_found() => 404,
            Self::Store(_) | Self::Assembly(_) => 500,
        }
    }
}
