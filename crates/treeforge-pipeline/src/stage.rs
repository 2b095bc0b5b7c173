//! Assembly stage machine
//!
//! ```text
//! initializing -> building_blocks -> building_nodes -> links_attachments
//!     -> dependencies -> nested_trees -> completed
//! ```
//! Every non-terminal stage may also move to `error`. `completed` and
//! `error` are absorbing.

use serde::{Deserialize, Serialize};

/// Build stages, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    /// Job registered
    Initializing,
    /// Creating blocks
    BuildingBlocks,
    /// Creating nodes and content
    BuildingNodes,
    /// Creating links and attachments
    LinksAttachments,
    /// Creating dependency edges
    Dependencies,
    /// Creating nested trees
    NestedTrees,
    /// Build finished
    Completed,
    /// Build failed
    Error,
}

/// Illegal stage transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal stage transition {from} -> {to}")]
pub struct IllegalTransition {
    /// Current stage
    pub from: BuildStage,
    /// Requested stage
    pub to: BuildStage,
}

impl BuildStage {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::BuildingBlocks => "building_blocks",
            Self::BuildingNodes => "building_nodes",
            Self::LinksAttachments => "links_attachments",
            Self::Dependencies => "dependencies",
            Self::NestedTrees => "nested_trees",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Stages reachable in one step
    #[must_use]
    pub fn allowed_transitions(self) -> &'static [BuildStage] {
        match self {
            Self::Initializing => &[Self::BuildingBlocks, Self::Error],
            Self::BuildingBlocks => &[Self::BuildingNodes, Self::Error],
            Self::BuildingNodes => &[Self::LinksAttachments, Self::Error],
            Self::LinksAttachments => &[Self::Dependencies, Self::Error],
            Self::Dependencies => &[Self::NestedTrees, Self::Error],
            Self::NestedTrees => &[Self::Completed, Self::Error],
            Self::Completed | Self::Error => &[],
        }
    }

    /// True if `to` is reachable in one step
    #[inline]
    #[must_use]
    pub fn can_transition_to(self, to: BuildStage) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// Error unless `to` is reachable in one step
    pub fn validate_transition(self, to: BuildStage) -> Result<(), IllegalTransition> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(IllegalTransition { from: self, to })
        }
    }

    /// True for `Completed` and `Error`
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Failures here abort the build
    #[inline]
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::Initializing | Self::BuildingBlocks | Self::BuildingNodes
        )
    }

    /// Percent range this stage covers in job progress
    #[must_use]
    pub fn progress_band(self) -> (u8, u8) {
        match self {
            Self::Initializing => (0, 5),
            Self::BuildingBlocks => (5, 15),
            Self::BuildingNodes => (15, 60),
            Self::LinksAttachments => (60, 70),
            Self::Dependencies => (70, 85),
            Self::NestedTrees => (85, 99),
            Self::Completed => (100, 100),
            Self::Error => (0, 0),
        }
    }
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
