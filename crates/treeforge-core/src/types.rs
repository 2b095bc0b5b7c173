//! Identifier types
//!
//! Every persisted entity is keyed by a UUID newtype so ids of different
//! tables cannot be mixed up at call sites.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random id
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Underlying UUID
            #[inline]
            #[must_use]
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(
    /// Research project owning proposals and trees
    ProjectId
);
uuid_id!(
    /// Submitting / accepting user
    UserId
);
uuid_id!(
    /// AI-extracted proposed node
    ProposalId
);
uuid_id!(
    /// Experiment tree
    TreeId
);
uuid_id!(
    /// Block within a tree
    BlockId
);
uuid_id!(
    /// Node within a tree
    NodeId
);
uuid_id!(
    /// Background tree-build job
    JobId
);
