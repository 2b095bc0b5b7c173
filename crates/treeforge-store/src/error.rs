//! Error types for the persistence layer

use serde::{Deserialize, Serialize};

/// Persisted table, used to attribute failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Proposal rows
    Proposals,
    /// Tree headers
    Trees,
    /// Block rows
    Blocks,
    /// Node rows
    Nodes,
    /// Node content rows
    Contents,
    /// Node link rows
    Links,
    /// Node attachment rows
    Attachments,
    /// Node dependency rows
    Dependencies,
}

impl Table {
    /// Table name as the hosted database knows it
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proposals => "proposed_nodes",
            Self::Trees => "experiment_trees",
            Self::Blocks => "tree_blocks",
            Self::Nodes => "tree_nodes",
            Self::Contents => "node_content",
            Self::Links => "node_links",
            Self::Attachments => "node_attachments",
            Self::Dependencies => "node_dependencies",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistence errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Row not found
    #[error("{table} row not found: {id}")]
    NotFound {
        /// Table searched
        table: Table,
        /// Missing key
        id: String,
    },

    /// Insert rejected by the backend
    #[error("insert into {table} failed: {message}")]
    InsertFailed {
        /// Table written
        table: Table,
        /// Backend message
        message: String,
    },

    /// Update rejected by the backend
    #[error("update of {table} failed: {message}")]
    UpdateFailed {
        /// Table written
        table: Table,
        /// Backend message
        message: String,
    },

    /// Delete rejected by the backend
    #[error("delete from {table} failed: {message}")]
    DeleteFailed {
        /// Table written
        table: Table,
        /// Backend message
        message: String,
    },

    /// Uniqueness / foreign-key constraint violated
    #[error("constraint violated on {table}: {message}")]
    Constraint {
        /// Table written
        table: Table,
        /// Backend message
        message: String,
    },

    /// Transport or backend failure
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Not-found error for a table and id
    pub fn not_found(table: Table, id: impl ToString) -> Self {
        Self::NotFound {
            table,
            id: id.to_string(),
        }
    }

    /// Constraint violation on a table
    pub fn constraint(table: Table, message: impl Into<String>) -> Self {
        Self::Constraint {
            table,
            message: message.into(),
        }
    }

    /// True for missing rows
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Table the failure is attributed to, if any
    #[must_use]
    pub fn table(&self) -> Option<Table> {
        match self {
            Self::NotFound { table, .. }
            | Self::InsertFailed { table, .. }
            | Self::UpdateFailed { table, .. }
            | Self::DeleteFailed { table, .. }
            | Self::Constraint { table, .. } => Some(*table),
            Self::Backend(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_names_table() {
        let err = StoreError::constraint(Table::Contents, "duplicate node_id");
        assert_eq!(
            err.to_string(),
            "constraint violated on node_content: duplicate node_id"
        );
        assert_eq!(err.table(), Some(Table::Contents));
    }

    #[test]
    fn not_found_classification() {
        assert!(StoreError::not_found(Table::Trees, "abc").is_not_found());
        assert!(!StoreError::Backend("down".into()).is_not_found());
    }
}
