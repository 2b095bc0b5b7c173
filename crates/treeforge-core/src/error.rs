//! Error types for the tree model

/// Errors raised by strict parsing of model literals
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Literal is not one of the four node types
    #[error("invalid node type: '{0}'")]
    InvalidNodeType(String),

    /// Literal is not one of the dependency types
    #[error("invalid dependency type: '{0}'")]
    InvalidDependencyType(String),

    /// Literal is not a proposal status
    #[error("invalid proposal status: '{0}'")]
    InvalidProposalStatus(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_error_display() {
        let err = CoreError::InvalidNodeType("widget".to_string());
        assert!(err.to_string().contains("widget"));
    }
}
