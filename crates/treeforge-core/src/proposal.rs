//! Proposed nodes
//!
//! A [`ProposedNode`] is produced by the upstream extraction process. Its
//! `node_json` payload is free-form AI output, so every optional field
//! deserializes leniently and accepts the camelCase spellings the extractor
//! emits.

use crate::error::CoreError;
use crate::types::{ProjectId, ProposalId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Review status of a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Awaiting review
    #[default]
    Proposed,
    /// Turned into a tree node
    Accepted,
    /// Discarded by the reviewer
    Rejected,
}

impl ProposalStatus {
    /// Wire literal
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    /// Only `proposed → accepted|rejected` is a legal transition
    #[must_use]
    pub fn can_transition_to(self, to: ProposalStatus) -> bool {
        matches!(
            (self, to),
            (Self::Proposed, Self::Accepted) | (Self::Proposed, Self::Rejected)
        )
    }
}

impl FromStr for ProposalStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proposed" => Ok(Self::Proposed),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            other => Err(CoreError::InvalidProposalStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body text of a proposal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeText {
    /// Raw extracted text
    #[serde(default)]
    pub text: String,
}

/// Extractor metadata; only `node_type` is interpreted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Declared type label, free-form
    #[serde(default, alias = "nodeType", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,

    /// Everything else the extractor sent
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Free-text reference to another proposal by title
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyRef {
    /// Title of the node depended on
    #[serde(alias = "referencedTitle", alias = "referenced_node_title")]
    pub referenced_title: String,

    /// Declared relationship, validated later
    #[serde(default, alias = "dependencyType", skip_serializing_if = "Option::is_none")]
    pub dependency_type: Option<String>,

    /// Phrase the extractor quoted
    #[serde(default, alias = "extractedPhrase", skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,

    /// Extractor confidence for this reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl DependencyRef {
    /// Reference with no type or evidence
    #[must_use]
    pub fn to_title(title: impl Into<String>) -> Self {
        Self {
            referenced_title: title.into(),
            dependency_type: None,
            evidence: None,
            confidence: None,
        }
    }

    /// With declared dependency type
    #[must_use]
    pub fn with_type(mut self, dependency_type: impl Into<String>) -> Self {
        self.dependency_type = Some(dependency_type.into());
        self
    }

    /// With evidence phrase
    #[must_use]
    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }
}

/// External link attached to a proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    /// Display name; the URL is used when blank
    #[serde(default)]
    pub name: String,
    /// Target URL
    pub url: String,
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form link category
    #[serde(default, alias = "linkType", skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
}

/// File attachment carried by a proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentSpec {
    /// File name
    pub name: String,
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type or extension
    #[serde(default, alias = "fileType", skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    /// Where the file is stored
    #[serde(default, alias = "fileUrl", skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}

/// Extractor payload of a proposal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeJson {
    /// Node title, also the target of dependency references
    pub title: String,

    /// Body text
    #[serde(default)]
    pub content: NodeText,

    /// Extractor-written summary
    #[serde(default, alias = "shortSummary", skip_serializing_if = "Option::is_none")]
    pub short_summary: Option<String>,

    /// Type label and extra metadata
    #[serde(default)]
    pub metadata: NodeMetadata,

    /// References to other proposals by title
    #[serde(default)]
    pub dependencies: Vec<DependencyRef>,

    /// Links, in display order
    #[serde(default)]
    pub links: Vec<LinkSpec>,

    /// Attachments, in display order
    #[serde(default)]
    pub attachments: Vec<AttachmentSpec>,

    /// Expand into a separate nested tree
    #[serde(default, rename = "isNestedTree", alias = "is_nested_tree")]
    pub is_nested_tree: bool,
}

/// AI-extracted candidate node awaiting review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedNode {
    /// Proposal id
    pub id: ProposalId,
    /// Owning project
    pub project_id: ProjectId,
    /// Submitting user
    pub user_id: UserId,
    /// Extractor payload
    pub node_json: NodeJson,
    /// Review status
    #[serde(default)]
    pub status: ProposalStatus,
    /// Extractor confidence
    #[serde(default)]
    pub confidence: f64,
    /// Opaque extraction provenance
    #[serde(default)]
    pub provenance: serde_json::Value,
    /// Extraction time
    pub created_at: DateTime<Utc>,
    /// Set when accepted or rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl ProposedNode {
    /// New proposal in `proposed` status
    #[must_use]
    pub fn new(project_id: ProjectId, user_id: UserId, node_json: NodeJson) -> Self {
        Self {
            id: ProposalId::new(),
            project_id,
            user_id,
            node_json,
            status: ProposalStatus::Proposed,
            confidence: 0.0,
            provenance: serde_json::Value::Null,
            created_at: Utc::now(),
            reviewed_at: None,
        }
    }

    /// Proposal title
    #[inline]
    #[must_use]
    pub fn title(&self) -> &str {
        &self.node_json.title
    }

    /// Raw body text
    #[inline]
    #[must_use]
    pub fn content_text(&self) -> &str {
        &self.node_json.content.text
    }

    /// Declared node type, if the extractor supplied a non-blank one
    #[must_use]
    pub fn declared_type(&self) -> Option<&str> {
        self.node_json
            .metadata
            .node_type
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }

    /// Declared dependency references
    #[inline]
    #[must_use]
    pub fn dependencies(&self) -> &[DependencyRef] {
        &self.node_json.dependencies
    }

    /// Flagged to expand into a nested tree
    #[inline]
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.node_json.is_nested_tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_json_accepts_extractor_spellings() {
        let raw = serde_json::json!({
            "title": "Run PCR",
            "content": { "text": "Amplify the target" },
            "metadata": { "node_type": "protocol", "source_file": "notes.md" },
            "dependencies": [
                { "referenced_title": "Extract RNA", "extractedPhrase": "using the extracted RNA" }
            ],
            "isNestedTree": true
        });

        let parsed: NodeJson = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.title, "Run PCR");
        assert!(parsed.is_nested_tree);
        assert_eq!(parsed.metadata.node_type.as_deref(), Some("protocol"));
        assert!(parsed.metadata.extra.contains_key("source_file"));
        assert_eq!(
            parsed.dependencies[0].evidence.as_deref(),
            Some("using the extracted RNA")
        );
    }

    #[test]
    fn node_json_defaults_missing_fields() {
        let parsed: NodeJson = serde_json::from_value(serde_json::json!({ "title": "x" })).unwrap();
        assert!(parsed.content.text.is_empty());
        assert!(parsed.dependencies.is_empty());
        assert!(!parsed.is_nested_tree);
    }

    #[test]
    fn status_transitions() {
        assert!(ProposalStatus::Proposed.can_transition_to(ProposalStatus::Accepted));
        assert!(ProposalStatus::Proposed.can_transition_to(ProposalStatus::Rejected));
        assert!(!ProposalStatus::Accepted.can_transition_to(ProposalStatus::Rejected));
        assert!(!ProposalStatus::Rejected.can_transition_to(ProposalStatus::Proposed));
    }

    #[test]
    fn blank_declared_type_is_none() {
        let mut node = NodeJson {
            title: "t".into(),
            ..NodeJson::default()
        };
        node.metadata.node_type = Some("   ".into());
        let proposal = ProposedNode::new(ProjectId::new(), UserId::new(), node);
        assert_eq!(proposal.declared_type(), None);
    }
}
