//! Node type mapping
//!
//! The extractor emits heterogeneous type strings ("Bioinformatics",
//! "data collection", "Equipment", ...). Everything is funnelled into the
//! four storable [`NodeType`] values before insertion.
//!
//! Two layers exist:
//! - [`canonical_type_label`] recognizes the five grouping labels
//!   (`protocol`, `data_creation`, `analysis`, `results`, `software`) and
//!   their synonyms. Block partitioning groups on these labels.
//! - [`map_to_valid_node_type`] narrows a label to a storable type. It never
//!   fails: anything unrecognized becomes `protocol`.

use crate::tree::NodeType;

/// Labels recognized verbatim
pub const RECOGNIZED_TYPE_LABELS: [&str; 5] =
    ["protocol", "data_creation", "analysis", "results", "software"];

const SYNONYMS: &[(&str, &str)] = &[
    // data_creation
    ("data", "data_creation"),
    ("data_collection", "data_creation"),
    ("data_generation", "data_creation"),
    ("data_acquisition", "data_creation"),
    ("data_capture", "data_creation"),
    ("collection", "data_creation"),
    ("acquisition", "data_creation"),
    ("measurement", "data_creation"),
    ("measurements", "data_creation"),
    ("sampling", "data_creation"),
    ("dataset", "data_creation"),
    // analysis
    ("bioinformatics", "analysis"),
    ("data_analysis", "analysis"),
    ("analytics", "analysis"),
    ("statistics", "analysis"),
    ("statistical_analysis", "analysis"),
    ("computation", "analysis"),
    ("computational", "analysis"),
    ("processing", "analysis"),
    ("modeling", "analysis"),
    ("modelling", "analysis"),
    ("visualization", "analysis"),
    ("evaluation", "analysis"),
    // results
    ("result", "results"),
    ("findings", "results"),
    ("finding", "results"),
    ("conclusion", "results"),
    ("conclusions", "results"),
    ("outcome", "results"),
    ("outcomes", "results"),
    ("output", "results"),
    ("outputs", "results"),
    ("observations", "results"),
    ("validation", "results"),
    // protocol
    ("protocols", "protocol"),
    ("equipment", "protocol"),
    ("method", "protocol"),
    ("methods", "protocol"),
    ("methodology", "protocol"),
    ("procedure", "protocol"),
    ("procedures", "protocol"),
    ("materials", "protocol"),
    ("reagents", "protocol"),
    ("instrument", "protocol"),
    ("instruments", "protocol"),
    ("setup", "protocol"),
    ("preparation", "protocol"),
    ("sop", "protocol"),
    // software
    ("code", "software"),
    ("script", "software"),
    ("scripts", "software"),
    ("tool", "software"),
    ("tools", "software"),
    ("library", "software"),
];

/// Lower-case, trim, and fold spaces/hyphens into underscores
#[must_use]
pub fn normalize_type_key(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Resolve a raw type string to one of the five recognized labels
#[must_use]
pub fn canonical_type_label(raw: &str) -> Option<&'static str> {
    let key = normalize_type_key(raw);
    if key.is_empty() {
        return None;
    }
    if let Some(label) = RECOGNIZED_TYPE_LABELS.into_iter().find(|l| *l == key) {
        return Some(label);
    }
    SYNONYMS
        .iter()
        .find(|(synonym, _)| *synonym == key)
        .map(|(_, label)| *label)
}

/// Narrow a raw type string to a storable node type.
///
/// `software` has no storable counterpart and becomes `protocol`, as does
/// anything unrecognized.
#[must_use]
pub fn map_to_valid_node_type(raw: &str) -> NodeType {
    match canonical_type_label(raw) {
        Some("data_creation") => NodeType::DataCreation,
        Some("analysis") => NodeType::Analysis,
        Some("results") => NodeType::Results,
        _ => NodeType::Protocol,
    }
}

/// [`map_to_valid_node_type`] for an optional input
#[must_use]
pub fn map_optional_node_type(raw: Option<&str>) -> NodeType {
    raw.map_or(NodeType::Protocol, map_to_valid_node_type)
}

/// Infer a node type from a block display name ("Data Creation Block")
#[must_use]
pub fn infer_from_block_name(block_name: &str) -> Option<NodeType> {
    let name = block_name.to_lowercase();
    if name.contains("protocol") {
        Some(NodeType::Protocol)
    } else if name.contains("data") {
        Some(NodeType::DataCreation)
    } else if name.contains("analysis") {
        Some(NodeType::Analysis)
    } else if name.contains("result") {
        Some(NodeType::Results)
    } else {
        None
    }
}

/// Final node type for insertion: block name first, then the proposal's
/// declared type, then `protocol`.
#[must_use]
pub fn resolve_node_type(block_name: Option<&str>, declared: Option<&str>) -> NodeType {
    block_name
        .and_then(infer_from_block_name)
        .unwrap_or_else(|| map_optional_node_type(declared))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_literals_pass_through() {
        assert_eq!(map_to_valid_node_type("analysis"), NodeType::Analysis);
        assert_eq!(map_to_valid_node_type(" Results "), NodeType::Results);
        assert_eq!(map_to_valid_node_type("DATA_CREATION"), NodeType::DataCreation);
    }

    #[test]
    fn synonyms_map_to_canonical() {
        assert_eq!(map_to_valid_node_type("Bioinformatics"), NodeType::Analysis);
        assert_eq!(map_to_valid_node_type("data collection"), NodeType::DataCreation);
        assert_eq!(map_to_valid_node_type("data"), NodeType::DataCreation);
        assert_eq!(map_to_valid_node_type("findings"), NodeType::Results);
        assert_eq!(map_to_valid_node_type("Equipment"), NodeType::Protocol);
    }

    #[test]
    fn unknown_and_missing_default_to_protocol() {
        assert_eq!(map_to_valid_node_type("interpretive dance"), NodeType::Protocol);
        assert_eq!(map_to_valid_node_type(""), NodeType::Protocol);
        assert_eq!(map_optional_node_type(None), NodeType::Protocol);
        assert_eq!(map_to_valid_node_type("software"), NodeType::Protocol);
    }

    #[test]
    fn block_name_inference() {
        assert_eq!(infer_from_block_name("Data Creation Block"), Some(NodeType::DataCreation));
        assert_eq!(infer_from_block_name("Analysis Block"), Some(NodeType::Analysis));
        assert_eq!(infer_from_block_name("Results Block"), Some(NodeType::Results));
        assert_eq!(infer_from_block_name("General Block"), None);
    }

    #[test]
    fn block_name_takes_priority() {
        assert_eq!(
            resolve_node_type(Some("Analysis Block"), Some("protocol")),
            NodeType::Analysis
        );
        assert_eq!(
            resolve_node_type(Some("Software Block"), Some("findings")),
            NodeType::Results
        );
        assert_eq!(resolve_node_type(None, None), NodeType::Protocol);
    }

    #[test]
    fn label_keeps_software() {
        assert_eq!(canonical_type_label("Scripts"), Some("software"));
        assert_eq!(canonical_type_label("mystery"), None);
    }
}
