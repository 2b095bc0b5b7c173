//! Block partitioning
//!
//! Groups proposals into named blocks before insertion. Two strategies share
//! the [`BlockStrategy`] interface:
//!
//! - [`TypeBlockStrategy`] (default): one block per declared node type, in a
//!   fixed preferred order, then remaining types by first appearance.
//! - [`PhaseBlockStrategy`]: infers Preparation / Execution / Analysis /
//!   Validation phases from topological position and node type, splitting
//!   phases larger than the configured size into "Part N" blocks.
//!
//! Both produce 1-based dense block positions and preserve the input order
//! of proposals within each block.

use crate::graph::DependencyGraph;
use crate::matcher::TitleIndex;
use crate::node_type::canonical_type_label;
use crate::proposal::ProposedNode;
use crate::toposort::topological_order;
use crate::types::ProposalId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Group label used when a proposal declares no type
pub const DEFAULT_GROUP: &str = "general";

/// Preferred order of type blocks
pub const PREFERRED_TYPE_ORDER: [&str; 5] =
    ["protocol", "data_creation", "analysis", "results", "software"];

/// Block type recorded for assembler-created blocks
pub const CUSTOM_BLOCK_TYPE: &str = "custom";

/// Pre-insertion block identifier: index into [`BlockPlan::blocks`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey(pub usize);

/// Block ready for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedBlock {
    /// Index into the plan
    pub key: BlockKey,
    /// Display name, e.g. "Protocol Block" or "Execution (Part 2)"
    pub name: String,
    /// Stored block description
    pub description: String,
    /// 1-based, dense
    pub position: u32,
    /// Type label or phase the block was built from
    pub group: String,
    /// Proposals in the block, in strategy order
    pub members: Vec<ProposalId>,
}

/// Output of a partitioning strategy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockPlan {
    /// Blocks in position order
    pub blocks: Vec<PlannedBlock>,
    /// Block of each input proposal
    pub assignment: IndexMap<ProposalId, BlockKey>,
}

impl BlockPlan {
    /// Block by key
    #[must_use]
    pub fn block(&self, key: BlockKey) -> Option<&PlannedBlock> {
        self.blocks.get(key.0)
    }

    /// Block a proposal was assigned to
    #[must_use]
    pub fn block_of(&self, proposal: ProposalId) -> Option<&PlannedBlock> {
        self.assignment.get(&proposal).and_then(|key| self.block(*key))
    }

    /// Number of blocks
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True when nothing was partitioned
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn push(&mut self, name: String, description: String, group: String, members: Vec<ProposalId>) {
        let key = BlockKey(self.blocks.len());
        for member in &members {
            self.assignment.insert(*member, key);
        }
        self.blocks.push(PlannedBlock {
            key,
            name,
            description,
            position: u32::try_from(key.0 + 1).unwrap_or(u32::MAX),
            group,
            members,
        });
    }
}

/// Partitioning strategy
pub trait BlockStrategy: Send + Sync + std::fmt::Debug {
    /// Partition proposals, given in processing order
    fn partition(&self, proposals: &[&ProposedNode]) -> BlockPlan;

    /// Strategy name (for logging/config)
    fn name(&self) -> &'static str;
}

/// Selectable strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStrategyKind {
    /// One block per declared type
    #[default]
    ByType,
    /// Blocks per inferred workflow phase
    ByPhase,
}

impl BlockStrategyKind {
    /// Instantiate the strategy
    #[must_use]
    pub fn build(self, max_phase_block_size: usize) -> Box<dyn BlockStrategy> {
        match self {
            Self::ByType => Box::new(TypeBlockStrategy),
            Self::ByPhase => Box::new(PhaseBlockStrategy::new(max_phase_block_size)),
        }
    }
}

/// Grouping label for a declared type: the recognized label when the type
/// is known, the normalized raw type otherwise, `general` when absent.
#[must_use]
pub fn block_group_key(declared: Option<&str>) -> String {
    let Some(raw) = declared.map(str::trim).filter(|r| !r.is_empty()) else {
        return DEFAULT_GROUP.to_string();
    };
    match canonical_type_label(raw) {
        Some(label) => label.to_string(),
        None => crate::node_type::normalize_type_key(raw),
    }
}

/// Human title for a group label
#[must_use]
pub fn display_title(group: &str) -> String {
    match group {
        "protocol" => "Protocol".to_string(),
        "data_creation" => "Data Creation".to_string(),
        "analysis" => "Analysis".to_string(),
        "results" => "Results".to_string(),
        "software" => "Software".to_string(),
        other => other
            .split('_')
            .filter(|w| !w.is_empty())
            .map(capitalize)
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// One block per declared node type
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeBlockStrategy;

impl BlockStrategy for TypeBlockStrategy {
    fn partition(&self, proposals: &[&ProposedNode]) -> BlockPlan {
        let mut groups: IndexMap<String, Vec<ProposalId>> = IndexMap::new();
        for proposal in proposals {
            groups
                .entry(block_group_key(proposal.declared_type()))
                .or_default()
                .push(proposal.id);
        }

        let mut ordered: Vec<(String, Vec<ProposalId>)> = Vec::with_capacity(groups.len());
        for preferred in PREFERRED_TYPE_ORDER {
            if let Some(members) = groups.shift_remove(preferred) {
                ordered.push((preferred.to_string(), members));
            }
        }
        ordered.extend(groups);

        let mut plan = BlockPlan::default();
        for (group, members) in ordered {
            let name = format!("{} Block", display_title(&group));
            let description = format!("Block containing {group} nodes");
            plan.push(name, description, group, members);
        }
        plan
    }

    fn name(&self) -> &'static str {
        "by_type"
    }
}

/// Coarse workflow phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Setup and protocols early in the order
    Preparation,
    /// Data-producing work
    Execution,
    /// Processing of results
    Analysis,
    /// Results and checks
    Validation,
}

impl Phase {
    /// Phases in block order
    pub const ALL: [Phase; 4] = [
        Phase::Preparation,
        Phase::Execution,
        Phase::Analysis,
        Phase::Validation,
    ];

    /// Block title prefix
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::Preparation => "Preparation",
            Self::Execution => "Execution",
            Self::Analysis => "Analysis",
            Self::Validation => "Validation",
        }
    }

    /// Infer a phase from the declared type and the relative position
    /// (`0.0..1.0`) in topological order.
    #[must_use]
    pub fn infer(declared: Option<&str>, relative_position: f64) -> Phase {
        match declared.and_then(canonical_type_label) {
            Some("data_creation") => Phase::Execution,
            Some("analysis") => Phase::Analysis,
            Some("results") => Phase::Validation,
            Some(_) if relative_position < 0.5 => Phase::Preparation,
            Some(_) => Phase::Execution,
            None if relative_position < 0.25 => Phase::Preparation,
            None if relative_position < 0.5 => Phase::Execution,
            None if relative_position < 0.75 => Phase::Analysis,
            None => Phase::Validation,
        }
    }
}

/// Phase inference over topological order
#[derive(Debug, Clone, Copy)]
pub struct PhaseBlockStrategy {
    max_block_size: usize,
}

impl PhaseBlockStrategy {
    /// Default split threshold
    pub const DEFAULT_MAX_BLOCK_SIZE: usize = 15;

    /// Strategy splitting phases larger than `max_block_size`
    #[must_use]
    pub fn new(max_block_size: usize) -> Self {
        Self {
            max_block_size: max_block_size.max(1),
        }
    }
}

impl Default for PhaseBlockStrategy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_BLOCK_SIZE)
    }
}

impl BlockStrategy for PhaseBlockStrategy {
    fn partition(&self, proposals: &[&ProposedNode]) -> BlockPlan {
        let mut index = TitleIndex::new();
        for proposal in proposals {
            index.insert_title(proposal.title(), proposal.id);
        }
        let graph = DependencyGraph::build(
            proposals.iter().map(|p| (p.id, p.dependencies())),
            &index,
        );
        let ids: Vec<ProposalId> = proposals.iter().map(|p| p.id).collect();
        let topo = topological_order(&ids, &graph);

        let by_id: IndexMap<ProposalId, &ProposedNode> =
            proposals.iter().map(|p| (p.id, *p)).collect();

        let total = topo.order.len().max(1) as f64;
        let mut phases: IndexMap<Phase, Vec<ProposalId>> = IndexMap::new();
        for (i, id) in topo.order.iter().enumerate() {
            let declared = by_id.get(id).and_then(|p| p.declared_type());
            let phase = Phase::infer(declared, i as f64 / total);
            phases.entry(phase).or_default().push(*id);
        }

        let mut plan = BlockPlan::default();
        for phase in Phase::ALL {
            let Some(members) = phases.shift_remove(&phase) else {
                continue;
            };
            if members.len() <= self.max_block_size {
                plan.push(
                    phase.title().to_string(),
                    format!("{} phase", phase.title()),
                    phase.title().to_lowercase(),
                    members,
                );
                continue;
            }
            for (part, chunk) in members.chunks(self.max_block_size).enumerate() {
                plan.push(
                    format!("{} (Part {})", phase.title(), part + 1),
                    format!("{} phase, part {}", phase.title(), part + 1),
                    phase.title().to_lowercase(),
                    chunk.to_vec(),
                );
            }
        }
        plan
    }

    fn name(&self) -> &'static str {
        "by_phase"
    }
}
