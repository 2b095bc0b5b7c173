//! Tree assembler
//!
//! Drives one accept operation through the [`BuildStage`] machine. Stage
//! outputs are passed forward as plain values; the only state carried
//! across stages is [`BuildState`] (current stage, progress sink, report).
//!
//! Failures while creating the tree, its blocks or its nodes abort the
//! build. Everything after that (content, links, attachments,
//! dependencies, nested trees) is best effort: failures are logged,
//! counted and appended to the tree's metadata.

use crate::batch::{BatchContentProcessor, ProcessedContent};
use crate::config::{PipelineConfig, PositionMode};
use crate::error::AssemblyError;
use crate::nested::NestedTreeBuilder;
use crate::progress::{ProgressSink, ProgressTracker, ProgressUpdate};
use crate::stage::BuildStage;
use crate::textgen::{truncate_at_word, TextGenerator};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use treeforge_core::blocks::CUSTOM_BLOCK_TYPE;
use treeforge_core::{
    resolve_node_type, topological_order, BlockKey, BlockPlan, DependencyGraph, ExperimentTree,
    InsertionIssue, JobId, MetadataEntry, NewAttachment, NewBlock, NewContent, NewDependency,
    NewLink, NewNode, NewTree, NodeId, NodeProvenance, NodeType, ProjectId, ProposalId,
    ProposedNode, RecordStatus, TitleIndex, TreeBlock, TreeId, TreeMetadata, TreeNode,
    UnresolvedDependency, UnresolvedReason, UserId,
};
use treeforge_store::{StoreError, TreeStore};

const UNTITLED_NODE: &str = "Untitled node";
const MAX_TREE_NAME_CHARS: usize = 100;
const MAX_EXCERPT_CHARS: usize = 500;

/// Input for one build
#[derive(Debug, Clone)]
pub struct AssemblyRequest {
    /// Project the tree belongs to
    pub project_id: ProjectId,
    /// User the build runs for
    pub user_id: UserId,
    /// Append to this tree instead of creating one
    pub tree_id: Option<TreeId>,
    /// Job to report progress to
    pub job_id: Option<JobId>,
    /// Proposals in caller order
    pub proposals: Vec<ProposedNode>,
}

/// Outcome of a successful build, including what was recovered from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyReport {
    /// Tree the build wrote to
    pub tree_id: TreeId,
    /// Stored tree name
    pub tree_name: String,
    /// True when an existing tree was appended to
    pub reused_tree: bool,
    /// Blocks inserted
    pub blocks_created: usize,
    /// Nodes inserted
    pub nodes_created: usize,
    /// Content rows inserted
    pub contents_created: usize,
    /// Links inserted
    pub links_created: usize,
    /// Attachments inserted
    pub attachments_created: usize,
    /// Dependency edges inserted
    pub dependencies_created: usize,
    /// Edges whose declared type was replaced by the observed one
    pub dependency_types_corrected: usize,
    /// Back-edges skipped while ordering
    pub cycles_skipped: usize,
    /// Proposals whose generated content fell back to raw input
    pub content_fallbacks: usize,
    /// Nested trees created for protocol nodes
    pub nested_tree_ids: Vec<TreeId>,
    /// Nested trees that failed and were skipped
    pub nested_trees_failed: usize,
    /// Dependencies naming titles that matched no node
    pub unresolved_dependencies: Vec<UnresolvedDependency>,
    /// Recovered insertion failures
    pub issues: Vec<InsertionIssue>,
}

impl AssemblyReport {
    fn new(tree: &ExperimentTree, reused_tree: bool) -> Self {
        Self {
            tree_id: tree.id,
            tree_name: tree.name.clone(),
            reused_tree,
            blocks_created: 0,
            nodes_created: 0,
            contents_created: 0,
            links_created: 0,
            attachments_created: 0,
            dependencies_created: 0,
            dependency_types_corrected: 0,
            cycles_skipped: 0,
            content_fallbacks: 0,
            nested_tree_ids: Vec::new(),
            nested_trees_failed: 0,
            unresolved_dependencies: Vec::new(),
            issues: Vec::new(),
        }
    }

    /// Number of nested trees created
    #[inline]
    #[must_use]
    pub fn nested_trees_created(&self) -> usize {
        self.nested_tree_ids.len()
    }
}

/// Stage bookkeeping threaded through the build
struct BuildState<'a> {
    stage: BuildStage,
    sink: ProgressSink<'a>,
}

impl<'a> BuildState<'a> {
    fn new(sink: ProgressSink<'a>) -> Self {
        Self {
            stage: BuildStage::Initializing,
            sink,
        }
    }

    async fn advance(&mut self, to: BuildStage, message: &str) -> Result<(), AssemblyError> {
        self.stage.validate_transition(to)?;
        tracing::debug!(from = %self.stage, to = %to, "stage transition");
        self.stage = to;
        self.sink
            .report(ProgressUpdate::new(to, 0, 0, message))
            .await;
        Ok(())
    }

    fn fatal(&self, source: StoreError) -> AssemblyError {
        AssemblyError::Stage {
            stage: self.stage,
            source,
        }
    }

    fn fail(&mut self) {
        if self.stage.can_transition_to(BuildStage::Error) {
            self.stage = BuildStage::Error;
        }
    }
}

/// Existing tree a build appends to
#[derive(Debug, Clone, Copy, Default)]
struct Baseline {
    max_block_position: u32,
    node_count: usize,
}

/// Node planned for insertion, before ids exist
struct PlannedNode<'p> {
    proposal: &'p ProposedNode,
    block_id: treeforge_core::BlockId,
    position: u32,
    content: ProcessedContent,
}

/// Persisted node matched back to its proposal
struct CreatedNode<'p> {
    node: TreeNode,
    proposal: &'p ProposedNode,
    content: String,
}

/// Builds experiment trees from accepted proposals
#[derive(Clone)]
pub struct TreeAssembler {
    trees: Arc<dyn TreeStore>,
    generator: Arc<dyn TextGenerator>,
    progress: Arc<dyn ProgressTracker>,
    config: PipelineConfig,
}

impl std::fmt::Debug for TreeAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeAssembler")
            .field("trees", &self.trees)
            .field("progress", &self.progress)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TreeAssembler {
    /// Assembler over the given stores and generator
    #[must_use]
    pub fn new(
        trees: Arc<dyn TreeStore>,
        generator: Arc<dyn TextGenerator>,
        progress: Arc<dyn ProgressTracker>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            trees,
            generator,
            progress,
            config,
        }
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Tree store builds write to
    #[inline]
    #[must_use]
    pub fn trees(&self) -> &Arc<dyn TreeStore> {
        &self.trees
    }

    /// Run a full build, reporting to the request's job
    pub async fn assemble(&self, request: AssemblyRequest) -> Result<AssemblyReport, AssemblyError> {
        let sink = ProgressSink::new(self.progress.as_ref(), request.job_id);
        let mut state = BuildState::new(sink);

        match self.run(&request, &mut state).await {
            Ok(report) => {
                tracing::info!(
                    tree_id = %report.tree_id,
                    nodes = report.nodes_created,
                    dependencies = report.dependencies_created,
                    nested = report.nested_trees_created(),
                    issues = report.issues.len(),
                    "tree assembled"
                );
                sink.complete(format!(
                    "Created {} nodes in \"{}\"",
                    report.nodes_created, report.tree_name
                ))
                .await;
                Ok(report)
            }
            Err(err) => {
                state.fail();
                tracing::error!(error = %err, stage = ?err.stage(), "tree assembly failed");
                sink.error(err.to_string()).await;
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        request: &AssemblyRequest,
        state: &mut BuildState<'_>,
    ) -> Result<AssemblyReport, AssemblyError> {
        if request.proposals.is_empty() {
            return Err(AssemblyError::NoProposals);
        }

        state
            .sink
            .report(ProgressUpdate::new(
                BuildStage::Initializing,
                0,
                0,
                "Preparing experiment tree",
            ))
            .await;
        let (ordered, cycles_skipped) = self.order(&request.proposals);
        let (tree, baseline) = self
            .init_tree(request, &ordered)
            .await
            .map_err(|e| state.fatal(e))?;
        let mut report = AssemblyReport::new(&tree, request.tree_id.is_some());
        report.cycles_skipped = cycles_skipped;

        state.advance(BuildStage::BuildingBlocks, "Creating blocks").await?;
        let (plan, blocks) = self
            .build_blocks(&tree, &ordered, baseline)
            .await
            .map_err(|e| state.fatal(e))?;
        report.blocks_created = blocks.len();

        state.advance(BuildStage::BuildingNodes, "Creating nodes").await?;
        let created = self
            .build_nodes(state, &tree, &ordered, &plan, &blocks, &mut report)
            .await?;

        state
            .advance(BuildStage::LinksAttachments, "Copying links and attachments")
            .await?;
        self.copy_links_and_attachments(&tree, &created, &mut report)
            .await;

        state
            .advance(BuildStage::Dependencies, "Resolving dependencies")
            .await?;
        self.build_dependencies(&tree, &ordered, &created, &mut report)
            .await;

        state
            .advance(BuildStage::NestedTrees, "Creating nested trees")
            .await?;
        self.build_nested_trees(state, &tree, &created, &mut report)
            .await;

        let node_count = baseline.node_count + report.nodes_created;
        if let Err(err) = self.trees.set_node_count(tree.id, node_count).await {
            self.record_issue(&tree, &mut report, "completed", &tree.name, &err)
                .await;
        }
        state.advance(BuildStage::Completed, "Finalizing").await?;
        Ok(report)
    }

    /// Dependency-respecting order, or caller order when disabled
    fn order<'p>(&self, proposals: &'p [ProposedNode]) -> (Vec<&'p ProposedNode>, usize) {
        let input: Vec<&ProposedNode> = proposals.iter().collect();
        if !self.config.order_by_dependencies {
            return (input, 0);
        }

        let index = proposal_title_index(&input);
        let graph = DependencyGraph::build(input.iter().map(|p| (p.id, p.dependencies())), &index);
        let ids: Vec<ProposalId> = input.iter().map(|p| p.id).collect();
        let topo = topological_order(&ids, &graph);

        let by_id: HashMap<ProposalId, &ProposedNode> = input.iter().map(|p| (p.id, *p)).collect();
        let ordered = topo
            .order
            .iter()
            .filter_map(|id| by_id.get(id).copied())
            .collect();
        (ordered, topo.cycles_skipped)
    }

    async fn init_tree(
        &self,
        request: &AssemblyRequest,
        ordered: &[&ProposedNode],
    ) -> Result<(ExperimentTree, Baseline), StoreError> {
        if let Some(tree_id) = request.tree_id {
            let tree = self.trees.get_tree(tree_id).await?;
            if tree.project_id != request.project_id {
                return Err(StoreError::not_found(treeforge_store::Table::Trees, tree_id));
            }
            let existing = self.trees.snapshot(tree_id).await?;
            let baseline = Baseline {
                max_block_position: existing.blocks.iter().map(|b| b.position).max().unwrap_or(0),
                node_count: existing.nodes.len(),
            };
            tracing::info!(%tree_id, existing_nodes = baseline.node_count, "appending to existing tree");
            return Ok((tree, baseline));
        }

        let name = self.tree_name(ordered).await;
        let tree = self
            .trees
            .insert_tree(NewTree {
                project_id: request.project_id,
                name,
                description: format!("Built from {} accepted proposals", ordered.len()),
                created_by: request.user_id,
                metadata: TreeMetadata::default(),
            })
            .await?;
        tracing::info!(tree_id = %tree.id, name = %tree.name, "created tree");
        Ok((tree, Baseline::default()))
    }

    async fn tree_name(&self, ordered: &[&ProposedNode]) -> String {
        let fallback = self.config.fallback_tree_name.clone();
        let excerpts: Vec<String> = ordered
            .iter()
            .map(|p| p.content_text().trim())
            .filter(|t| !t.is_empty())
            .take(self.config.tree_name_excerpts)
            .map(|t| truncate_at_word(t, MAX_EXCERPT_CHARS))
            .collect();
        if excerpts.is_empty() {
            return fallback;
        }

        match self.generator.generate_tree_name(&excerpts).await {
            Ok(name) if !name.trim().is_empty() => truncate_at_word(name.trim(), MAX_TREE_NAME_CHARS),
            Ok(_) => fallback,
            Err(err) => {
                tracing::warn!(error = %err, rate_limited = err.is_rate_limit(), "tree naming failed, using fallback name");
                fallback
            }
        }
    }

    async fn build_blocks(
        &self,
        tree: &ExperimentTree,
        ordered: &[&ProposedNode],
        baseline: Baseline,
    ) -> Result<(BlockPlan, HashMap<BlockKey, TreeBlock>), StoreError> {
        let strategy = self
            .config
            .block_strategy
            .build(self.config.max_phase_block_size);
        let plan = strategy.partition(ordered);
        tracing::debug!(strategy = strategy.name(), blocks = plan.len(), "partitioned proposals");

        let rows = self
            .trees
            .insert_blocks(
                plan.blocks
                    .iter()
                    .map(|b| NewBlock {
                        tree_id: tree.id,
                        name: b.name.clone(),
                        position: baseline.max_block_position + b.position,
                        description: b.description.clone(),
                        block_type: CUSTOM_BLOCK_TYPE.to_string(),
                    })
                    .collect(),
            )
            .await?;
        if rows.len() != plan.len() {
            return Err(StoreError::InsertFailed {
                table: treeforge_store::Table::Blocks,
                message: format!("expected {} rows, got {}", plan.len(), rows.len()),
            });
        }

        let blocks = plan.blocks.iter().map(|b| b.key).zip(rows).collect();
        Ok((plan, blocks))
    }

    async fn build_nodes<'p>(
        &self,
        state: &BuildState<'_>,
        tree: &ExperimentTree,
        ordered: &[&'p ProposedNode],
        plan: &BlockPlan,
        blocks: &HashMap<BlockKey, TreeBlock>,
        report: &mut AssemblyReport,
    ) -> Result<Vec<CreatedNode<'p>>, AssemblyError> {
        let processed = BatchContentProcessor::new(self.generator.as_ref(), &self.config)
            .process(ordered, state.sink)
            .await;
        report.content_fallbacks = processed.iter().filter(|c| c.fell_back).count();

        let member_rank: HashMap<ProposalId, u32> = plan
            .blocks
            .iter()
            .flat_map(|b| b.members.iter().zip(0u32..))
            .map(|(id, rank)| (*id, rank))
            .collect();
        let mut counters: HashMap<BlockKey, u32> = HashMap::new();
        let mut planned: Vec<PlannedNode<'p>> = Vec::with_capacity(ordered.len());
        let mut new_nodes: Vec<NewNode> = Vec::with_capacity(ordered.len());

        for (proposal, content) in ordered.iter().copied().zip(processed) {
            let Some(block) = plan
                .block_of(proposal.id)
                .and_then(|planned| blocks.get(&planned.key).map(|row| (planned.key, row)))
            else {
                tracing::warn!(proposal_id = %proposal.id, "proposal missing from block plan, skipped");
                continue;
            };
            let (key, block) = block;

            // both modes are dense from 0 inside each block
            let position = match self.config.position_mode {
                PositionMode::BlockLocal => match member_rank.get(&proposal.id) {
                    Some(rank) => *rank,
                    None => continue,
                },
                PositionMode::Global => {
                    let counter = counters.entry(key).or_insert(0);
                    let position = *counter;
                    *counter += 1;
                    position
                }
            };

            let node_type = resolve_node_type(Some(block.name.as_str()), proposal.declared_type());
            if let Some(declared) = proposal.declared_type() {
                if declared.parse::<NodeType>().ok() != Some(node_type) {
                    tracing::debug!(
                        proposal_id = %proposal.id,
                        declared,
                        mapped = %node_type,
                        "node type normalized"
                    );
                }
            }

            new_nodes.push(NewNode {
                tree_id: tree.id,
                block_id: block.id,
                name: node_name(proposal),
                description: content.description.clone(),
                node_type,
                position,
                status: RecordStatus::Draft,
                provenance: NodeProvenance {
                    proposal_id: Some(proposal.id),
                    confidence: proposal.confidence,
                },
                confidence: proposal.confidence,
            });
            planned.push(PlannedNode {
                proposal,
                block_id: block.id,
                position,
                content,
            });
        }

        let rows = self
            .trees
            .insert_nodes(new_nodes)
            .await
            .map_err(|e| state.fatal(e))?;
        report.nodes_created = rows.len();
        tracing::info!(tree_id = %tree.id, nodes = rows.len(), "inserted nodes");

        let created = match_created_nodes(rows, planned);
        if created.len() < report.nodes_created {
            let missing = report.nodes_created - created.len();
            let err = StoreError::Backend(format!("{missing} nodes could not be matched to proposals"));
            self.record_issue(tree, report, "building_nodes", "tree_nodes", &err)
                .await;
        }

        let contents: Vec<NewContent> = created
            .iter()
            .map(|c| NewContent {
                node_id: c.node.id,
                content: c.content.clone(),
                status: RecordStatus::Draft,
            })
            .collect();
        match self.trees.insert_contents(contents).await {
            Ok(rows) => report.contents_created = rows.len(),
            Err(err) => {
                self.record_issue(tree, report, "building_nodes", "node_content", &err)
                    .await;
            }
        }

        Ok(created)
    }

    async fn copy_links_and_attachments(
        &self,
        tree: &ExperimentTree,
        created: &[CreatedNode<'_>],
        report: &mut AssemblyReport,
    ) {
        let links: Vec<NewLink> = created
            .iter()
            .flat_map(|c| {
                c.proposal
                    .node_json
                    .links
                    .iter()
                    .enumerate()
                    .map(move |(i, link)| NewLink {
                        node_id: c.node.id,
                        name: if link.name.trim().is_empty() {
                            link.url.clone()
                        } else {
                            link.name.clone()
                        },
                        url: link.url.clone(),
                        description: link.description.clone(),
                        link_type: link.link_type.clone(),
                        position: u32::try_from(i).unwrap_or(u32::MAX),
                    })
            })
            .collect();
        if !links.is_empty() {
            match self.trees.insert_links(links).await {
                Ok(rows) => report.links_created = rows.len(),
                Err(err) => {
                    self.record_issue(tree, report, "links", "node_links", &err)
                        .await;
                }
            }
        }

        let attachments: Vec<NewAttachment> = created
            .iter()
            .flat_map(|c| {
                c.proposal
                    .node_json
                    .attachments
                    .iter()
                    .enumerate()
                    .map(move |(i, attachment)| NewAttachment {
                        node_id: c.node.id,
                        name: attachment.name.clone(),
                        description: attachment.description.clone(),
                        file_type: attachment.file_type.clone(),
                        file_url: attachment.file_url.clone(),
                        position: u32::try_from(i).unwrap_or(u32::MAX),
                    })
            })
            .collect();
        if !attachments.is_empty() {
            match self.trees.insert_attachments(attachments).await {
                Ok(rows) => report.attachments_created = rows.len(),
                Err(err) => {
                    self.record_issue(tree, report, "attachments", "node_attachments", &err)
                        .await;
                }
            }
        }
    }

    async fn build_dependencies(
        &self,
        tree: &ExperimentTree,
        ordered: &[&ProposedNode],
        created: &[CreatedNode<'_>],
        report: &mut AssemblyReport,
    ) {
        let mut index: TitleIndex<NodeId> = TitleIndex::new();
        for c in created {
            index.insert_title(&c.node.name, c.node.id);
        }
        for c in created {
            index.insert_display_name(c.proposal.title(), c.node.id);
        }
        let by_node: HashMap<NodeId, &CreatedNode<'_>> =
            created.iter().map(|c| (c.node.id, c)).collect();

        let graph = DependencyGraph::build(
            created.iter().map(|c| (c.node.id, c.proposal.dependencies())),
            &index,
        );

        let batch_titles = proposal_title_index(ordered);
        let unresolved: Vec<UnresolvedDependency> = graph
            .unresolved()
            .iter()
            .map(|u| {
                let reason = if batch_titles.resolve(&u.referenced_title).is_some() {
                    UnresolvedReason::TargetNotCreated
                } else {
                    UnresolvedReason::NoMatchingTitle
                };
                let from_title = by_node
                    .get(&u.from)
                    .map(|c| c.node.name.clone())
                    .unwrap_or_default();
                tracing::warn!(
                    tree_id = %tree.id,
                    from = %from_title,
                    referenced = %u.referenced_title,
                    ?reason,
                    "unresolved dependency"
                );
                UnresolvedDependency {
                    from_node_id: Some(u.from),
                    from_title,
                    referenced_title: u.referenced_title.clone(),
                    dependency_type: u.dependency_type.clone(),
                    reason,
                }
            })
            .collect();

        let mut dependencies = Vec::with_capacity(graph.edge_count());
        for edge in graph.edges() {
            if edge.type_corrected {
                report.dependency_types_corrected += 1;
                tracing::warn!(
                    from = %edge.from,
                    to = %edge.to,
                    "invalid dependency type corrected to requires"
                );
            }
            let confidence = edge
                .confidence
                .or_else(|| by_node.get(&edge.from).map(|c| c.proposal.confidence))
                .unwrap_or_default();
            dependencies.push(NewDependency {
                from_node_id: edge.from,
                to_node_id: edge.to,
                dependency_type: edge.dependency_type,
                evidence_text: edge.evidence.clone(),
                confidence,
            });
        }

        if !dependencies.is_empty() {
            match self.trees.insert_dependencies(dependencies).await {
                Ok(rows) => report.dependencies_created = rows.len(),
                Err(err) => {
                    self.record_issue(tree, report, "dependencies", "node_dependencies", &err)
                        .await;
                }
            }
        }

        if !unresolved.is_empty() {
            if let Err(err) = self
                .trees
                .append_tree_metadata(tree.id, MetadataEntry::Unresolved(unresolved.clone()))
                .await
            {
                tracing::warn!(tree_id = %tree.id, error = %err, "failed to record unresolved dependencies");
            }
        }
        report.unresolved_dependencies = unresolved;
    }

    async fn build_nested_trees(
        &self,
        state: &BuildState<'_>,
        tree: &ExperimentTree,
        created: &[CreatedNode<'_>],
        report: &mut AssemblyReport,
    ) {
        let parents: Vec<&CreatedNode<'_>> =
            created.iter().filter(|c| c.proposal.is_nested()).collect();
        if parents.is_empty() {
            return;
        }

        let builder = NestedTreeBuilder::new(self.trees.as_ref(), self.config.split_nested_steps);
        for (i, parent) in parents.iter().enumerate() {
            match builder
                .build(&parent.node, parent.proposal, parent.proposal.content_text())
                .await
            {
                Ok(nested) => report.nested_tree_ids.push(nested.tree.id),
                Err(err) => {
                    report.nested_trees_failed += 1;
                    let issue = InsertionIssue::new("nested_trees", &parent.node.name, err.to_string());
                    self.append_issue(tree, report, issue).await;
                }
            }
            state
                .sink
                .report(ProgressUpdate::new(
                    BuildStage::NestedTrees,
                    i + 1,
                    parents.len(),
                    format!("Processed nested tree {}/{}", i + 1, parents.len()),
                ))
                .await;
        }
    }

    async fn record_issue(
        &self,
        tree: &ExperimentTree,
        report: &mut AssemblyReport,
        stage: &str,
        entity: &str,
        err: &StoreError,
    ) {
        tracing::warn!(tree_id = %tree.id, stage, entity, error = %err, "non-fatal insert failure");
        self.append_issue(tree, report, InsertionIssue::new(stage, entity, err.to_string()))
            .await;
    }

    async fn append_issue(&self, tree: &ExperimentTree, report: &mut AssemblyReport, issue: InsertionIssue) {
        if let Err(err) = self
            .trees
            .append_tree_metadata(tree.id, MetadataEntry::Issue(issue.clone()))
            .await
        {
            tracing::warn!(tree_id = %tree.id, error = %err, "failed to record insertion issue");
        }
        report.issues.push(issue);
    }
}

/// Title index over proposals in the current batch
fn proposal_title_index(proposals: &[&ProposedNode]) -> TitleIndex<ProposalId> {
    let mut index = TitleIndex::new();
    for proposal in proposals {
        index.insert_title(proposal.title(), proposal.id);
    }
    index
}

fn node_name(proposal: &ProposedNode) -> String {
    let title = proposal.title().trim();
    if title.is_empty() {
        UNTITLED_NODE.to_string()
    } else {
        title.to_string()
    }
}

/// Pair inserted rows with their plan entries: provenance first, then
/// (block, position)
fn match_created_nodes<'p>(rows: Vec<TreeNode>, planned: Vec<PlannedNode<'p>>) -> Vec<CreatedNode<'p>> {
    let by_proposal: HashMap<ProposalId, usize> = planned
        .iter()
        .enumerate()
        .map(|(i, p)| (p.proposal.id, i))
        .collect();
    let by_slot: HashMap<(treeforge_core::BlockId, u32), usize> = planned
        .iter()
        .enumerate()
        .map(|(i, p)| ((p.block_id, p.position), i))
        .collect();

    let mut slots: Vec<Option<PlannedNode<'p>>> = planned.into_iter().map(Some).collect();
    let mut created = Vec::with_capacity(rows.len());
    for node in rows {
        let index = node
            .provenance
            .proposal_id
            .and_then(|id| by_proposal.get(&id))
            .or_else(|| by_slot.get(&(node.block_id, node.position)))
            .copied();
        match index.and_then(|i| slots.get_mut(i)).and_then(Option::take) {
            Some(plan) => created.push(CreatedNode {
                node,
                proposal: plan.proposal,
                content: plan.content.content,
            }),
            None => {
                tracing::warn!(node_id = %node.id, name = %node.name, "created node has no matching proposal");
            }
        }
    }
    created
}
