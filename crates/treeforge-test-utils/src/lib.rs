//! Testing utilities for the treeforge workspace
//!
//! Proposal builders, canned scenarios and failure-injecting collaborators.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use treeforge_core::{
    AttachmentSpec, DependencyRef, ExperimentTree, LinkSpec, MetadataEntry, NewAttachment,
    NewBlock, NewContent, NewDependency, NewLink, NewNode, NewTree, NodeAttachment, NodeContent,
    NodeDependency, NodeId, NodeJson, NodeLink, NodeText, ProjectId, ProposedNode, TreeBlock,
    TreeId, TreeNode, UserId,
};
use treeforge_pipeline::{
    InMemoryProgressTracker, PipelineConfig, ProposalService, TextGenError, TextGenerator,
    TreeAssembler,
};
use treeforge_store::{
    InMemoryProposalStore, InMemoryTreeStore, StoreError, Table, TreeSnapshot, TreeStore,
};

/// Install a test-friendly subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fresh project/user pair
pub fn owner() -> (ProjectId, UserId) {
    (ProjectId::new(), UserId::new())
}

/// Fluent builder for [`ProposedNode`]
#[derive(Debug, Clone)]
pub struct ProposalBuilder {
    project_id: ProjectId,
    user_id: UserId,
    json: NodeJson,
    confidence: f64,
}

impl ProposalBuilder {
    pub fn new(project_id: ProjectId, user_id: UserId, title: &str) -> Self {
        Self {
            project_id,
            user_id,
            json: NodeJson {
                title: title.to_string(),
                ..NodeJson::default()
            },
            confidence: 0.9,
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.json.content = NodeText {
            text: text.to_string(),
        };
        self
    }

    pub fn node_type(mut self, node_type: &str) -> Self {
        self.json.metadata.node_type = Some(node_type.to_string());
        self
    }

    pub fn summary(mut self, summary: &str) -> Self {
        self.json.short_summary = Some(summary.to_string());
        self
    }

    pub fn depends_on(mut self, title: &str) -> Self {
        self.json.dependencies.push(DependencyRef::to_title(title));
        self
    }

    pub fn depends_on_typed(mut self, title: &str, dependency_type: &str) -> Self {
        self.json
            .dependencies
            .push(DependencyRef::to_title(title).with_type(dependency_type));
        self
    }

    pub fn link(mut self, name: &str, url: &str) -> Self {
        self.json.links.push(LinkSpec {
            name: name.to_string(),
            url: url.to_string(),
            description: None,
            link_type: None,
        });
        self
    }

    pub fn attachment(mut self, name: &str, file_url: &str) -> Self {
        self.json.attachments.push(AttachmentSpec {
            name: name.to_string(),
            description: None,
            file_type: None,
            file_url: Some(file_url.to_string()),
        });
        self
    }

    pub fn nested(mut self) -> Self {
        self.json.is_nested_tree = true;
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn build(self) -> ProposedNode {
        let mut proposal = ProposedNode::new(self.project_id, self.user_id, self.json);
        proposal.confidence = self.confidence;
        proposal
    }
}

/// Extract RNA -> Run PCR -> Analyze Results, typed data/protocol/analysis
pub fn rna_pcr_scenario(project_id: ProjectId, user_id: UserId) -> Vec<ProposedNode> {
    vec![
        ProposalBuilder::new(project_id, user_id, "Extract RNA")
            .node_type("data")
            .text("Isolate total RNA from the samples.")
            .build(),
        ProposalBuilder::new(project_id, user_id, "Run PCR")
            .node_type("protocol")
            .text("Amplify the target using the extracted RNA.")
            .depends_on("Extract RNA")
            .build(),
        ProposalBuilder::new(project_id, user_id, "Analyze Results")
            .node_type("analysis")
            .text("Quantify amplification curves.")
            .depends_on("Run PCR")
            .build(),
    ]
}

/// Generator that rate-limits every `period`-th call and otherwise echoes
#[derive(Debug)]
pub struct FlakyTextGenerator {
    period: usize,
    calls: AtomicUsize,
}

impl FlakyTextGenerator {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            calls: AtomicUsize::new(0),
        }
    }

    /// Generator that always fails
    pub fn always_failing() -> Self {
        Self::new(1)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) -> Result<(), TextGenError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n % self.period == 0 {
            Err(TextGenError::RateLimited {
                retry_after_secs: Some(1),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TextGenerator for FlakyTextGenerator {
    async fn generate_tree_name(&self, excerpts: &[String]) -> Result<String, TextGenError> {
        self.tick()?;
        Ok(format!("Tree from {} excerpts", excerpts.len()))
    }

    async fn format_content(&self, raw: &str) -> Result<String, TextGenError> {
        self.tick()?;
        Ok(format!("[formatted] {raw}"))
    }

    async fn summarize(&self, text: &str, max_chars: usize) -> Result<String, TextGenError> {
        self.tick()?;
        Ok(text.chars().take(max_chars).collect())
    }
}

/// Tree store that fails selected writes and delegates the rest
#[derive(Debug, Default)]
pub struct FailingTreeStore {
    inner: InMemoryTreeStore,
    /// Table -> calls that fail (1-based); empty vec means every call
    plan: Mutex<HashMap<Table, Vec<usize>>>,
    calls: Mutex<HashMap<Table, usize>>,
}

impl FailingTreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every write to `table`
    pub fn failing(self, table: Table) -> Self {
        self.plan.lock().insert(table, Vec::new());
        self
    }

    /// Fail only the `nth` (1-based) write to `table`
    pub fn failing_nth(self, table: Table, nth: usize) -> Self {
        self.plan.lock().entry(table).or_default().push(nth);
        self
    }

    pub fn inner(&self) -> &InMemoryTreeStore {
        &self.inner
    }

    fn check(&self, table: Table) -> Result<(), StoreError> {
        let n = {
            let mut calls = self.calls.lock();
            let count = calls.entry(table).or_insert(0);
            *count += 1;
            *count
        };
        let fails = match self.plan.lock().get(&table) {
            Some(calls) => calls.is_empty() || calls.contains(&n),
            None => false,
        };
        if fails {
            Err(StoreError::InsertFailed {
                table,
                message: format!("injected failure on call {n}"),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TreeStore for FailingTreeStore {
    async fn insert_tree(&self, tree: NewTree) -> Result<ExperimentTree, StoreError> {
        self.check(Table::Trees)?;
        self.inner.insert_tree(tree).await
    }

    async fn get_tree(&self, tree_id: TreeId) -> Result<ExperimentTree, StoreError> {
        self.inner.get_tree(tree_id).await
    }

    async fn insert_blocks(&self, blocks: Vec<NewBlock>) -> Result<Vec<TreeBlock>, StoreError> {
        self.check(Table::Blocks)?;
        self.inner.insert_blocks(blocks).await
    }

    async fn insert_nodes(&self, nodes: Vec<NewNode>) -> Result<Vec<TreeNode>, StoreError> {
        self.check(Table::Nodes)?;
        self.inner.insert_nodes(nodes).await
    }

    async fn insert_contents(
        &self,
        contents: Vec<NewContent>,
    ) -> Result<Vec<NodeContent>, StoreError> {
        self.check(Table::Contents)?;
        self.inner.insert_contents(contents).await
    }

    async fn insert_links(&self, links: Vec<NewLink>) -> Result<Vec<NodeLink>, StoreError> {
        self.check(Table::Links)?;
        self.inner.insert_links(links).await
    }

    async fn insert_attachments(
        &self,
        attachments: Vec<NewAttachment>,
    ) -> Result<Vec<NodeAttachment>, StoreError> {
        self.check(Table::Attachments)?;
        self.inner.insert_attachments(attachments).await
    }

    async fn insert_dependencies(
        &self,
        dependencies: Vec<NewDependency>,
    ) -> Result<Vec<NodeDependency>, StoreError> {
        self.check(Table::Dependencies)?;
        self.inner.insert_dependencies(dependencies).await
    }

    async fn append_tree_metadata(
        &self,
        tree_id: TreeId,
        entry: MetadataEntry,
    ) -> Result<(), StoreError> {
        self.inner.append_tree_metadata(tree_id, entry).await
    }

    async fn set_node_count(&self, tree_id: TreeId, node_count: usize) -> Result<(), StoreError> {
        self.inner.set_node_count(tree_id, node_count).await
    }

    async fn add_referenced_tree(
        &self,
        node_id: NodeId,
        tree_id: TreeId,
    ) -> Result<(), StoreError> {
        self.inner.add_referenced_tree(node_id, tree_id).await
    }

    async fn replace_content(
        &self,
        node_id: NodeId,
        content: String,
    ) -> Result<NodeContent, StoreError> {
        self.inner.replace_content(node_id, content).await
    }

    async fn delete_tree(&self, tree_id: TreeId) -> Result<(), StoreError> {
        self.inner.delete_tree(tree_id).await
    }

    async fn snapshot(&self, tree_id: TreeId) -> Result<TreeSnapshot, StoreError> {
        self.inner.snapshot(tree_id).await
    }
}

/// Assembler wired to in-memory collaborators
pub struct AssemblerFixture<T: TreeStore + 'static> {
    pub trees: Arc<T>,
    pub progress: Arc<InMemoryProgressTracker>,
    pub assembler: TreeAssembler,
}

pub fn assembler_with<T: TreeStore + 'static>(
    trees: T,
    generator: Arc<dyn TextGenerator>,
    config: PipelineConfig,
) -> AssemblerFixture<T> {
    let trees = Arc::new(trees);
    let progress = Arc::new(InMemoryProgressTracker::new());
    let assembler = TreeAssembler::new(trees.clone(), generator, progress.clone(), config);
    AssemblerFixture {
        trees,
        progress,
        assembler,
    }
}

/// Service wired to in-memory collaborators
pub struct ServiceFixture {
    pub proposals: Arc<InMemoryProposalStore>,
    pub trees: Arc<InMemoryTreeStore>,
    pub progress: Arc<InMemoryProgressTracker>,
    pub service: ProposalService,
}

pub fn service_with(proposals: Vec<ProposedNode>, config: PipelineConfig) -> ServiceFixture {
    let store = Arc::new(InMemoryProposalStore::with_proposals(proposals));
    let fixture = assembler_with(
        InMemoryTreeStore::new(),
        Arc::new(treeforge_pipeline::HeuristicTextGenerator),
        config,
    );
    let service = ProposalService::new(
        store.clone(),
        Arc::new(fixture.assembler),
        fixture.progress.clone(),
    );
    ServiceFixture {
        proposals: store,
        trees: fixture.trees,
        progress: fixture.progress,
        service,
    }
}
