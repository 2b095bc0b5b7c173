//! Wiring of the in-process collaborators

use anyhow::Context;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use treeforge_core::{NodeJson, ProjectId, ProposedNode, UserId};
use treeforge_pipeline::{
    AcceptOutcome, AcceptRequest, HeuristicTextGenerator, InMemoryProgressTracker,
    PipelineConfig, ProposalService, TreeAssembler,
};
use treeforge_store::{
    CachedProposalStore, InMemoryProposalStore, InMemoryTreeStore, ProposalStore, TreeSnapshot,
};

/// Config from `path`, or defaults
pub(crate) fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => {
            let config = PipelineConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?;
            tracing::info!(path = %path.display(), "loaded pipeline config");
            Ok(config)
        }
        None => Ok(PipelineConfig::default()),
    }
}

/// Proposals file: a JSON array of extractor payloads
pub(crate) fn read_proposals(
    path: &Path,
    project_id: ProjectId,
    user_id: UserId,
) -> anyhow::Result<Vec<ProposedNode>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading proposals from {}", path.display()))?;
    parse_proposals(&raw, project_id, user_id)
        .with_context(|| format!("parsing proposals in {}", path.display()))
}

fn parse_proposals(
    raw: &str,
    project_id: ProjectId,
    user_id: UserId,
) -> anyhow::Result<Vec<ProposedNode>> {
    let payloads: Vec<NodeJson> = serde_json::from_str(raw)?;
    anyhow::ensure!(!payloads.is_empty(), "proposals file is empty");
    Ok(payloads
        .into_iter()
        .map(|json| ProposedNode::new(project_id, user_id, json))
        .collect())
}

/// Output of a one-shot build
#[derive(Debug, Serialize)]
pub(crate) struct BuildOutput {
    pub(crate) outcome: AcceptOutcome,
    pub(crate) tree: TreeSnapshot,
}

#[derive(Debug, Clone)]
pub(crate) struct App {
    proposals: Arc<dyn ProposalStore>,
    service: ProposalService,
}

impl App {
    pub(crate) fn new(config: PipelineConfig) -> Self {
        let store = Arc::new(InMemoryProposalStore::new());
        let proposals: Arc<dyn ProposalStore> = match config.proposal_cache_ttl() {
            Some(ttl) => {
                tracing::info!(ttl_secs = ttl.as_secs(), "proposal listing cache enabled");
                Arc::new(CachedProposalStore::new(store, ttl))
            }
            None => store as Arc<dyn ProposalStore>,
        };

        let progress = Arc::new(InMemoryProgressTracker::with_retention(
            config.job_retention(),
            config.max_tracked_jobs,
        ));
        let assembler = TreeAssembler::new(
            Arc::new(InMemoryTreeStore::new()),
            Arc::new(HeuristicTextGenerator),
            progress.clone(),
            config,
        );
        let service = ProposalService::new(proposals.clone(), Arc::new(assembler), progress);
        Self { proposals, service }
    }

    #[inline]
    pub(crate) fn service(&self) -> &ProposalService {
        &self.service
    }

    /// Store `proposals`, accept all of them inline and read the tree back
    pub(crate) async fn build_once(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        proposals: Vec<ProposedNode>,
    ) -> anyhow::Result<BuildOutput> {
        let proposal_ids = proposals.iter().map(|p| p.id).collect();
        self.proposals.insert(proposals).await?;

        let outcome = self
            .service
            .accept_sync(AcceptRequest {
                project_id,
                user_id,
                proposal_ids,
                tree_id: None,
            })
            .await?;
        let tree = self.service.tree(outcome.tree_id).await?;
        Ok(BuildOutput { outcome, tree })
    }
}
