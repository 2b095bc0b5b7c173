//! Proposal service: validation, background jobs, review operations

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use treeforge_core::{JobId, ProposalId, ProposalStatus, TreeId};
use treeforge_pipeline::{
    AcceptRequest, HeuristicTextGenerator, InMemoryProgressTracker, JobRecord, JobStatus,
    PipelineConfig, ProposalService, ServiceError, TextGenError, TextGenerator, TreeAssembler,
};
use treeforge_store::{
    CachedProposalStore, DeleteSelection, InMemoryProposalStore, InMemoryTreeStore,
    ProposalQuery, ProposalStore,
};
use treeforge_test_utils::{owner, rna_pcr_scenario, service_with, ProposalBuilder};

fn accept_all(proposals: &[treeforge_core::ProposedNode]) -> AcceptRequest {
    AcceptRequest {
        project_id: proposals[0].project_id,
        user_id: proposals[0].user_id,
        proposal_ids: proposals.iter().map(|p| p.id).collect(),
        tree_id: None,
    }
}

async fn wait_for_job(service: &ProposalService, job_id: JobId) -> JobRecord {
    for _ in 0..200 {
        let job = service.job(job_id).await.unwrap();
        if job.status != JobStatus::Running {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {job_id} did not finish");
}

#[tokio::test]
async fn accept_runs_in_background_and_marks_proposals() {
    let (project, user) = owner();
    let proposals = rna_pcr_scenario(project, user);
    let request = accept_all(&proposals);
    let fixture = service_with(proposals, PipelineConfig::default());

    let job_id = fixture.service.accept(request.clone()).await.unwrap();
    let job = wait_for_job(&fixture.service, job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.percent, 100);
    for id in &request.proposal_ids {
        let stored = fixture.proposals.get(*id).unwrap();
        assert_eq!(stored.status, ProposalStatus::Accepted);
        assert!(stored.reviewed_at.is_some());
    }
    assert_eq!(fixture.trees.tree_ids().len(), 1);
}

#[tokio::test]
async fn accept_sync_reports_counts() {
    let (project, user) = owner();
    let mut proposals = rna_pcr_scenario(project, user);
    proposals.push(
        ProposalBuilder::new(project, user, "Staining protocol")
            .text("1. Fix\n2. Stain")
            .nested()
            .build(),
    );
    let request = accept_all(&proposals);
    let fixture = service_with(proposals, PipelineConfig::default());

    let outcome = fixture.service.accept_sync(request).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.nodes_created, 4);
    assert_eq!(outcome.nested_trees_created, 1);
    let snapshot = fixture.service.tree(outcome.tree_id).await.unwrap();
    assert_eq!(snapshot.summary.total_nodes, 4);
}

#[tokio::test]
async fn empty_selection_is_a_validation_error() {
    let (project, user) = owner();
    let fixture = service_with(Vec::new(), PipelineConfig::default());

    let err = fixture
        .service
        .accept(AcceptRequest {
            project_id: project,
            user_id: user,
            proposal_ids: Vec::new(),
            tree_id: None,
        })
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn unknown_or_foreign_proposals_are_not_found() {
    let (project, user) = owner();
    let (_, other_user) = owner();
    let mine = ProposalBuilder::new(project, user, "Mine").text("m").build();
    let theirs = ProposalBuilder::new(project, other_user, "Theirs").text("t").build();
    let fixture = service_with(vec![mine.clone(), theirs.clone()], PipelineConfig::default());

    let unknown = fixture
        .service
        .accept(AcceptRequest {
            project_id: project,
            user_id: user,
            proposal_ids: vec![mine.id, ProposalId::new()],
            tree_id: None,
        })
        .await
        .unwrap_err();
    assert_eq!(unknown.status_code(), 404);

    let foreign = fixture
        .service
        .accept(AcceptRequest {
            project_id: project,
            user_id: user,
            proposal_ids: vec![theirs.id],
            tree_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(foreign, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn selection_of_only_nested_proposals_is_rejected() {
    let (project, user) = owner();
    let nested = ProposalBuilder::new(project, user, "Sub-protocol")
        .text("1. a\n2. b")
        .nested()
        .build();
    let fixture = service_with(vec![nested.clone()], PipelineConfig::default());

    let err = fixture
        .service
        .accept(accept_all(&[nested]))
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(err.to_string().contains("nested"));
}

#[tokio::test]
async fn already_reviewed_proposals_cannot_be_accepted_again() {
    let (project, user) = owner();
    let proposals = rna_pcr_scenario(project, user);
    let request = accept_all(&proposals);
    let fixture = service_with(proposals, PipelineConfig::default());

    fixture.service.accept_sync(request.clone()).await.unwrap();
    let err = fixture.service.accept_sync(request).await.unwrap_err();

    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn unknown_target_tree_is_not_found() {
    let (project, user) = owner();
    let proposals = rna_pcr_scenario(project, user);
    let mut request = accept_all(&proposals);
    request.tree_id = Some(TreeId::new());
    let fixture = service_with(proposals, PipelineConfig::default());

    let err = fixture.service.accept(request).await.unwrap_err();

    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn duplicate_submission_returns_in_flight_job() {
    let (project, user) = owner();
    let proposals = rna_pcr_scenario(project, user);
    let request = accept_all(&proposals);
    let fixture = service_with(
        proposals,
        PipelineConfig::default().with_dedupe_submissions(true),
    );

    let mut reordered = request.clone();
    reordered.proposal_ids.reverse();
    let first = fixture.service.accept(request).await.unwrap();
    let second = fixture.service.accept(reordered).await.unwrap();

    assert_eq!(first, second);
    let job = wait_for_job(&fixture.service, first).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(fixture.trees.tree_ids().len(), 1);
}

/// Panics on the first tree name, then behaves like the heuristic generator
#[derive(Debug, Default)]
struct PanicOnce {
    fired: AtomicBool,
}

#[async_trait]
impl TextGenerator for PanicOnce {
    async fn generate_tree_name(&self, excerpts: &[String]) -> Result<String, TextGenError> {
        assert!(self.fired.swap(true, Ordering::SeqCst), "namer crashed");
        HeuristicTextGenerator.generate_tree_name(excerpts).await
    }

    async fn format_content(&self, raw: &str) -> Result<String, TextGenError> {
        HeuristicTextGenerator.format_content(raw).await
    }

    async fn summarize(&self, text: &str, max_chars: usize) -> Result<String, TextGenError> {
        HeuristicTextGenerator.summarize(text, max_chars).await
    }
}

#[tokio::test]
async fn panicked_job_releases_its_submission() {
    let (project, user) = owner();
    let proposals = rna_pcr_scenario(project, user);
    let request = accept_all(&proposals);
    let first_id = request.proposal_ids[0];

    let store = Arc::new(InMemoryProposalStore::with_proposals(proposals));
    let progress = Arc::new(InMemoryProgressTracker::new());
    let assembler = Arc::new(TreeAssembler::new(
        Arc::new(InMemoryTreeStore::new()),
        Arc::new(PanicOnce::default()),
        progress.clone(),
        PipelineConfig::default().with_dedupe_submissions(true),
    ));
    let service = ProposalService::new(store.clone(), assembler, progress);

    let crashed = service.accept(request.clone()).await.unwrap();
    let job = wait_for_job(&service, crashed).await;
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.message.contains("aborted"));

    let retried = service.accept(request).await.unwrap();
    assert_ne!(retried, crashed);
    let job = wait_for_job(&service, retried).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(store.get(first_id).unwrap().status, ProposalStatus::Accepted);
}

#[tokio::test]
async fn reject_only_touches_pending_proposals() {
    let (project, user) = owner();
    let proposals = rna_pcr_scenario(project, user);
    let ids: Vec<ProposalId> = proposals.iter().map(|p| p.id).collect();
    let fixture = service_with(proposals, PipelineConfig::default());

    assert_eq!(fixture.service.reject(project, user, &ids[..1]).await.unwrap(), 1);
    assert_eq!(fixture.service.reject(project, user, &ids).await.unwrap(), 2);

    let rejected = fixture
        .service
        .list(project, Some(user), Some(ProposalStatus::Rejected))
        .await
        .unwrap();
    assert_eq!(rejected.len(), 3);
}

#[tokio::test]
async fn delete_requires_a_selection() {
    let (project, user) = owner();
    let proposals = rna_pcr_scenario(project, user);
    let first = proposals[0].id;
    let fixture = service_with(proposals, PipelineConfig::default());

    let err = fixture
        .service
        .delete(project, user, DeleteSelection::Ids(Vec::new()))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);

    let removed = fixture
        .service
        .delete(project, user, DeleteSelection::Ids(vec![first]))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    let removed = fixture
        .service
        .delete(project, user, DeleteSelection::All)
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert!(fixture.proposals.is_empty());
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let fixture = service_with(Vec::new(), PipelineConfig::default());
    let err = fixture.service.job(JobId::new()).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn cached_listing_reflects_accepted_status() {
    let (project, user) = owner();
    let proposals = rna_pcr_scenario(project, user);
    let request = accept_all(&proposals);

    let inner = Arc::new(InMemoryProposalStore::with_proposals(proposals));
    let cached = Arc::new(CachedProposalStore::new(inner, Duration::from_secs(60)));
    let progress = Arc::new(InMemoryProgressTracker::new());
    let assembler = Arc::new(TreeAssembler::new(
        Arc::new(InMemoryTreeStore::new()),
        Arc::new(HeuristicTextGenerator),
        progress.clone(),
        PipelineConfig::default(),
    ));
    let service = ProposalService::new(cached.clone(), assembler, progress);

    let pending = service
        .list(project, None, Some(ProposalStatus::Proposed))
        .await
        .unwrap();
    assert_eq!(pending.len(), 3);

    service.accept_sync(request).await.unwrap();

    let pending = service
        .list(project, None, Some(ProposalStatus::Proposed))
        .await
        .unwrap();
    assert!(pending.is_empty());
    let accepted = cached
        .list(&ProposalQuery::for_project(project).with_status(ProposalStatus::Accepted))
        .await
        .unwrap();
    assert_eq!(accepted.len(), 3);
}
