//! Proposal service
//!
//! Framework-agnostic handlers behind the proposals HTTP surface. All
//! request validation happens here, synchronously, so that a background
//! build only ever starts with a buildable selection.

use crate::assembler::{AssemblyReport, AssemblyRequest, TreeAssembler};
use crate::error::ServiceError;
use crate::progress::{JobRecord, ProgressTracker};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use treeforge_core::{JobId, ProjectId, ProposalId, ProposalStatus, ProposedNode, TreeId, UserId};
use treeforge_store::{DeleteSelection, ProposalQuery, ProposalStore, TreeSnapshot};

/// Accept request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptRequest {
    /// Project of the proposals
    pub project_id: ProjectId,
    /// Requesting user
    pub user_id: UserId,
    /// Proposals to accept
    pub proposal_ids: Vec<ProposalId>,
    /// Append to this tree instead of creating one
    #[serde(default)]
    pub tree_id: Option<TreeId>,
}

/// Result of a synchronous accept
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptOutcome {
    /// Always true for a returned outcome
    pub success: bool,
    /// Tree that was built
    pub tree_id: TreeId,
    /// Nodes inserted
    pub nodes_created: usize,
    /// Nested trees created
    pub nested_trees_created: usize,
    /// Full build report
    pub report: AssemblyReport,
}

/// Duplicate-submission key: project, user, sorted proposal ids
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubmissionKey {
    project_id: ProjectId,
    user_id: UserId,
    proposal_ids: Vec<ProposalId>,
}

impl SubmissionKey {
    /// Key for a selection; id order and duplicates do not matter
    #[must_use]
    pub fn new(project_id: ProjectId, user_id: UserId, ids: &[ProposalId]) -> Self {
        let mut proposal_ids = ids.to_vec();
        proposal_ids.sort();
        proposal_ids.dedup();
        Self {
            project_id,
            user_id,
            proposal_ids,
        }
    }
}

/// Releases a submission key when its job ends, including by panic
#[derive(Debug)]
struct InFlightGuard {
    in_flight: Arc<DashMap<SubmissionKey, JobId>>,
    key: SubmissionKey,
    job_id: JobId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .remove_if(&self.key, |_, running| *running == self.job_id);
    }
}

/// Review operations and job handling over the proposal and tree stores
#[derive(Debug, Clone)]
pub struct ProposalService {
    proposals: Arc<dyn ProposalStore>,
    assembler: Arc<TreeAssembler>,
    progress: Arc<dyn ProgressTracker>,
    in_flight: Arc<DashMap<SubmissionKey, JobId>>,
}

impl ProposalService {
    /// Service over the given stores
    #[must_use]
    pub fn new(
        proposals: Arc<dyn ProposalStore>,
        assembler: Arc<TreeAssembler>,
        progress: Arc<dyn ProgressTracker>,
    ) -> Self {
        Self {
            proposals,
            assembler,
            progress,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Validate and start a background build; returns immediately
    pub async fn accept(&self, request: AcceptRequest) -> Result<JobId, ServiceError> {
        let key = SubmissionKey::new(request.project_id, request.user_id, &request.proposal_ids);
        let dedupe = self.assembler.config().dedupe_submissions;
        if dedupe {
            if let Some(job_id) = self.in_flight.get(&key).map(|j| *j) {
                tracing::info!(%job_id, "duplicate submission, returning in-flight job");
                return Ok(job_id);
            }
        }

        let proposals = self.validate_accept(&request).await?;
        let job_id = JobId::new();

        if dedupe {
            match self.in_flight.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(existing) => {
                    return Ok(*existing.get());
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(job_id);
                }
            }
        }

        self.progress.create(job_id).await;
        tracing::info!(%job_id, proposals = proposals.len(), "accept job queued");

        let service = self.clone();
        let assembly = AssemblyRequest {
            project_id: request.project_id,
            user_id: request.user_id,
            tree_id: request.tree_id,
            job_id: Some(job_id),
            proposals,
        };
        let guard = dedupe.then(|| InFlightGuard {
            in_flight: self.in_flight.clone(),
            key,
            job_id,
        });
        let handle = tokio::spawn(async move {
            let _guard = guard;
            if let Err(err) = service.build_and_mark(assembly).await {
                tracing::error!(%job_id, error = %err, "background accept failed");
            }
        });

        let progress = self.progress.clone();
        tokio::spawn(async move {
            if let Err(err) = handle.await {
                tracing::error!(%job_id, error = %err, "background accept aborted");
                progress
                    .error(job_id, format!("build aborted: {err}"))
                    .await;
            }
        });

        Ok(job_id)
    }

    /// Validate and build inline
    pub async fn accept_sync(&self, request: AcceptRequest) -> Result<AcceptOutcome, ServiceError> {
        let proposals = self.validate_accept(&request).await?;
        let report = self
            .build_and_mark(AssemblyRequest {
                project_id: request.project_id,
                user_id: request.user_id,
                tree_id: request.tree_id,
                job_id: None,
                proposals,
            })
            .await?;
        Ok(AcceptOutcome {
            success: true,
            tree_id: report.tree_id,
            nodes_created: report.nodes_created,
            nested_trees_created: report.nested_trees_created(),
            report,
        })
    }

    /// Mark proposals rejected; returns how many changed
    pub async fn reject(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        ids: &[ProposalId],
    ) -> Result<usize, ServiceError> {
        let found = self.load_selection(project_id, user_id, ids).await?;
        let pending: Vec<ProposalId> = found
            .iter()
            .filter(|p| p.status == ProposalStatus::Proposed)
            .map(|p| p.id)
            .collect();
        let changed = self
            .proposals
            .update_status(&pending, ProposalStatus::Rejected, Utc::now())
            .await?;
        tracing::info!(%project_id, rejected = changed, "proposals rejected");
        Ok(changed)
    }

    /// Proposals of a project, optionally filtered
    pub async fn list(
        &self,
        project_id: ProjectId,
        user_id: Option<UserId>,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<ProposedNode>, ServiceError> {
        let mut query = ProposalQuery::for_project(project_id);
        query.user_id = user_id;
        query.status = status;
        Ok(self.proposals.list(&query).await?)
    }

    /// Delete proposals by id or all of a user's
    pub async fn delete(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        selection: DeleteSelection,
    ) -> Result<usize, ServiceError> {
        if matches!(&selection, DeleteSelection::Ids(ids) if ids.is_empty()) {
            return Err(ServiceError::validation(
                "either clearAll or a non-empty proposalIds list is required",
            ));
        }
        let removed = self.proposals.delete(project_id, user_id, &selection).await?;
        tracing::info!(%project_id, removed, "proposals deleted");
        Ok(removed)
    }

    /// Job record by id
    pub async fn job(&self, job_id: JobId) -> Result<JobRecord, ServiceError> {
        self.progress
            .get(job_id)
            .await
            .ok_or_else(|| ServiceError::not_found(format!("job {job_id}")))
    }

    /// Stored tree with its nodes
    pub async fn tree(&self, tree_id: TreeId) -> Result<TreeSnapshot, ServiceError> {
        Ok(self.assembler.trees().snapshot(tree_id).await?)
    }

    async fn build_and_mark(&self, request: AssemblyRequest) -> Result<AssemblyReport, ServiceError> {
        let ids: Vec<ProposalId> = request.proposals.iter().map(|p| p.id).collect();
        let report = self.assembler.assemble(request).await?;

        match self
            .proposals
            .update_status(&ids, ProposalStatus::Accepted, Utc::now())
            .await
        {
            Ok(changed) => tracing::debug!(accepted = changed, "proposals marked accepted"),
            Err(err) => tracing::warn!(
                tree_id = %report.tree_id,
                error = %err,
                "tree built but proposals could not be marked accepted"
            ),
        }
        Ok(report)
    }

    /// Selected proposals, in request order; 404 if any id is unknown or
    /// belongs to someone else
    async fn load_selection(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        ids: &[ProposalId],
    ) -> Result<Vec<ProposedNode>, ServiceError> {
        if ids.is_empty() {
            return Err(ServiceError::validation("no proposals selected"));
        }
        let query = ProposalQuery::for_project(project_id)
            .with_user(user_id)
            .with_ids(ids.to_vec());
        let mut found: HashMap<ProposalId, ProposedNode> = self
            .proposals
            .list(&query)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !found.contains_key(*id))
            .map(ToString::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(ServiceError::not_found(format!(
                "proposals not found: {}",
                missing.join(", ")
            )));
        }

        let mut ordered = Vec::with_capacity(found.len());
        for id in ids {
            if let Some(p) = found.remove(id) {
                ordered.push(p);
            }
        }
        Ok(ordered)
    }

    async fn validate_accept(&self, request: &AcceptRequest) -> Result<Vec<ProposedNode>, ServiceError> {
        let selection = self
            .load_selection(request.project_id, request.user_id, &request.proposal_ids)
            .await?;

        let (pending, reviewed): (Vec<_>, Vec<_>) = selection
            .into_iter()
            .partition(|p| p.status == ProposalStatus::Proposed);
        for p in &reviewed {
            tracing::warn!(proposal_id = %p.id, status = %p.status, "skipping proposal that is not pending");
        }
        if pending.is_empty() {
            return Err(ServiceError::validation("none of the selected proposals are pending"));
        }
        if pending.iter().all(ProposedNode::is_nested) {
            return Err(ServiceError::validation(
                "all selected proposals are nested trees; select at least one top-level node",
            ));
        }

        if let Some(tree_id) = request.tree_id {
            let tree = self
                .assembler
                .trees()
                .get_tree(tree_id)
                .await
                .map_err(|err| {
                    if err.is_not_found() {
                        ServiceError::not_found(format!("tree {tree_id}"))
                    } else {
                        ServiceError::Store(err)
                    }
                })?;
            if tree.project_id != request.project_id {
                return Err(ServiceError::not_found(format!("tree {tree_id}")));
            }
        }

        Ok(pending)
    }
}
