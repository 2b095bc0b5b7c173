//! Proposal store contract and in-memory backend

use crate::error::{StoreError, Table};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use treeforge_core::{ProjectId, ProposalId, ProposalStatus, ProposedNode, UserId};

/// Filter for [`ProposalStore::list`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ProposalQuery {
    /// Restrict to one project
    pub project_id: Option<ProjectId>,
    /// Restrict to one submitter
    pub user_id: Option<UserId>,
    /// Restrict to one status
    pub status: Option<ProposalStatus>,
    /// Restrict to these ids
    pub ids: Option<Vec<ProposalId>>,
}

impl ProposalQuery {
    /// Query scoped to a project
    #[must_use]
    pub fn for_project(project_id: ProjectId) -> Self {
        Self {
            project_id: Some(project_id),
            ..Self::default()
        }
    }

    /// Add a submitter filter
    #[must_use]
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Add a status filter
    #[must_use]
    pub fn with_status(mut self, status: ProposalStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Add an id filter
    #[must_use]
    pub fn with_ids(mut self, ids: Vec<ProposalId>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Whether a proposal passes the filter
    #[must_use]
    pub fn matches(&self, proposal: &ProposedNode) -> bool {
        self.project_id.map_or(true, |p| proposal.project_id == p)
            && self.user_id.map_or(true, |u| proposal.user_id == u)
            && self.status.map_or(true, |s| proposal.status == s)
            && self
                .ids
                .as_ref()
                .map_or(true, |ids| ids.contains(&proposal.id))
    }
}

/// Which proposals a delete removes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteSelection {
    /// Every proposal of the project/user
    All,
    /// Only these ids (still scoped to the project/user)
    Ids(Vec<ProposalId>),
}

/// Query/update interface over proposed nodes
#[async_trait]
pub trait ProposalStore: Send + Sync + std::fmt::Debug {
    /// Proposals matching the query, oldest first
    async fn list(&self, query: &ProposalQuery) -> Result<Vec<ProposedNode>, StoreError>;

    /// Insert extracted proposals
    async fn insert(&self, proposals: Vec<ProposedNode>) -> Result<usize, StoreError>;

    /// Transition proposals out of `proposed`. Returns how many changed;
    /// proposals not currently `proposed` are left untouched.
    async fn update_status(
        &self,
        ids: &[ProposalId],
        status: ProposalStatus,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Delete proposals owned by `project_id`/`user_id`
    async fn delete(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        selection: &DeleteSelection,
    ) -> Result<usize, StoreError>;
}

/// Process-local proposal store
#[derive(Debug, Default)]
pub struct InMemoryProposalStore {
    rows: RwLock<IndexMap<ProposalId, ProposedNode>>,
}

impl InMemoryProposalStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with proposals
    #[must_use]
    pub fn with_proposals(proposals: impl IntoIterator<Item = ProposedNode>) -> Self {
        let store = Self::new();
        {
            let mut rows = store.rows.write();
            for proposal in proposals {
                rows.insert(proposal.id, proposal);
            }
        }
        store
    }

    /// Single proposal by id
    #[must_use]
    pub fn get(&self, id: ProposalId) -> Option<ProposedNode> {
        self.rows.read().get(&id).cloned()
    }

    /// Number of stored proposals
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// True when no proposals are stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl ProposalStore for InMemoryProposalStore {
    async fn list(&self, query: &ProposalQuery) -> Result<Vec<ProposedNode>, StoreError> {
        let rows = self.rows.read();
        let mut found: Vec<ProposedNode> = rows.values().filter(|p| query.matches(p)).cloned().collect();
        found.sort_by_key(|p| p.created_at);
        Ok(found)
    }

    async fn insert(&self, proposals: Vec<ProposedNode>) -> Result<usize, StoreError> {
        let mut rows = self.rows.write();
        if let Some(dup) = proposals.iter().find(|p| rows.contains_key(&p.id)) {
            return Err(StoreError::constraint(
                Table::Proposals,
                format!("duplicate proposal id {}", dup.id),
            ));
        }
        let count = proposals.len();
        for proposal in proposals {
            rows.insert(proposal.id, proposal);
        }
        Ok(count)
    }

    async fn update_status(
        &self,
        ids: &[ProposalId],
        status: ProposalStatus,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut rows = self.rows.write();
        let mut changed = 0;
        for id in ids {
            let Some(row) = rows.get_mut(id) else {
                continue;
            };
            if row.status.can_transition_to(status) {
                row.status = status;
                row.reviewed_at = Some(at);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn delete(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        selection: &DeleteSelection,
    ) -> Result<usize, StoreError> {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|id, p| {
            let owned = p.project_id == project_id && p.user_id == user_id;
            let selected = match selection {
                DeleteSelection::All => true,
                DeleteSelection::Ids(ids) => ids.contains(id),
            };
            !(owned && selected)
        });
        Ok(before - rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use treeforge_core::NodeJson;

    fn proposal(project: ProjectId, user: UserId, title: &str) -> ProposedNode {
        ProposedNode::new(
            project,
            user,
            NodeJson {
                title: title.to_string(),
                ..NodeJson::default()
            },
        )
    }

    #[tokio::test]
    async fn list_filters_by_project_user_and_status() {
        let (project, user) = (ProjectId::new(), UserId::new());
        let a = proposal(project, user, "a");
        let b = proposal(project, UserId::new(), "b");
        let c = proposal(ProjectId::new(), user, "c");
        let store = InMemoryProposalStore::with_proposals(vec![a.clone(), b, c]);

        let found = store
            .list(&ProposalQuery::for_project(project).with_user(user))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a.id);

        let accepted = store
            .list(&ProposalQuery::for_project(project).with_status(ProposalStatus::Accepted))
            .await
            .unwrap();
        assert!(accepted.is_empty());
    }

    #[tokio::test]
    async fn update_status_only_moves_proposed_rows() {
        let (project, user) = (ProjectId::new(), UserId::new());
        let a = proposal(project, user, "a");
        let store = InMemoryProposalStore::with_proposals(vec![a.clone()]);

        let now = Utc::now();
        assert_eq!(store.update_status(&[a.id], ProposalStatus::Accepted, now).await.unwrap(), 1);
        assert_eq!(store.update_status(&[a.id], ProposalStatus::Rejected, now).await.unwrap(), 0);

        let row = store.get(a.id).unwrap();
        assert_eq!(row.status, ProposalStatus::Accepted);
        assert_eq!(row.reviewed_at, Some(now));
    }

    #[tokio::test]
    async fn delete_is_scoped_to_owner() {
        let (project, user) = (ProjectId::new(), UserId::new());
        let mine = proposal(project, user, "mine");
        let theirs = proposal(project, UserId::new(), "theirs");
        let store = InMemoryProposalStore::with_proposals(vec![mine.clone(), theirs.clone()]);

        let removed = store
            .delete(project, user, &DeleteSelection::Ids(vec![mine.id, theirs.id]))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(theirs.id).is_some());

        let removed = store.delete(project, user, &DeleteSelection::All).await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids() {
        let p = proposal(ProjectId::new(), UserId::new(), "dup");
        let store = InMemoryProposalStore::new();
        store.insert(vec![p.clone()]).await.unwrap();
        let err = store.insert(vec![p]).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint { table: Table::Proposals, .. }));
    }
}
