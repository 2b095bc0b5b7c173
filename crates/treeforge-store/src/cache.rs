//! Optional TTL cache in front of a proposal store
//!
//! Only the common listing query `(project, user, status)` is memoized.
//! Every write path invalidates: deletes drop the project's entries, status
//! transitions drop everything because the affected projects are not known
//! from the ids alone. Writes also bump a generation counter; a listing
//! loaded across a bump is not kept, so a slow read cannot re-cache rows an
//! invalidation already discarded.

use crate::error::StoreError;
use crate::proposals::{DeleteSelection, ProposalQuery, ProposalStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use treeforge_core::{ProjectId, ProposalId, ProposalStatus, ProposedNode, UserId};

/// Cache key for a listing query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListingKey {
    /// Project the listing is scoped to
    pub project_id: ProjectId,
    /// Submitter filter
    pub user_id: Option<UserId>,
    /// Status filter
    pub status: Option<ProposalStatus>,
}

impl ListingKey {
    /// Key for a query, if the query is cacheable
    #[must_use]
    pub fn for_query(query: &ProposalQuery) -> Option<Self> {
        if query.ids.is_some() {
            return None;
        }
        Some(Self {
            project_id: query.project_id?,
            user_id: query.user_id,
            status: query.status,
        })
    }
}

/// Proposal store decorated with a moka cache
#[derive(Debug)]
pub struct CachedProposalStore<S> {
    inner: Arc<S>,
    cache: Cache<ListingKey, Arc<Vec<ProposedNode>>>,
    generation: AtomicU64,
}

impl<S: ProposalStore> CachedProposalStore<S> {
    /// Wrap `inner`, expiring entries after `ttl`
    #[must_use]
    pub fn new(inner: Arc<S>, ttl: Duration) -> Self {
        Self::with_capacity(inner, ttl, 1_000)
    }

    /// Cache with an explicit entry bound
    #[must_use]
    pub fn with_capacity(inner: Arc<S>, ttl: Duration, max_capacity: u64) -> Self {
        Self {
            inner,
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .support_invalidation_closures()
                .build(),
            generation: AtomicU64::new(0),
        }
    }

    /// Wrapped store
    #[inline]
    #[must_use]
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    /// Approximate number of cached listings
    #[inline]
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn invalidate_project(&self, project_id: ProjectId) {
        self.bump_generation();
        if let Err(err) = self
            .cache
            .invalidate_entries_if(move |key, _| key.project_id == project_id)
        {
            tracing::warn!(%project_id, error = %err, "predicate invalidation failed, clearing cache");
            self.cache.invalidate_all();
        }
    }
}

#[async_trait]
impl<S: ProposalStore> ProposalStore for CachedProposalStore<S> {
    async fn list(&self, query: &ProposalQuery) -> Result<Vec<ProposedNode>, StoreError> {
        let Some(key) = ListingKey::for_query(query) else {
            return self.inner.list(query).await;
        };
        if let Some(hit) = self.cache.get(&key).await {
            tracing::trace!(project_id = %key.project_id, "proposal cache hit");
            return Ok(hit.as_ref().clone());
        }
        let loaded_at = self.generation.load(Ordering::Acquire);
        let rows = self.inner.list(query).await?;
        if self.generation.load(Ordering::Acquire) != loaded_at {
            tracing::debug!(project_id = %key.project_id, "listing raced a write, not caching");
            return Ok(rows);
        }
        self.cache.insert(key, Arc::new(rows.clone())).await;
        // a write landing during the insert bumps first, then invalidates
        if self.generation.load(Ordering::Acquire) != loaded_at {
            self.cache.invalidate(&key).await;
        }
        Ok(rows)
    }

    async fn insert(&self, proposals: Vec<ProposedNode>) -> Result<usize, StoreError> {
        let projects: Vec<ProjectId> = proposals.iter().map(|p| p.project_id).collect();
        let count = self.inner.insert(proposals).await?;
        for project_id in projects {
            self.invalidate_project(project_id);
        }
        Ok(count)
    }

    async fn update_status(
        &self,
        ids: &[ProposalId],
        status: ProposalStatus,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let changed = self.inner.update_status(ids, status, at).await?;
        if changed > 0 {
            self.bump_generation();
            self.cache.invalidate_all();
        }
        Ok(changed)
    }

    async fn delete(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        selection: &DeleteSelection,
    ) -> Result<usize, StoreError> {
        let removed = self.inner.delete(project_id, user_id, selection).await?;
        self.invalidate_project(project_id);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposals::InMemoryProposalStore;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;
    use treeforge_core::NodeJson;

    /// Pauses the first listing after it has read its rows
    #[derive(Debug, Default)]
    struct PausingStore {
        inner: InMemoryProposalStore,
        armed: AtomicBool,
        paused: Notify,
        resume: Notify,
    }

    #[async_trait]
    impl ProposalStore for PausingStore {
        async fn list(&self, query: &ProposalQuery) -> Result<Vec<ProposedNode>, StoreError> {
            let rows = self.inner.list(query).await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.paused.notify_one();
                self.resume.notified().await;
            }
            Ok(rows)
        }

        async fn insert(&self, proposals: Vec<ProposedNode>) -> Result<usize, StoreError> {
            self.inner.insert(proposals).await
        }

        async fn update_status(
            &self,
            ids: &[ProposalId],
            status: ProposalStatus,
            at: DateTime<Utc>,
        ) -> Result<usize, StoreError> {
            self.inner.update_status(ids, status, at).await
        }

        async fn delete(
            &self,
            project_id: ProjectId,
            user_id: UserId,
            selection: &DeleteSelection,
        ) -> Result<usize, StoreError> {
            self.inner.delete(project_id, user_id, selection).await
        }
    }

    fn proposal(project: ProjectId, user: UserId) -> ProposedNode {
        ProposedNode::new(
            project,
            user,
            NodeJson {
                title: "x".into(),
                ..NodeJson::default()
            },
        )
    }

    #[test]
    fn id_queries_are_not_cacheable() {
        let query = ProposalQuery::for_project(ProjectId::new()).with_ids(vec![ProposalId::new()]);
        assert!(ListingKey::for_query(&query).is_none());
        assert!(ListingKey::for_query(&ProposalQuery::default()).is_none());
    }

    #[tokio::test]
    async fn status_transition_invalidates_listing() {
        let (project, user) = (ProjectId::new(), UserId::new());
        let p = proposal(project, user);
        let backing = Arc::new(InMemoryProposalStore::with_proposals(vec![p.clone()]));
        let store = CachedProposalStore::new(backing, Duration::from_secs(60));

        let query = ProposalQuery::for_project(project)
            .with_user(user)
            .with_status(ProposalStatus::Proposed);
        assert_eq!(store.list(&query).await.unwrap().len(), 1);

        store
            .update_status(&[p.id], ProposalStatus::Accepted, Utc::now())
            .await
            .unwrap();
        assert!(store.list(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_invalidates_project_listing() {
        let (project, user) = (ProjectId::new(), UserId::new());
        let backing = Arc::new(InMemoryProposalStore::with_proposals(vec![
            proposal(project, user),
            proposal(project, user),
        ]));
        let store = CachedProposalStore::new(backing, Duration::from_secs(60));
        let query = ProposalQuery::for_project(project).with_user(user);

        assert_eq!(store.list(&query).await.unwrap().len(), 2);
        store.delete(project, user, &DeleteSelection::All).await.unwrap();
        assert!(store.list(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_loaded_across_a_write_is_not_cached() {
        let (project, user) = (ProjectId::new(), UserId::new());
        let p = proposal(project, user);
        let backing = Arc::new(PausingStore {
            inner: InMemoryProposalStore::with_proposals(vec![p.clone()]),
            armed: AtomicBool::new(true),
            ..PausingStore::default()
        });
        let store = Arc::new(CachedProposalStore::new(backing.clone(), Duration::from_secs(60)));
        let query = ProposalQuery::for_project(project).with_status(ProposalStatus::Proposed);

        let slow = tokio::spawn({
            let store = store.clone();
            let query = query.clone();
            async move { store.list(&query).await }
        });
        backing.paused.notified().await;
        store
            .update_status(&[p.id], ProposalStatus::Accepted, Utc::now())
            .await
            .unwrap();
        backing.resume.notify_one();

        assert_eq!(slow.await.unwrap().unwrap().len(), 1);
        assert!(store.list(&query).await.unwrap().is_empty());
    }
}
