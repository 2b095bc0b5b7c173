//! Job progress tracking
//!
//! Last write wins; callers poll [`ProgressTracker::get`]. Reporting is a
//! side channel and never fails the build.

use crate::stage::BuildStage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::Entry;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use treeforge_core::JobId;

/// Lifecycle of a tracked job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Build in progress
    Running,
    /// Build finished
    Completed,
    /// Build failed
    Error,
}

/// Incremental progress within a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Stage being reported
    pub stage: BuildStage,
    /// Items done in the stage
    pub current: usize,
    /// Items in the stage
    pub total: usize,
    /// Human-readable status line
    pub message: String,
}

impl ProgressUpdate {
    /// Update for `stage`
    #[must_use]
    pub fn new(stage: BuildStage, current: usize, total: usize, message: impl Into<String>) -> Self {
        Self {
            stage,
            current,
            total,
            message: message.into(),
        }
    }

    /// Overall percentage: the stage's band, interpolated by current/total
    #[must_use]
    pub fn percent(&self) -> u8 {
        let (lo, hi) = self.stage.progress_band();
        if self.total == 0 {
            return lo;
        }
        let span = u64::from(hi - lo);
        let done = u64::try_from(self.current.min(self.total)).unwrap_or(u64::MAX);
        let total = u64::try_from(self.total).unwrap_or(u64::MAX);
        let step = u8::try_from(span.saturating_mul(done) / total).unwrap_or(hi - lo);
        lo + step
    }
}

/// Pollable job state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Job id
    pub job_id: JobId,
    /// Lifecycle state
    pub status: JobStatus,
    /// Last reported stage
    pub stage: BuildStage,
    /// Items done in the stage
    pub current: usize,
    /// Items in the stage
    pub total: usize,
    /// Stage progress, 0 to 100
    pub percent: u8,
    /// Last status line
    pub message: String,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the record last changed
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn started(job_id: JobId) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            status: JobStatus::Running,
            stage: BuildStage::Initializing,
            current: 0,
            total: 0,
            percent: 0,
            message: "Queued".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Job progress storage polled by clients
#[async_trait]
pub trait ProgressTracker: Send + Sync + std::fmt::Debug {
    /// Register a running job
    async fn create(&self, job_id: JobId);

    /// Record stage progress
    async fn update(&self, job_id: JobId, update: ProgressUpdate);

    /// Mark the job completed
    async fn complete(&self, job_id: JobId, message: String);

    /// Mark the job failed
    async fn error(&self, job_id: JobId, message: String);

    /// Current record, if still retained
    async fn get(&self, job_id: JobId) -> Option<JobRecord>;
}

/// Process-local tracker backed by a moka cache.
///
/// A record expires once it has gone `retention` without a write or a
/// read. At most `max_jobs` records are held.
#[derive(Debug)]
pub struct InMemoryProgressTracker {
    jobs: Cache<JobId, JobRecord>,
}

impl InMemoryProgressTracker {
    /// Default retention for job records
    pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3_600);
    /// Default cap on tracked jobs
    pub const DEFAULT_MAX_JOBS: u64 = 10_000;

    /// Tracker with default retention and capacity
    #[must_use]
    pub fn new() -> Self {
        Self::with_retention(Self::DEFAULT_RETENTION, Self::DEFAULT_MAX_JOBS)
    }

    /// Tracker with explicit idle retention and capacity
    #[must_use]
    pub fn with_retention(retention: Duration, max_jobs: u64) -> Self {
        Self {
            jobs: Cache::builder()
                .max_capacity(max_jobs)
                .time_to_idle(retention)
                .build(),
        }
    }

    /// Number of live records, after pending evictions are applied
    pub async fn len(&self) -> u64 {
        self.jobs.run_pending_tasks().await;
        self.jobs.entry_count()
    }

    /// True when no records are live
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn upsert(&self, job_id: JobId, apply: impl FnOnce(&mut JobRecord) + Send) {
        self.jobs
            .entry(job_id)
            .and_upsert_with(|existing| {
                let mut record =
                    existing.map_or_else(|| JobRecord::started(job_id), Entry::into_value);
                apply(&mut record);
                std::future::ready(record)
            })
            .await;
    }
}

impl Default for InMemoryProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressTracker for InMemoryProgressTracker {
    async fn create(&self, job_id: JobId) {
        self.jobs.insert(job_id, JobRecord::started(job_id)).await;
    }

    async fn update(&self, job_id: JobId, update: ProgressUpdate) {
        self.upsert(job_id, |record| {
            if record.status != JobStatus::Running {
                tracing::debug!(%job_id, "ignoring progress update for finished job");
                return;
            }
            record.percent = update.percent();
            record.stage = update.stage;
            record.current = update.current;
            record.total = update.total;
            record.message = update.message;
            record.updated_at = Utc::now();
        })
        .await;
    }

    async fn complete(&self, job_id: JobId, message: String) {
        self.upsert(job_id, |record| {
            record.status = JobStatus::Completed;
            record.stage = BuildStage::Completed;
            record.percent = 100;
            record.message = message;
            record.updated_at = Utc::now();
        })
        .await;
    }

    async fn error(&self, job_id: JobId, message: String) {
        self.upsert(job_id, |record| {
            record.status = JobStatus::Error;
            record.stage = BuildStage::Error;
            record.message = message;
            record.updated_at = Utc::now();
        })
        .await;
    }

    async fn get(&self, job_id: JobId) -> Option<JobRecord> {
        self.jobs.get(&job_id).await
    }
}

/// Reporting handle for one job; a no-op when there is no job
#[derive(Debug, Clone, Copy)]
pub struct ProgressSink<'a> {
    tracker: &'a dyn ProgressTracker,
    job_id: Option<JobId>,
}

impl<'a> ProgressSink<'a> {
    /// Sink for `job_id` on `tracker`
    #[must_use]
    pub fn new(tracker: &'a dyn ProgressTracker, job_id: Option<JobId>) -> Self {
        Self { tracker, job_id }
    }

    /// Forward a stage update
    pub async fn report(&self, update: ProgressUpdate) {
        if let Some(job_id) = self.job_id {
            self.tracker.update(job_id, update).await;
        }
    }

    /// Forward completion
    pub async fn complete(&self, message: String) {
        if let Some(job_id) = self.job_id {
            self.tracker.complete(job_id, message).await;
        }
    }

    /// Forward failure
    pub async fn error(&self, message: String) {
        if let Some(job_id) = self.job_id {
            self.tracker.error(job_id, message).await;
        }
    }
}
