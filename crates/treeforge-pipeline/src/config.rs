//! Pipeline configuration
//!
//! Every knob has a default matching the primary behavior: type-based
//! blocks, verbatim content, batches of 10, dependency-respecting order.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use treeforge_core::BlockStrategyKind;

/// How node content is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentMode {
    /// Persist the extracted text unchanged
    #[default]
    Verbatim,
    /// Reformat and summarize through the text generator
    AiFormatted,
}

/// How items are scheduled through the content processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Concurrent chunks of `batch_size`
    #[default]
    Batched,
    /// One item at a time
    Sequential,
}

/// How node positions are numbered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionMode {
    /// Zero-based, in the order the block strategy listed the block's members
    #[default]
    BlockLocal,
    /// Zero-based within the block, following the build-wide processing order
    Global,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File that was read
        path: PathBuf,
        /// Read failure
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config value for {field}: {message}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        message: String,
    },
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Items processed concurrently per chunk
    pub batch_size: usize,
    /// How node content is produced
    pub content_mode: ContentMode,
    /// How content work is scheduled
    pub processing: ProcessingMode,
    /// How proposals are partitioned into blocks
    pub block_strategy: BlockStrategyKind,
    /// Largest block the phase strategy emits before splitting
    pub max_phase_block_size: usize,
    /// How node positions are numbered
    pub position_mode: PositionMode,
    /// Topologically order proposals; `false` keeps the caller's order
    pub order_by_dependencies: bool,
    /// Content excerpts handed to the tree namer
    pub tree_name_excerpts: usize,
    /// Tree name used when naming fails
    pub fallback_tree_name: String,
    /// Length cap for generated summaries
    pub summary_max_chars: usize,
    /// Split nested-tree content on `N. ` step markers
    pub split_nested_steps: bool,
    /// Return the in-flight job for a repeated submission
    pub dedupe_submissions: bool,
    /// Enables the proposal listing cache when set
    pub proposal_cache_ttl_secs: Option<u64>,
    /// Seconds a job record stays pollable after its last update
    pub job_retention_secs: u64,
    /// Upper bound on job records held by the in-memory tracker
    pub max_tracked_jobs: u64,
}

impl PipelineConfig {
    /// Default `batch_size`
    pub const DEFAULT_BATCH_SIZE: usize = 10;

    /// Default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML; missing keys take their defaults
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_phase_block_size == 0 {
            return Err(ConfigError::Invalid {
                field: "max_phase_block_size",
                message: "must be at least 1".to_string(),
            });
        }
        if self.job_retention_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "job_retention_secs",
                message: "must be at least 1".to_string(),
            });
        }
        if self.summary_max_chars < 4 {
            return Err(ConfigError::Invalid {
                field: "summary_max_chars",
                message: "must be at least 4".to_string(),
            });
        }
        Ok(())
    }

    /// Batch size actually used: sequential mode forces 1, and anything
    /// below 1 clamps to 1
    #[must_use]
    pub fn effective_batch_size(&self) -> usize {
        match self.processing {
            ProcessingMode::Sequential => 1,
            ProcessingMode::Batched => self.batch_size.max(1),
        }
    }

    /// Listing cache TTL, when enabled
    #[must_use]
    pub fn proposal_cache_ttl(&self) -> Option<Duration> {
        self.proposal_cache_ttl_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// How long finished and idle job records are kept
    #[inline]
    #[must_use]
    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    /// Set `batch_size`
    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set `content_mode`
    #[inline]
    #[must_use]
    pub fn with_content_mode(mut self, mode: ContentMode) -> Self {
        self.content_mode = mode;
        self
    }

    /// Set `processing`
    #[inline]
    #[must_use]
    pub fn with_processing(mut self, mode: ProcessingMode) -> Self {
        self.processing = mode;
        self
    }

    /// Set `block_strategy`
    #[inline]
    #[must_use]
    pub fn with_block_strategy(mut self, strategy: BlockStrategyKind) -> Self {
        self.block_strategy = strategy;
        self
    }

    /// Set `position_mode`
    #[inline]
    #[must_use]
    pub fn with_position_mode(mut self, mode: PositionMode) -> Self {
        self.position_mode = mode;
        self
    }

    /// Set `order_by_dependencies`
    #[inline]
    #[must_use]
    pub fn with_dependency_ordering(mut self, enabled: bool) -> Self {
        self.order_by_dependencies = enabled;
        self
    }

    /// Set `split_nested_steps`
    #[inline]
    #[must_use]
    pub fn with_nested_step_splitting(mut self, enabled: bool) -> Self {
        self.split_nested_steps = enabled;
        self
    }

    /// Set `dedupe_submissions`
    #[inline]
    #[must_use]
    pub fn with_dedupe_submissions(mut self, enabled: bool) -> Self {
        self.dedupe_submissions = enabled;
        self
    }

    /// Enable the listing cache with this TTL
    #[inline]
    #[must_use]
    pub fn with_proposal_cache_ttl_secs(mut self, secs: u64) -> Self {
        self.proposal_cache_ttl_secs = Some(secs);
        self
    }

    /// Set `job_retention_secs`
    #[inline]
    #[must_use]
    pub fn with_job_retention_secs(mut self, secs: u64) -> Self {
        self.job_retention_secs = secs;
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: Self::DEFAULT_BATCH_SIZE,
            content_mode: ContentMode::Verbatim,
            processing: ProcessingMode::Batched,
            block_strategy: BlockStrategyKind::ByType,
            max_phase_block_size: 15,
            position_mode: PositionMode::BlockLocal,
            order_by_dependencies: true,
            tree_name_excerpts: 3,
            fallback_tree_name: "Experiment Tree".to_string(),
            summary_max_chars: 100,
            split_nested_steps: true,
            dedupe_submissions: false,
            proposal_cache_ttl_secs: None,
            job_retention_secs: 3_600,
            max_tracked_jobs: 10_000,
        }
    }
}
