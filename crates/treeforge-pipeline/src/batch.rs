//! Batch content processor
//!
//! Proposals are processed in contiguous chunks. Items inside a chunk run
//! concurrently; the chunk is joined before the next one starts and
//! progress is reported after each chunk. Every item recovers locally from
//! text-generation failures, so the output always has one entry per input,
//! in input order.

use crate::config::{ContentMode, PipelineConfig};
use crate::progress::{ProgressSink, ProgressUpdate};
use crate::stage::BuildStage;
use crate::textgen::{truncate_at_word, TextGenError, TextGenerator};
use futures::future::join_all;
use treeforge_core::{ProposalId, ProposedNode};

/// Content ready to persist for one proposal
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedContent {
    /// Source proposal
    pub proposal_id: ProposalId,
    /// Node content text
    pub content: String,
    /// Node description (summary)
    pub description: String,
    /// Some generator call failed and raw input was used instead
    pub fell_back: bool,
}

/// Content pass over proposals in fixed-size chunks
#[derive(Clone, Copy)]
pub struct BatchContentProcessor<'a> {
    generator: &'a dyn TextGenerator,
    mode: ContentMode,
    batch_size: usize,
    summary_max_chars: usize,
}

impl std::fmt::Debug for BatchContentProcessor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchContentProcessor")
            .field("mode", &self.mode)
            .field("batch_size", &self.batch_size)
            .field("summary_max_chars", &self.summary_max_chars)
            .finish_non_exhaustive()
    }
}

impl<'a> BatchContentProcessor<'a> {
    /// Processor configured from `config`
    #[must_use]
    pub fn new(generator: &'a dyn TextGenerator, config: &PipelineConfig) -> Self {
        Self {
            generator,
            mode: config.content_mode,
            batch_size: config.effective_batch_size(),
            summary_max_chars: config.summary_max_chars,
        }
    }

    /// Effective chunk size
    #[inline]
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Process every proposal; result `i` belongs to `proposals[i]`
    pub async fn process(
        &self,
        proposals: &[&ProposedNode],
        progress: ProgressSink<'_>,
    ) -> Vec<ProcessedContent> {
        let total = proposals.len();
        let mut results = Vec::with_capacity(total);

        for (index, chunk) in proposals.chunks(self.batch_size).enumerate() {
            let processed = join_all(chunk.iter().map(|p| self.process_one(p))).await;
            results.extend(processed);

            tracing::debug!(
                chunk = index,
                done = results.len(),
                total,
                "content chunk processed"
            );
            progress
                .report(ProgressUpdate::new(
                    BuildStage::BuildingNodes,
                    results.len(),
                    total,
                    format!("Processed content for {}/{} nodes", results.len(), total),
                ))
                .await;
        }

        results
    }

    async fn process_one(&self, proposal: &ProposedNode) -> ProcessedContent {
        let raw = proposal.content_text();
        match self.mode {
            ContentMode::Verbatim => ProcessedContent {
                proposal_id: proposal.id,
                content: raw.to_string(),
                description: self.fallback_description(proposal),
                fell_back: false,
            },
            ContentMode::AiFormatted => {
                let (formatted, summary) = tokio::join!(
                    self.generator.format_content(raw),
                    self.generator.summarize(raw, self.summary_max_chars),
                );
                let mut fell_back = false;

                let content = match formatted {
                    Ok(text) if !text.trim().is_empty() => text,
                    Ok(_) => raw.to_string(),
                    Err(err) => {
                        log_fallback(proposal, "format_content", &err);
                        fell_back = true;
                        raw.to_string()
                    }
                };
                let description = match summary {
                    Ok(text) if !text.trim().is_empty() => {
                        truncate_at_word(&text, self.summary_max_chars)
                    }
                    Ok(_) => self.fallback_description(proposal),
                    Err(err) => {
                        log_fallback(proposal, "summarize", &err);
                        fell_back = true;
                        self.fallback_description(proposal)
                    }
                };

                ProcessedContent {
                    proposal_id: proposal.id,
                    content,
                    description,
                    fell_back,
                }
            }
        }
    }

    /// Extractor summary, else the head of the raw content, else the title
    fn fallback_description(&self, proposal: &ProposedNode) -> String {
        let summary = proposal
            .node_json
            .short_summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let source = summary
            .or_else(|| Some(proposal.content_text().trim()).filter(|c| !c.is_empty()))
            .unwrap_or_else(|| proposal.title());
        truncate_at_word(source, self.summary_max_chars)
    }
}

fn log_fallback(proposal: &ProposedNode, call: &str, err: &TextGenError) {
    tracing::warn!(
        proposal_id = %proposal.id,
        call,
        rate_limited = err.is_rate_limit(),
        error = %err,
        "text generation failed, using original text"
    );
}
