//! Text-generation collaborator
//!
//! Tree naming, content formatting and summarization are black boxes that
//! may fail at any time, rate limiting included. Callers always have a
//! local fallback; a [`TextGenError`] never escalates past the call site.

use async_trait::async_trait;

/// Text generation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TextGenError {
    /// Provider throttled the request
    #[error("rate limited by text generator")]
    RateLimited {
        /// Provider-suggested wait
        retry_after_secs: Option<u64>,
    },

    /// Any other generation failure
    #[error("text generation failed: {0}")]
    Failed(String),
}

impl TextGenError {
    /// True for throttling
    #[inline]
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Text generation used for naming and content
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short tree name from a few content excerpts
    async fn generate_tree_name(&self, excerpts: &[String]) -> Result<String, TextGenError>;

    /// Raw node content rewritten as cleaner prose
    async fn format_content(&self, raw: &str) -> Result<String, TextGenError>;

    /// Summary of at most `max_chars` characters
    async fn summarize(&self, text: &str, max_chars: usize) -> Result<String, TextGenError>;
}

/// Deterministic local generator, no network
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTextGenerator;

const MAX_NAME_CHARS: usize = 60;

#[async_trait]
impl TextGenerator for HeuristicTextGenerator {
    async fn generate_tree_name(&self, excerpts: &[String]) -> Result<String, TextGenError> {
        let line = excerpts
            .iter()
            .flat_map(|e| e.lines())
            .map(|l| l.trim_start_matches(|c: char| c.is_ascii_digit() || ".)-#* ".contains(c)))
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| TextGenError::Failed("no content to name the tree from".to_string()))?;
        Ok(truncate_at_word(line, MAX_NAME_CHARS))
    }

    async fn format_content(&self, raw: &str) -> Result<String, TextGenError> {
        Ok(tidy_whitespace(raw))
    }

    async fn summarize(&self, text: &str, max_chars: usize) -> Result<String, TextGenError> {
        let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if flat.is_empty() {
            return Err(TextGenError::Failed("nothing to summarize".to_string()));
        }
        Ok(truncate_at_word(&flat, max_chars))
    }
}

/// Collapse runs of spaces inside lines and runs of blank lines
#[must_use]
pub fn tidy_whitespace(raw: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut blank_run = 0;
    for line in raw.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 || out.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push(line);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

/// Truncate to at most `max_chars` characters, cutting at a word boundary
/// and marking the cut with `...`
#[must_use]
pub fn truncate_at_word(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let budget = max_chars.saturating_sub(3);
    let head: String = text.chars().take(budget).collect();
    let cut = match head.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => head[..idx].trim_end(),
        _ => head.as_str(),
    };
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_limit_and_words() {
        let text = "Amplify the target region with thirty cycles of PCR";
        let cut = truncate_at_word(text, 20);
        assert!(cut.chars().count() <= 20);
        assert_eq!(cut, "Amplify the...");
        assert_eq!(truncate_at_word("short", 20), "short");
    }

    #[test]
    fn tidy_collapses_whitespace() {
        assert_eq!(tidy_whitespace("  a   b \n\n\n c\n\n"), "a b\n\nc");
    }

    #[test]
    fn heuristic_name_uses_first_meaningful_line() {
        let name = tokio_test::block_on(
            HeuristicTextGenerator.generate_tree_name(&["\n1. Extract RNA from cells".to_string()]),
        )
        .unwrap();
        assert_eq!(name, "Extract RNA from cells");
    }

    #[test]
    fn heuristic_name_fails_without_content() {
        let err = tokio_test::block_on(HeuristicTextGenerator.generate_tree_name(&[])).unwrap_err();
        assert!(!err.is_rate_limit());
    }

    #[tokio::test]
    async fn summary_is_bounded() {
        let summary = HeuristicTextGenerator
            .summarize(&"word ".repeat(100), 100)
            .await
            .unwrap();
        assert!(summary.chars().count() <= 100);
    }
}
