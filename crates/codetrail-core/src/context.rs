//! Final text assembly for language-model consumption.
//!
//! The [`ContextBuilder`] renders search results in one of four
//! [`ContextFormat`]s and then cuts the text down to a token budget.
//!
//! Token counts use a 4 chars/token heuristic, the same ratio the
//! ingestion chunker assumes. It is deterministic and needs no model
//! files, at the cost of underestimating CJK-heavy text.

use std::fmt::Write as _;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::hierarchy::chunk_label;
use crate::models::{HierarchicalSearchResult, SearchResult};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Appended to text that was cut to fit the budget.
pub const TRUNCATION_MARKER: &str = "\n\n... (truncated)";

/// Rendering strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextFormat {
    /// Parent, numbered result, child sub-sections, rules between hits.
    #[default]
    Hierarchical,
    /// Numbered result sections only.
    Simple,
    /// File path, line range, relevance and fenced content per hit.
    #[serde(rename = "metadata")]
    WithMetadata,
    /// One metadata line plus raw content per hit.
    Compact,
}

impl FromStr for ContextFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hierarchical" => Ok(ContextFormat::Hierarchical),
            "simple" => Ok(ContextFormat::Simple),
            "metadata" => Ok(ContextFormat::WithMetadata),
            "compact" => Ok(ContextFormat::Compact),
            other => Err(Error::invalid_input(format!(
                "unknown context format '{}'; use hierarchical, simple, metadata, or compact",
                other
            ))),
        }
    }
}

/// Renders results into a token-bounded text payload.
#[derive(Debug, Clone, Copy)]
pub struct ContextBuilder {
    max_tokens: usize,
}

impl ContextBuilder {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Render with the given strategy.
    pub fn build(&self, results: &[HierarchicalSearchResult], format: ContextFormat) -> String {
        match format {
            ContextFormat::Hierarchical => self.build_hierarchical(results),
            ContextFormat::Simple => self.build_simple(&flatten(results)),
            ContextFormat::WithMetadata => self.build_with_metadata(&flatten(results)),
            ContextFormat::Compact => self.build_compact(&flatten(results)),
        }
    }

    pub fn build_hierarchical(&self, results: &[HierarchicalSearchResult]) -> String {
        let mut out = String::new();
        for (i, item) in results.iter().enumerate() {
            if i > 0 {
                out.push_str("---\n\n");
            }
            if let Some(parent) = &item.parent {
                let _ = write!(
                    out,
                    "## Parent: {} ({} L{}-L{})\n{}\n\n",
                    chunk_label(parent),
                    parent.file_path,
                    parent.start_line,
                    parent.end_line,
                    parent.content
                );
            }
            let r = &item.result;
            let _ = write!(
                out,
                "## Search result {}: {} (L{}-L{})\n{}\n\n",
                i + 1,
                r.file_path,
                r.start_line,
                r.end_line,
                r.content
            );
            for child in &item.children {
                let _ = write!(
                    out,
                    "### Sub-section: {}\n{}\n\n",
                    chunk_label(child),
                    child.content
                );
            }
        }
        self.truncate_to_token_limit(&out)
    }

    pub fn build_simple(&self, results: &[SearchResult]) -> String {
        let mut out = String::new();
        for (i, r) in results.iter().enumerate() {
            let _ = write!(out, "## Search result {}\n{}\n\n", i + 1, r.content);
        }
        self.truncate_to_token_limit(&out)
    }

    pub fn build_with_metadata(&self, results: &[SearchResult]) -> String {
        let mut out = String::new();
        for (i, r) in results.iter().enumerate() {
            let _ = writeln!(out, "## Search result {}", i + 1);
            let _ = writeln!(out, "File: {}", r.file_path);
            let _ = writeln!(out, "Lines: {}-{}", r.start_line, r.end_line);
            let _ = writeln!(out, "Relevance: {:.4}", r.score);
            out.push('\n');
            if let Some(prev) = &r.prev_content {
                let _ = write!(out, "Previous context:\n```\n{}\n```\n\n", prev);
            }
            let _ = write!(out, "```\n{}\n```\n\n", r.content);
            if let Some(next) = &r.next_content {
                let _ = write!(out, "Next context:\n```\n{}\n```\n\n", next);
            }
        }
        self.truncate_to_token_limit(&out)
    }

    pub fn build_compact(&self, results: &[SearchResult]) -> String {
        let mut out = String::new();
        for r in results {
            let _ = write!(
                out,
                "{}:{}-{} ({:.2})\n{}\n\n",
                r.file_path, r.start_line, r.end_line, r.score, r.content
            );
        }
        self.truncate_to_token_limit(&out)
    }

    /// Cut `text` to `max_tokens * 4` characters, appending
    /// [`TRUNCATION_MARKER`] when anything was removed.
    pub fn truncate_to_token_limit(&self, text: &str) -> String {
        let budget = self.max_tokens * CHARS_PER_TOKEN;
        match text.char_indices().nth(budget) {
            None => text.to_string(),
            Some((cut, _)) => {
                let mut out = String::with_capacity(cut + TRUNCATION_MARKER.len());
                out.push_str(&text[..cut]);
                out.push_str(TRUNCATION_MARKER);
                out
            }
        }
    }
}

/// Rough token count: characters divided by four.
pub fn estimate_token_count(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

fn flatten(results: &[HierarchicalSearchResult]) -> Vec<SearchResult> {
    results.iter().map(|r| r.result.clone()).collect()
}
