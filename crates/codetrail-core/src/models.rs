//! Core data models for provenance-aware retrieval.
//!
//! These types represent the chunks, search hits, provenance records and
//! enriched results that flow from the similarity store through ranking,
//! hierarchy enrichment and context assembly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Depth of a chunk in the structural hierarchy of its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkLevel {
    /// Whole-file summary.
    FileSummary,
    /// Function, class, or other top-level declaration.
    Declaration,
    /// Logic block nested inside a declaration.
    LogicBlock,
    /// Anything deeper.
    Fragment,
}

impl ChunkLevel {
    pub fn depth(self) -> i64 {
        match self {
            ChunkLevel::FileSummary => 0,
            ChunkLevel::Declaration => 1,
            ChunkLevel::LogicBlock => 2,
            ChunkLevel::Fragment => 3,
        }
    }

    pub fn from_depth(depth: i64) -> Self {
        match depth {
            i64::MIN..=0 => ChunkLevel::FileSummary,
            1 => ChunkLevel::Declaration,
            2 => ChunkLevel::LogicBlock,
            _ => ChunkLevel::Fragment,
        }
    }
}

/// A contiguous slice of a source file at indexing time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub file_id: String,
    pub file_path: String,
    /// Position within the file, starting at 0.
    pub ordinal: i64,
    pub start_line: i64,
    pub end_line: i64,
    pub content: String,
    /// SHA-256 hex digest of `content`.
    pub content_hash: String,
    pub token_count: usize,
    pub kind: Option<String>,
    pub name: Option<String>,
    pub parent_name: Option<String>,
    pub signature: Option<String>,
    pub doc_comment: Option<String>,
    /// File-level category (`"code"`, `"docs"`, …) matched by the content-type filter.
    pub content_type: Option<String>,
    pub level: ChunkLevel,
    pub parent_id: Option<String>,
    pub importance: Option<f64>,
    pub snapshot_id: String,
    pub commit_hash: String,
    pub author: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub indexed_at: DateTime<Utc>,
    pub file_version: Option<String>,
    pub is_latest: bool,
    pub chunk_key: String,
}

impl Chunk {
    /// Build a chunk with the required positional fields; everything else
    /// starts empty and can be filled in with struct update syntax.
    pub fn new(
        id: impl Into<String>,
        file_id: impl Into<String>,
        file_path: impl Into<String>,
        ordinal: i64,
        start_line: i64,
        end_line: i64,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            id: id.into(),
            file_id: file_id.into(),
            file_path: file_path.into(),
            ordinal,
            start_line,
            end_line,
            content_hash: content_hash(&content),
            token_count: content.chars().count() / 4,
            content,
            kind: None,
            name: None,
            parent_name: None,
            signature: None,
            doc_comment: None,
            content_type: None,
            level: ChunkLevel::Declaration,
            parent_id: None,
            importance: None,
            snapshot_id: String::new(),
            commit_hash: String::new(),
            author: None,
            updated_at: None,
            indexed_at: Utc::now(),
            file_version: None,
            is_latest: true,
            chunk_key: String::new(),
        }
    }

    /// Project this chunk into a search hit with the given similarity score.
    pub fn to_search_result(&self, score: f64) -> SearchResult {
        SearchResult {
            chunk_id: self.id.clone(),
            file_path: self.file_path.clone(),
            start_line: self.start_line,
            end_line: self.end_line,
            content: self.content.clone(),
            score,
            prev_content: None,
            next_content: None,
        }
    }

    /// Extract the provenance record for this chunk.
    pub fn provenance(&self, source_snapshot_id: impl Into<String>) -> ChunkProvenance {
        ChunkProvenance {
            chunk_id: self.id.clone(),
            snapshot_id: self.snapshot_id.clone(),
            file_path: self.file_path.clone(),
            commit_hash: self.commit_hash.clone(),
            chunk_key: self.chunk_key.clone(),
            is_latest: self.is_latest,
            indexed_at: self.indexed_at,
            source_snapshot_id: source_snapshot_id.into(),
            author: self.author.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// A raw similarity hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub content: String,
    /// Similarity score in `[0.0, 1.0]`.
    pub score: f64,
    /// Joined content of the preceding sibling chunks, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_content: Option<String>,
    /// Joined content of the following sibling chunks, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_content: Option<String>,
}

/// Version metadata needed to rank a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkProvenance {
    pub chunk_id: String,
    pub snapshot_id: String,
    pub file_path: String,
    pub commit_hash: String,
    pub chunk_key: String,
    pub is_latest: bool,
    pub indexed_at: DateTime<Utc>,
    pub source_snapshot_id: String,
    pub author: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A search hit after provenance-aware score adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    #[serde(flatten)]
    pub result: SearchResult,
    pub original_score: f64,
    pub adjusted_score: f64,
    pub is_latest: bool,
    /// Signed score delta applied before clamping.
    pub boost_applied: f64,
}

impl RankedResult {
    /// The underlying hit with its score replaced by the adjusted score.
    pub fn into_search_result(self) -> SearchResult {
        SearchResult {
            score: self.adjusted_score,
            ..self.result
        }
    }
}

/// A search hit enriched with its structural neighbourhood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalSearchResult {
    #[serde(flatten)]
    pub result: SearchResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Chunk>,
    /// Ordered by ordinal.
    pub children: Vec<Chunk>,
    /// Nearest ancestor first.
    pub ancestors: Vec<Chunk>,
}

impl From<SearchResult> for HierarchicalSearchResult {
    fn from(result: SearchResult) -> Self {
        Self {
            result,
            parent: None,
            children: Vec::new(),
            ancestors: Vec::new(),
        }
    }
}

/// Build a chunk key: `{product}/{source}/{path}#L{start}-L{end}@{commit}`.
///
/// ```rust
/// use codetrail_core::models::{base_chunk_key, chunk_key};
///
/// let key = chunk_key("p", "s", "a.go", 1, 10, "abc");
/// assert_eq!(key, "p/s/a.go#L1-L10@abc");
/// assert_eq!(base_chunk_key(&key), "p/s/a.go#L1-L10");
/// ```
pub fn chunk_key(
    product: &str,
    source: &str,
    path: &str,
    start_line: i64,
    end_line: i64,
    commit: &str,
) -> String {
    format!(
        "{}/{}/{}#L{}-L{}@{}",
        product, source, path, start_line, end_line, commit
    )
}

/// Strip the trailing `@{commit}` suffix, found by the last `@`.
///
/// Keys without `@` are returned unchanged.
pub fn base_chunk_key(key: &str) -> &str {
    match key.rfind('@') {
        Some(pos) => &key[..pos],
        None => key,
    }
}

/// SHA-256 hex digest of chunk content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
