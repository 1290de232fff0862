//! Storage collaborators for the retrieval engine.
//!
//! The core never talks to a database directly. It needs two narrow
//! capabilities, expressed as traits so that backends are pluggable
//! (SQLite in the app crate, [`memory::InMemoryStore`] for tests):
//!
//! | Trait | Used by | Purpose |
//! |-------|---------|---------|
//! | [`SimilarityStore`] | [`Searcher`](crate::search::Searcher) | Scoped nearest-neighbour search and sibling lookups |
//! | [`ChunkHierarchyStore`] | [`HierarchicalSearcher`](crate::hierarchy::HierarchicalSearcher) | Parent/child lookups |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Chunk, SearchResult};

/// Filters applied by the store during similarity search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Only return chunks whose file path starts with this prefix.
    pub path_prefix: Option<String>,
    /// Only return chunks with this content type.
    pub content_type: Option<String>,
}

impl SearchFilter {
    pub fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(prefix) = &self.path_prefix {
            if !chunk.file_path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(content_type) = &self.content_type {
            if chunk.content_type.as_deref() != Some(content_type.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Nearest-neighbour search scoped to a product or a source.
///
/// Results are ordered by similarity (descending), already limited, and
/// already filtered.
#[async_trait]
pub trait SimilarityStore: Send + Sync {
    async fn search_by_product(
        &self,
        product_id: Uuid,
        query_vec: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>>;

    async fn search_by_source(
        &self,
        source_id: Uuid,
        query_vec: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>>;

    /// Chunks of the same file whose ordinal lies in
    /// `[ordinal - before, ordinal + after]`, the target included,
    /// ordered by ordinal.
    async fn get_chunk_context(
        &self,
        chunk_id: &str,
        before: usize,
        after: usize,
    ) -> Result<Vec<Chunk>>;
}

/// Structural lookups between chunks at different levels.
#[async_trait]
pub trait ChunkHierarchyStore: Send + Sync {
    /// The enclosing chunk, or `None` at the top of the tree.
    async fn get_parent_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>>;

    /// Direct children ordered by ordinal; empty for leaves.
    async fn get_child_chunks(&self, chunk_id: &str) -> Result<Vec<Chunk>>;
}
