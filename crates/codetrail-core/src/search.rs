//! End-to-end single-query retrieval.
//!
//! The [`Searcher`] works entirely through the [`Embedder`] and
//! [`SimilarityStore`] traits, with no database or configuration
//! dependencies. The calling application builds the collaborators and
//! passes [`SearchParams`].
//!
//! # Pipeline
//!
//! 1. Validate the scope id and query, normalize the parameters.
//! 2. Embed the query.
//! 3. Run the scoped similarity search (ordered, limited, filtered by the store).
//! 4. When a context window is requested, attach the content of the
//!    sibling chunks before and after each hit.
//! 5. Optionally enrich with the [`HierarchicalSearcher`].
//!
//! Any collaborator failure aborts the search; partial results are never
//! returned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::hierarchy::{HierarchicalSearcher, HierarchyOptions};
use crate::models::{HierarchicalSearchResult, SearchResult};
use crate::store::{SearchFilter, SimilarityStore};

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 50;
pub const MAX_CONTEXT_WINDOW: i64 = 3;

/// Caller-supplied search parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Maximum hits; `<= 0` means [`DEFAULT_LIMIT`], capped at [`MAX_LIMIT`].
    pub limit: i64,
    pub path_prefix: Option<String>,
    pub content_type: Option<String>,
    /// Sibling chunks to attach before each hit (0–3; larger values are clamped).
    pub context_before: i64,
    /// Sibling chunks to attach after each hit (0–3; larger values are clamped).
    pub context_after: i64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            path_prefix: None,
            content_type: None,
            context_before: 0,
            context_after: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Normalized {
    limit: usize,
    filter: SearchFilter,
    before: usize,
    after: usize,
}

impl SearchParams {
    fn normalize(&self) -> Result<Normalized> {
        if self.context_before < 0 {
            return Err(Error::invalid_input("context_before must be >= 0"));
        }
        if self.context_after < 0 {
            return Err(Error::invalid_input("context_after must be >= 0"));
        }
        let limit = if self.limit <= 0 {
            DEFAULT_LIMIT
        } else {
            self.limit.min(MAX_LIMIT)
        };
        Ok(Normalized {
            limit: limit as usize,
            filter: SearchFilter {
                path_prefix: self.path_prefix.clone().filter(|p| !p.is_empty()),
                content_type: self.content_type.clone().filter(|c| !c.is_empty()),
            },
            before: self.context_before.min(MAX_CONTEXT_WINDOW) as usize,
            after: self.context_after.min(MAX_CONTEXT_WINDOW) as usize,
        })
    }
}

/// What a search is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SearchScope {
    Product(Uuid),
    Source(Uuid),
}

impl SearchScope {
    fn id(&self) -> Uuid {
        match self {
            SearchScope::Product(id) | SearchScope::Source(id) => *id,
        }
    }
}

/// Hits plus wall-clock time spent producing them.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub elapsed: Duration,
}

/// Enriched hits plus the combined search and enrichment time.
#[derive(Debug, Clone)]
pub struct HierarchicalSearchOutcome {
    pub results: Vec<HierarchicalSearchResult>,
    pub elapsed: Duration,
}

/// Orchestrates embedding, similarity search, and context population.
#[derive(Clone)]
pub struct Searcher {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn SimilarityStore>,
    hierarchy: HierarchicalSearcher,
}

impl Searcher {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn SimilarityStore>,
        hierarchy: HierarchicalSearcher,
    ) -> Self {
        Self {
            embedder,
            store,
            hierarchy,
        }
    }

    pub async fn search_by_product(
        &self,
        product_id: Uuid,
        query: &str,
        params: &SearchParams,
    ) -> Result<SearchOutcome> {
        self.search(SearchScope::Product(product_id), query, params).await
    }

    pub async fn search_by_source(
        &self,
        source_id: Uuid,
        query: &str,
        params: &SearchParams,
    ) -> Result<SearchOutcome> {
        self.search(SearchScope::Source(source_id), query, params).await
    }

    pub async fn search_by_product_with_hierarchy(
        &self,
        product_id: Uuid,
        query: &str,
        params: &SearchParams,
        options: &HierarchyOptions,
    ) -> Result<HierarchicalSearchOutcome> {
        self.search_with_hierarchy(SearchScope::Product(product_id), query, params, options)
            .await
    }

    pub async fn search_by_source_with_hierarchy(
        &self,
        source_id: Uuid,
        query: &str,
        params: &SearchParams,
        options: &HierarchyOptions,
    ) -> Result<HierarchicalSearchOutcome> {
        self.search_with_hierarchy(SearchScope::Source(source_id), query, params, options)
            .await
    }

    /// Scoped search without hierarchy enrichment.
    pub async fn search(
        &self,
        scope: SearchScope,
        query: &str,
        params: &SearchParams,
    ) -> Result<SearchOutcome> {
        let started = Instant::now();

        if scope.id().is_nil() {
            return Err(Error::invalid_input("scope id must not be nil"));
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::invalid_input("query must not be empty"));
        }
        let params = params.normalize()?;

        let query_vec = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| Error::upstream("query embedding", e))?;

        let mut results = match scope {
            SearchScope::Product(id) => {
                self.store
                    .search_by_product(id, &query_vec, params.limit, &params.filter)
                    .await
            }
            SearchScope::Source(id) => {
                self.store
                    .search_by_source(id, &query_vec, params.limit, &params.filter)
                    .await
            }
        }
        .map_err(|e| Error::upstream("similarity search", e))?;

        if (params.before > 0 || params.after > 0) && !results.is_empty() {
            self.populate_context(&mut results, params.before, params.after)
                .await?;
        }

        let elapsed = started.elapsed();
        tracing::debug!(
            scope = ?scope,
            model = self.embedder.model_name(),
            results = results.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Search complete."
        );
        Ok(SearchOutcome { results, elapsed })
    }

    /// Scoped search followed by hierarchy enrichment.
    pub async fn search_with_hierarchy(
        &self,
        scope: SearchScope,
        query: &str,
        params: &SearchParams,
        options: &HierarchyOptions,
    ) -> Result<HierarchicalSearchOutcome> {
        let outcome = self.search(scope, query, params).await?;
        let started = Instant::now();
        let results = self
            .hierarchy
            .enrich_with_hierarchy(outcome.results, options)
            .await?;
        Ok(HierarchicalSearchOutcome {
            results,
            elapsed: outcome.elapsed + started.elapsed(),
        })
    }

    async fn populate_context(
        &self,
        results: &mut [SearchResult],
        before: usize,
        after: usize,
    ) -> Result<()> {
        for result in results.iter_mut() {
            let siblings = self
                .store
                .get_chunk_context(&result.chunk_id, before, after)
                .await
                .map_err(|e| Error::upstream("context window lookup", e))?;

            let Some(target) = siblings.iter().find(|c| c.id == result.chunk_id) else {
                return Err(Error::upstream(
                    "context window lookup",
                    anyhow::anyhow!("chunk {} missing from its own window", result.chunk_id),
                ));
            };
            let ordinal = target.ordinal;

            let prev: Vec<&str> = siblings
                .iter()
                .filter(|c| c.ordinal < ordinal)
                .map(|c| c.content.as_str())
                .collect();
            let next: Vec<&str> = siblings
                .iter()
                .filter(|c| c.ordinal > ordinal)
                .map(|c| c.content.as_str())
                .collect();

            if !prev.is_empty() {
                result.prev_content = Some(prev.join("\n"));
            }
            if !next.is_empty() {
                result.next_content = Some(next.join("\n"));
            }
        }
        Ok(())
    }
}
