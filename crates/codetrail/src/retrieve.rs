//! End-to-end retrieval: search, rank, enrich, render.
//!
//! ```text
//! Retriever::retrieve(scope, query, options)
//!   ├── Searcher::search            embed + scoped similarity + siblings
//!   ├── Ranker::rank                 (when options.rank is set)
//!   ├── HierarchicalSearcher         (when options.hierarchy is set)
//!   └── ContextBuilder::build        format + token budget
//! ```
//!
//! The whole pipeline runs under `options.timeout`. When the deadline
//! passes, the in-flight future is dropped and the call returns
//! [`Error::Cancelled`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use serde::Serialize;

use codetrail_core::context::{estimate_token_count, ContextBuilder, ContextFormat};
use codetrail_core::embedding::Embedder;
use codetrail_core::hierarchy::{HierarchicalSearcher, HierarchyOptions};
use codetrail_core::models::{HierarchicalSearchResult, RankedResult, SearchResult};
use codetrail_core::provenance::ProvenanceGraph;
use codetrail_core::ranking::{RankOptions, Ranker};
use codetrail_core::search::{SearchParams, SearchScope, Searcher};
use codetrail_core::store::{ChunkHierarchyStore, SimilarityStore};
use codetrail_core::{Error, Result};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::sqlite_store::SqliteStore;

/// Per-call knobs. [`Retriever::default_options`] fills them from config.
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub params: SearchParams,
    /// `None` skips provenance-aware ranking.
    pub rank: Option<RankOptions>,
    /// `None` skips hierarchy enrichment.
    pub hierarchy: Option<HierarchyOptions>,
    pub format: ContextFormat,
    pub timeout: Duration,
}

/// What a retrieval hands to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalPayload {
    pub results: Vec<HierarchicalSearchResult>,
    /// Score breakdown per result; empty when ranking was skipped.
    pub ranked: Vec<RankedResult>,
    pub context: String,
    pub token_estimate: usize,
    pub elapsed: Duration,
}

pub struct Retriever {
    searcher: Searcher,
    hierarchy: HierarchicalSearcher,
    ranker: Ranker,
    builder: ContextBuilder,
    defaults: RetrieveOptions,
}

impl Retriever {
    pub fn new(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        similarity: Arc<dyn SimilarityStore>,
        hierarchy_store: Arc<dyn ChunkHierarchyStore>,
        graph: Arc<ProvenanceGraph>,
    ) -> anyhow::Result<Self> {
        let hierarchy = HierarchicalSearcher::new(hierarchy_store);
        let defaults = RetrieveOptions {
            params: config.search.to_search_params(),
            rank: Some(RankOptions::default()),
            hierarchy: Some(config.hierarchy.to_options()),
            format: config.context.context_format()?,
            timeout: Duration::from_secs(config.search.timeout_secs),
        };

        Ok(Self {
            searcher: Searcher::new(embedder, similarity, hierarchy.clone()),
            hierarchy,
            ranker: Ranker::new(graph, config.ranking.to_ranking_config()),
            builder: ContextBuilder::new(config.context.max_tokens),
            defaults,
        })
    }

    /// Open the configured SQLite store, load its provenance graph and
    /// build the configured embedder.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let store = Arc::new(SqliteStore::open(config).await?);
        let graph = store
            .load_provenance_graph()
            .await
            .context("Failed to load provenance graph")?;
        let embedder = create_embedder(&config.embedding)?;
        Self::new(config, embedder, store.clone(), store, Arc::new(graph))
    }

    pub fn default_options(&self) -> RetrieveOptions {
        self.defaults.clone()
    }

    pub fn ranker(&self) -> &Ranker {
        &self.ranker
    }

    pub async fn retrieve(
        &self,
        scope: SearchScope,
        query: &str,
        options: &RetrieveOptions,
    ) -> Result<RetrievalPayload> {
        let started = Instant::now();
        let payload = tokio::time::timeout(options.timeout, self.run(scope, query, options))
            .await
            .map_err(|_| {
                tracing::warn!(
                    scope = ?scope,
                    timeout_ms = options.timeout.as_millis() as u64,
                    "Retrieval deadline exceeded."
                );
                Error::cancelled(format!(
                    "retrieval exceeded {}ms deadline",
                    options.timeout.as_millis()
                ))
            })??;

        let payload = RetrievalPayload {
            elapsed: started.elapsed(),
            ..payload
        };
        tracing::info!(
            scope = ?scope,
            results = payload.results.len(),
            tokens = payload.token_estimate,
            elapsed_ms = payload.elapsed.as_millis() as u64,
            "Retrieval complete."
        );
        Ok(payload)
    }

    async fn run(
        &self,
        scope: SearchScope,
        query: &str,
        options: &RetrieveOptions,
    ) -> Result<RetrievalPayload> {
        let outcome = self.searcher.search(scope, query, &options.params).await?;

        let (hits, ranked) = match options.rank {
            Some(rank_options) => {
                let ranked = self.ranker.rank(outcome.results, rank_options);
                let hits: Vec<SearchResult> = ranked
                    .iter()
                    .cloned()
                    .map(RankedResult::into_search_result)
                    .collect();
                (hits, ranked)
            }
            None => (outcome.results, Vec::new()),
        };

        let results = match &options.hierarchy {
            Some(hierarchy) if !hierarchy.is_noop() => {
                self.hierarchy.enrich_with_hierarchy(hits, hierarchy).await?
            }
            _ => hits.into_iter().map(HierarchicalSearchResult::from).collect(),
        };

        let context = self.builder.build(&results, options.format);
        let token_estimate = estimate_token_count(&context);

        Ok(RetrievalPayload {
            results,
            ranked,
            context,
            token_estimate,
            elapsed: outcome.elapsed,
        })
    }
}
