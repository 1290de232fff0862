//! In-memory [`SimilarityStore`] and [`ChunkHierarchyStore`] implementation.
//!
//! Uses a `Vec` behind `std::sync::RwLock` for thread safety. Similarity
//! search is brute-force cosine over every stored vector in scope.

use std::cmp::Ordering;
use std::sync::{RwLock, RwLockReadGuard};

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::embedding::{cosine_similarity, similarity_to_score};
use crate::models::{base_chunk_key, Chunk, SearchResult};

use super::{ChunkHierarchyStore, SearchFilter, SimilarityStore};

struct StoredChunk {
    chunk: Chunk,
    product_id: Uuid,
    source_id: Uuid,
    vector: Option<Vec<f32>>,
}

/// In-memory store for tests and embedding hosts without a database.
#[derive(Default)]
pub struct InMemoryStore {
    chunks: RwLock<Vec<StoredChunk>>,
}

#[derive(Clone, Copy)]
enum Scope {
    Product(Uuid),
    Source(Uuid),
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<StoredChunk>> {
        self.chunks.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace a chunk.
    ///
    /// When the chunk is flagged latest, every other chunk sharing its
    /// base key loses the flag so at most one version stays latest.
    pub fn insert(
        &self,
        product_id: Uuid,
        source_id: Uuid,
        chunk: Chunk,
        vector: Option<Vec<f32>>,
    ) {
        let mut stored = self.chunks.write().unwrap_or_else(|e| e.into_inner());
        if chunk.is_latest && !chunk.chunk_key.is_empty() {
            let base = base_chunk_key(&chunk.chunk_key).to_string();
            for sc in stored.iter_mut() {
                if sc.chunk.id != chunk.id && base_chunk_key(&sc.chunk.chunk_key) == base {
                    sc.chunk.is_latest = false;
                }
            }
        }
        stored.retain(|sc| sc.chunk.id != chunk.id);
        stored.push(StoredChunk {
            chunk,
            product_id,
            source_id,
            vector,
        });
    }

    pub fn get(&self, chunk_id: &str) -> Option<Chunk> {
        self.read()
            .iter()
            .find(|sc| sc.chunk.id == chunk_id)
            .map(|sc| sc.chunk.clone())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn search(
        &self,
        scope: Scope,
        query_vec: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Vec<SearchResult> {
        let stored = self.read();
        let mut results: Vec<SearchResult> = stored
            .iter()
            .filter(|sc| match scope {
                Scope::Product(id) => sc.product_id == id,
                Scope::Source(id) => sc.source_id == id,
            })
            .filter(|sc| filter.matches(&sc.chunk))
            .filter_map(|sc| {
                let vector = sc.vector.as_ref()?;
                let score = similarity_to_score(cosine_similarity(query_vec, vector));
                Some(sc.chunk.to_search_result(score))
            })
            .collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        results.truncate(limit);
        results
    }
}

#[async_trait]
impl SimilarityStore for InMemoryStore {
    async fn search_by_product(
        &self,
        product_id: Uuid,
        query_vec: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>> {
        Ok(self.search(Scope::Product(product_id), query_vec, limit, filter))
    }

    async fn search_by_source(
        &self,
        source_id: Uuid,
        query_vec: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>> {
        Ok(self.search(Scope::Source(source_id), query_vec, limit, filter))
    }

    async fn get_chunk_context(
        &self,
        chunk_id: &str,
        before: usize,
        after: usize,
    ) -> Result<Vec<Chunk>> {
        let stored = self.read();
        let target = match stored.iter().find(|sc| sc.chunk.id == chunk_id) {
            Some(sc) => &sc.chunk,
            None => return Ok(Vec::new()),
        };
        let lo = target.ordinal - before as i64;
        let hi = target.ordinal + after as i64;
        let mut siblings: Vec<Chunk> = stored
            .iter()
            .filter(|sc| sc.chunk.file_id == target.file_id)
            .filter(|sc| (lo..=hi).contains(&sc.chunk.ordinal))
            .map(|sc| sc.chunk.clone())
            .collect();
        siblings.sort_by_key(|c| c.ordinal);
        Ok(siblings)
    }
}

#[async_trait]
impl ChunkHierarchyStore for InMemoryStore {
    async fn get_parent_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let stored = self.read();
        let parent_id = stored
            .iter()
            .find(|sc| sc.chunk.id == chunk_id)
            .and_then(|sc| sc.chunk.parent_id.clone());
        Ok(parent_id.and_then(|pid| {
            stored
                .iter()
                .find(|sc| sc.chunk.id == pid)
                .map(|sc| sc.chunk.clone())
        }))
    }

    async fn get_child_chunks(&self, chunk_id: &str) -> Result<Vec<Chunk>> {
        let mut children: Vec<Chunk> = self
            .read()
            .iter()
            .filter(|sc| sc.chunk.parent_id.as_deref() == Some(chunk_id))
            .map(|sc| sc.chunk.clone())
            .collect();
        children.sort_by_key(|c| c.ordinal);
        Ok(children)
    }
}
