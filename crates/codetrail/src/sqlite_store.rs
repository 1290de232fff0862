//! SQLite-backed [`SimilarityStore`] and [`ChunkHierarchyStore`].
//!
//! Chunks live in the `chunks` table scoped by product and source;
//! embeddings live in `chunk_vectors`. Similarity search loads the
//! scoped, filtered vectors and ranks them by cosine similarity in
//! process. Timestamps are stored as Unix milliseconds.

use std::cmp::Ordering;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use codetrail_core::embedding::{
    blob_to_vec, cosine_similarity, similarity_to_score, vec_to_blob,
};
use codetrail_core::models::{base_chunk_key, Chunk, ChunkLevel, ChunkProvenance, SearchResult};
use codetrail_core::provenance::ProvenanceGraph;
use codetrail_core::store::{ChunkHierarchyStore, SearchFilter, SimilarityStore};

use crate::config::Config;
use crate::db;
use crate::migrate;

const CHUNK_COLUMNS: &str = "id, file_id, file_path, ordinal, start_line, end_line, content, \
     content_hash, token_count, kind, name, parent_name, signature, doc_comment, content_type, \
     level, parent_id, importance, snapshot_id, commit_hash, author, updated_at, indexed_at, \
     file_version, is_latest, chunk_key";

/// An embedding to store alongside a chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkEmbedding<'a> {
    pub model: &'a str,
    pub vector: &'a [f32],
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and run migrations.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or replace one chunk version.
    ///
    /// Runs in a single transaction. When `chunk.is_latest` is set, every
    /// other row sharing its base key is demoted first, so each logical
    /// region keeps at most one latest version.
    pub async fn insert_chunk(
        &self,
        product_id: Uuid,
        source_id: Uuid,
        source_snapshot_id: &str,
        chunk: &Chunk,
        embedding: Option<ChunkEmbedding<'_>>,
    ) -> Result<()> {
        let base_key = base_chunk_key(&chunk.chunk_key);
        let mut tx = self.pool.begin().await?;

        if chunk.is_latest && !chunk.chunk_key.is_empty() {
            sqlx::query("UPDATE chunks SET is_latest = 0 WHERE base_key = ? AND id != ?")
                .bind(base_key)
                .bind(&chunk.id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("DELETE FROM chunk_vectors WHERE chunk_id = ?")
            .bind(&chunk.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE id = ?")
            .bind(&chunk.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO chunks (id, product_id, source_id, source_snapshot_id, file_id, file_path,
                                ordinal, start_line, end_line, content, content_hash, token_count,
                                kind, name, parent_name, signature, doc_comment, content_type,
                                level, parent_id, importance, snapshot_id, commit_hash, author,
                                updated_at, indexed_at, file_version, is_latest, chunk_key,
                                base_key)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                    ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(product_id.to_string())
        .bind(source_id.to_string())
        .bind(source_snapshot_id)
        .bind(&chunk.file_id)
        .bind(&chunk.file_path)
        .bind(chunk.ordinal)
        .bind(chunk.start_line)
        .bind(chunk.end_line)
        .bind(&chunk.content)
        .bind(&chunk.content_hash)
        .bind(chunk.token_count as i64)
        .bind(&chunk.kind)
        .bind(&chunk.name)
        .bind(&chunk.parent_name)
        .bind(&chunk.signature)
        .bind(&chunk.doc_comment)
        .bind(&chunk.content_type)
        .bind(chunk.level.depth())
        .bind(&chunk.parent_id)
        .bind(chunk.importance)
        .bind(&chunk.snapshot_id)
        .bind(&chunk.commit_hash)
        .bind(&chunk.author)
        .bind(chunk.updated_at.map(|t| t.timestamp_millis()))
        .bind(chunk.indexed_at.timestamp_millis())
        .bind(&chunk.file_version)
        .bind(chunk.is_latest)
        .bind(&chunk.chunk_key)
        .bind(base_key)
        .execute(&mut *tx)
        .await?;

        if let Some(embedding) = embedding {
            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, model, dims, embedding) VALUES (?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(embedding.model)
            .bind(embedding.vector.len() as i64)
            .bind(vec_to_blob(embedding.vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit chunk {}", chunk.id))?;
        Ok(())
    }

    pub async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query(&format!("SELECT {} FROM chunks WHERE id = ?", CHUNK_COLUMNS))
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_chunk))
    }

    pub async fn count_chunks(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Build a provenance graph holding one record per stored chunk.
    ///
    /// Rows with incomplete provenance are skipped with a warning.
    pub async fn load_provenance_graph(&self) -> Result<ProvenanceGraph> {
        let rows = sqlx::query(
            r#"
            SELECT id, snapshot_id, file_path, commit_hash, chunk_key, is_latest,
                   indexed_at, source_snapshot_id, author, updated_at
            FROM chunks
            ORDER BY indexed_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let graph = ProvenanceGraph::new();
        for row in &rows {
            let provenance = ChunkProvenance {
                chunk_id: row.get("id"),
                snapshot_id: row.get("snapshot_id"),
                file_path: row.get("file_path"),
                commit_hash: row.get("commit_hash"),
                chunk_key: row.get("chunk_key"),
                is_latest: row.get("is_latest"),
                indexed_at: millis_to_datetime(row.get("indexed_at")),
                source_snapshot_id: row.get("source_snapshot_id"),
                author: row.get("author"),
                updated_at: row
                    .get::<Option<i64>, _>("updated_at")
                    .map(millis_to_datetime),
            };
            if let Err(err) = graph.add(provenance) {
                let chunk_id: String = row.get("id");
                tracing::warn!(chunk_id = %chunk_id, error = %err, "Skipping chunk provenance.");
            }
        }

        tracing::debug!(records = graph.count(), "Provenance graph loaded.");
        Ok(graph)
    }

    async fn search_scoped(
        &self,
        scope_column: &'static str,
        scope_id: Uuid,
        query_vec: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>> {
        let sql = format!(
            r#"
            SELECT c.id, c.file_path, c.start_line, c.end_line, c.content, cv.embedding
            FROM chunks c
            JOIN chunk_vectors cv ON cv.chunk_id = c.id
            WHERE c.{} = ?
              AND (? IS NULL OR substr(c.file_path, 1, length(?)) = ?)
              AND (? IS NULL OR c.content_type = ?)
            "#,
            scope_column
        );
        let prefix = filter.path_prefix.as_deref();
        let content_type = filter.content_type.as_deref();

        let rows = sqlx::query(&sql)
            .bind(scope_id.to_string())
            .bind(prefix)
            .bind(prefix)
            .bind(prefix)
            .bind(content_type)
            .bind(content_type)
            .fetch_all(&self.pool)
            .await?;

        let mut results: Vec<SearchResult> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob));
                SearchResult {
                    chunk_id: row.get("id"),
                    file_path: row.get("file_path"),
                    start_line: row.get("start_line"),
                    end_line: row.get("end_line"),
                    content: row.get("content"),
                    score: similarity_to_score(similarity),
                    prev_content: None,
                    next_content: None,
                }
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let token_count: i64 = row.get("token_count");
    Chunk {
        id: row.get("id"),
        file_id: row.get("file_id"),
        file_path: row.get("file_path"),
        ordinal: row.get("ordinal"),
        start_line: row.get("start_line"),
        end_line: row.get("end_line"),
        content: row.get("content"),
        content_hash: row.get("content_hash"),
        token_count: token_count.max(0) as usize,
        kind: row.get("kind"),
        name: row.get("name"),
        parent_name: row.get("parent_name"),
        signature: row.get("signature"),
        doc_comment: row.get("doc_comment"),
        content_type: row.get("content_type"),
        level: ChunkLevel::from_depth(row.get("level")),
        parent_id: row.get("parent_id"),
        importance: row.get("importance"),
        snapshot_id: row.get("snapshot_id"),
        commit_hash: row.get("commit_hash"),
        author: row.get("author"),
        updated_at: row
            .get::<Option<i64>, _>("updated_at")
            .map(millis_to_datetime),
        indexed_at: millis_to_datetime(row.get("indexed_at")),
        file_version: row.get("file_version"),
        is_latest: row.get("is_latest"),
        chunk_key: row.get("chunk_key"),
    }
}

#[async_trait]
impl SimilarityStore for SqliteStore {
    async fn search_by_product(
        &self,
        product_id: Uuid,
        query_vec: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>> {
        self.search_scoped("product_id", product_id, query_vec, limit, filter)
            .await
    }

    async fn search_by_source(
        &self,
        source_id: Uuid,
        query_vec: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>> {
        self.search_scoped("source_id", source_id, query_vec, limit, filter)
            .await
    }

    async fn get_chunk_context(
        &self,
        chunk_id: &str,
        before: usize,
        after: usize,
    ) -> Result<Vec<Chunk>> {
        let target = sqlx::query("SELECT file_id, ordinal FROM chunks WHERE id = ?")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(target) = target else {
            return Ok(Vec::new());
        };
        let file_id: String = target.get("file_id");
        let ordinal: i64 = target.get("ordinal");

        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks WHERE file_id = ? AND ordinal BETWEEN ? AND ? ORDER BY ordinal ASC",
            CHUNK_COLUMNS
        ))
        .bind(&file_id)
        .bind(ordinal - before as i64)
        .bind(ordinal + after as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_chunk).collect())
    }
}

#[async_trait]
impl ChunkHierarchyStore for SqliteStore {
    async fn get_parent_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM chunks WHERE id = (SELECT parent_id FROM chunks WHERE id = ?)",
            CHUNK_COLUMNS
        ))
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_chunk))
    }

    async fn get_child_chunks(&self, chunk_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks WHERE parent_id = ? ORDER BY ordinal ASC",
            CHUNK_COLUMNS
        ))
        .bind(chunk_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }
}
