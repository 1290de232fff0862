//! Integration tests for the SQLite store and the end-to-end retriever.
//!
//! Each test gets its own temporary database. Query vectors come from a
//! deterministic keyword embedder so similarity scores are exact.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use codetrail::config::{parse_config, Config};
use codetrail::retrieve::Retriever;
use codetrail::sqlite_store::{ChunkEmbedding, SqliteStore};
use codetrail_core::context::ContextFormat;
use codetrail_core::embedding::Embedder;
use codetrail_core::models::{base_chunk_key, chunk_key, Chunk, ChunkLevel};
use codetrail_core::provenance::ProvenanceGraph;
use codetrail_core::ranking::RankOptions;
use codetrail_core::search::SearchScope;
use codetrail_core::store::{ChunkHierarchyStore, SearchFilter, SimilarityStore};
use codetrail_core::Error;

const MODEL: &str = "keyword-test";

/// Maps a query onto three axes: parsing, networking, everything else.
struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        MODEL
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.to_lowercase();
        if text.contains("parse") {
            Ok(vec![1.0, 0.0, 0.0])
        } else if text.contains("socket") {
            Ok(vec![0.0, 1.0, 0.0])
        } else {
            Ok(vec![0.0, 0.0, 1.0])
        }
    }
}

/// Never resolves.
struct StalledEmbedder;

#[async_trait]
impl Embedder for StalledEmbedder {
    fn model_name(&self) -> &str {
        "stalled"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        std::future::pending::<Result<Vec<f32>>>().await
    }
}

struct Fixture {
    _dir: TempDir,
    config: Config,
    store: Arc<SqliteStore>,
    product: Uuid,
    source: Uuid,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("data").join("codetrail.sqlite");
    let config = parse_config(&format!(
        "[db]\npath = \"{}\"\n\n[search]\ncontext_before = 1\ncontext_after = 1\n",
        db_path.display()
    ))
    .unwrap();
    let store = Arc::new(SqliteStore::open(&config).await.unwrap());
    Fixture {
        _dir: dir,
        config,
        store,
        product: Uuid::new_v4(),
        source: Uuid::new_v4(),
    }
}

fn versioned(id: &str, path: &str, ordinal: i64, commit: &str, minute: u32) -> Chunk {
    let start = ordinal * 10 + 1;
    let mut chunk = Chunk::new(
        id,
        format!("file:{}", path),
        path,
        ordinal,
        start,
        start + 9,
        format!("// {} at {}", id, commit),
    );
    chunk.commit_hash = commit.to_string();
    chunk.snapshot_id = format!("snap-{}", commit);
    chunk.chunk_key = chunk_key("prod", "src", path, start, start + 9, commit);
    chunk.indexed_at = Utc.with_ymd_and_hms(2025, 1, 1, 12, minute, 0).unwrap();
    chunk.content_type = Some("code".to_string());
    chunk
}

async fn insert(fx: &Fixture, chunk: &Chunk, vector: Option<&[f32]>) {
    let embedding = vector.map(|v| ChunkEmbedding {
        model: MODEL,
        vector: v,
    });
    fx.store
        .insert_chunk(fx.product, fx.source, &chunk.snapshot_id, chunk, embedding)
        .await
        .unwrap();
}

/// A file summary with one declaration present at two commits.
async fn seed_versions(fx: &Fixture) {
    let mut summary = versioned("summary", "src/config.rs", 0, "c2", 1);
    summary.level = ChunkLevel::FileSummary;
    summary.kind = Some("module".to_string());
    summary.name = Some("config".to_string());
    insert(fx, &summary, None).await;

    let mut old = versioned("parse-v1", "src/config.rs", 1, "c1", 0);
    old.parent_id = Some("summary".to_string());
    insert(fx, &old, Some(&[1.0, 0.0, 0.0])).await;

    let mut new = versioned("parse-v2", "src/config.rs", 1, "c2", 5);
    new.parent_id = Some("summary".to_string());
    insert(fx, &new, Some(&[0.8, 0.6, 0.0])).await;
}

fn retriever(
    fx: &Fixture,
    embedder: Arc<dyn Embedder>,
    graph: Arc<ProvenanceGraph>,
) -> Retriever {
    Retriever::new(&fx.config, embedder, fx.store.clone(), fx.store.clone(), graph).unwrap()
}

// ============ SQLite store ============

#[tokio::test]
async fn test_insert_keeps_one_latest_per_region() {
    let fx = fixture().await;
    seed_versions(&fx).await;

    let old = fx.store.get_chunk("parse-v1").await.unwrap().unwrap();
    let new = fx.store.get_chunk("parse-v2").await.unwrap().unwrap();
    assert!(!old.is_latest);
    assert!(new.is_latest);

    let latest: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE base_key = ? AND is_latest = 1")
            .bind(base_chunk_key(&new.chunk_key))
            .fetch_one(fx.store.pool())
            .await
            .unwrap();
    assert_eq!(latest, 1);
}

#[tokio::test]
async fn test_reinsert_replaces_row() {
    let fx = fixture().await;
    let mut chunk = versioned("a", "src/a.rs", 0, "c1", 0);
    insert(&fx, &chunk, Some(&[1.0, 0.0, 0.0])).await;
    chunk.content = "fn replaced() {}".to_string();
    insert(&fx, &chunk, Some(&[0.0, 1.0, 0.0])).await;

    assert_eq!(fx.store.count_chunks().await.unwrap(), 1);
    let stored = fx.store.get_chunk("a").await.unwrap().unwrap();
    assert_eq!(stored.content, "fn replaced() {}");
    assert_eq!(stored.indexed_at, chunk.indexed_at);
    assert_eq!(stored.content_type.as_deref(), Some("code"));
}

#[tokio::test]
async fn test_load_provenance_graph() {
    let fx = fixture().await;
    seed_versions(&fx).await;

    let graph = fx.store.load_provenance_graph().await.unwrap();
    assert_eq!(graph.count() as i64, fx.store.count_chunks().await.unwrap());
    assert!(graph.is_latest("parse-v2").unwrap());
    assert!(!graph.is_latest("parse-v1").unwrap());

    let v1 = graph.get("parse-v1").unwrap();
    assert_eq!(v1.commit_hash, "c1");
    assert_eq!(v1.source_snapshot_id, "snap-c1");
    assert_eq!(graph.get_file_history("src/config.rs").len(), 3);

    let latest = graph.get_latest_by_chunk_key(&v1.chunk_key).unwrap();
    assert_eq!(latest.chunk_id, "parse-v1");
    assert!(graph.get("missing").unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_similarity_search_scopes_and_filters() {
    let fx = fixture().await;
    seed_versions(&fx).await;

    let mut doc = versioned("readme", "docs/parse.md", 0, "c2", 6);
    doc.content_type = Some("docs".to_string());
    insert(&fx, &doc, Some(&[0.9, 0.1, 0.0])).await;

    let other_product = Uuid::new_v4();
    let foreign = versioned("foreign", "src/config.rs", 3, "c9", 7);
    fx.store
        .insert_chunk(other_product, fx.source, "snap", &foreign, None)
        .await
        .unwrap();

    let query = [1.0, 0.0, 0.0];
    let all = fx
        .store
        .search_by_product(fx.product, &query, 10, &SearchFilter::default())
        .await
        .unwrap();
    let ids: Vec<&str> = all.iter().map(|r| r.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["parse-v1", "readme", "parse-v2"]);
    assert!((all[0].score - 1.0).abs() < 1e-6);

    let src_only = SearchFilter {
        path_prefix: Some("src/".to_string()),
        content_type: None,
    };
    let hits = fx
        .store
        .search_by_source(fx.source, &query, 10, &src_only)
        .await
        .unwrap();
    assert!(hits.iter().all(|r| r.file_path.starts_with("src/")));
    assert_eq!(hits.len(), 2);

    let docs_only = SearchFilter {
        path_prefix: None,
        content_type: Some("docs".to_string()),
    };
    let hits = fx
        .store
        .search_by_product(fx.product, &query, 10, &docs_only)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "readme");

    let limited = fx
        .store
        .search_by_product(fx.product, &query, 1, &SearchFilter::default())
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);

    let none = fx
        .store
        .search_by_product(other_product, &query, 10, &SearchFilter::default())
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_context_window_and_hierarchy_lookups() {
    let fx = fixture().await;
    for ordinal in 0..5 {
        let mut chunk = versioned(&format!("c{}", ordinal), "src/net.rs", ordinal, "c1", 0);
        if ordinal > 0 {
            chunk.parent_id = Some("c0".to_string());
        }
        insert(&fx, &chunk, Some(&[0.0, 1.0, 0.0])).await;
    }

    let window = fx.store.get_chunk_context("c2", 1, 2).await.unwrap();
    let ids: Vec<&str> = window.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2", "c3", "c4"]);
    assert!(fx.store.get_chunk_context("nope", 1, 1).await.unwrap().is_empty());

    let parent = fx.store.get_parent_chunk("c3").await.unwrap().unwrap();
    assert_eq!(parent.id, "c0");
    assert!(fx.store.get_parent_chunk("c0").await.unwrap().is_none());

    let children = fx.store.get_child_chunks("c0").await.unwrap();
    let ordinals: Vec<i64> = children.iter().map(|c| c.ordinal).collect();
    assert_eq!(ordinals, vec![1, 2, 3, 4]);
    assert!(fx.store.get_child_chunks("c4").await.unwrap().is_empty());
}

// ============ Retriever ============

#[tokio::test]
async fn test_retrieve_prefers_latest_version() {
    let fx = fixture().await;
    seed_versions(&fx).await;
    let graph = Arc::new(fx.store.load_provenance_graph().await.unwrap());
    let retriever = retriever(&fx, Arc::new(KeywordEmbedder), graph);

    let mut options = retriever.default_options();
    options.rank = Some(RankOptions {
        latest_only: false,
        deduplicate: true,
    });
    let payload = retriever
        .retrieve(SearchScope::Product(fx.product), "parse config", &options)
        .await
        .unwrap();

    assert_eq!(payload.results.len(), 1);
    let hit = &payload.results[0];
    assert_eq!(hit.result.chunk_id, "parse-v2");
    assert!((hit.result.score - 0.95).abs() < 1e-6);
    assert_eq!(hit.parent.as_ref().map(|p| p.id.as_str()), Some("summary"));

    assert_eq!(payload.ranked.len(), 1);
    assert!(payload.ranked[0].is_latest);
    assert!((payload.ranked[0].original_score - 0.8).abs() < 1e-6);

    assert!(payload.context.starts_with("## Parent: module config (src/config.rs"));
    assert!(payload.context.contains("## Search result 1: src/config.rs"));
    assert_eq!(payload.token_estimate, payload.context.chars().count() / 4);
}

#[tokio::test]
async fn test_retrieve_without_ranking_keeps_raw_order() {
    let fx = fixture().await;
    seed_versions(&fx).await;
    let graph = Arc::new(fx.store.load_provenance_graph().await.unwrap());
    let retriever = retriever(&fx, Arc::new(KeywordEmbedder), graph);

    let mut options = retriever.default_options();
    options.rank = None;
    options.hierarchy = None;
    options.format = ContextFormat::Compact;
    let payload = retriever
        .retrieve(SearchScope::Source(fx.source), "parse", &options)
        .await
        .unwrap();

    let ids: Vec<&str> = payload
        .results
        .iter()
        .map(|r| r.result.chunk_id.as_str())
        .collect();
    assert_eq!(ids, vec!["parse-v1", "parse-v2"]);
    assert!(payload.ranked.is_empty());
    assert!(payload.results.iter().all(|r| r.parent.is_none()));
    assert!(payload.context.starts_with("src/config.rs:11-20 (1.00)\n"));

    // Both versions share ordinal 1, so the summary at ordinal 0 is the
    // only sibling before them.
    let prev = payload.results[0].result.prev_content.as_deref();
    assert_eq!(prev, Some("// summary at c2"));
}

#[tokio::test]
async fn test_retrieve_latest_only_drops_stale() {
    let fx = fixture().await;
    seed_versions(&fx).await;
    let graph = Arc::new(fx.store.load_provenance_graph().await.unwrap());
    let retriever = retriever(&fx, Arc::new(KeywordEmbedder), graph);

    let mut options = retriever.default_options();
    options.rank = Some(RankOptions {
        latest_only: true,
        deduplicate: false,
    });
    let payload = retriever
        .retrieve(SearchScope::Product(fx.product), "parse", &options)
        .await
        .unwrap();
    assert_eq!(payload.results.len(), 1);
    assert_eq!(payload.results[0].result.chunk_id, "parse-v2");
}

#[tokio::test]
async fn test_retrieve_deadline_cancels() {
    let fx = fixture().await;
    seed_versions(&fx).await;
    let graph = Arc::new(fx.store.load_provenance_graph().await.unwrap());
    let retriever = retriever(&fx, Arc::new(StalledEmbedder), graph);

    let mut options = retriever.default_options();
    options.timeout = Duration::from_millis(50);
    let err = retriever
        .retrieve(SearchScope::Product(fx.product), "parse", &options)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_retrieve_rejects_bad_input() {
    let fx = fixture().await;
    let graph = Arc::new(fx.store.load_provenance_graph().await.unwrap());
    let retriever = retriever(&fx, Arc::new(KeywordEmbedder), graph);
    let options = retriever.default_options();

    let err = retriever
        .retrieve(SearchScope::Product(Uuid::nil()), "parse", &options)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput { .. }));

    let err = retriever
        .retrieve(SearchScope::Product(fx.product), "   ", &options)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput { .. }));
}

#[tokio::test]
async fn test_open_with_disabled_embedder() {
    let fx = fixture().await;
    seed_versions(&fx).await;

    let retriever = Retriever::open(&fx.config).await.unwrap();
    assert_eq!(retriever.ranker().config().latest_version_boost, 0.15);

    let options = retriever.default_options();
    let err = retriever
        .retrieve(SearchScope::Product(fx.product), "parse", &options)
        .await
        .unwrap_err();
    match err {
        Error::Upstream { operation, .. } => assert_eq!(operation, "query embedding"),
        other => panic!("expected upstream error, got {:?}", other),
    }
}
