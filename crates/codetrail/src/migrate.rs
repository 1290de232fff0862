//! Idempotent schema setup.
//!
//! ```text
//! chunks          one row per chunk version, scoped by product/source
//! chunk_vectors   one embedding per chunk (little-endian f32 BLOB)
//! ```
//!
//! `base_key` is the chunk key without its `@commit` suffix. It is
//! stored so the latest-version flag can be maintained with a single
//! indexed UPDATE.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            product_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            source_snapshot_id TEXT NOT NULL,
            file_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            token_count INTEGER NOT NULL DEFAULT 0,
            kind TEXT,
            name TEXT,
            parent_name TEXT,
            signature TEXT,
            doc_comment TEXT,
            content_type TEXT,
            level INTEGER NOT NULL DEFAULT 1,
            parent_id TEXT,
            importance REAL,
            snapshot_id TEXT NOT NULL,
            commit_hash TEXT NOT NULL,
            author TEXT,
            updated_at INTEGER,
            indexed_at INTEGER NOT NULL,
            file_version TEXT,
            is_latest INTEGER NOT NULL DEFAULT 1,
            chunk_key TEXT NOT NULL DEFAULT '',
            base_key TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_chunks_file_ordinal ON chunks(file_id, ordinal)",
        "CREATE INDEX IF NOT EXISTS idx_chunks_parent_id ON chunks(parent_id)",
        "CREATE INDEX IF NOT EXISTS idx_chunks_chunk_key ON chunks(chunk_key)",
        "CREATE INDEX IF NOT EXISTS idx_chunks_base_key ON chunks(base_key)",
        "CREATE INDEX IF NOT EXISTS idx_chunks_product ON chunks(product_id)",
        "CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_id)",
    ];
    for statement in indexes {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::debug!("Migrations complete.");
    Ok(())
}
