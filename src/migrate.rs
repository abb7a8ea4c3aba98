use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on an open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            file_name TEXT PRIMARY KEY,
            doc_name TEXT NOT NULL DEFAULT '',
            doc_type TEXT NOT NULL DEFAULT '',
            doc_description TEXT NOT NULL DEFAULT '',
            manufacturer TEXT NOT NULL DEFAULT '',
            model TEXT NOT NULL DEFAULT '',
            ingested_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunks carry a copy of their document's metadata.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            page INTEGER NOT NULL,
            h1 TEXT NOT NULL DEFAULT '',
            h2 TEXT NOT NULL DEFAULT '',
            h3 TEXT NOT NULL DEFAULT '',
            text TEXT NOT NULL,
            doc_name TEXT NOT NULL DEFAULT '',
            doc_type TEXT NOT NULL DEFAULT '',
            doc_description TEXT NOT NULL DEFAULT '',
            manufacturer TEXT NOT NULL DEFAULT '',
            model TEXT NOT NULL DEFAULT '',
            UNIQUE(file_name, chunk_index),
            FOREIGN KEY (file_name) REFERENCES documents(file_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            dims INTEGER NOT NULL,
            vector BLOB,
            context_vector BLOB,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Virtual table creation is guarded through sqlite_master.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                file_name UNINDEXED,
                text,
                h1,
                h2,
                h3,
                doc_name,
                doc_type,
                manufacturer,
                model
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_file_name ON chunks(file_name)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc_name ON chunks(doc_name)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_file_name ON chunk_vectors(file_name)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
