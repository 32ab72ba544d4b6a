//! Sqlite-backed persistence for completed document indexes.
//!
//! One logical record per document id: an index row plus its ordered chunk
//! rows. A save replaces the whole record in a single transaction, so readers
//! only ever observe the old set or the complete new set.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::index::binary::{decode_embedding, encode_embedding};
use crate::index::{DocumentChunk, DocumentIndex};
use crate::traits::IndexStore;

pub struct SqliteIndexStore {
    pool: SqlitePool,
}

impl SqliteIndexStore {
    pub async fn open(db_path: &str) -> anyhow::Result<Self> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS document_indexes (
            document_id TEXT PRIMARY KEY,
            ready INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS document_chunks (
            document_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            chunk_id TEXT NOT NULL,
            section_id TEXT NOT NULL,
            section_title TEXT NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (document_id, seq)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_document ON document_chunks(document_id, seq)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    async fn load(&self, document_id: &str) -> anyhow::Result<Option<DocumentIndex>> {
        let index_row = sqlx::query("SELECT ready FROM document_indexes WHERE document_id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(index_row) = index_row else {
            return Ok(None);
        };
        let ready: i64 = index_row.get("ready");

        let rows = sqlx::query(
            "SELECT chunk_id, section_id, section_title, text, embedding
             FROM document_chunks WHERE document_id = ? ORDER BY seq",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        let mut chunks = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            chunks.push(DocumentChunk {
                id: row.get("chunk_id"),
                section_id: row.get("section_id"),
                section_title: row.get("section_title"),
                text: row.get("text"),
                embedding: decode_embedding(&blob)?,
            });
        }

        debug!(document_id, chunks = chunks.len(), "loaded index from store");
        Ok(Some(DocumentIndex {
            document_id: document_id.to_string(),
            chunks,
            ready: ready != 0,
        }))
    }

    async fn save(&self, index: &DocumentIndex) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
            .bind(&index.document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM document_indexes WHERE document_id = ?")
            .bind(&index.document_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO document_indexes (document_id, ready, created_at) VALUES (?, ?, ?)",
        )
        .bind(&index.document_id)
        .bind(index.ready as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for (seq, chunk) in index.chunks.iter().enumerate() {
            sqlx::query(
                "INSERT INTO document_chunks
                 (document_id, seq, chunk_id, section_id, section_title, text, embedding)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&index.document_id)
            .bind(seq as i64)
            .bind(&chunk.id)
            .bind(&chunk.section_id)
            .bind(&chunk.section_title)
            .bind(&chunk.text)
            .bind(encode_embedding(&chunk.embedding))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            document_id = %index.document_id,
            chunks = index.chunks.len(),
            "persisted index"
        );
        Ok(())
    }
}
