//! SQLite-backed local store.
//!
//! The local store is always written first and is the only store that holds
//! per-chunk sync flags and the durable sync status row. Embeddings are
//! stored as JSON-encoded float arrays in a BLOB column, metadata as JSON
//! text.
//!
//! Upserts use `ON CONFLICT DO UPDATE`, which keeps a row's rowid, so
//! `ORDER BY rowid` gives first-insertion order even after overwrites.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use super::{chunk_prefix, contains_ignore_case, rank_by_similarity, ChunkStore};
use crate::db;
use crate::error::{Error, Result};
use crate::migrate;
use crate::models::{ChunkHit, ChunkMetadata, DocumentChunk, SyncStatus};

pub struct SqliteStore {
    pool: SqlitePool,
}

fn storage(op: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| {
        tracing::error!(op, error = %e, "local storage failure");
        Error::Storage(e)
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn row_to_chunk(row: &SqliteRow) -> Result<DocumentChunk> {
    let embedding: Vec<u8> = row.try_get("embedding")?;
    let metadata: String = row.try_get("metadata")?;
    let synced: i64 = row.try_get("synced")?;
    Ok(DocumentChunk {
        id: row.try_get("id")?,
        content: row.try_get("content")?,
        embedding: serde_json::from_slice(&embedding)?,
        metadata: serde_json::from_str(&metadata)?,
        last_updated: row.try_get("last_updated")?,
        synced: synced != 0,
    })
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database file and bring its schema up to date.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn write_row(&self, chunk: &DocumentChunk, synced: bool, op: &'static str) -> Result<()> {
        let embedding = serde_json::to_vec(&chunk.embedding)?;
        let metadata = serde_json::to_string(&chunk.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO document_chunks (id, content, embedding, metadata, last_updated, synced)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                embedding = excluded.embedding,
                metadata = excluded.metadata,
                last_updated = excluded.last_updated,
                synced = excluded.synced
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.content)
        .bind(embedding)
        .bind(metadata)
        .bind(now())
        .bind(synced as i64)
        .execute(&self.pool)
        .await
        .map_err(storage(op))?;

        Ok(())
    }

    /// Insert or overwrite a chunk written by this process. The chunk is
    /// marked unsynced until a push confirms it on the remote.
    pub async fn store(
        &self,
        id: &str,
        content: &str,
        embedding: &[f32],
        metadata: &ChunkMetadata,
    ) -> Result<()> {
        let chunk = DocumentChunk {
            id: id.to_string(),
            content: content.to_string(),
            embedding: embedding.to_vec(),
            metadata: metadata.clone(),
            last_updated: 0,
            synced: false,
        };
        self.write_row(&chunk, false, "store").await
    }

    /// Write a chunk that came from the remote; it is synced by definition.
    pub async fn upsert_synced(&self, chunk: &DocumentChunk) -> Result<()> {
        self.write_row(chunk, true, "upsert_synced").await
    }

    pub async fn get(&self, id: &str) -> Result<Option<DocumentChunk>> {
        let row = sqlx::query(
            "SELECT id, content, embedding, metadata, last_updated, synced FROM document_chunks WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage("get"))?;

        row.as_ref().map(row_to_chunk).transpose()
    }

    pub async fn get_unsynced(&self) -> Result<Vec<DocumentChunk>> {
        let rows = sqlx::query(
            "SELECT id, content, embedding, metadata, last_updated, synced FROM document_chunks WHERE synced = 0 ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage("get_unsynced"))?;

        rows.iter().map(row_to_chunk).collect()
    }

    pub async fn mark_synced(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE document_chunks SET synced = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage("mark_synced"))?;
        Ok(())
    }

    pub async fn get_sync_status(&self) -> Result<SyncStatus> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT last_sync, status FROM sync_status WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(storage("get_sync_status"))?;

        Ok(match row {
            Some((last_sync, status)) => SyncStatus { last_sync, status },
            None => SyncStatus {
                last_sync: 0,
                status: "Never synced".to_string(),
            },
        })
    }

    pub async fn set_sync_status(&self, last_sync: i64, status: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_status (id, last_sync, status) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET last_sync = excluded.last_sync, status = excluded.status
            "#,
        )
        .bind(last_sync)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(storage("set_sync_status"))?;
        Ok(())
    }

    /// Replace the status text, keeping `last_sync` as it is.
    pub async fn set_status_message(&self, status: &str) -> Result<()> {
        sqlx::query("UPDATE sync_status SET status = ? WHERE id = 1")
            .bind(status)
            .execute(&self.pool)
            .await
            .map_err(storage("set_status_message"))?;
        Ok(())
    }

    /// Ids starting with `{base_id}_`, in insertion order.
    pub async fn ids_with_prefix(&self, base_id: &str) -> Result<Vec<String>> {
        let prefix = chunk_prefix(base_id);
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM document_chunks WHERE substr(id, 1, length(?)) = ? ORDER BY rowid",
        )
        .bind(&prefix)
        .bind(&prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(storage("ids_with_prefix"))?;
        Ok(ids)
    }

    pub async fn all_ids(&self) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM document_chunks ORDER BY rowid")
            .fetch_all(&self.pool)
            .await
            .map_err(storage("all_ids"))?;
        Ok(ids)
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(storage("count"))?;
        Ok(count)
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn upsert(&self, chunk: &DocumentChunk) -> Result<()> {
        self.write_row(chunk, chunk.synced, "upsert").await
    }

    async fn get_all(&self) -> Result<Vec<DocumentChunk>> {
        let rows = sqlx::query(
            "SELECT id, content, embedding, metadata, last_updated, synced FROM document_chunks ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage("get_all"))?;

        rows.iter().map(row_to_chunk).collect()
    }

    async fn delete_by_prefix(&self, base_id: &str) -> Result<u64> {
        let prefix = chunk_prefix(base_id);
        let result =
            sqlx::query("DELETE FROM document_chunks WHERE substr(id, 1, length(?)) = ?")
                .bind(&prefix)
                .bind(&prefix)
                .execute(&self.pool)
                .await
                .map_err(storage("delete_by_prefix"))?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM document_chunks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage("delete"))?;
        Ok(())
    }

    async fn search_keyword(&self, term: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, content FROM document_chunks ORDER BY rowid")
                .fetch_all(&self.pool)
                .await
                .map_err(storage("search_keyword"))?;

        let needle = term.to_lowercase();
        Ok(rows
            .into_iter()
            .filter(|(_, content)| contains_ignore_case(content, &needle))
            .take(limit)
            .map(|(id, content)| ChunkHit {
                id,
                content,
                similarity: None,
            })
            .collect())
    }

    async fn match_similar(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        let chunks = self.get_all().await?;
        Ok(rank_by_similarity(&chunks, embedding, threshold, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("nested/dir/local.sqlite"))
            .await
            .unwrap();
        (tmp, store)
    }

    fn meta() -> ChunkMetadata {
        ChunkMetadata::for_source("report.pdf")
    }

    #[tokio::test]
    async fn test_store_roundtrip_and_overwrite_resets_synced() {
        let (_tmp, store) = open_store().await;
        store
            .store("report_0", "first", &[0.5, 0.25], &meta())
            .await
            .unwrap();
        store.mark_synced("report_0").await.unwrap();
        assert!(store.get("report_0").await.unwrap().unwrap().synced);

        store
            .store("report_0", "second", &[0.75, 0.125], &meta())
            .await
            .unwrap();
        let chunk = store.get("report_0").await.unwrap().unwrap();
        assert_eq!(chunk.content, "second");
        assert_eq!(chunk.embedding, vec![0.75, 0.125]);
        assert_eq!(chunk.metadata.source, "report.pdf");
        assert!(!chunk.synced);
        assert!(chunk.last_updated > 0);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_all_keeps_insertion_order_after_overwrite() {
        let (_tmp, store) = open_store().await;
        for id in ["b_0", "a_0", "c_0"] {
            store.store(id, id, &[1.0], &meta()).await.unwrap();
        }
        store.store("b_0", "updated", &[1.0], &meta()).await.unwrap();

        let ids: Vec<String> = store
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["b_0", "a_0", "c_0"]);
    }

    #[tokio::test]
    async fn test_unsynced_and_mark_synced() {
        let (_tmp, store) = open_store().await;
        store.store("x_0", "a", &[1.0], &meta()).await.unwrap();
        store.store("x_1", "b", &[1.0], &meta()).await.unwrap();
        store.mark_synced("x_0").await.unwrap();

        let pending = store.get_unsynced().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "x_1");
    }

    #[tokio::test]
    async fn test_delete_by_prefix_is_literal() {
        let (_tmp, store) = open_store().await;
        for id in ["q3_sales_0", "q3_sales_1", "q3Xsales_0", "q3_sales2_0", "q%_0"] {
            store.store(id, id, &[1.0], &meta()).await.unwrap();
        }

        assert_eq!(store.delete_by_prefix("q3_sales").await.unwrap(), 2);
        assert_eq!(store.delete_by_prefix("q%").await.unwrap(), 1);
        assert_eq!(
            store.all_ids().await.unwrap(),
            vec!["q3Xsales_0", "q3_sales2_0"]
        );
        assert_eq!(store.delete_by_prefix("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_keyword_search_is_case_insensitive() {
        let (_tmp, store) = open_store().await;
        store
            .store("d_0", "The Quick Brown Fox", &[1.0], &meta())
            .await
            .unwrap();
        store
            .store("d_1", "Größe und Maß", &[1.0], &meta())
            .await
            .unwrap();

        let hits = store.search_keyword("quick", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "d_0");
        assert_eq!(store.search_keyword("GRÖSSE", 10).await.unwrap().len(), 0);
        assert_eq!(store.search_keyword("GRÖßE", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_status_defaults_and_updates() {
        let (_tmp, store) = open_store().await;
        let status = store.get_sync_status().await.unwrap();
        assert_eq!(status.last_sync, 0);
        assert_eq!(status.status, "Never synced");

        store.set_sync_status(1_700_000_000, "Synced 3/3 chunks").await.unwrap();
        store.set_status_message("remote unavailable: probe failed").await.unwrap();
        let status = store.get_sync_status().await.unwrap();
        assert_eq!(status.last_sync, 1_700_000_000);
        assert_eq!(status.status, "remote unavailable: probe failed");
    }

    #[tokio::test]
    async fn test_match_similar_ranks_best_first() {
        let (_tmp, store) = open_store().await;
        store.store("v_0", "east", &[1.0, 0.0], &meta()).await.unwrap();
        store.store("v_1", "north", &[0.0, 1.0], &meta()).await.unwrap();
        store.store("v_2", "northeast", &[1.0, 1.0], &meta()).await.unwrap();

        let hits = store.match_similar(&[1.0, 0.1], 0.5, 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["v_0", "v_2"]);
    }
}
