//! In-memory [`ChunkStore`] for tests.
//!
//! Chunks live in a `BTreeMap` behind a `RwLock`. An availability flag can
//! be switched off to simulate an unreachable remote: `probe` then returns
//! `false` and every other call fails with [`Error::RemoteUnavailable`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{chunk_prefix, contains_ignore_case, rank_by_similarity, ChunkStore};
use crate::error::{Error, Result};
use crate::models::{ChunkHit, DocumentChunk};

pub struct InMemoryStore {
    chunks: RwLock<BTreeMap<String, DocumentChunk>>,
    available: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Direct lookup, bypassing the availability flag.
    pub fn get(&self, id: &str) -> Option<DocumentChunk> {
        self.read().get(id).cloned()
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::RemoteUnavailable("in-memory store switched off".into()))
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, DocumentChunk>> {
        self.chunks.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, DocumentChunk>> {
        self.chunks.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn probe(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn upsert(&self, chunk: &DocumentChunk) -> Result<()> {
        self.check()?;
        self.write().insert(chunk.id.clone(), chunk.clone());
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<DocumentChunk>> {
        self.check()?;
        Ok(self.read().values().cloned().collect())
    }

    async fn delete_by_prefix(&self, base_id: &str) -> Result<u64> {
        self.check()?;
        let prefix = chunk_prefix(base_id);
        let mut chunks = self.write();
        let before = chunks.len();
        chunks.retain(|id, _| !id.starts_with(&prefix));
        Ok((before - chunks.len()) as u64)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.check()?;
        self.write().remove(id);
        Ok(())
    }

    async fn search_keyword(&self, term: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        self.check()?;
        let needle = term.to_lowercase();
        Ok(self
            .read()
            .values()
            .filter(|c| contains_ignore_case(&c.content, &needle))
            .take(limit)
            .map(|c| ChunkHit {
                id: c.id.clone(),
                content: c.content.clone(),
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
        self.check()?;
        let chunks = self.read();
        Ok(rank_by_similarity(chunks.values(), embedding, threshold, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn chunk(id: &str, content: &str, embedding: Vec<f32>) -> DocumentChunk {
        DocumentChunk {
            id: id.to_string(),
            content: content.to_string(),
            embedding,
            metadata: ChunkMetadata::for_source("doc.txt"),
            last_updated: 0,
            synced: false,
        }
    }

    #[tokio::test]
    async fn test_prefix_delete_is_exact() {
        let store = InMemoryStore::new();
        store.upsert(&chunk("report_0", "a", vec![1.0])).await.unwrap();
        store.upsert(&chunk("report_1", "b", vec![1.0])).await.unwrap();
        store.upsert(&chunk("report_x_0", "c", vec![1.0])).await.unwrap();
        store.upsert(&chunk("reports_0", "d", vec![1.0])).await.unwrap();

        // `report_x_0` starts with `report_` and belongs to the prefix too.
        assert_eq!(store.delete_by_prefix("report").await.unwrap(), 3);
        assert_eq!(store.len(), 1);
        assert!(store.get("reports_0").is_some());
    }

    #[tokio::test]
    async fn test_unavailable_store_refuses_calls() {
        let store = InMemoryStore::new();
        store.set_available(false);
        assert!(!store.probe().await);
        let err = store.get_all().await.unwrap_err();
        assert!(err.is_remote());
        store.set_available(true);
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_similarity_ranked_descending() {
        let store = InMemoryStore::new();
        store.upsert(&chunk("a_0", "far", vec![0.0, 1.0])).await.unwrap();
        store.upsert(&chunk("b_0", "near", vec![1.0, 0.1])).await.unwrap();
        store.upsert(&chunk("c_0", "opposite", vec![-1.0, 0.0])).await.unwrap();

        let hits = store.match_similar(&[1.0, 0.0], 0.0, 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b_0", "a_0"]);
    }

    #[tokio::test]
    async fn test_keyword_case_insensitive() {
        let store = InMemoryStore::new();
        store.upsert(&chunk("a_0", "Straße und Café", vec![1.0])).await.unwrap();
        let hits = store.search_keyword("CAFÉ", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].similarity, None);
    }
}
