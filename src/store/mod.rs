//! Chunk storage backends.
//!
//! [`ChunkStore`] is the surface shared by the local SQLite store, the
//! remote PostgREST mirror, and the in-memory store used in tests. The
//! retriever and sync coordinator pick a backend per operation by calling
//! [`ChunkStore::probe`]; nothing caches availability between operations.

pub mod memory;
pub mod remote;
pub mod sqlite;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::models::{ChunkHit, DocumentChunk};

pub use memory::InMemoryStore;
pub use remote::RemoteStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Short name for logs (`"local"`, `"remote"`, ...).
    fn name(&self) -> &str;

    /// Cheap availability check. Backends that are always present return `true`.
    async fn probe(&self) -> bool {
        true
    }

    /// Insert or overwrite a chunk by id.
    async fn upsert(&self, chunk: &DocumentChunk) -> Result<()>;

    async fn get_all(&self) -> Result<Vec<DocumentChunk>>;

    /// Delete every chunk whose id starts with `{base_id}_`. Returns the
    /// number of rows removed when the backend reports it.
    async fn delete_by_prefix(&self, base_id: &str) -> Result<u64>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Case-insensitive substring match on content.
    async fn search_keyword(&self, term: &str, limit: usize) -> Result<Vec<ChunkHit>>;

    /// Chunks with cosine similarity `>= threshold`, best first.
    async fn match_similar(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<ChunkHit>>;
}

/// `{base_id}_`, the prefix shared by every chunk of one document.
pub fn chunk_prefix(base_id: &str) -> String {
    format!("{}_", base_id)
}

/// Brute-force similarity ranking shared by the local backends.
pub(crate) fn rank_by_similarity<'a, I>(
    chunks: I,
    embedding: &[f32],
    threshold: f32,
    limit: usize,
) -> Vec<ChunkHit>
where
    I: IntoIterator<Item = &'a DocumentChunk>,
{
    let mut hits: Vec<ChunkHit> = chunks
        .into_iter()
        .filter_map(|c| {
            let similarity = cosine_similarity(embedding, &c.embedding);
            (similarity >= threshold).then(|| ChunkHit {
                id: c.id.clone(),
                content: c.content.clone(),
                similarity: Some(similarity),
            })
        })
        .collect();
    // Stable sort keeps storage order among equal scores.
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(limit);
    hits
}

/// Unicode-aware case-insensitive containment.
pub(crate) fn contains_ignore_case(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}
