//! Core data models used throughout ragsync.
//!
//! These types represent the chunks, sync bookkeeping, and search hits that
//! flow through the ingestion, synchronization, and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// Metadata attached to every chunk. `source` is the original filename;
/// any other keys are carried through storage untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub source: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChunkMetadata {
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// The unit of storage and retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    /// `{base_id}_{sequence_index}`.
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
    /// Unix seconds of the last local write; 0 for rows read from the remote.
    pub last_updated: i64,
    /// True once the current content is confirmed on the remote mirror.
    pub synced: bool,
}

impl DocumentChunk {
    /// Same content, vector, and metadata, ignoring local bookkeeping.
    pub fn same_payload(&self, other: &DocumentChunk) -> bool {
        self.content == other.content
            && self.embedding == other.embedding
            && self.metadata == other.metadata
    }
}

/// A chunk returned from keyword or similarity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkHit {
    pub id: String,
    pub content: String,
    /// Cosine similarity for vector hits, `None` for keyword hits.
    pub similarity: Option<f32>,
}

/// Durable sync bookkeeping stored in the `sync_status` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Unix seconds of the last sync that reached the remote; 0 = never.
    pub last_sync: i64,
    pub status: String,
}

/// Status as reported to collaborators: the durable record plus a fresh probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatusReport {
    pub last_sync: i64,
    pub status: String,
    pub remote_available: bool,
}

/// A chunk that was skipped during a push or pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub id: String,
    pub reason: String,
}

/// Aggregate outcome of one push or pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub synced: usize,
    pub total: usize,
    pub message: String,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            synced: 0,
            total: 0,
            message: message.into(),
            failures: Vec::new(),
        }
    }
}

/// Build a chunk id from its document base id and position.
pub fn chunk_id(base_id: &str, index: usize) -> String {
    format!("{}_{}", base_id, index)
}

/// Split a chunk id into `(base_id, index)`.
///
/// The base id is everything before the last underscore, so base ids may
/// themselves contain underscores. Returns `None` when the id has no
/// underscore, an empty base, or a non-numeric suffix.
pub fn parse_chunk_id(id: &str) -> Option<(&str, usize)> {
    let (base, index) = id.rsplit_once('_')?;
    if base.is_empty() || index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((base, index.parse().ok()?))
}

/// Derive a document's base id from its original filename: the file stem,
/// without any directory components.
pub fn base_id_for(filename: &str) -> String {
    std::path::Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string())
}
