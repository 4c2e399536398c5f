//! The service facade used by the CLI and HTTP server.
//!
//! [`RagService`] owns one handle to each component and implements the
//! ingestion, retrieval, and sync operations on top of them. Every
//! mutating operation (ingest, remove, push, pull) holds `write_lock`, so
//! concurrent callers never interleave writes to the local store or graph.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::chunk::Chunker;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::extract;
use crate::graph::ChunkGraph;
use crate::models::{
    base_id_for, chunk_id, parse_chunk_id, ChunkMetadata, SyncReport, SyncStatusReport,
};
use crate::retrieve::Retriever;
use crate::store::{ChunkStore, RemoteStore, SqliteStore};
use crate::sync::SyncCoordinator;

pub struct RagService {
    config: Config,
    local: Arc<SqliteStore>,
    remote: Option<Arc<dyn ChunkStore>>,
    embedder: Arc<Embedder>,
    chunker: Chunker,
    retriever: Retriever,
    sync: SyncCoordinator,
    graph: Mutex<ChunkGraph>,
    write_lock: tokio::sync::Mutex<()>,
}

impl RagService {
    /// Assemble a service from explicit components. The chunk graph is
    /// rebuilt from the local store.
    pub async fn new(
        config: Config,
        local: Arc<SqliteStore>,
        remote: Option<Arc<dyn ChunkStore>>,
        embedder: Arc<Embedder>,
    ) -> Result<Self> {
        let graph = ChunkGraph::rebuild(&local.get_all().await?);
        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "chunk graph rebuilt"
        );

        let local_dyn: Arc<dyn ChunkStore> = local.clone();
        let retriever = Retriever::new(
            local_dyn,
            remote.clone(),
            embedder.clone(),
            config.retrieval.match_threshold,
        );
        let sync = SyncCoordinator::new(local.clone(), remote.clone(), embedder.dims());
        let chunker = Chunker::new(config.chunking.chunk_size, config.chunking.overlap);

        Ok(Self {
            config,
            local,
            remote,
            embedder,
            chunker,
            retriever,
            sync,
            graph: Mutex::new(graph),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Open the local database, resolve the remote, and load the embedding model.
    pub async fn from_config(config: Config) -> Result<Self> {
        let local = Arc::new(SqliteStore::open(&config.db.path).await?);
        let remote: Option<Arc<dyn ChunkStore>> = match RemoteStore::from_config(config.remote.as_ref())? {
            Some(store) => Some(Arc::new(store) as Arc<dyn ChunkStore>),
            None => {
                tracing::info!("no remote configured, running local-only");
                None
            }
        };
        let embedder = Arc::new(Embedder::from_config(&config.embedding).await);
        Self::new(config, local, remote, embedder).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn local(&self) -> &Arc<SqliteStore> {
        &self.local
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// A copy of the current chunk graph.
    pub fn graph_snapshot(&self) -> ChunkGraph {
        self.graph().clone()
    }

    fn graph(&self) -> MutexGuard<'_, ChunkGraph> {
        self.graph.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ingest a file from disk under `filename`. Returns the stored chunk texts.
    pub async fn process_file(&self, path: &Path, filename: &str) -> Result<Vec<String>> {
        let text = extract::extract_file(path, filename).await?;
        self.ingest_text(&text, filename).await
    }

    /// Ingest uploaded bytes under `filename`. Returns the stored chunk texts.
    pub async fn process_bytes(&self, bytes: &[u8], filename: &str) -> Result<Vec<String>> {
        let text = extract::extract_text(bytes, filename)?;
        self.ingest_text(&text, filename).await
    }

    async fn ingest_text(&self, text: &str, filename: &str) -> Result<Vec<String>> {
        let base_id = base_id_for(filename);
        if base_id.trim().is_empty() {
            return Err(Error::Parse(format!(
                "cannot derive a document id from filename {:?}",
                filename
            )));
        }

        let segments = self.chunker.split(text);
        if segments.is_empty() {
            tracing::info!(%base_id, "document has no content, nothing stored");
            return Ok(Vec::new());
        }

        let embeddings = self.embedder.embed_batch(&segments).await;
        let degraded = embeddings.iter().filter(|e| e.degraded).count();
        if degraded > 0 {
            tracing::warn!(%base_id, degraded, "stored chunks with fallback embeddings");
        }

        let metadata = ChunkMetadata::for_source(filename);
        let _guard = self.write_lock.lock().await;

        // The graph follows each write so a failure partway leaves both in step.
        let ids: Vec<String> = (0..segments.len()).map(|i| chunk_id(&base_id, i)).collect();
        for (i, ((id, segment), embedding)) in ids.iter().zip(&segments).zip(&embeddings).enumerate() {
            self.local
                .store(id, segment, &embedding.vector, &metadata)
                .await?;
            {
                let mut graph = self.graph();
                graph.add_chunk(id, segment);
                if i > 0 {
                    graph.link(&ids[i - 1], id);
                }
            }
        }

        if self.config.ingest.truncate_stale {
            self.truncate_stale(&base_id, segments.len()).await?;
        }

        tracing::info!(%base_id, chunks = segments.len(), "document ingested");

        if self.config.ingest.push_on_ingest {
            match self.sync.try_push().await {
                Ok(report) => tracing::debug!(status = %report.message, "push after ingest"),
                Err(e) => tracing::warn!(error = %e, "push after ingest failed"),
            }
        }

        Ok(segments)
    }

    /// Delete chunks of `base_id` with an index at or beyond `keep`.
    async fn truncate_stale(&self, base_id: &str, keep: usize) -> Result<()> {
        let stale: Vec<String> = self
            .local
            .ids_with_prefix(base_id)
            .await?
            .into_iter()
            .filter(|id| {
                parse_chunk_id(id).is_some_and(|(base, index)| base == base_id && index >= keep)
            })
            .collect();
        if stale.is_empty() {
            return Ok(());
        }

        for id in &stale {
            self.local.delete(id).await?;
            self.graph().remove_chunk(id);
        }

        if let Some(remote) = &self.remote {
            if remote.probe().await {
                for id in &stale {
                    if let Err(e) = remote.delete(id).await {
                        tracing::warn!(chunk_id = %id, error = %e, "failed to delete stale chunk from remote");
                    }
                }
            }
        }

        tracing::info!(%base_id, removed = stale.len(), "removed stale trailing chunks");
        Ok(())
    }

    /// Up to `k` chunk texts relevant to `query`. Never fails.
    pub async fn query_similar(&self, query: &str, k: usize) -> Vec<String> {
        self.retriever.query(query, k).await
    }

    /// Like [`RagService::query_similar`] with explicit keyword tokens.
    pub async fn query_keywords(&self, query: &str, keywords: &[String], k: usize) -> Vec<String> {
        self.retriever.query_with_keywords(query, keywords, k).await
    }

    pub fn default_k(&self) -> usize {
        self.config.retrieval.default_k
    }

    /// Base ids of every document with at least one stored chunk.
    pub async fn get_uploaded_files(&self) -> Result<BTreeSet<String>> {
        let ids = self.local.all_ids().await?;
        Ok(ids
            .iter()
            .filter_map(|id| parse_chunk_id(id).map(|(base, _)| base.to_string()))
            .collect())
    }

    /// Delete every chunk of `base_id` locally and, when reachable, remotely.
    /// Returns `false` when nothing matched locally.
    pub async fn remove_file(&self, base_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let removed = self.local.delete_by_prefix(base_id).await?;
        self.graph().remove_prefix(base_id);

        if let Some(remote) = &self.remote {
            if remote.probe().await {
                match remote.delete_by_prefix(base_id).await {
                    Ok(n) => tracing::debug!(%base_id, removed = n, "removed from remote"),
                    Err(e) => {
                        tracing::warn!(%base_id, error = %e, "failed to remove file from remote")
                    }
                }
            } else {
                tracing::warn!(%base_id, "remote unavailable, file removed locally only");
            }
        }

        tracing::info!(%base_id, removed, "file removed");
        Ok(removed > 0)
    }

    pub async fn sync_to_remote(&self) -> Result<SyncReport> {
        let _guard = self.write_lock.lock().await;
        self.sync.try_push().await
    }

    pub async fn import_from_remote(&self) -> Result<SyncReport> {
        let _guard = self.write_lock.lock().await;
        let result = self.sync.pull_all().await;
        // A failed pull may have written some rows before stopping.
        if result.as_ref().map_or(true, |report| report.synced > 0) {
            self.rebuild_graph().await?;
        }
        result
    }

    async fn rebuild_graph(&self) -> Result<()> {
        let rebuilt = ChunkGraph::rebuild(&self.local.get_all().await?);
        *self.graph() = rebuilt;
        Ok(())
    }

    /// The durable status plus a fresh probe of the remote.
    pub async fn get_sync_status(&self) -> Result<SyncStatusReport> {
        let status = self.local.get_sync_status().await?;
        let remote_available = self.sync.remote_available().await;
        Ok(SyncStatusReport {
            last_sync: status.last_sync,
            status: status.status,
            remote_available,
        })
    }
}
