//! Keyword-first retrieval with similarity backfill.
//!
//! A query runs against one store: the remote when it answers a probe,
//! otherwise the local store. Keyword matches come first in the order the
//! store returns them; if there are fewer than `k`, the rest is filled from
//! vector similarity, best first. Results are content strings, unique by
//! content.
//!
//! Retrieval never fails: a remote error reruns the query locally, and a
//! local error yields an empty result.

use std::collections::HashSet;
use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::Result;
use crate::store::ChunkStore;

pub struct Retriever {
    local: Arc<dyn ChunkStore>,
    remote: Option<Arc<dyn ChunkStore>>,
    embedder: Arc<Embedder>,
    match_threshold: f32,
}

impl Retriever {
    pub fn new(
        local: Arc<dyn ChunkStore>,
        remote: Option<Arc<dyn ChunkStore>>,
        embedder: Arc<Embedder>,
        match_threshold: f32,
    ) -> Self {
        Self {
            local,
            remote,
            embedder,
            match_threshold,
        }
    }

    /// Up to `k` chunk contents for `text`.
    pub async fn query(&self, text: &str, k: usize) -> Vec<String> {
        self.query_with_keywords(text, &[], k).await
    }

    /// Like [`Retriever::query`], but the keyword pass searches each of
    /// `keywords` instead of the raw query text. Similarity still uses the
    /// query text.
    pub async fn query_with_keywords(&self, text: &str, keywords: &[String], k: usize) -> Vec<String> {
        if text.trim().is_empty() || k == 0 {
            return Vec::new();
        }

        let (store, is_remote) = self.authoritative_store().await;
        match self.run(store.as_ref(), text, keywords, k).await {
            Ok(results) => return results,
            Err(e) if is_remote => {
                tracing::warn!(
                    store = store.name(),
                    error = %e,
                    "query failed on remote, retrying locally"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "query failed");
                return Vec::new();
            }
        }

        match self.run(self.local.as_ref(), text, keywords, k).await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!(error = %e, "local query failed");
                Vec::new()
            }
        }
    }

    /// The store to query, and whether it is the remote.
    async fn authoritative_store(&self) -> (Arc<dyn ChunkStore>, bool) {
        if let Some(remote) = &self.remote {
            if remote.probe().await {
                return (Arc::clone(remote), true);
            }
            tracing::debug!("remote unavailable, querying local store");
        }
        (Arc::clone(&self.local), false)
    }

    async fn run(
        &self,
        store: &dyn ChunkStore,
        text: &str,
        keywords: &[String],
        k: usize,
    ) -> Result<Vec<String>> {
        let mut results: Vec<String> = Vec::with_capacity(k);
        let mut seen: HashSet<String> = HashSet::new();

        let terms: Vec<&str> = {
            let given: Vec<&str> = keywords
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .collect();
            if given.is_empty() {
                vec![text.trim()]
            } else {
                given
            }
        };

        for term in terms {
            if results.len() >= k {
                break;
            }
            for hit in store.search_keyword(term, k).await? {
                if results.len() >= k {
                    break;
                }
                if seen.insert(hit.content.clone()) {
                    results.push(hit.content);
                }
            }
        }
        let keyword_count = results.len();

        if results.len() < k {
            let embedding = self.embedder.embed(text).await;
            // Ask for extra rows so duplicates of keyword hits cannot starve the backfill.
            let hits = store
                .match_similar(&embedding.vector, self.match_threshold, k + results.len())
                .await?;
            for hit in hits {
                if results.len() >= k {
                    break;
                }
                if seen.insert(hit.content.clone()) {
                    results.push(hit.content);
                }
            }
        }

        tracing::debug!(
            store = store.name(),
            keyword = keyword_count,
            similar = results.len() - keyword_count,
            "query answered"
        );
        Ok(results)
    }
}
