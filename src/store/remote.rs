//! Remote mirror over a PostgREST (Supabase) HTTP API.
//!
//! Every request carries the service key in both the `apikey` and
//! `Authorization` headers and is bounded by the configured timeout. A
//! timeout or connection failure maps to [`Error::RemoteUnavailable`]; any
//! non-2xx answer maps to [`Error::Remote`].

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;

use super::ChunkStore;
use crate::config::{RemoteConfig, ResolvedRemote};
use crate::error::{Error, Result};
use crate::models::{ChunkHit, ChunkMetadata, DocumentChunk};

/// Rows fetched per request when scanning the whole table.
const PAGE_SIZE: usize = 1000;

pub struct RemoteStore {
    client: reqwest::Client,
    rest_url: String,
    api_key: String,
    table: String,
    match_function: String,
}

#[derive(Debug, Deserialize)]
struct RemoteRow {
    id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    embedding: Value,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    similarity: Option<f32>,
}

impl RemoteStore {
    pub fn new(remote: &ResolvedRemote) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(remote.timeout)
            .connect_timeout(remote.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            rest_url: format!("{}/rest/v1", remote.url),
            api_key: remote.api_key.clone(),
            table: remote.table.clone(),
            match_function: remote.match_function.clone(),
        })
    }

    /// `None` when the section is absent or the URL/key do not resolve.
    pub fn from_config(config: Option<&RemoteConfig>) -> Result<Option<Self>> {
        match config.and_then(RemoteConfig::resolve) {
            Some(resolved) => Ok(Some(Self::new(&resolved)?)),
            None => Ok(None),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.rest_url, path))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn table_request(&self, method: Method) -> RequestBuilder {
        self.request(method, &self.table)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Remote(format!("{}: {}", status, body)))
    }

    async fn fetch_rows(&self, request: RequestBuilder) -> Result<Vec<RemoteRow>> {
        let response = self.send(request).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Remote(format!("unexpected response body: {}", e)))
    }
}

/// Backslash-escape LIKE metacharacters and PostgREST's `*` wildcard.
pub fn escape_pattern(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\' | '*') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Accept `[0.1, 0.2]` as a JSON array or as pgvector's string form.
fn parse_embedding(value: Value) -> Result<Vec<f32>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(serde_json::from_str(&s)?),
        other => Ok(serde_json::from_value(other)?),
    }
}

/// Accept metadata as a JSON object or as a JSON-encoded string.
fn parse_metadata(value: Value) -> Result<ChunkMetadata> {
    match value {
        Value::Null => Ok(ChunkMetadata::default()),
        Value::String(s) => Ok(serde_json::from_str(&s)?),
        other => Ok(serde_json::from_value(other)?),
    }
}

fn row_to_chunk(row: RemoteRow) -> Result<DocumentChunk> {
    Ok(DocumentChunk {
        embedding: parse_embedding(row.embedding)?,
        metadata: parse_metadata(row.metadata)?,
        id: row.id,
        content: row.content,
        last_updated: 0,
        synced: true,
    })
}

#[async_trait]
impl ChunkStore for RemoteStore {
    fn name(&self) -> &str {
        "remote"
    }

    async fn probe(&self) -> bool {
        let request = self
            .table_request(Method::GET)
            .query(&[("select", "id"), ("limit", "1")]);
        match self.send(request).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "remote probe failed");
                false
            }
        }
    }

    async fn upsert(&self, chunk: &DocumentChunk) -> Result<()> {
        let body = serde_json::json!([{
            "id": chunk.id,
            "content": chunk.content,
            "embedding": chunk.embedding,
            "metadata": chunk.metadata,
        }]);
        let request = self
            .table_request(Method::POST)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&body);
        self.send(request).await?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<DocumentChunk>> {
        let mut chunks = Vec::new();
        let mut offset = 0usize;
        loop {
            let limit = PAGE_SIZE.to_string();
            let offset_param = offset.to_string();
            let request = self.table_request(Method::GET).query(&[
                ("select", "id,content,embedding,metadata"),
                ("order", "id"),
                ("limit", limit.as_str()),
                ("offset", offset_param.as_str()),
            ]);
            let rows = self.fetch_rows(request).await?;
            let page_len = rows.len();
            for row in rows {
                chunks.push(row_to_chunk(row)?);
            }
            if page_len < PAGE_SIZE {
                break;
            }
            offset += page_len;
        }
        Ok(chunks)
    }

    async fn delete_by_prefix(&self, base_id: &str) -> Result<u64> {
        let pattern = format!("like.{}\\_*", escape_pattern(base_id));
        let request = self
            .table_request(Method::DELETE)
            .header("Prefer", "return=representation")
            .query(&[("id", pattern.as_str()), ("select", "id")]);
        let rows = self.fetch_rows(request).await?;
        Ok(rows.len() as u64)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let filter = format!("eq.{}", id);
        let request = self
            .table_request(Method::DELETE)
            .query(&[("id", filter.as_str())]);
        self.send(request).await?;
        Ok(())
    }

    async fn search_keyword(&self, term: &str, limit: usize) -> Result<Vec<ChunkHit>> {
        let filter = format!("ilike.*{}*", escape_pattern(term));
        let limit = limit.to_string();
        let request = self.table_request(Method::GET).query(&[
            ("select", "id,content"),
            ("content", filter.as_str()),
            ("limit", limit.as_str()),
        ]);
        let rows = self.fetch_rows(request).await?;
        Ok(rows
            .into_iter()
            .map(|r| ChunkHit {
                id: r.id,
                content: r.content,
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
        let body = serde_json::json!({
            "query_embedding": embedding,
            "match_threshold": threshold,
            "match_count": limit,
        });
        let request = self
            .request(Method::POST, &format!("rpc/{}", self.match_function))
            .json(&body);
        let rows = self.fetch_rows(request).await?;

        let mut hits: Vec<ChunkHit> = rows
            .into_iter()
            .map(|r| ChunkHit {
                id: r.id,
                content: r.content,
                similarity: r.similarity,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }
}
