//! Push and pull between the local store and the remote mirror.
//!
//! Both directions probe the remote first and degrade to a
//! `remote unavailable: ...` report when it is missing or does not answer.
//! Per-chunk backend errors are collected in [`SyncReport::failures`] and
//! never abort the batch. A remote that times out or drops the connection
//! mid-push is treated like a failed probe: the push stops and the remaining
//! chunks stay unsynced. Local storage errors propagate.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{SyncFailure, SyncReport};
use crate::store::{ChunkStore, SqliteStore};

pub struct SyncCoordinator {
    local: Arc<SqliteStore>,
    remote: Option<Arc<dyn ChunkStore>>,
    dims: usize,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl SyncCoordinator {
    /// `dims` is the deployment's embedding size; pulled rows with any
    /// other size are rejected.
    pub fn new(local: Arc<SqliteStore>, remote: Option<Arc<dyn ChunkStore>>, dims: usize) -> Self {
        Self { local, remote, dims }
    }

    pub fn is_configured(&self) -> bool {
        self.remote.is_some()
    }

    /// Probe the remote now. `false` when none is configured.
    pub async fn remote_available(&self) -> bool {
        match &self.remote {
            Some(remote) => remote.probe().await,
            None => false,
        }
    }

    async fn available_remote(&self) -> std::result::Result<&Arc<dyn ChunkStore>, &'static str> {
        let remote = self.remote.as_ref().ok_or("not configured")?;
        if remote.probe().await {
            Ok(remote)
        } else {
            Err("probe failed")
        }
    }

    async fn unavailable(&self, reason: &str) -> Result<SyncReport> {
        let message = format!("remote unavailable: {}", reason);
        tracing::warn!(reason, "sync skipped, remote unavailable");
        self.local.set_status_message(&message).await?;
        Ok(SyncReport::empty(message))
    }

    /// Write every unsynced local chunk to the remote.
    pub async fn try_push(&self) -> Result<SyncReport> {
        let remote = match self.available_remote().await {
            Ok(remote) => remote,
            Err(reason) => return self.unavailable(reason).await,
        };

        let pending = self.local.get_unsynced().await?;
        if pending.is_empty() {
            self.local.set_sync_status(now(), "All chunks synced").await?;
            return Ok(SyncReport::empty("All chunks already synced"));
        }

        let total = pending.len();
        let mut synced = 0;
        let mut failures = Vec::new();

        for chunk in pending {
            match remote.upsert(&chunk).await {
                Ok(()) => {
                    self.local.mark_synced(&chunk.id).await?;
                    synced += 1;
                }
                Err(Error::RemoteUnavailable(reason)) => {
                    // A timed-out or unreachable remote is a failed probe: stop
                    // here and leave the rest unsynced for the next push.
                    let message = format!(
                        "remote unavailable: stopped after {}/{} chunks: {}",
                        synced, total, reason
                    );
                    tracing::warn!(chunk_id = %chunk.id, %reason, synced, total, "push aborted, remote unavailable");
                    if synced > 0 {
                        self.local.set_sync_status(now(), &message).await?;
                    } else {
                        self.local.set_status_message(&message).await?;
                    }
                    failures.push(SyncFailure {
                        id: chunk.id,
                        reason,
                    });
                    return Ok(SyncReport {
                        synced,
                        total,
                        message,
                        failures,
                    });
                }
                Err(e) => {
                    tracing::warn!(chunk_id = %chunk.id, error = %e, "failed to push chunk");
                    failures.push(SyncFailure {
                        id: chunk.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let message = format!("Synced {}/{} chunks", synced, total);
        self.local.set_sync_status(now(), &message).await?;
        tracing::info!(synced, total, "push finished");

        Ok(SyncReport {
            synced,
            total,
            message,
            failures,
        })
    }

    /// Import every remote chunk into the local store, remote content
    /// winning on conflict. Chunks already present and synced are skipped.
    pub async fn pull_all(&self) -> Result<SyncReport> {
        let remote = match self.available_remote().await {
            Ok(remote) => remote,
            Err(reason) => return self.unavailable(reason).await,
        };

        let remote_chunks = match remote.get_all().await {
            Ok(chunks) => chunks,
            Err(Error::RemoteUnavailable(reason)) => return self.unavailable(&reason).await,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read chunks from remote");
                let message = format!("Import failed: {}", e);
                self.local.set_status_message(&message).await?;
                return Ok(SyncReport::empty(message));
            }
        };

        if remote_chunks.is_empty() {
            self.local.set_sync_status(now(), "No chunks in remote").await?;
            return Ok(SyncReport::empty("No chunks in remote"));
        }

        let local: HashMap<String, _> = self
            .local
            .get_all()
            .await?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        let mut total = 0;
        let mut synced = 0;
        let mut failures = Vec::new();

        for chunk in remote_chunks {
            if local
                .get(&chunk.id)
                .is_some_and(|existing| existing.synced && existing.same_payload(&chunk))
            {
                continue;
            }
            total += 1;

            let rejection = if chunk.content.trim().is_empty() {
                Some("empty content".to_string())
            } else if chunk.embedding.len() != self.dims {
                Some(format!(
                    "embedding has {} dimensions, expected {}",
                    chunk.embedding.len(),
                    self.dims
                ))
            } else {
                None
            };

            if let Some(reason) = rejection {
                tracing::warn!(chunk_id = %chunk.id, %reason, "skipping remote chunk");
                failures.push(SyncFailure {
                    id: chunk.id,
                    reason,
                });
                continue;
            }

            self.local.upsert_synced(&chunk).await?;
            synced += 1;
        }

        let message = format!("Imported {}/{} chunks from remote", synced, total);
        self.local.set_sync_status(now(), &message).await?;
        tracing::info!(synced, total, "import finished");

        Ok(SyncReport {
            synced,
            total,
            message,
            failures,
        })
    }
}
