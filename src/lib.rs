//! # ragsync
//!
//! Local-first document ingestion and retrieval with an optional remote
//! mirror.
//!
//! Documents are split into overlapping chunks, embedded, and stored in a
//! local SQLite database. When a PostgREST-compatible remote is configured
//! and reachable, new chunks are pushed to it and it becomes the
//! authoritative source for retrieval; otherwise everything keeps working
//! against the local store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────┐  push/pull  ┌──────────┐
//! │ Extract  │──▶│ Chunk+Embed  │──▶│  SQLite  │◀──────────▶│  Remote  │
//! │ PDF/text │   │              │   │ (local)  │             │(PostgREST)│
//! └──────────┘   └──────────────┘   └────┬─────┘             └────┬─────┘
//!                                        │     keyword-first      │
//!                                        └──────▶ Retriever ◀─────┘
//!                                                    │
//!                                          ┌─────────┴─────────┐
//!                                          ▼                   ▼
//!                                     ┌─────────┐        ┌──────────┐
//!                                     │   CLI   │        │   HTTP   │
//!                                     └─────────┘        └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Chunk, status and report types; chunk id scheme |
//! | [`error`] | Library error type |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Schema creation |
//! | [`extract`] | PDF and text extraction |
//! | [`chunk`] | Recursive text splitting with overlap |
//! | [`embedding`] | Embedding providers with deterministic fallback |
//! | [`store`] | Local, remote and in-memory chunk stores |
//! | [`sync`] | Push and pull between local and remote |
//! | [`retrieve`] | Keyword-first retrieval with similarity backfill |
//! | [`graph`] | In-memory adjacency between consecutive chunks |
//! | [`service`] | Facade tying the above together |
//! | [`ingest`] | Bulk file and directory ingestion |
//! | [`server`] | HTTP API |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod graph;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod retrieve;
pub mod server;
pub mod service;
pub mod store;
pub mod sync;

pub use error::{Error, Result};
