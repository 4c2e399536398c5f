//! # ragsync CLI
//!
//! ```bash
//! ragsync --config ./config/ragsync.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragsync init` | Create the local database and schema |
//! | `ragsync ingest <paths...>` | Chunk, embed and store files or directories |
//! | `ragsync files` | List uploaded documents |
//! | `ragsync remove <base_id>` | Delete a document locally and remotely |
//! | `ragsync search "<query>"` | Keyword-first retrieval |
//! | `ragsync sync push\|pull` | Reconcile with the remote mirror |
//! | `ragsync status` | Last sync and remote availability |
//! | `ragsync serve` | Start the HTTP API |
//!
//! Log verbosity follows `RUST_LOG` (default `ragsync=info`).

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use ragsync::config::{self, Config};
use ragsync::ingest;
use ragsync::server;
use ragsync::service::RagService;
use ragsync::store::SqliteStore;

#[derive(Parser)]
#[command(
    name = "ragsync",
    about = "Local-first document ingestion and retrieval with an optional remote mirror",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means all defaults.
    #[arg(long, global = true, default_value = "./config/ragsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the local database and schema. Safe to run repeatedly.
    Init,

    /// Ingest files, or directories filtered by `[ingest].include_globs`.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Store a single file under this filename instead of its own.
        #[arg(long)]
        name: Option<String>,
    },

    /// List base ids of uploaded documents.
    Files,

    /// Remove every chunk of a document.
    Remove { base_id: String },

    /// Retrieve chunks for a query.
    Search {
        query: String,

        /// Maximum number of results (defaults to `[retrieval].default_k`).
        #[arg(short, long)]
        k: Option<usize>,

        /// Keyword to match instead of the raw query; repeatable.
        #[arg(long = "keyword")]
        keywords: Vec<String>,
    },

    /// Reconcile the local store with the remote mirror.
    Sync {
        #[command(subcommand)]
        direction: SyncDirection,
    },

    /// Show the last sync and probe the remote.
    Status,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum SyncDirection {
    /// Push unsynced local chunks.
    Push,
    /// Import all remote chunks.
    Pull,
}

fn load(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        return config::load_config(path);
    }
    tracing::info!(path = %path.display(), "config file not found, using defaults");
    let cfg = Config::default();
    config::validate(&cfg)?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ragsync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Init => {
            SqliteStore::open(&cfg.db.path).await?;
            println!("Database initialized at {}.", cfg.db.path.display());
        }
        Commands::Ingest { paths, name } => {
            let files = ingest::scan_paths(
                &paths,
                &cfg.ingest.include_globs,
                &cfg.ingest.exclude_globs,
            )?;
            if files.is_empty() {
                println!("No files to ingest.");
                return Ok(());
            }
            if name.is_some() && files.len() > 1 {
                bail!("--name can only be used when ingesting a single file");
            }

            let service = RagService::from_config(cfg).await?;
            let outcomes = ingest::ingest_paths(&service, &files, name.as_deref()).await;

            let mut failed = 0;
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(chunks) => println!("{}: {} chunks", outcome.path.display(), chunks.len()),
                    Err(e) => {
                        failed += 1;
                        println!("{}: FAILED ({})", outcome.path.display(), e);
                    }
                }
            }
            println!(
                "Ingested {}/{} files.",
                outcomes.len() - failed,
                outcomes.len()
            );
            if failed > 0 {
                bail!("{} file(s) failed to ingest", failed);
            }
        }
        Commands::Files => {
            let service = RagService::from_config(cfg).await?;
            let files = service.get_uploaded_files().await?;
            if files.is_empty() {
                println!("No files uploaded.");
            }
            for base_id in files {
                println!("{}", base_id);
            }
        }
        Commands::Remove { base_id } => {
            let service = RagService::from_config(cfg).await?;
            if service.remove_file(&base_id).await? {
                println!("Removed {}.", base_id);
            } else {
                println!("No chunks found for {}.", base_id);
            }
        }
        Commands::Search { query, k, keywords } => {
            let service = RagService::from_config(cfg).await?;
            let k = k.unwrap_or_else(|| service.default_k());
            let results = if keywords.is_empty() {
                service.query_similar(&query, k).await
            } else {
                service.query_keywords(&query, &keywords, k).await
            };
            if results.is_empty() {
                println!("No results.");
            }
            for (i, content) in results.iter().enumerate() {
                println!("{}. {}", i + 1, content.replace('\n', " "));
            }
        }
        Commands::Sync { direction } => {
            let service = RagService::from_config(cfg).await?;
            let report = match direction {
                SyncDirection::Push => service.sync_to_remote().await?,
                SyncDirection::Pull => service.import_from_remote().await?,
            };
            println!("{}", report.message);
            for failure in &report.failures {
                println!("  {}: {}", failure.id, failure.reason);
            }
        }
        Commands::Status => {
            let service = RagService::from_config(cfg).await?;
            let status = service.get_sync_status().await?;
            let last = if status.last_sync == 0 {
                "never".to_string()
            } else {
                chrono::DateTime::from_timestamp(status.last_sync, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| status.last_sync.to_string())
            };
            println!("Last sync:        {}", last);
            println!("Status:           {}", status.status);
            println!(
                "Remote available: {}",
                if status.remote_available { "yes" } else { "no" }
            );
        }
        Commands::Serve => {
            server::run_server(cfg).await?;
        }
    }

    Ok(())
}
