//! Bulk ingestion of files and directories.
//!
//! [`scan_paths`] expands the paths given on the command line into a sorted
//! list of files; [`ingest_paths`] feeds each one through
//! [`RagService::process_file`], carrying on past failures.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::service::RagService;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Expand files and directories into the set of files to ingest.
///
/// Files named directly are always included. Directories are walked and
/// their files filtered by `include_globs` and `exclude_globs` (matched
/// against the path relative to that directory), with `.git`, `target` and
/// `node_modules` always excluded.
pub fn scan_paths(
    paths: &[PathBuf],
    include_globs: &[String],
    exclude_globs: &[String],
) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = BTreeSet::new();
    for root in paths {
        if root.is_file() {
            files.insert(root.clone());
            continue;
        }
        if !root.is_dir() {
            bail!("Path does not exist: {}", root.display());
        }

        for entry in WalkDir::new(root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy();

            if exclude_set.is_match(rel_str.as_ref()) || !include_set.is_match(rel_str.as_ref()) {
                continue;
            }
            files.insert(path.to_path_buf());
        }
    }

    Ok(files.into_iter().collect())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Result of ingesting one file.
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: crate::error::Result<Vec<String>>,
}

/// Ingest each file in order. `name` overrides the stored filename and is
/// only honoured when exactly one file is given.
pub async fn ingest_paths(
    service: &RagService,
    files: &[PathBuf],
    name: Option<&str>,
) -> Vec<FileOutcome> {
    let mut outcomes = Vec::with_capacity(files.len());
    for path in files {
        let filename = match name {
            Some(n) if files.len() == 1 => n.to_string(),
            _ => file_name(path),
        };
        let result = service.process_file(path, &filename).await;
        if let Err(e) = &result {
            tracing::warn!(path = %path.display(), error = %e, "ingestion failed");
        }
        outcomes.push(FileOutcome {
            path: path.clone(),
            result,
        });
    }
    outcomes
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
