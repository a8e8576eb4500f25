//! Resolve `qa ingest` arguments into the files to upload.
//!
//! Plain files are taken as-is and keep their file name as source name.
//! Directories are walked recursively; a file inside one is named by its
//! path relative to the directory, so two `README.md` files in different
//! folders stay distinct documents.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const INCLUDE_GLOBS: &[&str] = &[
    "**/*.md",
    "**/*.markdown",
    "**/*.txt",
    "**/*.json",
    "**/*.pdf",
    "**/*.html",
    "**/*.htm",
    "**/*.docx",
];

const EXCLUDE_GLOBS: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub source_name: String,
}

pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<ScannedFile>> {
    let include_set = build_globset(INCLUDE_GLOBS)?;
    let exclude_set = build_globset(EXCLUDE_GLOBS)?;
    let mut files = Vec::new();

    for root in paths {
        if root.is_file() {
            let source_name = root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| root.display().to_string());
            files.push(ScannedFile {
                path: root.clone(),
                source_name,
            });
            continue;
        }
        if !root.is_dir() {
            bail!("Path does not exist: {}", root.display());
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel_str = relative_name(root, entry.path());
            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }
            found.push(ScannedFile {
                path: entry.path().to_path_buf(),
                source_name: rel_str,
            });
        }
        found.sort_by(|a, b| a.source_name.cmp(&b.source_name));
        files.extend(found);
    }

    Ok(files)
}

/// Forward-slash path of `path` relative to `root`.
fn relative_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
