//! Content directory scanner.
//!
//! Walks `[content].root`, applies include/exclude globs, and turns each
//! matching UTF-8 file into a [`SourceDocument`]. Documents come back sorted
//! by relative path so sync order is deterministic.
//!
//! Identity: `source_id` is the slug of the relative path without its
//! extension (`notes/Doc1.md` → `notes-doc1`, `日本語.md` → `日本語`). A
//! name that slugs to nothing, or to an id an earlier file (in lexical order)
//! already holds, gets a path-hash id instead (`doc-3f2a9c0b1d4e`).

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::ContentConfig;
use crate::models::{content_hash, path_id, slugify, SourceDocument};

pub fn scan_content(config: &ContentConfig) -> Result<Vec<SourceDocument>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Content root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut docs = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        if let Some(doc) = file_to_document(path, &rel_str)? {
            docs.push(doc);
        }
    }

    docs.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    let mut seen = HashSet::new();
    docs.retain_mut(|doc| {
        if doc.source_id.is_empty() || seen.contains(&doc.source_id) {
            let fallback = path_id(&doc.relative_path);
            tracing::warn!(
                path = %doc.relative_path,
                slug = %doc.source_id,
                source_id = %fallback,
                "file name does not give a unique source id; using path hash"
            );
            doc.source_id = fallback;
        }
        if seen.insert(doc.source_id.clone()) {
            true
        } else {
            tracing::warn!(
                source_id = %doc.source_id,
                path = %doc.relative_path,
                "duplicate source id; skipping file"
            );
            false
        }
    });

    Ok(docs)
}

fn file_to_document(path: &Path, relative_path: &str) -> Result<Option<SourceDocument>> {
    let bytes = std::fs::read(path)?;
    let body = match String::from_utf8(bytes) {
        Ok(body) => body,
        Err(_) => {
            tracing::debug!(path = %relative_path, "skipping non-UTF-8 file");
            return Ok(None);
        }
    };

    let stem = Path::new(relative_path).with_extension("");
    let source_id = slugify(&stem.to_string_lossy());

    let title = heading_title(&body).unwrap_or_else(|| {
        path.file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| relative_path.to_string())
    });

    Ok(Some(SourceDocument {
        content_hash: content_hash(&body),
        source_id,
        title,
        path: path.to_path_buf(),
        relative_path: relative_path.to_string(),
        body,
    }))
}

/// Text of the first markdown `# ` heading.
fn heading_title(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim_start)
        .find_map(|line| line.strip_prefix("# "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
