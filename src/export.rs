//! Export the knowledge store.
//!
//! Produces one entry per unique `source_id` (latest record wins) as either
//! a pretty JSON array or JSON Lines, for downstream tools and backups.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::store::{ExportFormat, KnowledgeStore};

/// Export extractions in `format`.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub fn run_export(config: &Config, format: ExportFormat, output: Option<&Path>) -> Result<()> {
    let store = KnowledgeStore::from_config(&config.store)?;
    let data = store.export(format)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &data)?;
            eprintln!("Exported {} extractions to {}", store.len(), path.display());
        }
        None => match format {
            ExportFormat::Json => println!("{}", data),
            // Already newline-terminated per record.
            ExportFormat::Jsonl => print!("{}", data),
        },
    }

    Ok(())
}
