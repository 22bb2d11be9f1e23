//! `amp init`: write the example configuration and create the store.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::config::load_config;
use crate::store::KnowledgeStore;

/// The commented example configuration shipped with the binary.
pub const EXAMPLE_CONFIG: &str = include_str!("../config/amp.example.toml");

/// Write [`EXAMPLE_CONFIG`] to `path` and open the store it names.
///
/// Refuses to overwrite an existing file.
pub fn run_init(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("Config file already exists: {}", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, EXAMPLE_CONFIG)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    let config = load_config(path)?;
    let store = KnowledgeStore::from_config(&config.store)?;

    println!("Wrote {}", path.display());
    println!("Store: {}", store.extractions_path().display());
    println!("Next: put documents under {} and run `amp sync`", config.content.root.display());
    Ok(())
}
