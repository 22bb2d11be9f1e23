use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::{Provider, SessionOptions};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
        }
    }
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("./data/knowledge")
}


#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    #[serde(default = "default_content_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Longest body (in characters) sent to the provider in one prompt.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            root: default_content_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_chars: default_max_chars(),
        }
    }
}

fn default_content_root() -> PathBuf {
    PathBuf::from("./content")
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

fn default_max_chars() -> usize {
    50_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default)]
    pub provider: Provider,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub stream_output: bool,
    /// Replaces the discovered provider executable (program followed by args).
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            system_prompt: default_system_prompt(),
            max_turns: default_max_turns(),
            retry_attempts: default_retry_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            timeout_secs: default_timeout_secs(),
            stream_output: false,
            command: None,
        }
    }
}

fn default_system_prompt() -> String {
    "You are a knowledge extraction assistant. You answer with a single JSON object and nothing else."
        .to_string()
}
fn default_max_turns() -> u32 {
    1
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay_secs() -> f64 {
    1.0
}
fn default_timeout_secs() -> u64 {
    120
}

impl SessionConfig {
    /// Build the options handed to [`crate::session::create_session`].
    pub fn to_options(&self) -> SessionOptions {
        SessionOptions {
            provider: self.provider,
            system_prompt: self.system_prompt.clone(),
            max_turns: self.max_turns,
            retry_attempts: self.retry_attempts,
            retry_delay: Duration::from_secs_f64(self.retry_delay_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            stream_output: self.stream_output,
            command: self.command.clone(),
            progress_callback: None,
        }
    }
}

/// What the sync driver does with a document whose id is already stored.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReprocessPolicy {
    /// Always skip stored ids.
    #[default]
    Never,
    /// Re-extract when the document body hash differs from the stored one.
    Changed,
    /// Re-extract everything; the newer record wins.
    Always,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SyncConfig {
    #[serde(default)]
    pub reprocess: ReprocessPolicy,
}

impl Config {
    /// Defaults only; used by commands that can run without a config file.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let session = &config.session;

    if !(1..=10).contains(&session.retry_attempts) {
        anyhow::bail!("session.retry_attempts must be in [1, 10]");
    }

    if !(session.retry_delay_secs > 0.0 && session.retry_delay_secs <= 10.0) {
        anyhow::bail!("session.retry_delay_secs must be in (0.0, 10.0]");
    }

    if session.max_turns == 0 {
        anyhow::bail!("session.max_turns must be > 0");
    }

    if session.timeout_secs == 0 {
        anyhow::bail!("session.timeout_secs must be > 0");
    }

    if let Some(cmd) = &session.command {
        if cmd.first().map_or(true, |program| program.trim().is_empty()) {
            anyhow::bail!("session.command must name a program");
        }
    }

    if config.content.max_chars == 0 {
        anyhow::bail!("content.max_chars must be > 0");
    }

    Ok(())
}
