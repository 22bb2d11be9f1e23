//! # Amplifier CLI (`amp`)
//!
//! The `amp` binary is the primary interface for Amplifier. It provides
//! commands for knowledge extraction, search, export, event inspection, and
//! one-shot provider queries.
//!
//! ## Usage
//!
//! ```bash
//! amp --config ./config/amp.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `amp init` | Write an example config and create the store |
//! | `amp providers` | Show which provider CLIs are available |
//! | `amp sync` | Extract knowledge from new documents |
//! | `amp search "<query>"` | Search stored extractions |
//! | `amp stats` | Totals for extractions and events |
//! | `amp events` | Print or follow the event log |
//! | `amp export` | Dump the store as JSON or JSON Lines |
//! | `amp query "<prompt>"` | Send one prompt to a provider |
//!
//! ## Examples
//!
//! ```bash
//! # Extract from at most 5 documents using Copilot
//! amp sync --max-files 5 --provider copilot
//!
//! # Re-extract everything
//! amp sync --force
//!
//! # Watch a sync from another terminal
//! amp events --follow
//! ```
//!
//! Logs go to stderr. Set `RUST_LOG` for fine-grained filtering or pass
//! `--verbose` for debug output.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use amplifier::config::{self, Config};
use amplifier::progress::ProgressMode;
use amplifier::session::Provider;
use amplifier::store::ExportFormat;
use amplifier::sync::SyncArgs;
use amplifier::{events_cmd, export, init, providers, query, search, stats, sync};

/// Amplifier CLI: extract structured knowledge from documents with
/// AI coding assistant CLIs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/amp.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "amp",
    about = "Amplifier: knowledge extraction with Claude Code and GitHub Copilot",
    version,
    long_about = "Amplifier walks a content directory, asks an AI provider to extract \
    concepts, relationships, insights and patterns from each document, and stores the \
    results in append-only JSON Lines files alongside an event log."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/amp.toml")]
    config: PathBuf,

    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Write an example configuration to the `--config` path.
    ///
    /// Refuses to overwrite an existing file.
    Init,

    /// List AI providers and whether their CLIs are installed.
    Providers,

    /// Extract knowledge from documents in the content directory.
    ///
    /// Documents already in the store are skipped unless `--force` is given
    /// or `[sync].reprocess` says otherwise. Failed documents are not saved
    /// and are retried on the next run.
    Sync {
        /// Stop after this many documents (processed or skipped).
        #[arg(long)]
        max_files: Option<usize>,

        /// Re-extract documents that are already stored.
        #[arg(long)]
        force: bool,

        /// Provider to use instead of `[session].provider`.
        #[arg(long)]
        provider: Option<Provider>,

        /// List what would be extracted or skipped, without querying.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr: `off`, `human`, or `json`.
        /// Defaults to `human` when stderr is a terminal.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// Search stored extractions (case-insensitive substring).
    Search {
        query: String,

        /// Maximum number of results to print.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show totals for extractions and events.
    Stats,

    /// Print recent events.
    Events {
        /// Number of events to print.
        #[arg(long, short, default_value_t = 20)]
        n: usize,

        /// Keep printing new events until Ctrl-C.
        #[arg(long, short)]
        follow: bool,
    },

    /// Export the store, one entry per document.
    Export {
        /// `json` (pretty array) or `jsonl`.
        #[arg(long, default_value = "json")]
        format: ExportFormat,

        /// Write to a file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Send one prompt to an AI provider and print the answer.
    Query {
        prompt: String,

        /// Provider to use instead of `[session].provider`.
        #[arg(long)]
        provider: Option<Provider>,

        /// Print the answer as it arrives.
        #[arg(long)]
        stream: bool,
    },
}

/// Load the config file when present; defaults otherwise.
fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file; using defaults");
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("warn,amplifier={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Commands that don't require a config file
    match &cli.command {
        Commands::Init => {
            return init::run_init(&cli.config);
        }
        Commands::Providers => {
            let cfg = load_or_default(&cli.config)?;
            return providers::list_providers(&cfg).await;
        }
        Commands::Query {
            prompt,
            provider,
            stream,
        } => {
            let cfg = load_or_default(&cli.config)?;
            return query::run_query(&cfg, prompt, *provider, *stream).await;
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Sync {
            max_files,
            force,
            provider,
            dry_run,
            progress,
        } => {
            let args = SyncArgs {
                max_files,
                force,
                provider,
                dry_run,
                progress: progress.unwrap_or_else(ProgressMode::default_for_tty),
            };
            sync::run_sync(&cfg, args).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit)?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg)?;
        }
        Commands::Events { n, follow } => {
            events_cmd::run_events(&cfg, n, follow).await?;
        }
        Commands::Export { format, output } => {
            export::run_export(&cfg, format, output.as_deref())?;
        }
        Commands::Init | Commands::Providers | Commands::Query { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
