//! # Amplifier
//!
//! A knowledge extraction pipeline driven by AI coding assistant CLIs.
//!
//! Amplifier walks a directory of text documents, asks an AI provider
//! (Claude Code or GitHub Copilot) to extract concepts, relationships,
//! insights and patterns from each one, and appends the results to a
//! JSON Lines store with a parallel log of lifecycle events.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌─────────────────┐
//! │   Content   │──▶│ Synthesizer  │──▶│ KnowledgeStore  │
//! │  (walkdir)  │   │  AiSession   │   │  *.jsonl files  │
//! └─────────────┘   └──────┬───────┘   └────────┬────────┘
//!                          │                    │
//!                ┌─────────┴─────────┐          ▼
//!                ▼                   ▼     ┌──────────┐
//!          ┌───────────┐      ┌───────────┐│   CLI    │
//!          │  claude   │      │  copilot  ││  (amp)   │
//!          │ (stateful)│      │(stateless)│└──────────┘
//!          └───────────┘      └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! amp init                        # write ./config/amp.toml
//! amp providers                   # which provider CLIs are installed
//! amp sync --max-files 10         # extract knowledge
//! amp search "agents"
//! amp export --format jsonl
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Library error type |
//! | [`models`] | Documents and extractions |
//! | [`events`] | Pipeline lifecycle events |
//! | [`content`] | Content directory scanner |
//! | [`session`] | AI provider sessions (Claude, Copilot) |
//! | [`synthesis`] | Prompting and response parsing |
//! | [`store`] | Append-only JSON Lines store |
//! | [`sync`] | Sync driver |
//! | [`progress`] | Sync progress on stderr |

pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod events_cmd;
pub mod export;
pub mod init;
pub mod models;
pub mod progress;
pub mod providers;
pub mod query;
pub mod search;
pub mod session;
pub mod stats;
pub mod store;
pub mod sync;
pub mod synthesis;
