//! Sync driver.
//!
//! Coordinates one run: content scan → skip check → synthesis → store, with
//! a lifecycle event recorded for every step:
//!
//! ```text
//! sync_started
//!   document_skipped        (already processed, unchanged, or empty)
//!   extraction_started
//!   extraction_succeeded    (record appended to extractions.jsonl)
//!   extraction_failed       (nothing saved; retried next run)
//! sync_finished             (always, with counts; also on fatal error or Ctrl-C)
//! ```
//!
//! Every event carries the `run_id` of its run. Per-document failures never
//! stop the run; provider-unavailable and storage errors do, after
//! `sync_finished` has been recorded.

use std::future::Future;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::config::{Config, ReprocessPolicy};
use crate::content::scan_content;
use crate::events::{Event, EventType};
use crate::models::SourceDocument;
use crate::progress::{ProgressMode, SyncProgressEvent, SyncProgressReporter};
use crate::session::{create_session, AiSession, Provider};
use crate::store::KnowledgeStore;
use crate::synthesis::{KnowledgeSynthesizer, SynthesisFailure};

/// Limits and policy for one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Stop after this many documents have been attempted (processed or skipped).
    pub max_files: Option<usize>,
    pub policy: ReprocessPolicy,
}

/// Counts for one run, as recorded in `sync_finished`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSummary {
    pub run_id: String,
    pub documents: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub interrupted: bool,
    in_flight: Option<String>,
}

/// Why `doc` would be skipped under `policy`, or `None` to extract it.
pub fn skip_reason(
    store: &KnowledgeStore,
    doc: &SourceDocument,
    policy: ReprocessPolicy,
) -> Option<&'static str> {
    if doc.body.trim().is_empty() {
        return Some("empty");
    }
    let stored = store.get(&doc.source_id)?;
    match policy {
        ReprocessPolicy::Never => Some("already_processed"),
        ReprocessPolicy::Always => None,
        ReprocessPolicy::Changed => match stored.content_hash.as_deref() {
            Some(hash) if hash == doc.content_hash => Some("unchanged"),
            Some(_) => None,
            // Records written without a hash cannot be compared.
            None => Some("already_processed"),
        },
    }
}

/// Run the pipeline over `docs` until done, a fatal error, or `shutdown` resolves.
///
/// `sync_finished` is recorded on every path. A fatal error is returned
/// after it, with the partial counts and the error message in its payload.
pub async fn sync_documents<S, F>(
    store: &mut KnowledgeStore,
    session: &mut S,
    synthesizer: &KnowledgeSynthesizer,
    docs: &[SourceDocument],
    options: &SyncOptions,
    reporter: &dyn SyncProgressReporter,
    shutdown: F,
) -> crate::error::Result<SyncSummary>
where
    S: AiSession + ?Sized,
    F: Future<Output = ()>,
{
    let mut summary = SyncSummary {
        run_id: Uuid::new_v4().to_string(),
        documents: docs.len(),
        ..SyncSummary::default()
    };

    let mut started = Event::new(EventType::SyncStarted)
        .with("run_id", summary.run_id.as_str())
        .with("documents", docs.len())
        .with("provider", session.provider().as_str());
    if let Some(max) = options.max_files {
        started = started.with("max_files", max);
    }
    store.record_event(&started)?;
    tracing::info!(run_id = %summary.run_id, documents = docs.len(), "sync started");

    tokio::pin!(shutdown);
    let outcome = tokio::select! {
        result = process_documents(store, session, synthesizer, docs, options, reporter, &mut summary) => Some(result),
        _ = &mut shutdown => None,
    };

    let outcome = match outcome {
        Some(result) => result,
        None => {
            tracing::warn!(run_id = %summary.run_id, "sync interrupted");
            summary.interrupted = true;
            match summary.in_flight.take() {
                Some(source_id) => {
                    summary.failed += 1;
                    store.record_event(
                        &Event::new(EventType::ExtractionFailed)
                            .with("run_id", summary.run_id.as_str())
                            .with("source_id", source_id)
                            .with("error", "interrupted"),
                    )
                }
                None => Ok(()),
            }
        }
    };

    let mut finished = Event::new(EventType::SyncFinished)
        .with("run_id", summary.run_id.as_str())
        .with("attempted", summary.attempted)
        .with("succeeded", summary.succeeded)
        .with("failed", summary.failed)
        .with("skipped", summary.skipped)
        .with("interrupted", summary.interrupted);
    if let Err(e) = &outcome {
        finished = finished.with("error", e.to_string());
    }
    let recorded = store.record_event(&finished);

    reporter.report(SyncProgressEvent::Finished {
        succeeded: summary.succeeded as u64,
        failed: summary.failed as u64,
        skipped: summary.skipped as u64,
    });
    tracing::info!(
        run_id = %summary.run_id,
        succeeded = summary.succeeded,
        failed = summary.failed,
        skipped = summary.skipped,
        interrupted = summary.interrupted,
        "sync finished"
    );

    outcome?;
    recorded?;
    Ok(summary)
}

async fn process_documents<S>(
    store: &mut KnowledgeStore,
    session: &mut S,
    synthesizer: &KnowledgeSynthesizer,
    docs: &[SourceDocument],
    options: &SyncOptions,
    reporter: &dyn SyncProgressReporter,
    summary: &mut SyncSummary,
) -> crate::error::Result<()>
where
    S: AiSession + ?Sized,
{
    let total = options
        .max_files
        .map_or(docs.len(), |max| max.min(docs.len()));
    let run_id = summary.run_id.clone();

    for doc in docs {
        if summary.attempted >= total {
            break;
        }
        summary.attempted += 1;

        if let Some(reason) = skip_reason(store, doc, options.policy) {
            tracing::debug!(source_id = %doc.source_id, reason, "skipping document");
            store.record_event(
                &Event::new(EventType::DocumentSkipped)
                    .with("run_id", run_id.as_str())
                    .with("source_id", doc.source_id.as_str())
                    .with("reason", reason),
            )?;
            summary.skipped += 1;
            continue;
        }

        reporter.report(SyncProgressEvent::Extracting {
            source_id: doc.source_id.clone(),
            n: summary.attempted as u64,
            total: total as u64,
        });
        store.record_event(
            &Event::new(EventType::ExtractionStarted)
                .with("run_id", run_id.as_str())
                .with("source_id", doc.source_id.as_str())
                .with("path", doc.relative_path.as_str()),
        )?;
        summary.in_flight = Some(doc.source_id.clone());

        // One conversation per document.
        if let Err(e) = session.reset().await {
            tracing::warn!(source_id = %doc.source_id, error = %e, "failed to reset session");
        }
        let synthesis = match synthesizer.extract(session, doc).await {
            Ok(synthesis) => synthesis,
            Err(e) => {
                summary.in_flight = None;
                summary.failed += 1;
                store.record_event(
                    &Event::new(EventType::ExtractionFailed)
                        .with("run_id", run_id.as_str())
                        .with("source_id", doc.source_id.as_str())
                        .with("error", e.to_string()),
                )?;
                return Err(e);
            }
        };
        summary.in_flight = None;

        match synthesis.failure {
            None => {
                let e = synthesis.extraction;
                let event = Event::new(EventType::ExtractionSucceeded)
                    .with("run_id", run_id.as_str())
                    .with("source_id", doc.source_id.as_str())
                    .with("concepts", e.concepts.len())
                    .with("relationships", e.relationships.len())
                    .with("insights", e.insights.len())
                    .with("patterns", e.patterns.len());
                store.save(e)?;
                store.record_event(&event)?;
                summary.succeeded += 1;
            }
            Some(failure) => {
                tracing::warn!(source_id = %doc.source_id, error = %failure, "extraction failed");
                store.record_event(
                    &Event::new(EventType::ExtractionFailed)
                        .with("run_id", run_id.as_str())
                        .with("source_id", doc.source_id.as_str())
                        .with("kind", failure_kind(&failure))
                        .with("error", failure.to_string()),
                )?;
                summary.failed += 1;
            }
        }
    }

    Ok(())
}

fn failure_kind(failure: &SynthesisFailure) -> &'static str {
    match failure {
        SynthesisFailure::Timeout => "timeout",
        SynthesisFailure::Session(_) => "session",
        SynthesisFailure::MalformedResponse(_) => "malformed_response",
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::debug!("Ctrl-C handler unavailable");
        std::future::pending::<()>().await;
    }
}

/// CLI arguments for `amp sync`.
#[derive(Debug, Clone)]
pub struct SyncArgs {
    pub max_files: Option<usize>,
    pub force: bool,
    pub provider: Option<Provider>,
    pub dry_run: bool,
    pub progress: ProgressMode,
}

pub async fn run_sync(config: &Config, args: SyncArgs) -> Result<()> {
    let reporter = args.progress.reporter();
    reporter.report(SyncProgressEvent::Discovering {
        root: config.content.root.display().to_string(),
    });

    let docs = scan_content(&config.content)?;
    let mut store = KnowledgeStore::from_config(&config.store)?;
    let options = SyncOptions {
        max_files: args.max_files,
        policy: if args.force {
            ReprocessPolicy::Always
        } else {
            config.sync.reprocess
        },
    };

    if args.dry_run {
        print_plan(&store, &docs, &options);
        return Ok(());
    }

    let mut session_options = config.session.to_options();
    if let Some(provider) = args.provider {
        session_options.provider = provider;
    }
    let provider = session_options.provider;

    let mut session = create_session(session_options)
        .await
        .with_context(|| format!("Cannot start {} session", provider))?;
    session.open().await?;

    let synthesizer = KnowledgeSynthesizer::new(config.content.max_chars);
    let result = sync_documents(
        &mut store,
        &mut session,
        &synthesizer,
        &docs,
        &options,
        reporter.as_ref(),
        shutdown_signal(),
    )
    .await;

    if let Err(e) = session.close().await {
        tracing::warn!("failed to close {} session: {}", provider, e);
    }

    let summary = result.context("Sync aborted")?;

    println!("sync {}", provider);
    println!("  documents found: {}", summary.documents);
    println!("  attempted: {}", summary.attempted);
    println!("  extracted: {}", summary.succeeded);
    println!("  failed: {}", summary.failed);
    println!("  skipped: {}", summary.skipped);
    if summary.interrupted {
        println!("interrupted");
    } else {
        println!("ok");
    }
    Ok(())
}

fn print_plan(store: &KnowledgeStore, docs: &[SourceDocument], options: &SyncOptions) {
    let limit = options.max_files.unwrap_or(docs.len());
    let mut extract = 0usize;
    let mut skip = 0usize;

    println!("sync (dry-run)");
    println!("  documents found: {}", docs.len());
    for doc in docs.iter().take(limit) {
        match skip_reason(store, doc, options.policy) {
            Some(reason) => {
                skip += 1;
                println!("  skip     {}  ({})", doc.source_id, reason);
            }
            None => {
                extract += 1;
                println!("  extract  {}  {}", doc.source_id, doc.relative_path);
            }
        }
    }
    println!("  would extract: {}", extract);
    println!("  would skip: {}", skip);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{content_hash, Extraction};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn doc(id: &str, body: &str) -> SourceDocument {
        SourceDocument {
            source_id: id.to_string(),
            title: id.to_string(),
            path: PathBuf::from(id),
            relative_path: id.to_string(),
            body: body.to_string(),
            content_hash: content_hash(body),
        }
    }

    #[test]
    fn skip_reasons_follow_policy() {
        let tmp = TempDir::new().unwrap();
        let mut store = KnowledgeStore::open(tmp.path()).unwrap();
        let mut stored = Extraction::empty("a", "A");
        stored.content_hash = Some(content_hash("v1"));
        store.save(stored).unwrap();
        store.save(Extraction::empty("legacy", "L")).unwrap();

        let same = doc("a", "v1");
        let edited = doc("a", "v2");
        let fresh = doc("b", "new");

        assert_eq!(skip_reason(&store, &doc("e", "  \n"), ReprocessPolicy::Always), Some("empty"));

        assert_eq!(skip_reason(&store, &same, ReprocessPolicy::Never), Some("already_processed"));
        assert_eq!(skip_reason(&store, &fresh, ReprocessPolicy::Never), None);

        assert_eq!(skip_reason(&store, &same, ReprocessPolicy::Changed), Some("unchanged"));
        assert_eq!(skip_reason(&store, &edited, ReprocessPolicy::Changed), None);
        assert_eq!(
            skip_reason(&store, &doc("legacy", "x"), ReprocessPolicy::Changed),
            Some("already_processed")
        );

        assert_eq!(skip_reason(&store, &same, ReprocessPolicy::Always), None);
    }

    #[test]
    fn failure_kinds() {
        assert_eq!(failure_kind(&SynthesisFailure::Timeout), "timeout");
        assert_eq!(
            failure_kind(&SynthesisFailure::MalformedResponse("x".into())),
            "malformed_response"
        );
    }
}
