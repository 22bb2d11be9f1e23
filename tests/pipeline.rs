//! End-to-end pipeline tests: content scan → sync driver → store, with a
//! scripted in-process session standing in for the provider CLI.

use std::fs;
use std::path::Path;
use std::time::Duration;

use amplifier::config::{ContentConfig, ReprocessPolicy};
use amplifier::content::scan_content;
use amplifier::error::{Error, Result};
use amplifier::events::{Event, EventType};
use amplifier::models::SourceDocument;
use amplifier::progress::NoProgress;
use amplifier::session::{create_session, AiSession, Provider, SessionOptions, SessionResponse};
use amplifier::store::{ExportFormat, KnowledgeStore};
use amplifier::sync::{sync_documents, SyncOptions, SyncSummary};
use amplifier::synthesis::KnowledgeSynthesizer;
use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

type Responder = Box<dyn FnMut(&str) -> Result<SessionResponse> + Send>;

struct MockSession {
    respond: Responder,
    hang_on: Option<String>,
    queries: usize,
    resets: usize,
}

impl MockSession {
    fn new(respond: impl FnMut(&str) -> Result<SessionResponse> + Send + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            hang_on: None,
            queries: 0,
            resets: 0,
        }
    }
}

#[async_trait]
impl AiSession for MockSession {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn query_with(&mut self, prompt: &str, _stream: Option<bool>) -> Result<SessionResponse> {
        self.queries += 1;
        if let Some(marker) = &self.hang_on {
            if prompt.contains(marker.as_str()) {
                std::future::pending::<()>().await;
            }
        }
        (self.respond)(prompt)
    }

    async fn reset(&mut self) -> Result<()> {
        self.resets += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

fn reply_with(concept: &str) -> SessionResponse {
    SessionResponse::ok(
        json!({
            "concepts": [{"name": concept, "description": "d", "importance": 0.8}],
            "relationships": [],
            "insights": ["i"],
            "patterns": []
        })
        .to_string(),
    )
}

fn setup(files: &[(&str, &str)]) -> (TempDir, Vec<SourceDocument>, KnowledgeStore) {
    let tmp = TempDir::new().unwrap();
    let content = tmp.path().join("content");
    fs::create_dir_all(&content).unwrap();
    for (name, body) in files {
        fs::write(content.join(name), body).unwrap();
    }

    let docs = scan_content(&ContentConfig {
        root: content,
        ..ContentConfig::default()
    })
    .unwrap();
    let store = KnowledgeStore::open(&tmp.path().join("store")).unwrap();
    (tmp, docs, store)
}

async fn run(
    store: &mut KnowledgeStore,
    session: &mut MockSession,
    docs: &[SourceDocument],
    options: SyncOptions,
) -> Result<SyncSummary> {
    sync_documents(
        store,
        session,
        &KnowledgeSynthesizer::default(),
        docs,
        &options,
        &NoProgress,
        std::future::pending::<()>(),
    )
    .await
}

fn line_count(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|s| s.lines().filter(|l| !l.trim().is_empty()).count())
        .unwrap_or(0)
}

fn types(events: &[Event]) -> Vec<EventType> {
    events.iter().map(|e| e.event_type).collect()
}

#[tokio::test]
async fn agents_document_is_extracted_and_saved() {
    let (_tmp, docs, mut store) = setup(&[("Doc1.md", "AI agents automate repetitive tasks")]);
    let mut session = MockSession::new(|prompt| {
        assert!(prompt.contains("AI agents automate repetitive tasks"));
        Ok(SessionResponse::ok(
            r#"{"concepts":[{"name":"AI Agents","description":"Autonomous software","importance":0.9}],"relationships":[],"insights":["Reduces manual work"],"patterns":[]}"#,
        ))
    });

    let summary = run(&mut store, &mut session, &docs, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 0);

    assert!(store.is_processed("doc1"));
    assert_eq!(line_count(store.extractions_path()), 1);

    let e = store.get("doc1").unwrap();
    assert_eq!(e.title, "Doc1");
    assert_eq!(e.concepts.len(), 1);
    assert_eq!(e.concepts[0].name, "AI Agents");
    assert_eq!(e.insights, vec!["Reduces manual work"]);
    assert!(e.relationships.is_empty());
    assert!(e.patterns.is_empty());

    let events = store.read_events().unwrap();
    assert_eq!(
        types(&events),
        vec![
            EventType::SyncStarted,
            EventType::ExtractionStarted,
            EventType::ExtractionSucceeded,
            EventType::SyncFinished,
        ]
    );
    let run_id = events[0].field("run_id").unwrap();
    assert!(events.iter().all(|e| e.field("run_id") == Some(run_id)));
    assert_eq!(events[2].payload["concepts"], 1);
}

#[tokio::test]
async fn rerun_without_new_documents_only_skips() {
    let (_tmp, docs, mut store) = setup(&[("a.md", "alpha"), ("b.md", "beta")]);
    let mut session = MockSession::new(|_| Ok(reply_with("Thing")));

    run(&mut store, &mut session, &docs, SyncOptions::default())
        .await
        .unwrap();
    let lines_before = line_count(store.extractions_path());
    let events_before = store.read_events().unwrap().len();
    assert_eq!(session.queries, 2);

    let summary = run(&mut store, &mut session, &docs, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(session.queries, 2, "no queries on a no-op run");
    assert_eq!(line_count(store.extractions_path()), lines_before);

    let events = store.read_events().unwrap();
    let second_run = &events[events_before..];
    assert_eq!(
        types(second_run),
        vec![
            EventType::SyncStarted,
            EventType::DocumentSkipped,
            EventType::DocumentSkipped,
            EventType::SyncFinished,
        ]
    );
    assert_eq!(second_run[1].field("reason"), Some("already_processed"));
}

#[tokio::test]
async fn max_files_limits_the_run() {
    let (_tmp, docs, mut store) = setup(&[("a.md", "alpha"), ("b.md", "beta"), ("c.md", "gamma")]);
    let mut session = MockSession::new(|_| Ok(reply_with("Thing")));

    let summary = run(
        &mut store,
        &mut session,
        &docs,
        SyncOptions {
            max_files: Some(1),
            ..SyncOptions::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(session.queries, 1);
    assert_eq!(store.len(), 1);
    assert!(store.is_processed("a"));
    assert!(!store.is_processed("b"));
}

#[tokio::test]
async fn timeout_is_recorded_and_sync_continues() {
    let (_tmp, docs, mut store) = setup(&[("a.md", "alpha"), ("b.md", "beta"), ("c.md", "gamma")]);
    let mut session = MockSession::new(|prompt| {
        if prompt.contains("beta") {
            Ok(SessionResponse::timeout())
        } else {
            Ok(reply_with("Thing"))
        }
    });

    let summary = run(&mut store, &mut session, &docs, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert!(store.is_processed("a"));
    assert!(!store.is_processed("b"), "failed extractions are not saved");
    assert!(store.is_processed("c"));

    let events = store.read_events().unwrap();
    let failed: Vec<&Event> = events
        .iter()
        .filter(|e| e.event_type == EventType::ExtractionFailed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].field("source_id"), Some("b"));
    assert_eq!(failed[0].field("error"), Some("timeout"));
    assert_eq!(failed[0].field("kind"), Some("timeout"));

    // The failed document is retried next time.
    let summary = run(&mut store, &mut session, &docs, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.failed, 1);
}

#[tokio::test]
async fn malformed_response_is_a_failure_not_an_error() {
    let (_tmp, docs, mut store) = setup(&[("a.md", "alpha")]);
    let mut session = MockSession::new(|_| Ok(SessionResponse::ok("Sorry, I can't do that.")));

    let summary = run(&mut store, &mut session, &docs, SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.failed, 1);
    assert!(store.is_empty());
    let events = store.read_events().unwrap();
    assert!(events
        .iter()
        .any(|e| e.field("kind") == Some("malformed_response")));
}

#[tokio::test]
async fn provider_unavailable_halts_after_sync_finished() {
    let (_tmp, docs, mut store) = setup(&[("a.md", "alpha"), ("b.md", "beta"), ("c.md", "gamma")]);
    let mut session = MockSession::new(|prompt| {
        if prompt.contains("beta") {
            Err(Error::ProviderUnavailable {
                provider: "Claude CLI".into(),
                remediation: "install it".into(),
            })
        } else {
            Ok(reply_with("Thing"))
        }
    });

    let err = run(&mut store, &mut session, &docs, SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProviderUnavailable { .. }));
    assert_eq!(session.queries, 2, "c is never attempted");
    assert!(store.is_processed("a"));

    let events = store.read_events().unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventType::SyncFinished);
    assert_eq!(last.payload["succeeded"], 1);
    assert_eq!(last.payload["failed"], 1);
    assert!(last.field("error").unwrap().contains("not available"));
}

#[tokio::test]
async fn storage_failure_halts_after_sync_finished() {
    let (_tmp, docs, mut store) = setup(&[("a.md", "alpha")]);
    // A directory where the extractions file should be makes every append fail.
    fs::create_dir_all(store.extractions_path()).unwrap();
    let mut session = MockSession::new(|_| Ok(reply_with("Thing")));

    let err = run(&mut store, &mut session, &docs, SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Storage { .. }));
    assert!(err.is_fatal());

    let events = store.read_events().unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventType::SyncFinished);
    assert!(last.field("error").unwrap().contains("storage error"));
}

#[tokio::test]
async fn interrupt_records_in_flight_document() {
    let (_tmp, docs, mut store) = setup(&[("a.md", "alpha"), ("b.md", "beta"), ("c.md", "gamma")]);
    let mut session = MockSession::new(|_| Ok(reply_with("Thing")));
    session.hang_on = Some("beta".to_string());

    let summary = sync_documents(
        &mut store,
        &mut session,
        &KnowledgeSynthesizer::default(),
        &docs,
        &SyncOptions::default(),
        &NoProgress,
        tokio::time::sleep(Duration::from_millis(100)),
    )
    .await
    .unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert!(!store.is_processed("c"));

    let events = store.read_events().unwrap();
    let n = events.len();
    assert_eq!(events[n - 2].event_type, EventType::ExtractionFailed);
    assert_eq!(events[n - 2].field("error"), Some("interrupted"));
    assert_eq!(events[n - 1].event_type, EventType::SyncFinished);
    assert_eq!(events[n - 1].payload["interrupted"], true);

    // Every line on disk is complete JSON.
    let raw = fs::read_to_string(store.events_path()).unwrap();
    assert!(raw.ends_with('\n'));
    for line in raw.lines() {
        serde_json::from_str::<serde_json::Value>(line).unwrap();
    }
}

#[tokio::test]
async fn forced_resync_appends_and_latest_wins() {
    let (tmp, docs, mut store) = setup(&[("a.md", "alpha"), ("b.md", "beta")]);
    let mut first = MockSession::new(|_| Ok(reply_with("Old")));
    run(&mut store, &mut first, &docs, SyncOptions::default())
        .await
        .unwrap();

    let mut second = MockSession::new(|_| Ok(reply_with("New")));
    let summary = run(
        &mut store,
        &mut second,
        &docs,
        SyncOptions {
            policy: ReprocessPolicy::Always,
            ..SyncOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(line_count(store.extractions_path()), 4);

    // A fresh reader sees one record per id, the newest.
    let reopened = KnowledgeStore::open(&tmp.path().join("store")).unwrap();
    let exported: serde_json::Value =
        serde_json::from_str(&reopened.export(ExportFormat::Json).unwrap()).unwrap();
    let entries = exported.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries
        .iter()
        .all(|e| e["concepts"][0]["name"] == "New"));
}

#[tokio::test]
async fn changed_policy_reextracts_only_edited_documents() {
    let (tmp, docs, mut store) = setup(&[("a.md", "alpha"), ("b.md", "beta")]);
    let mut session = MockSession::new(|_| Ok(reply_with("Thing")));
    run(&mut store, &mut session, &docs, SyncOptions::default())
        .await
        .unwrap();

    fs::write(tmp.path().join("content/b.md"), "beta, revised").unwrap();
    let docs = scan_content(&ContentConfig {
        root: tmp.path().join("content"),
        ..ContentConfig::default()
    })
    .unwrap();

    let summary = run(
        &mut store,
        &mut session,
        &docs,
        SyncOptions {
            policy: ReprocessPolicy::Changed,
            ..SyncOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(session.queries, 3);
}

#[tokio::test]
async fn session_is_reset_before_each_extraction() {
    let (_tmp, docs, mut store) = setup(&[("a.md", "alpha"), ("b.md", "beta"), ("c.md", "")]);
    let mut session = MockSession::new(|_| Ok(reply_with("Thing")));
    let summary = run(&mut store, &mut session, &docs, SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(session.queries, 2);
    assert_eq!(session.resets, 2);
}

#[cfg(unix)]
#[tokio::test]
async fn claude_documents_do_not_share_a_conversation() {
    use std::os::unix::fs::PermissionsExt;

    let (tmp, docs, mut store) = setup(&[("a.md", "first"), ("b.md", "second"), ("c.md", "third")]);
    // Reports how many user messages this process has seen.
    let script = tmp.path().join("fake-claude.sh");
    fs::write(
        &script,
        r##"#!/bin/sh
n=0
while read -r line; do
  n=$((n+1))
  printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"{\"insights\":[\"turn '$n'\"]}"}]}}'
  printf '%s\n' '{"type":"result","is_error":false}'
done
"##,
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let mut session = create_session(SessionOptions {
        provider: Provider::Claude,
        command: Some(vec![script.display().to_string()]),
        retry_attempts: 1,
        ..SessionOptions::default()
    })
    .await
    .unwrap();
    session.open().await.unwrap();

    let summary = sync_documents(
        &mut store,
        &mut session,
        &KnowledgeSynthesizer::default(),
        &docs,
        &SyncOptions::default(),
        &NoProgress,
        std::future::pending::<()>(),
    )
    .await
    .unwrap();
    session.close().await.unwrap();

    assert_eq!(summary.succeeded, 3);
    for extraction in store.extractions() {
        assert_eq!(extraction.insights, vec!["turn 1".to_string()], "{}", extraction.source_id);
    }
}
