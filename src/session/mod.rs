//! AI provider sessions.
//!
//! Defines the [`AiSession`] trait and its two implementations:
//! - **[`ClaudeSession`]**: a long-lived `claude` process speaking the SDK
//!   stream-JSON protocol. Conversation memory persists across queries
//!   until [`AiSession::reset`].
//! - **[`CopilotSession`]**: one `copilot` (or `gh copilot`) process per
//!   query. No memory between queries.
//!
//! # Provider Selection
//!
//! Use [`create_session`] to build the session named by
//! [`SessionOptions::provider`]. Dispatch is a tagged enum ([`Session`]),
//! so callers that only need the trait can hold a `Session` or any other
//! [`AiSession`] (tests use scripted mocks).
//!
//! # Retry and Timeout
//!
//! Every query is bounded by [`SessionOptions::timeout`] (120 s by default).
//! Inside that bound, provider errors and empty responses are retried up to
//! `retry_attempts` times with exponential backoff starting at `retry_delay`.
//! A timeout ends the query immediately with `error == "timeout"`.
//!
//! A provider that is not installed fails construction with
//! [`Error::ProviderUnavailable`]; that error, and only that error, comes
//! back from [`AiSession::query`] as `Err`.

mod claude;
mod copilot;

pub use claude::ClaudeSession;
pub use copilot::CopilotSession;

use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Error string carried by a timed-out [`SessionResponse`].
pub const TIMEOUT_ERROR: &str = "timeout";

/// Supported AI providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Claude Code CLI driven through its SDK protocol (stateful).
    #[default]
    Claude,
    /// GitHub Copilot CLI, one process per query (stateless).
    Copilot,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Claude, Provider::Copilot];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::Copilot => "copilot",
        }
    }

    /// Product name used in user-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            Provider::Claude => "Claude CLI",
            Provider::Copilot => "GitHub Copilot CLI",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(Provider::Claude),
            "copilot" => Ok(Provider::Copilot),
            other => Err(Error::Config(format!(
                "Unsupported provider: '{}'. Available: claude, copilot",
                other
            ))),
        }
    }
}

/// Receives each text fragment as it arrives.
pub type ProgressCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Configuration for a session. Built from `[session]` in the config file.
#[derive(Clone)]
pub struct SessionOptions {
    pub provider: Provider,
    pub system_prompt: String,
    pub max_turns: u32,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    /// Echo response text to stdout as it arrives.
    pub stream_output: bool,
    /// Program and leading args that replace the discovered provider CLI.
    pub command: Option<Vec<String>>,
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            system_prompt: "You are a helpful assistant".to_string(),
            max_turns: 1,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(120),
            stream_output: false,
            command: None,
            progress_callback: None,
        }
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("provider", &self.provider)
            .field("system_prompt", &self.system_prompt)
            .field("max_turns", &self.max_turns)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("timeout", &self.timeout)
            .field("stream_output", &self.stream_output)
            .field("command", &self.command)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

/// Result of one query. `error` is set on failure; `content` may then be empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionResponse {
    pub content: String,
    pub metadata: Map<String, Value>,
    pub error: Option<String>,
}

impl SessionResponse {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn timeout() -> Self {
        Self::failure(TIMEOUT_ERROR)
    }

    pub fn success(&self) -> bool {
        self.error.is_none() && !self.content.is_empty()
    }

    pub fn is_timeout(&self) -> bool {
        self.error.as_deref() == Some(TIMEOUT_ERROR)
    }
}

/// A prompt-in, text-out connection to one AI provider.
///
/// Lifecycle: [`open`](AiSession::open), any number of
/// [`query`](AiSession::query) calls, then [`close`](AiSession::close).
/// Implementations also release their process on drop, so an early return
/// never leaks a child.
#[async_trait]
pub trait AiSession: Send {
    fn provider(&self) -> Provider;

    /// Acquire the underlying process or connection.
    async fn open(&mut self) -> Result<()>;

    /// Send a prompt. `stream` overrides [`SessionOptions::stream_output`].
    ///
    /// Per-query failures (timeout, provider error, empty response) come
    /// back as `Ok` with [`SessionResponse::error`] set. `Err` is reserved
    /// for fatal conditions such as [`Error::ProviderUnavailable`].
    async fn query_with(&mut self, prompt: &str, stream: Option<bool>) -> Result<SessionResponse>;

    async fn query(&mut self, prompt: &str) -> Result<SessionResponse> {
        self.query_with(prompt, None).await
    }

    /// Forget earlier turns so the next query starts a new conversation.
    async fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the underlying process or connection.
    async fn close(&mut self) -> Result<()>;
}

/// A concrete session, selected by [`Provider`].
pub enum Session {
    Claude(ClaudeSession),
    Copilot(CopilotSession),
}

#[async_trait]
impl AiSession for Session {
    fn provider(&self) -> Provider {
        match self {
            Session::Claude(s) => s.provider(),
            Session::Copilot(s) => s.provider(),
        }
    }

    async fn open(&mut self) -> Result<()> {
        match self {
            Session::Claude(s) => s.open().await,
            Session::Copilot(s) => s.open().await,
        }
    }

    async fn query_with(&mut self, prompt: &str, stream: Option<bool>) -> Result<SessionResponse> {
        match self {
            Session::Claude(s) => s.query_with(prompt, stream).await,
            Session::Copilot(s) => s.query_with(prompt, stream).await,
        }
    }

    async fn reset(&mut self) -> Result<()> {
        match self {
            Session::Claude(s) => s.reset().await,
            Session::Copilot(s) => s.reset().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Session::Claude(s) => s.close().await,
            Session::Copilot(s) => s.close().await,
        }
    }
}

/// Create the session named by `options.provider`.
///
/// # Errors
///
/// [`Error::ProviderUnavailable`] when the provider CLI cannot be found.
pub async fn create_session(options: SessionOptions) -> Result<Session> {
    match options.provider {
        Provider::Claude => Ok(Session::Claude(ClaudeSession::new(options)?)),
        Provider::Copilot => Ok(Session::Copilot(CopilotSession::new(options).await?)),
    }
}

/// Resolve the command line a provider would run, without starting it.
pub async fn check_provider(provider: Provider) -> Result<Vec<String>> {
    match provider {
        Provider::Claude => claude::locate_cli().map(|path| vec![path.display().to_string()]),
        Provider::Copilot => copilot::locate_cli().await,
    }
}

/// One attempt at a query, without retry or timeout.
#[async_trait]
pub(crate) trait Attempt: Send {
    async fn attempt(&mut self, prompt: &str, stream: bool) -> Result<SessionResponse>;

    /// Called after a query timed out. Stateful sessions drop their process.
    async fn abandon(&mut self) {}
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_options(options: &SessionOptions) -> Self {
        Self {
            attempts: options.retry_attempts.max(1),
            delay: options.retry_delay,
            timeout: options.timeout,
        }
    }
}

/// Run attempts with backoff inside one overall timeout.
pub(crate) async fn query_with_retry<S: Attempt + ?Sized>(
    session: &mut S,
    policy: RetryPolicy,
    prompt: &str,
    stream: bool,
) -> Result<SessionResponse> {
    let outcome =
        tokio::time::timeout(policy.timeout, retry_loop(session, policy, prompt, stream)).await;

    match outcome {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(timeout_secs = policy.timeout.as_secs(), "query timed out");
            session.abandon().await;
            Ok(SessionResponse::timeout())
        }
    }
}

async fn retry_loop<S: Attempt + ?Sized>(
    session: &mut S,
    policy: RetryPolicy,
    prompt: &str,
    stream: bool,
) -> Result<SessionResponse> {
    let mut delay = policy.delay;
    let mut last_error = String::new();

    for attempt in 1..=policy.attempts {
        match session.attempt(prompt, stream).await {
            Ok(mut response) if response.success() => {
                response
                    .metadata
                    .insert("attempt".to_string(), Value::from(attempt));
                return Ok(response);
            }
            Ok(response) => {
                last_error = response
                    .error
                    .unwrap_or_else(|| "Received empty response".to_string());
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => last_error = e.to_string(),
        }

        tracing::debug!(attempt, error = %last_error, "query attempt failed");

        if attempt < policy.attempts {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    Ok(SessionResponse::failure(format!(
        "Failed after {} attempts: {}",
        policy.attempts, last_error
    )))
}

/// Echo a text fragment and notify the progress callback.
pub(crate) fn emit_fragment(options: &SessionOptions, text: &str, stream: bool) {
    if text.is_empty() {
        return;
    }
    if stream {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
    if let Some(callback) = &options.progress_callback {
        callback(text);
    }
}

/// Split a command override into program and leading args.
pub(crate) fn split_command(command: &[String]) -> Result<(String, Vec<String>)> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| Error::Config("session.command must name a program".to_string()))?;
    Ok((program.clone(), args.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted {
        replies: VecDeque<Result<SessionResponse>>,
        calls: u32,
        hang: bool,
        abandoned: bool,
    }

    impl Scripted {
        fn new(replies: Vec<Result<SessionResponse>>) -> Self {
            Self {
                replies: replies.into(),
                calls: 0,
                hang: false,
                abandoned: false,
            }
        }
    }

    #[async_trait]
    impl Attempt for Scripted {
        async fn attempt(&mut self, _prompt: &str, _stream: bool) -> Result<SessionResponse> {
            self.calls += 1;
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.replies
                .pop_front()
                .unwrap_or_else(|| Ok(SessionResponse::default()))
        }

        async fn abandon(&mut self) {
            self.abandoned = true;
        }
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn provider_parse() {
        assert_eq!("claude".parse::<Provider>().unwrap(), Provider::Claude);
        assert_eq!(" Copilot ".parse::<Provider>().unwrap(), Provider::Copilot);
        let err = "gemini".parse::<Provider>().unwrap_err();
        assert!(err.to_string().contains("Unsupported provider: 'gemini'"));
    }

    #[test]
    fn response_success_requires_content() {
        assert!(SessionResponse::ok("hi").success());
        assert!(!SessionResponse::ok("").success());
        assert!(!SessionResponse::failure("boom").success());
        assert!(SessionResponse::timeout().is_timeout());
    }

    #[tokio::test]
    async fn retries_until_content() {
        let mut s = Scripted::new(vec![
            Err(Error::Session("flaky".into())),
            Ok(SessionResponse::default()),
            Ok(SessionResponse::ok("done")),
        ]);
        let response = query_with_retry(&mut s, policy(3), "p", false).await.unwrap();
        assert!(response.success());
        assert_eq!(response.content, "done");
        assert_eq!(response.metadata["attempt"], 3);
        assert_eq!(s.calls, 3);
    }

    #[tokio::test]
    async fn exhausted_attempts_report_last_error() {
        let mut s = Scripted::new(vec![
            Err(Error::Session("first".into())),
            Err(Error::Session("second".into())),
        ]);
        let response = query_with_retry(&mut s, policy(2), "p", false).await.unwrap();
        assert!(!response.success());
        let error = response.error.unwrap();
        assert!(error.starts_with("Failed after 2 attempts"));
        assert!(error.contains("second"));
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let mut s = Scripted::new(vec![Err(Error::ProviderUnavailable {
            provider: "x".into(),
            remediation: "y".into(),
        })]);
        let err = query_with_retry(&mut s, policy(3), "p", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable { .. }));
        assert_eq!(s.calls, 1);
    }

    #[tokio::test]
    async fn timeout_yields_timeout_response() {
        let mut s = Scripted::new(vec![]);
        s.hang = true;
        let response = query_with_retry(
            &mut s,
            RetryPolicy {
                attempts: 3,
                delay: Duration::from_millis(1),
                timeout: Duration::from_millis(50),
            },
            "p",
            false,
        )
        .await
        .unwrap();
        assert!(response.is_timeout());
        assert_eq!(response.error.as_deref(), Some("timeout"));
        assert!(s.abandoned);
        assert_eq!(s.calls, 1);
    }

    #[test]
    fn progress_callback_receives_fragments() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let sink = seen.clone();
        let options = SessionOptions {
            progress_callback: Some(Arc::new(move |t: &str| {
                sink.lock().unwrap().push(t.to_string())
            })),
            ..SessionOptions::default()
        };
        emit_fragment(&options, "a", false);
        emit_fragment(&options, "", false);
        emit_fragment(&options, "b", false);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn split_command_requires_program() {
        let (program, args) =
            split_command(&["./fake.sh".to_string(), "--x".to_string()]).unwrap();
        assert_eq!(program, "./fake.sh");
        assert_eq!(args, vec!["--x"]);
        assert!(split_command(&[]).is_err());
    }
}
