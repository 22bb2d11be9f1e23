//! Stateful session over the Claude Code CLI's SDK protocol.
//!
//! One `claude` process is kept alive for the whole session. Each query is
//! written to its stdin as a stream-JSON user message; stdout is read until
//! the matching `result` message. Because the process persists, later
//! queries see earlier turns until [`AiSession::reset`] replaces the process.
//!
//! ```text
//! stdin  → {"type":"user","message":{"role":"user","content":"..."}}
//! stdout ← {"type":"assistant","message":{"content":[{"type":"text","text":"..."}]}}
//! stdout ← {"type":"result","session_id":"...","total_cost_usd":0.01,"duration_ms":900}
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::{
    emit_fragment, query_with_retry, split_command, AiSession, Attempt, Provider, RetryPolicy,
    SessionOptions, SessionResponse,
};
use crate::error::{Error, Result};

const REMEDIATION: &str = "Install with one of:\n  \
    - npm install -g @anthropic-ai/claude-code\n  \
    - bun install -g @anthropic-ai/claude-code";

fn unavailable() -> Error {
    Error::ProviderUnavailable {
        provider: Provider::Claude.label().to_string(),
        remediation: REMEDIATION.to_string(),
    }
}

/// Find the `claude` executable on `PATH` or in its usual install locations.
pub(crate) fn locate_cli() -> Result<PathBuf> {
    if let Ok(path) = which::which("claude") {
        return Ok(path);
    }

    let mut known = Vec::new();
    if let Some(home) = dirs::home_dir() {
        known.push(home.join(".local/share/reflex/bun/bin/claude"));
        known.push(home.join(".npm-global/bin/claude"));
    }
    known.push(PathBuf::from("/usr/local/bin/claude"));

    known
        .into_iter()
        .find(|p| is_executable(p))
        .ok_or_else(unavailable)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

struct ClaudeProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

pub struct ClaudeSession {
    options: SessionOptions,
    program: String,
    base_args: Vec<String>,
    process: Option<ClaudeProcess>,
    /// Whether the current process has been sent a prompt.
    used: bool,
}

impl ClaudeSession {
    /// Resolve the CLI. Does not start it; see [`AiSession::open`].
    pub fn new(options: SessionOptions) -> Result<Self> {
        let (program, base_args) = match &options.command {
            Some(command) => split_command(command)?,
            None => (locate_cli()?.display().to_string(), Vec::new()),
        };

        Ok(Self {
            options,
            program,
            base_args,
            process: None,
            used: false,
        })
    }

    fn protocol_args(&self) -> Vec<String> {
        vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--input-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--system-prompt".to_string(),
            self.options.system_prompt.clone(),
            "--max-turns".to_string(),
            self.options.max_turns.to_string(),
        ]
    }

    fn spawn(&self) -> Result<ClaudeProcess> {
        let mut child = Command::new(&self.program)
            .args(&self.base_args)
            .args(self.protocol_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => unavailable(),
                _ => Error::Session(format!("failed to start {}: {}", self.program, e)),
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Session("claude stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Session("claude stdout not captured".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "amplifier::session::claude", "stderr: {}", line);
                }
            });
        }

        tracing::debug!(program = %self.program, "started claude process");

        Ok(ClaudeProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    /// Start the process if it is missing or has exited.
    fn ensure_process(&mut self) -> Result<()> {
        let alive = match self.process.as_mut() {
            Some(p) => p.child.try_wait()?.is_none(),
            None => false,
        };
        if !alive {
            if self.process.is_some() {
                tracing::warn!("claude process exited; restarting (conversation history is lost)");
            }
            self.process = Some(self.spawn()?);
        }
        Ok(())
    }
}

#[async_trait]
impl Attempt for ClaudeSession {
    async fn attempt(&mut self, prompt: &str, stream: bool) -> Result<SessionResponse> {
        self.ensure_process()?;
        let Some(process) = self.process.as_mut() else {
            return Err(Error::Session("claude process not running".to_string()));
        };

        self.used = true;
        let result = exchange(process, &self.options, prompt, stream).await;
        if result.is_err() {
            // The stream is out of step with our reader; start fresh next time.
            self.process = None;
        }
        result
    }

    async fn abandon(&mut self) {
        self.process = None;
    }
}

/// Send one user message and collect text until the `result` message.
async fn exchange(
    process: &mut ClaudeProcess,
    options: &SessionOptions,
    prompt: &str,
    stream: bool,
) -> Result<SessionResponse> {
    let message = json!({
        "type": "user",
        "message": { "role": "user", "content": prompt },
    });
    let mut line = message.to_string();
    line.push('\n');
    process.stdin.write_all(line.as_bytes()).await?;
    process.stdin.flush().await?;

    let mut text = String::new();
    let mut metadata = Map::new();
    metadata.insert("provider".to_string(), Value::from("claude"));

    loop {
        let Some(line) = process.stdout.next_line().await? else {
            return Err(Error::Session(
                "claude process closed its output before a result".to_string(),
            ));
        };

        let message: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => {
                tracing::debug!("ignoring non-JSON line from claude: {}", line);
                continue;
            }
        };

        match message.get("type").and_then(Value::as_str) {
            Some("assistant") => {
                for fragment in assistant_text(&message) {
                    emit_fragment(options, fragment, stream);
                    text.push_str(fragment);
                }
            }
            Some("result") => {
                for key in ["session_id", "total_cost_usd", "duration_ms"] {
                    if let Some(v) = message.get(key) {
                        metadata.insert(key.to_string(), v.clone());
                    }
                }

                if message.get("is_error").and_then(Value::as_bool) == Some(true) {
                    let detail = message
                        .get("result")
                        .and_then(Value::as_str)
                        .or_else(|| message.get("subtype").and_then(Value::as_str))
                        .unwrap_or("unknown error");
                    return Ok(SessionResponse {
                        content: String::new(),
                        metadata,
                        error: Some(format!("Claude error: {}", detail)),
                    });
                }

                if text.is_empty() {
                    if let Some(result) = message.get("result").and_then(Value::as_str) {
                        emit_fragment(options, result, stream);
                        text.push_str(result);
                    }
                }
                break;
            }
            _ => {}
        }
    }

    if stream && !text.is_empty() {
        println!();
    }

    if text.is_empty() {
        return Ok(SessionResponse {
            content: text,
            metadata,
            error: Some("Received empty response from Claude".to_string()),
        });
    }

    Ok(SessionResponse {
        content: text,
        metadata,
        error: None,
    })
}

fn assistant_text(message: &Value) -> Vec<&str> {
    message
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl AiSession for ClaudeSession {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    async fn open(&mut self) -> Result<()> {
        if self.process.is_none() {
            self.process = Some(self.spawn()?);
        }
        Ok(())
    }

    async fn query_with(&mut self, prompt: &str, stream: Option<bool>) -> Result<SessionResponse> {
        let stream = stream.unwrap_or(self.options.stream_output);
        let policy = RetryPolicy::from_options(&self.options);
        query_with_retry(self, policy, prompt, stream).await
    }

    async fn reset(&mut self) -> Result<()> {
        if !self.used {
            return Ok(());
        }
        self.used = false;
        self.close().await
    }

    async fn close(&mut self) -> Result<()> {
        let Some(process) = self.process.take() else {
            return Ok(());
        };
        let ClaudeProcess {
            mut child,
            stdin,
            stdout,
        } = process;
        // EOF on stdin asks the CLI to finish.
        drop(stdin);
        drop(stdout);

        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(status) => {
                tracing::debug!(status = ?status, "claude process exited");
            }
            Err(_) => {
                tracing::debug!("claude process did not exit; killing");
                child.kill().await?;
            }
        }
        Ok(())
    }
}
