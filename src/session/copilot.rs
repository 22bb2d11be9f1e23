//! Stateless session over the GitHub Copilot CLI.
//!
//! Every query runs `<cli> explain <prompt>` to completion and takes its
//! trimmed stdout as the response. Nothing carries over between queries.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::process::Command;

use super::{
    emit_fragment, query_with_retry, split_command, AiSession, Attempt, Provider, RetryPolicy,
    SessionOptions, SessionResponse,
};
use crate::error::{Error, Result};

const REMEDIATION: &str = "Install with one of:\n  \
    - GitHub Copilot CLI: https://docs.github.com/en/copilot/github-copilot-in-the-cli\n  \
    - GitHub CLI (https://cli.github.com/) then: gh extension install github/gh-copilot";

const GH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

fn unavailable() -> Error {
    Error::ProviderUnavailable {
        provider: Provider::Copilot.label().to_string(),
        remediation: REMEDIATION.to_string(),
    }
}

/// Prefer a standalone `copilot`; fall back to the `gh copilot` extension.
pub(crate) async fn locate_cli() -> Result<Vec<String>> {
    if which::which("copilot").is_ok() {
        return Ok(vec!["copilot".to_string()]);
    }

    if which::which("gh").is_ok() {
        let probe = Command::new("gh")
            .args(["copilot", "--version"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(GH_PROBE_TIMEOUT, probe).await {
            Ok(Ok(status)) if status.success() => {
                return Ok(vec!["gh".to_string(), "copilot".to_string()]);
            }
            Ok(Ok(status)) => tracing::debug!(?status, "gh copilot extension not installed"),
            Ok(Err(e)) => tracing::debug!("gh copilot probe failed: {}", e),
            Err(_) => tracing::debug!("gh copilot probe timed out"),
        }
    }

    Err(unavailable())
}

pub struct CopilotSession {
    options: SessionOptions,
    program: String,
    base_args: Vec<String>,
}

impl CopilotSession {
    pub async fn new(options: SessionOptions) -> Result<Self> {
        let command = match &options.command {
            Some(command) => command.clone(),
            None => locate_cli().await?,
        };
        let (program, base_args) = split_command(&command)?;

        Ok(Self {
            options,
            program,
            base_args,
        })
    }

    /// The CLI has no system-prompt flag, so it leads the prompt instead.
    fn full_prompt(&self, prompt: &str) -> String {
        let system = self.options.system_prompt.trim();
        if system.is_empty() {
            prompt.to_string()
        } else {
            format!("{}\n\n{}", system, prompt)
        }
    }
}

#[async_trait]
impl Attempt for CopilotSession {
    async fn attempt(&mut self, prompt: &str, stream: bool) -> Result<SessionResponse> {
        let output = Command::new(&self.program)
            .args(&self.base_args)
            .arg("explain")
            .arg(self.full_prompt(prompt))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => unavailable(),
                _ => Error::Session(format!("failed to run {}: {}", self.program, e)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Ok(SessionResponse::failure(format!(
                "Copilot CLI error: {}",
                stderr.trim()
            )));
        }

        let content = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if content.is_empty() {
            return Ok(SessionResponse::failure(
                "Received empty response from Copilot CLI",
            ));
        }

        emit_fragment(&self.options, &content, stream);
        if stream {
            println!();
        }

        let mut metadata = Map::new();
        metadata.insert("provider".to_string(), Value::from("copilot"));
        Ok(SessionResponse {
            content,
            metadata,
            error: None,
        })
    }
}

#[async_trait]
impl AiSession for CopilotSession {
    fn provider(&self) -> Provider {
        Provider::Copilot
    }

    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn query_with(&mut self, prompt: &str, stream: Option<bool>) -> Result<SessionResponse> {
        let stream = stream.unwrap_or(self.options.stream_output);
        let policy = RetryPolicy::from_options(&self.options);
        query_with_retry(self, policy, prompt, stream).await
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn fake_cli(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-copilot.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn options_for(command: Vec<String>) -> SessionOptions {
        SessionOptions {
            provider: Provider::Copilot,
            system_prompt: String::new(),
            command: Some(command),
            retry_attempts: 2,
            retry_delay: Duration::from_millis(1),
            ..SessionOptions::default()
        }
    }

    #[test]
    fn system_prompt_leads_the_prompt() {
        let session = CopilotSession {
            options: SessionOptions {
                system_prompt: "Be brief".to_string(),
                ..SessionOptions::default()
            },
            program: "copilot".to_string(),
            base_args: vec![],
        };
        assert_eq!(session.full_prompt("hi"), "Be brief\n\nhi");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn passes_explain_and_prompt() {
        let tmp = tempfile::TempDir::new().unwrap();
        let script = fake_cli(tmp.path(), r#"echo "  $1|$2  ""#);

        let mut session = CopilotSession::new(options_for(vec![script])).await.unwrap();
        let response = session.query("what is rust").await.unwrap();
        assert!(response.success());
        assert_eq!(response.content, "explain|what is rust");
        assert_eq!(response.metadata["provider"], "copilot");
        assert_eq!(response.metadata["attempt"], 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_retried_then_reported() {
        let tmp = tempfile::TempDir::new().unwrap();
        let script = fake_cli(tmp.path(), "echo 'auth required' >&2\nexit 3");

        let mut session = CopilotSession::new(options_for(vec![script])).await.unwrap();
        let response = session.query("hi").await.unwrap();
        assert!(!response.success());
        let error = response.error.unwrap();
        assert!(error.starts_with("Failed after 2 attempts"));
        assert!(error.contains("Copilot CLI error: auth required"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn empty_output_is_a_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let script = fake_cli(tmp.path(), "exit 0");

        let mut session = CopilotSession::new(options_for(vec![script])).await.unwrap();
        let response = session.query("hi").await.unwrap();
        assert!(response
            .error
            .unwrap()
            .contains("Received empty response from Copilot CLI"));
    }

    #[tokio::test]
    async fn missing_binary_is_fatal() {
        let mut session = CopilotSession::new(options_for(vec![
            "/nonexistent/amplifier-copilot".to_string(),
        ]))
        .await
        .unwrap();
        let err = session.query("hi").await.unwrap_err();
        assert!(err.is_fatal());
    }
}
