//! `amp query`: one prompt, one answer, through the configured provider.

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::error::Error;
use crate::session::{create_session, AiSession, Provider};

pub async fn run_query(
    config: &Config,
    prompt: &str,
    provider: Option<Provider>,
    stream: bool,
) -> Result<()> {
    if prompt.trim().is_empty() {
        bail!("Prompt must not be empty");
    }

    let mut options = config.session.to_options();
    if let Some(provider) = provider {
        options.provider = provider;
    }
    let provider = options.provider;

    let mut session = create_session(options)
        .await
        .with_context(|| format!("Cannot start {} session", provider))?;
    session.open().await?;
    let result = session.query_with(prompt, Some(stream)).await;
    if let Err(e) = session.close().await {
        tracing::warn!("failed to close {} session: {}", provider, e);
    }
    let response = result?;

    if response.is_timeout() {
        return Err(Error::Timeout).with_context(|| {
            format!(
                "Query failed: no answer from {} within {}s",
                provider, config.session.timeout_secs
            )
        });
    }
    if !response.success() {
        bail!(
            "Query failed: {}",
            response.error.as_deref().unwrap_or("empty response")
        );
    }

    // Streamed text has already been printed as it arrived.
    if !stream {
        println!("{}", response.content);
    }
    tracing::debug!(metadata = %serde_json::Value::Object(response.metadata), "query finished");
    Ok(())
}
