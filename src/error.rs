//! Error types for the knowledge pipeline and session layer.
//!
//! Per-document failures (timeouts, malformed responses) are normally
//! absorbed by the synthesizer and never reach the caller as an `Err`.
//! [`Error::ProviderUnavailable`] and [`Error::Storage`] are the fatal ones:
//! they halt a sync run.

use std::path::PathBuf;

use thiserror::Error;

/// Amplifier error type.
#[derive(Error, Debug)]
pub enum Error {
    /// The provider CLI/SDK is not installed or not authenticated.
    #[error("{provider} is not available.\n{remediation}")]
    ProviderUnavailable {
        provider: String,
        remediation: String,
    },

    /// A query exceeded its time bound.
    #[error("timeout")]
    Timeout,

    /// The provider answered, but not with the expected JSON schema.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// An append to a JSON Lines file failed.
    #[error("storage error on {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Session lifecycle or protocol error.
    #[error("session error: {0}")]
    Session(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error must abort the current sync run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ProviderUnavailable { .. } | Error::Storage { .. }
        )
    }
}

/// Result type alias for amplifier operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        let unavailable = Error::ProviderUnavailable {
            provider: "claude".into(),
            remediation: "install it".into(),
        };
        assert!(unavailable.is_fatal());

        let storage = Error::Storage {
            path: PathBuf::from("x.jsonl"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(storage.is_fatal());

        assert!(!Error::Timeout.is_fatal());
        assert!(!Error::MalformedResponse("x".into()).is_fatal());
    }

    #[test]
    fn unavailable_message_carries_remediation() {
        let e = Error::ProviderUnavailable {
            provider: "Claude CLI".into(),
            remediation: "npm install -g @anthropic-ai/claude-code".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Claude CLI is not available"));
        assert!(msg.contains("npm install"));
    }
}
