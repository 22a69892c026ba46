//! Error types for sprout-core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionId;

/// Result type for sprout-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sprout-core.
#[derive(Debug, Error)]
pub enum Error {
    /// The interpreter runtime could not be loaded.
    #[error("runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// The snippet matched a denylist pattern.
    #[error("snippet rejected: contains `{pattern}`")]
    SnippetRejected { pattern: String },

    /// The interpreter raised while executing a snippet.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A run is already in flight for this session.
    #[error("execution already in progress for session {0}")]
    ExecutionInProgress(SessionId),

    /// The snippet is empty after trimming.
    #[error("snippet is empty")]
    EmptySnippet,

    /// Reset overwrites unsaved edits and must be confirmed.
    #[error("reset requires confirmation")]
    ResetNotConfirmed,

    /// The session does not accept edits.
    #[error("session {0} is read-only")]
    ReadOnly(SessionId),

    /// The session was destroyed.
    #[error("session {0} has been closed")]
    SessionClosed(SessionId),

    /// No session is registered under this id.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Suggested fix for the user, if any.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::RuntimeUnavailable(_) => {
                Some("install Python 3 or set `interpreter.program` in the runner config")
            }
            Self::Config(_) | Self::Json(_) => Some("check the runner config file"),
            Self::EmptySnippet => Some("write some code before running"),
            _ => None,
        }
    }

    /// Error message followed by its hint.
    pub fn with_hint(&self) -> String {
        match self.hint() {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }
}

/// Why a run ended in the `Failed` status.
///
/// All three are recovered at the session boundary: the session records the
/// reason, publishes a diagnostic, and accepts another `run()` afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The shared runtime failed to load.
    RuntimeUnavailable { message: String },
    /// The snippet matched a denylist pattern and was not submitted.
    SnippetRejected { pattern: String },
    /// The interpreter raised during execution.
    RuntimeError { message: String },
}

impl FailureReason {
    /// User-facing diagnostic for the status line.
    pub fn diagnostic(&self) -> String {
        match self {
            Self::RuntimeUnavailable { message } => {
                format!("Python environment failed to load ({message}); refresh and try again")
            }
            Self::SnippetRejected { pattern } => {
                format!("Blocked: the code uses a disallowed operation (`{pattern}`)")
            }
            Self::RuntimeError { message } => format!("Error: {message}"),
        }
    }
}

impl From<FailureReason> for Error {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::RuntimeUnavailable { message } => Self::RuntimeUnavailable(message),
            FailureReason::SnippetRejected { pattern } => Self::SnippetRejected { pattern },
            FailureReason::RuntimeError { message } => Self::Runtime(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_serialization() {
        let reason = FailureReason::SnippetRejected {
            pattern: "import os".to_string(),
        };
        let json = serde_json::to_string(&reason).unwrap();
        assert!(json.contains("\"kind\":\"snippet_rejected\""));
        assert!(json.contains("import os"));
    }

    #[test]
    fn test_failure_reason_into_error() {
        let err: Error = FailureReason::RuntimeError {
            message: "NameError: name 'x' is not defined".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Runtime(ref m) if m.starts_with("NameError")));
    }

    #[test]
    fn test_with_hint() {
        let err = Error::RuntimeUnavailable("no Python interpreter found on PATH".to_string());
        assert!(err.with_hint().contains("hint: install Python 3"));
        assert_eq!(
            Error::ResetNotConfirmed.with_hint(),
            "reset requires confirmation"
        );
    }

    #[test]
    fn test_diagnostic_mentions_pattern() {
        let reason = FailureReason::SnippetRejected {
            pattern: "eval(".to_string(),
        };
        assert!(reason.diagnostic().contains("eval("));
    }
}
