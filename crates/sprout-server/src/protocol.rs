//! WebSocket protocol messages for the Sprout server.
//!
//! Defines the message types exchanged between lesson pages and the server.

use serde::{Deserialize, Serialize};
use sprout_core::{
    FailureReason, RunReport, SafetyVerdict, SessionEvent, SessionId, SessionSnapshot,
    SessionStatus,
};

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Create (or re-attach to) a code runner widget.
    CreateSession {
        /// Widget identifier. Generated by the server when absent.
        #[serde(default)]
        session_id: Option<SessionId>,
        /// Initial and reset snippet; the runner default when absent.
        #[serde(default)]
        initial_snippet: Option<String>,
        /// Reject edits and formatting.
        #[serde(default)]
        read_only: bool,
    },

    /// The editor text changed.
    Edit {
        session_id: SessionId,
        /// Full editor contents.
        snippet: String,
    },

    /// Run the current snippet.
    Run { session_id: SessionId },

    /// Restore the default snippet.
    Reset {
        session_id: SessionId,
        /// The user confirmed discarding their edits.
        #[serde(default)]
        confirmed: bool,
    },

    /// Empty the output panel.
    ClearOutput { session_id: SessionId },

    /// Replace the snippet with a named example.
    LoadExample { session_id: SessionId, name: String },

    /// Normalize indentation.
    Format { session_id: SessionId },

    /// Remove the widget.
    DestroySession { session_id: SessionId },

    /// Request the current state of a session.
    GetSession { session_id: SessionId },

    /// Request the example table.
    ListExamples,

    /// Check a snippet against the denylist without running it.
    CheckSnippet { snippet: String },
}

impl ClientMessage {
    /// Session the message addresses, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::CreateSession { session_id, .. } => session_id.as_ref(),
            Self::Edit { session_id, .. }
            | Self::Run { session_id }
            | Self::Reset { session_id, .. }
            | Self::ClearOutput { session_id }
            | Self::LoadExample { session_id, .. }
            | Self::Format { session_id }
            | Self::DestroySession { session_id }
            | Self::GetSession { session_id } => Some(session_id),
            Self::ListExamples | Self::CheckSnippet { .. } => None,
        }
    }
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full session state (sent on create and on request).
    SessionState { session: SessionSnapshot },

    /// Output chunk produced by a run.
    Output { session_id: SessionId, chunk: String },

    /// Session status changed.
    Status {
        session_id: SessionId,
        status: SessionStatus,
        /// Status-line text.
        message: String,
        /// Why the run failed, when `status` is `failed`.
        failure: Option<FailureReason>,
    },

    /// Output panel was emptied.
    OutputCleared { session_id: SessionId },

    /// Snippet was replaced by the server (reset, example, format).
    SnippetChanged { session_id: SessionId, snippet: String },

    /// A run finished.
    RunCompleted {
        session_id: SessionId,
        status: SessionStatus,
        failure: Option<FailureReason>,
        /// Execution time in milliseconds, for successful runs.
        duration_ms: Option<u64>,
    },

    /// Session was destroyed.
    SessionDestroyed { session_id: SessionId },

    /// Example table.
    Examples { examples: Vec<ExampleInfo> },

    /// Result of a `check_snippet` request.
    SafetyVerdict {
        allowed: bool,
        matched_pattern: Option<String>,
    },

    /// Generic error message.
    Error {
        /// Session the failed request addressed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        /// Error description.
        message: String,
    },
}

impl ServerMessage {
    pub fn run_completed(session_id: SessionId, report: &RunReport) -> Self {
        Self::RunCompleted {
            session_id,
            status: report.status,
            failure: report.failure.clone(),
            duration_ms: report.elapsed.map(|d| d.as_millis() as u64),
        }
    }

    pub fn error(session_id: Option<SessionId>, message: impl Into<String>) -> Self {
        Self::Error {
            session_id,
            message: message.into(),
        }
    }
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Output { session_id, chunk } => Self::Output { session_id, chunk },
            SessionEvent::Status {
                session_id,
                status,
                message,
                failure,
            } => Self::Status {
                session_id,
                status,
                message,
                failure,
            },
            SessionEvent::OutputCleared { session_id } => Self::OutputCleared { session_id },
            SessionEvent::SnippetChanged {
                session_id,
                snippet,
            } => Self::SnippetChanged {
                session_id,
                snippet,
            },
        }
    }
}

impl From<SafetyVerdict> for ServerMessage {
    fn from(verdict: SafetyVerdict) -> Self {
        Self::SafetyVerdict {
            allowed: verdict.allowed,
            matched_pattern: verdict.matched_pattern,
        }
    }
}

/// One entry of the example table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleInfo {
    /// Example name, as used by `load_example`.
    pub name: String,
    /// Snippet text.
    pub code: String,
}
