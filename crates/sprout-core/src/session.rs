//! Execution sessions.
//!
//! One `ExecutionSession` backs one editor widget. It owns the widget's
//! snippet, output buffer and status, and runs snippets against the shared
//! runtime:
//!
//! ```text
//! Idle ──run()──► Loading ──► Running ──► Succeeded
//!   ▲   (runtime not ready)         └───► Failed
//!   └────────────── reset() ◄──────────────┘
//! ```
//!
//! Runs are single-flight per session. Different sessions may run at the
//! same time; they share only the runtime.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::RunnerConfig;
use crate::error::{Error, FailureReason, Result};
use crate::examples::ExampleTable;
use crate::router::{AppendFn, OutputRouter, RouteToken};
use crate::runtime::RuntimeProvisioner;
use crate::safety::SafetyFilter;

/// Capacity of the session event channel.
/// Slow subscribers lose the oldest events; session state is unaffected.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Stable identifier of a session, unique per widget.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Execution status of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Nothing has run since creation or the last reset.
    #[default]
    Idle,
    /// Waiting for the shared runtime to load.
    Loading,
    /// Snippet submitted to the runtime.
    Running,
    /// Last run completed.
    Succeeded,
    /// Last run failed; see the failure reason.
    Failed,
}

impl SessionStatus {
    /// Whether a run is in progress.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Loading | Self::Running)
    }
}

/// Notifications published by sessions, tagged with the session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A chunk of stdout/stderr output.
    Output { session_id: SessionId, chunk: String },
    /// Status change with the status-line message.
    Status {
        session_id: SessionId,
        status: SessionStatus,
        message: String,
        failure: Option<FailureReason>,
    },
    /// The output buffer was emptied.
    OutputCleared { session_id: SessionId },
    /// The snippet was replaced (reset, example, format).
    SnippetChanged { session_id: SessionId, snippet: String },
}

impl SessionEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Output { session_id, .. }
            | Self::Status { session_id, .. }
            | Self::OutputCleared { session_id }
            | Self::SnippetChanged { session_id, .. } => session_id,
        }
    }
}

/// Collaborators shared by every session of a runner.
#[derive(Clone)]
pub struct SessionServices {
    pub provisioner: RuntimeProvisioner,
    pub filter: Arc<SafetyFilter>,
    pub router: OutputRouter,
    pub examples: Arc<ExampleTable>,
    pub events: broadcast::Sender<SessionEvent>,
}

impl SessionServices {
    pub fn new(provisioner: RuntimeProvisioner, filter: SafetyFilter, examples: ExampleTable) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            provisioner,
            filter: Arc::new(filter),
            router: OutputRouter::new(),
            examples: Arc::new(examples),
            events,
        }
    }

    /// Services with the filter and examples taken from `config`.
    pub fn from_config(provisioner: RuntimeProvisioner, config: &RunnerConfig) -> Self {
        Self::new(provisioner, config.safety_filter(), config.example_table())
    }
}

/// Result of a `run()` that got past admission.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// `Succeeded` or `Failed`.
    pub status: SessionStatus,
    pub failure: Option<FailureReason>,
    /// Wall-clock execution time of a successful run.
    pub elapsed: Option<Duration>,
    /// Everything the run printed, in emission order.
    pub output: String,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == SessionStatus::Succeeded
    }
}

/// Serializable view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub snippet: String,
    pub default_snippet: String,
    pub output: String,
    pub status: SessionStatus,
    pub status_message: String,
    pub failure: Option<FailureReason>,
    pub elapsed_ms: Option<u64>,
    pub read_only: bool,
}

struct SessionState {
    snippet: String,
    /// Append-only within a run; cleared at the start of each run.
    output: Vec<String>,
    status: SessionStatus,
    status_message: String,
    failure: Option<FailureReason>,
    last_elapsed: Option<Duration>,
    /// Single-flight guard for `run()`.
    in_flight: bool,
    /// Set by the registry on destroy.
    closed: bool,
}

/// One editor widget's execution state.
pub struct ExecutionSession {
    id: SessionId,
    /// Immutable reference value for `reset()`.
    default_snippet: String,
    read_only: bool,
    state: Arc<Mutex<SessionState>>,
    services: SessionServices,
}

impl ExecutionSession {
    /// Create a session whose editor starts with `default_snippet`.
    pub fn new(
        id: SessionId,
        default_snippet: String,
        read_only: bool,
        services: SessionServices,
    ) -> Self {
        let state = SessionState {
            snippet: default_snippet.clone(),
            output: Vec::new(),
            status: SessionStatus::Idle,
            status_message: "Ready".to_string(),
            failure: None,
            last_elapsed: None,
            in_flight: false,
            closed: false,
        };
        Self {
            id,
            default_snippet,
            read_only,
            state: Arc::new(Mutex::new(state)),
            services,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn default_snippet(&self) -> &str {
        &self.default_snippet
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn snippet(&self) -> String {
        self.lock().snippet.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    pub fn status_message(&self) -> String {
        self.lock().status_message.clone()
    }

    pub fn failure(&self) -> Option<FailureReason> {
        self.lock().failure.clone()
    }

    /// Elapsed time of the last successful run.
    pub fn last_elapsed(&self) -> Option<Duration> {
        self.lock().last_elapsed
    }

    /// The output buffer as one string.
    pub fn output(&self) -> String {
        self.lock().output.concat()
    }

    /// The output buffer chunk by chunk, in delivery order.
    pub fn output_chunks(&self) -> Vec<String> {
        self.lock().output.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            id: self.id.clone(),
            snippet: state.snippet.clone(),
            default_snippet: self.default_snippet.clone(),
            output: state.output.concat(),
            status: state.status,
            status_message: state.status_message.clone(),
            failure: state.failure.clone(),
            elapsed_ms: state.last_elapsed.map(|d| d.as_millis() as u64),
            read_only: self.read_only,
        }
    }

    /// Run the current snippet.
    ///
    /// Returns `Err` only when the run is not admitted (already running,
    /// empty snippet, closed session). Runtime load failures, rejected
    /// snippets and interpreter errors end the run with `Failed` status and
    /// are reported in the [`RunReport`].
    pub async fn run(&self) -> Result<RunReport> {
        let snippet = self.begin_run()?;
        let _in_flight = InFlightGuard { session: self };

        let handle = match self.services.provisioner.acquire().await {
            Ok(handle) => handle,
            Err(e) => {
                return Ok(self.finish_failed(FailureReason::RuntimeUnavailable {
                    message: error_message(e),
                }));
            }
        };

        // Advisory only; see `SafetyFilter`.
        let verdict = self.services.filter.check(&snippet);
        if !verdict.allowed {
            return Ok(self.finish_failed(FailureReason::SnippetRejected {
                pattern: verdict.matched_pattern.unwrap_or_default(),
            }));
        }

        let token = self.start_running()?;

        let sink = self.services.router.sink(self.id.clone(), token);
        let started = Instant::now();
        let result = handle.execute(&snippet, &sink).await;
        let elapsed = started.elapsed();

        Ok(match result {
            Ok(()) => self.finish_succeeded(elapsed),
            Err(e) => self.finish_failed(FailureReason::RuntimeError {
                message: error_message(e),
            }),
        })
    }

    /// Admission: single-flight check, empty check, output reset.
    fn begin_run(&self) -> Result<String> {
        let runtime_ready = self.services.provisioner.is_ready();
        let mut state = self.lock();

        if state.closed {
            return Err(Error::SessionClosed(self.id.clone()));
        }
        if state.in_flight {
            return Err(Error::ExecutionInProgress(self.id.clone()));
        }

        let snippet = state.snippet.trim().to_string();
        if snippet.is_empty() {
            state.status_message = "Enter some code to run".to_string();
            return Err(Error::EmptySnippet);
        }

        state.in_flight = true;
        state.failure = None;
        state.output.clear();
        self.emit(
            &state,
            SessionEvent::OutputCleared {
                session_id: self.id.clone(),
            },
        );

        if !runtime_ready {
            self.set_status(
                &mut state,
                SessionStatus::Loading,
                "Loading Python environment...".to_string(),
                None,
            );
        }

        tracing::debug!(session = %self.id, "Run admitted");
        Ok(snippet)
    }

    /// Route output to this session and enter `Running`.
    fn start_running(&self) -> Result<RouteToken> {
        let mut state = self.lock();
        // Checked under the state lock so a concurrent destroy either sees
        // the route and removes it, or we see `closed` and stop here.
        if state.closed {
            return Err(Error::SessionClosed(self.id.clone()));
        }
        let token = self.services.router.register(self.id.clone(), self.append_fn());
        self.set_status(&mut state, SessionStatus::Running, "Running...".to_string(), None);
        Ok(token)
    }

    /// Callback that appends to this session's buffer and publishes the chunk.
    /// Does nothing once the session is closed.
    fn append_fn(&self) -> AppendFn {
        let state = Arc::downgrade(&self.state);
        let events = self.services.events.clone();
        let session_id = self.id.clone();

        Arc::new(move |chunk: &str| {
            let Some(state) = state.upgrade() else {
                return;
            };
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.closed {
                return;
            }
            state.output.push(chunk.to_string());
            // Sent under the lock so events keep buffer order.
            let _ = events.send(SessionEvent::Output {
                session_id: session_id.clone(),
                chunk: chunk.to_string(),
            });
        })
    }

    fn finish_succeeded(&self, elapsed: Duration) -> RunReport {
        let mut state = self.lock();
        state.in_flight = false;
        state.last_elapsed = Some(elapsed);
        self.set_status(
            &mut state,
            SessionStatus::Succeeded,
            format!("Finished in {:.2}s", elapsed.as_secs_f64()),
            None,
        );
        tracing::debug!(session = %self.id, "Run succeeded in {:?}", elapsed);

        RunReport {
            status: SessionStatus::Succeeded,
            failure: None,
            elapsed: Some(elapsed),
            output: state.output.concat(),
        }
    }

    fn finish_failed(&self, reason: FailureReason) -> RunReport {
        let mut state = self.lock();
        state.in_flight = false;
        self.set_status(
            &mut state,
            SessionStatus::Failed,
            reason.diagnostic(),
            Some(reason.clone()),
        );
        tracing::debug!(session = %self.id, "Run failed: {:?}", reason);

        RunReport {
            status: SessionStatus::Failed,
            failure: Some(reason),
            elapsed: None,
            output: state.output.concat(),
        }
    }

    /// Restore the default snippet. Destructive: callers must pass the
    /// user's explicit confirmation.
    pub fn reset(&self, confirmed: bool) -> Result<()> {
        if !confirmed {
            return Err(Error::ResetNotConfirmed);
        }

        let mut state = self.lock();
        if state.in_flight {
            return Err(Error::ExecutionInProgress(self.id.clone()));
        }

        state.snippet = self.default_snippet.clone();
        self.emit(
            &state,
            SessionEvent::SnippetChanged {
                session_id: self.id.clone(),
                snippet: state.snippet.clone(),
            },
        );
        self.set_status(&mut state, SessionStatus::Idle, "Code reset".to_string(), None);
        Ok(())
    }

    /// Empty the output buffer. Status and snippet are untouched.
    pub fn clear_output(&self) {
        let mut state = self.lock();
        state.output.clear();
        self.emit(
            &state,
            SessionEvent::OutputCleared {
                session_id: self.id.clone(),
            },
        );
    }

    /// Replace the snippet with a named example. Unknown names are ignored.
    /// Returns whether the example was found.
    pub fn load_example(&self, name: &str) -> bool {
        let Some(code) = self.services.examples.get(name) else {
            tracing::debug!(session = %self.id, "Unknown example '{}'", name);
            return false;
        };

        let mut state = self.lock();
        state.snippet = code.to_string();
        state.status_message = format!("Loaded example: {name}");
        self.emit(
            &state,
            SessionEvent::SnippetChanged {
                session_id: self.id.clone(),
                snippet: state.snippet.clone(),
            },
        );
        true
    }

    /// Replace the snippet with the editor's current text.
    pub fn set_snippet(&self, snippet: impl Into<String>) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly(self.id.clone()));
        }
        self.lock().snippet = snippet.into();
        Ok(())
    }

    /// Normalize indentation: tabs become four spaces.
    /// Returns whether the snippet changed.
    pub fn format(&self) -> Result<bool> {
        if self.read_only {
            return Err(Error::ReadOnly(self.id.clone()));
        }

        let mut state = self.lock();
        if !state.snippet.contains('\t') {
            state.status_message = "Code formatted".to_string();
            return Ok(false);
        }

        state.snippet = state.snippet.replace('\t', "    ");
        state.status_message = "Code formatted".to_string();
        self.emit(
            &state,
            SessionEvent::SnippetChanged {
                session_id: self.id.clone(),
                snippet: state.snippet.clone(),
            },
        );
        Ok(true)
    }

    /// Mark the session destroyed. Called by the registry.
    /// A closed session publishes no further events.
    pub(crate) fn close(&self) {
        self.lock().closed = true;
    }

    fn set_status(
        &self,
        state: &mut SessionState,
        status: SessionStatus,
        message: String,
        failure: Option<FailureReason>,
    ) {
        state.status = status;
        state.status_message = message.clone();
        state.failure = failure.clone();
        self.emit(
            state,
            SessionEvent::Status {
                session_id: self.id.clone(),
                status,
                message,
                failure,
            },
        );
    }

    /// Publish an event while holding the state lock.
    fn emit(&self, state: &SessionState, event: SessionEvent) {
        if state.closed {
            return;
        }
        // No subscribers is fine.
        let _ = self.services.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ExecutionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionSession")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

/// Clears the single-flight flag if a run is dropped before finishing.
struct InFlightGuard<'a> {
    session: &'a ExecutionSession,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.session.lock();
        if state.in_flight {
            state.in_flight = false;
            self.session.set_status(
                &mut state,
                SessionStatus::Idle,
                "Run cancelled".to_string(),
                None,
            );
        }
    }
}

/// Message carried by a runtime error, without the error-kind prefix.
fn error_message(error: Error) -> String {
    match error {
        Error::RuntimeUnavailable(message) | Error::Runtime(message) => message,
        other => other.to_string(),
    }
}
