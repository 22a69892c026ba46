//! Core execution manager for Sprout interactive code lessons.
//!
//! This crate provides:
//! - Lazy, single-flight provisioning of the shared interpreter runtime
//! - An advisory denylist filter for user snippets
//! - Per-session output routing for streamed interpreter output
//! - Execution sessions (one per editor widget) and their registry
//!
//! # Architecture
//!
//! ```text
//! SessionRegistry
//!     │
//!     └── ExecutionSession (one per widget)
//!             │
//!             ├── RuntimeProvisioner::acquire()  (shared, loads once)
//!             ├── SafetyFilter::check()          (advisory denylist)
//!             └── RuntimeHandle::execute()
//!                     │
//!                     └── OutputSink → OutputRouter::dispatch(session_id)
//!                             │
//!                             └── session output buffer + SessionEvent
//! ```

pub mod config;
pub mod error;
pub mod examples;
pub mod registry;
pub mod router;
pub mod runtime;
pub mod safety;
pub mod session;

pub use config::{InterpreterConfig, PreloadConfig, RunnerConfig, SessionConfig};
pub use error::{Error, FailureReason, Result};
pub use examples::ExampleTable;
pub use registry::SessionRegistry;
pub use router::{AppendFn, OutputRouter, OutputSink, RouteToken};
pub use runtime::{
    Interpreter, PythonInterpreter, PythonLoader, RuntimeHandle, RuntimeLoadState, RuntimeLoader,
    RuntimeProvisioner,
};
pub use safety::{SafetyFilter, SafetyVerdict};
pub use session::{
    ExecutionSession, RunReport, SessionEvent, SessionId, SessionServices, SessionSnapshot,
    SessionStatus,
};
