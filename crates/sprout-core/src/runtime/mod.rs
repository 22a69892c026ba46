//! Interpreter runtime boundary and shared provisioning.
//!
//! The runtime is treated as a black box with two entry points:
//!
//! - [`RuntimeLoader::initialize`] - the expensive one-time load (may fail)
//! - [`Interpreter::execute`] - run one snippet, writing output chunks to an
//!   [`OutputSink`] zero or more times while it runs
//!
//! # Module Structure
//!
//! - `provisioner` - lazy, single-flight loading of the one shared runtime
//! - `python` - CPython child-process runtime

mod provisioner;
mod python;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::router::OutputSink;

pub use provisioner::{RuntimeLoadState, RuntimeProvisioner};
pub use python::{PythonInterpreter, PythonLoader};

/// Loads the interpreter engine.
#[async_trait]
pub trait RuntimeLoader: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Fetch and initialize the interpreter. May take seconds.
    async fn initialize(&self) -> Result<Arc<dyn Interpreter>>;
}

/// A loaded interpreter that executes snippets.
#[async_trait]
pub trait Interpreter: Send + Sync + 'static {
    /// Execute a snippet, streaming stdout/stderr to `output` as produced.
    ///
    /// Errors raised by the snippet are reported as
    /// [`Error::Runtime`](crate::Error::Runtime).
    async fn execute(&self, source: &str, output: &OutputSink) -> Result<()>;

    /// Human-readable engine description (e.g. "Python 3.12.1").
    fn describe(&self) -> String {
        String::from("interpreter")
    }
}

/// Opaque, shared reference to the loaded runtime.
///
/// Sessions hold clones; none of them owns or can unload the runtime.
#[derive(Clone)]
pub struct RuntimeHandle {
    interpreter: Arc<dyn Interpreter>,
    /// Load sequence that produced this instance.
    id: u64,
}

impl RuntimeHandle {
    pub(crate) fn new(interpreter: Arc<dyn Interpreter>, id: u64) -> Self {
        Self { interpreter, id }
    }

    /// Identity of the runtime instance. Equal ids mean the same instance.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Engine description.
    pub fn describe(&self) -> String {
        self.interpreter.describe()
    }

    /// Execute a snippet on the shared runtime.
    pub async fn execute(&self, source: &str, output: &OutputSink) -> Result<()> {
        self.interpreter.execute(source, output).await
    }
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("id", &self.id)
            .field("engine", &self.interpreter.describe())
            .finish()
    }
}
