//! Runner and session configuration.
//!
//! The runner configuration is a JSON file. Every field is optional and
//! falls back to the defaults below.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::examples::{ExampleTable, builtin_entries};
use crate::safety::{DEFAULT_DENYLIST, SafetyFilter};

/// Snippet placed in a new editor when the widget does not provide one.
pub const DEFAULT_SNIPPET: &str = r#"# Python practice
print("Hello, Python!")

# Try changing the code below
for i in range(3):
    print(f"Number: {i}")"#;

/// File name looked up under the user config directory.
const CONFIG_FILE: &str = "runner.json";

/// Configuration shared by every session of a runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Default snippet for sessions created without one.
    pub default_snippet: String,
    /// Example table, name to snippet.
    pub examples: BTreeMap<String, String>,
    /// Advisory denylist patterns.
    pub denylist: Vec<String>,
    /// Background runtime preload.
    pub preload: PreloadConfig,
    /// Interpreter executable settings.
    pub interpreter: InterpreterConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_snippet: DEFAULT_SNIPPET.to_string(),
            examples: builtin_entries(),
            denylist: DEFAULT_DENYLIST.iter().map(|p| p.to_string()).collect(),
            preload: PreloadConfig::default(),
            interpreter: InterpreterConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&source)?;
        config.validate()?;
        tracing::debug!("Loaded runner config from {}", path.display());
        Ok(config)
    }

    /// Load from an explicit path, else the user config file if present,
    /// else the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// `$CONFIG_DIR/sprout/runner.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sprout").join(CONFIG_FILE))
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.default_snippet.trim().is_empty() {
            return Err(Error::Config("default_snippet must not be empty".to_string()));
        }
        if let Some(name) = self.examples.keys().find(|name| name.trim().is_empty()) {
            return Err(Error::Config(format!("invalid example name {name:?}")));
        }
        if let Some(program) = &self.interpreter.program
            && program.as_os_str().is_empty()
        {
            return Err(Error::Config("interpreter.program must not be empty".to_string()));
        }
        Ok(())
    }

    /// Example table built from this configuration.
    pub fn example_table(&self) -> ExampleTable {
        ExampleTable::new(self.examples.clone())
    }

    /// Safety filter built from this configuration.
    pub fn safety_filter(&self) -> SafetyFilter {
        SafetyFilter::new(&self.denylist)
    }
}

/// Background preload of the runtime after a session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    pub enabled: bool,
    /// Delay before the preload starts, so page setup is not slowed down.
    pub delay_ms: u64,
}

impl PreloadConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: 2000,
        }
    }
}

/// Interpreter executable settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Explicit interpreter path. When unset, `python3` then `python` are
    /// looked up on PATH.
    pub program: Option<PathBuf>,
    /// Extra arguments placed before the script argument.
    pub args: Vec<String>,
}

/// Per-session settings supplied by the widget that creates it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Initial and reset snippet; the runner default when unset.
    pub initial_snippet: Option<String>,
    /// Reject editor edits and formatting.
    pub read_only: bool,
}
