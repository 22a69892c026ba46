//! Scripted interpreter runtime for integration tests.
//!
//! Snippets are interpreted line by line:
//!
//! - `print('text')` / `print("text")` writes `text\n`
//! - `raise Message` fails the run with `Message`
//! - `sleep N` sleeps N milliseconds
//! - `wait` blocks until the test calls [`Script::release`]
//!
//! Other lines are ignored.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use sprout_core::{
    Error, ExecutionSession, Interpreter, OutputSink, Result, RunnerConfig, RuntimeLoader,
    SessionConfig, SessionId, SessionRegistry,
};

/// Shared knobs of a scripted runtime.
pub struct Script {
    /// Number of loads that should fail before one succeeds.
    pub failing_loads: AtomicU32,
    /// Loads started.
    pub loads: AtomicU32,
    /// Snippets submitted to the interpreter.
    pub executions: AtomicU32,
    /// Delay of each load.
    pub load_delay: Duration,
    gate: Semaphore,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            failing_loads: AtomicU32::new(0),
            loads: AtomicU32::new(0),
            executions: AtomicU32::new(0),
            load_delay: Duration::ZERO,
            gate: Semaphore::new(0),
        }
    }
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_load_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            load_delay: delay,
            ..Self::default()
        })
    }

    /// Fail the first `loads` loads, each after `delay`.
    pub fn failing(loads: u32, delay: Duration) -> Arc<Self> {
        let script = Self {
            load_delay: delay,
            ..Self::default()
        };
        script.failing_loads.store(loads, Ordering::SeqCst);
        Arc::new(script)
    }

    /// Let one pending `wait` line continue.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn loads(&self) -> u32 {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> u32 {
        self.executions.load(Ordering::SeqCst)
    }
}

pub struct ScriptedLoader(pub Arc<Script>);

#[async_trait]
impl RuntimeLoader for ScriptedLoader {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn initialize(&self) -> Result<Arc<dyn Interpreter>> {
        let script = &self.0;
        script.loads.fetch_add(1, Ordering::SeqCst);
        if !script.load_delay.is_zero() {
            tokio::time::sleep(script.load_delay).await;
        }

        let should_fail = script
            .failing_loads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(Error::RuntimeUnavailable("network error".to_string()));
        }

        Ok(Arc::new(ScriptedInterpreter(Arc::clone(script))))
    }
}

pub struct ScriptedInterpreter(Arc<Script>);

#[async_trait]
impl Interpreter for ScriptedInterpreter {
    async fn execute(&self, source: &str, output: &OutputSink) -> Result<()> {
        self.0.executions.fetch_add(1, Ordering::SeqCst);

        for line in source.lines().map(str::trim) {
            if let Some(text) = print_argument(line) {
                output.write(&format!("{text}\n"));
            } else if let Some(message) = line.strip_prefix("raise ") {
                return Err(Error::Runtime(message.to_string()));
            } else if let Some(ms) = line.strip_prefix("sleep ") {
                let ms = ms.parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            } else if line == "wait" {
                if let Ok(permit) = self.0.gate.acquire().await {
                    permit.forget();
                }
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "Scripted 1.0".to_string()
    }
}

fn print_argument(line: &str) -> Option<&str> {
    let inner = line.strip_prefix("print(")?.strip_suffix(')')?;
    inner
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
}

/// Registry over a scripted runtime, with preload disabled.
pub fn registry(script: &Arc<Script>) -> SessionRegistry {
    let mut config = RunnerConfig::default();
    config.preload.enabled = false;
    SessionRegistry::with_loader(config, ScriptedLoader(Arc::clone(script)))
}

/// Create a session holding `snippet`.
pub fn session(registry: &SessionRegistry, id: &str, snippet: &str) -> Arc<ExecutionSession> {
    registry.create(
        SessionId::from(id),
        SessionConfig {
            initial_snippet: Some(snippet.to_string()),
            read_only: false,
        },
    )
}

/// Poll until `condition` holds, failing the test after a few seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
