//! CPython runtime driven as a child process.
//!
//! Loading resolves and verifies the interpreter once. Each snippet runs in a
//! fresh `python -u -` process reading the source from stdin, with stdout and
//! stderr streamed line by line to the session's output sink.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::config::InterpreterConfig;
use crate::error::{Error, Result};
use crate::router::OutputSink;

use super::{Interpreter, RuntimeLoader};

/// Executable names tried on PATH, in order.
const CANDIDATES: &[&str] = &["python3", "python"];

/// Loads a local CPython interpreter.
#[derive(Debug, Clone, Default)]
pub struct PythonLoader {
    config: InterpreterConfig,
}

impl PythonLoader {
    pub fn new(config: InterpreterConfig) -> Self {
        Self { config }
    }

    /// Resolve the interpreter executable.
    fn find_program(&self) -> Result<PathBuf> {
        if let Some(program) = &self.config.program {
            return which::which(program).map_err(|e| {
                Error::RuntimeUnavailable(format!(
                    "interpreter '{}' not found: {}",
                    program.display(),
                    e
                ))
            });
        }

        CANDIDATES
            .iter()
            .find_map(|name| which::which(name).ok())
            .ok_or_else(|| {
                Error::RuntimeUnavailable(format!(
                    "no Python interpreter found on PATH (tried {})",
                    CANDIDATES.join(", ")
                ))
            })
    }

    /// Run `--version` and return e.g. "Python 3.12.1".
    async fn query_version(program: &Path) -> Result<String> {
        let output = Command::new(program)
            .arg("--version")
            .output()
            .await
            .map_err(|e| {
                Error::RuntimeUnavailable(format!(
                    "failed to run '{}': {}",
                    program.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(Error::RuntimeUnavailable(format!(
                "'{} --version' exited with {}",
                program.display(),
                output.status
            )));
        }

        // Python 2 printed the version on stderr.
        let text = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        parse_version(&String::from_utf8_lossy(&text)).ok_or_else(|| {
            Error::RuntimeUnavailable(format!(
                "'{}' does not look like a Python interpreter",
                program.display()
            ))
        })
    }
}

#[async_trait]
impl RuntimeLoader for PythonLoader {
    fn name(&self) -> &str {
        "python"
    }

    async fn initialize(&self) -> Result<Arc<dyn Interpreter>> {
        let program = self.find_program()?;
        let version = Self::query_version(&program).await?;
        tracing::debug!("Using {} at {}", version, program.display());

        Ok(Arc::new(PythonInterpreter {
            program,
            args: self.config.args.clone(),
            version,
        }))
    }
}

/// Parse the output of `python --version`.
fn parse_version(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let version = line.strip_prefix("Python ")?;
    version
        .chars()
        .next()
        .filter(char::is_ascii_digit)
        .map(|_| line.to_string())
}

/// A verified CPython executable.
#[derive(Debug, Clone)]
pub struct PythonInterpreter {
    program: PathBuf,
    args: Vec<String>,
    version: String,
}

impl PythonInterpreter {
    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

#[async_trait]
impl Interpreter for PythonInterpreter {
    async fn execute(&self, source: &str, output: &OutputSink) -> Result<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("-u")
            .arg("-")
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Runtime(format!("failed to start interpreter: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Runtime("failed to open interpreter stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Runtime("failed to open interpreter stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Runtime("failed to open interpreter stderr".to_string()))?;

        stdin.write_all(source.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        drop(stdin);

        let mut stdout = BufReader::new(stdout);
        let mut stderr = BufReader::new(stderr);
        // `read_until` keeps partial reads in the buffer when the other
        // branch wins the select, so no bytes are lost between polls.
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        let mut out_open = true;
        let mut err_open = true;
        let mut last_error_line = String::new();

        while out_open || err_open {
            tokio::select! {
                read = stdout.read_until(b'\n', &mut out_buf), if out_open => {
                    if read? == 0 {
                        out_open = false;
                    } else {
                        output.write(&String::from_utf8_lossy(&out_buf));
                        out_buf.clear();
                    }
                }
                read = stderr.read_until(b'\n', &mut err_buf), if err_open => {
                    if read? == 0 {
                        err_open = false;
                    } else {
                        let line = String::from_utf8_lossy(&err_buf);
                        if !line.trim().is_empty() {
                            last_error_line = line.trim().to_string();
                        }
                        output.write(&line);
                        err_buf.clear();
                    }
                }
            }
        }

        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else if last_error_line.is_empty() {
            Err(Error::Runtime(format!("interpreter exited with {status}")))
        } else {
            Err(Error::Runtime(last_error_line))
        }
    }

    fn describe(&self) -> String {
        self.version.clone()
    }
}
