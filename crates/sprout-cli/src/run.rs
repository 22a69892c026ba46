//! Run command implementation for Sprout CLI.
//!
//! Runs one snippet file through an execution session, streaming its output
//! to stdout. Status lines go to stderr.

use std::io::{self, Write};
use std::path::Path;

use sprout_core::{
    PythonLoader, RunnerConfig, SessionConfig, SessionEvent, SessionId, SessionRegistry,
};
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::colors;

/// Run a snippet file.
pub async fn execute(file: &Path, mut config: RunnerConfig) -> anyhow::Result<()> {
    if !file.is_file() {
        anyhow::bail!("Snippet file not found: {}", file.display());
    }
    let source = std::fs::read_to_string(file)?;

    // A one-shot run loads the runtime on demand.
    config.preload.enabled = false;
    let loader = PythonLoader::new(config.interpreter.clone());
    let registry = SessionRegistry::with_loader(config, loader);

    let id = SessionId::new(format!("cli-{}", uuid::Uuid::new_v4()));
    let session = registry.create(
        id.clone(),
        SessionConfig {
            initial_snippet: Some(source),
            read_only: true,
        },
    );
    let mut events = registry.subscribe();

    eprintln!(
        "{}Running{} {}",
        colors::BOLD,
        colors::RESET,
        file.display()
    );

    let mut console = Console::new(std::io::stdout());
    let run = session.run();
    tokio::pin!(run);
    let result = loop {
        tokio::select! {
            biased;
            received = events.recv() => match received {
                Ok(event) => console.event(event)?,
                Err(RecvError::Lagged(skipped)) => console.lagged(skipped),
                Err(RecvError::Closed) => break (&mut run).await,
            },
            result = &mut run => break result,
        }
    };
    console.drain(&mut events)?;
    registry.destroy(&id);

    let report = result?;
    console.finish(&report.output)?;
    match report.failure {
        None => {
            let elapsed = report.elapsed.unwrap_or_default();
            eprintln!(
                "{}Completed{} in {:.2}s",
                colors::GREEN,
                colors::RESET,
                elapsed.as_secs_f64()
            );
            Ok(())
        }
        Some(reason) => {
            eprintln!("{}{}{}", colors::RED, reason.diagnostic(), colors::RESET);
            Err(sprout_core::Error::from(reason).into())
        }
    }
}

/// Echoes one session's events to the terminal: output to `out`, busy
/// status lines to stderr.
///
/// Chunks arrive over a bounded broadcast channel. Once the receiver lags,
/// streaming stops and [`finish`](Self::finish) prints the rest from the
/// session's output buffer, so nothing is lost or printed twice.
struct Console<W: Write> {
    out: W,
    /// Bytes of the current run's output already written.
    printed: usize,
    lagged: bool,
}

impl<W: Write> Console<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            printed: 0,
            lagged: false,
        }
    }

    fn event(&mut self, event: SessionEvent) -> io::Result<()> {
        match event {
            SessionEvent::Output { chunk, .. } if !self.lagged => {
                self.out.write_all(chunk.as_bytes())?;
                self.out.flush()?;
                self.printed += chunk.len();
            }
            SessionEvent::OutputCleared { .. } => {
                self.printed = 0;
                self.lagged = false;
            }
            SessionEvent::Status { message, status, .. } if status.is_busy() => {
                eprintln!("{}{}{}", colors::DIM, message, colors::RESET);
            }
            _ => {}
        }
        Ok(())
    }

    fn lagged(&mut self, skipped: u64) {
        tracing::debug!("Output stream lagged by {} events; printing from the buffer", skipped);
        self.lagged = true;
    }

    /// Handle events published before the run returned.
    fn drain(&mut self, events: &mut Receiver<SessionEvent>) -> io::Result<()> {
        loop {
            match events.try_recv() {
                Ok(event) => self.event(event)?,
                Err(TryRecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(()),
            }
        }
    }

    /// Write whatever part of the run's `output` was not streamed.
    fn finish(&mut self, output: &str) -> io::Result<()> {
        if let Some(rest) = output.get(self.printed..) {
            self.out.write_all(rest.as_bytes())?;
            self.printed = output.len();
        }
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(chunk: &str) -> SessionEvent {
        SessionEvent::Output {
            session_id: SessionId::from("cli"),
            chunk: chunk.to_string(),
        }
    }

    fn written(console: Console<Vec<u8>>) -> String {
        String::from_utf8(console.out).unwrap()
    }

    #[test]
    fn test_streamed_output_is_not_repeated() {
        let mut console = Console::new(Vec::new());
        console.event(output("a\n")).unwrap();
        console.event(output("b\n")).unwrap();
        console.finish("a\nb\n").unwrap();

        assert_eq!(written(console), "a\nb\n");
    }

    #[test]
    fn test_lag_falls_back_to_buffer() {
        let mut console = Console::new(Vec::new());
        console.event(output("0\n")).unwrap();
        console.lagged(3);
        // Chunks after the gap are skipped; the buffer has them in order.
        console.event(output("4\n")).unwrap();
        console.finish("0\n1\n2\n3\n4\n").unwrap();

        assert_eq!(written(console), "0\n1\n2\n3\n4\n");
    }

    #[test]
    fn test_drain_handles_lag() {
        let (tx, mut rx) = tokio::sync::broadcast::channel(2);
        for i in 0..5 {
            tx.send(output(&format!("{i}\n"))).unwrap();
        }

        let mut console = Console::new(Vec::new());
        console.drain(&mut rx).unwrap();
        console.finish("0\n1\n2\n3\n4\n").unwrap();

        assert_eq!(written(console), "0\n1\n2\n3\n4\n");
    }
}
