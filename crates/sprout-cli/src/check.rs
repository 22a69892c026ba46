//! Check command implementation for Sprout CLI.

use std::path::Path;

use sprout_core::RunnerConfig;

use crate::colors;

/// Check a snippet file against the configured denylist.
pub fn execute(file: &Path, config: &RunnerConfig) -> anyhow::Result<()> {
    if !file.is_file() {
        anyhow::bail!("Snippet file not found: {}", file.display());
    }
    let source = std::fs::read_to_string(file)?;

    let verdict = config.safety_filter().check(&source);
    match verdict.matched_pattern {
        None => {
            println!(
                "{}Allowed{} {}",
                colors::GREEN,
                colors::RESET,
                file.display()
            );
            Ok(())
        }
        Some(pattern) => {
            println!(
                "{}Blocked{} {} {}(contains `{}`){}",
                colors::RED,
                colors::RESET,
                file.display(),
                colors::DIM,
                pattern,
                colors::RESET
            );
            Err(sprout_core::Error::SnippetRejected { pattern }.into())
        }
    }
}
