//! Examples command implementation for Sprout CLI.

use sprout_core::RunnerConfig;

use crate::colors;

/// List the example table, or print one example's code.
pub fn execute(name: Option<&str>, config: &RunnerConfig) -> anyhow::Result<()> {
    let examples = config.example_table();

    if let Some(name) = name {
        let Some(code) = examples.get(name) else {
            anyhow::bail!(
                "Unknown example: {} (available: {})",
                name,
                examples.names().collect::<Vec<_>>().join(", ")
            );
        };
        println!("{code}");
        return Ok(());
    }

    if examples.is_empty() {
        println!("{}No examples configured.{}", colors::YELLOW, colors::RESET);
        return Ok(());
    }

    println!("{}Examples:{}", colors::BOLD, colors::RESET);
    for name in examples.names() {
        let summary = examples
            .get(name)
            .and_then(|code| code.lines().find(|l| !l.trim().is_empty()))
            .unwrap_or_default();
        println!(
            "  {}{:<12}{} {}{}{}",
            colors::CYAN,
            name,
            colors::RESET,
            colors::DIM,
            summary.trim(),
            colors::RESET
        );
    }
    Ok(())
}
