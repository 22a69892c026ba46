//! Serve command implementation for Sprout CLI.
//!
//! Starts the WebSocket server hosting lesson runner widgets.

use sprout_core::RunnerConfig;
use sprout_server::ServerConfig;

use crate::colors;

/// Start the lesson runner server.
pub async fn execute(host: String, port: u16, runner: RunnerConfig) -> anyhow::Result<()> {
    let config = ServerConfig { host, port };
    // Fail on a bad address before printing the banner.
    config.addr()?;

    println!(
        "\n{}Sprout Server{} - Interactive Lessons",
        colors::BOLD,
        colors::RESET
    );
    println!("{}", "─".repeat(50));

    println!(
        "{}  ◆ Server:{} http://{}:{}",
        colors::CYAN,
        colors::RESET,
        config.host,
        config.port
    );
    println!(
        "{}  ◆ WebSocket:{} ws://{}:{}/ws",
        colors::CYAN,
        colors::RESET,
        config.host,
        config.port
    );
    if runner.preload.enabled {
        println!(
            "{}  ◆ Preload:{} after {}ms",
            colors::CYAN,
            colors::RESET,
            runner.preload.delay_ms
        );
    }
    println!("{}", "─".repeat(50));
    println!("{}Press Ctrl+C to stop{}", colors::GREEN, colors::RESET);
    println!();

    sprout_server::serve(runner, config).await?;

    Ok(())
}
