//! Sprout CLI - run and serve interactive Python lesson snippets.

mod check;
mod colors;
mod examples;
mod run;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sprout_core::RunnerConfig;

#[derive(Parser)]
#[command(name = "sprout")]
#[command(about = "Interactive Python lesson runner")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Runner configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a snippet file and stream its output
    Run {
        /// Path to the snippet (.py file)
        file: PathBuf,
    },

    /// Check a snippet file against the denylist without running it
    Check {
        /// Path to the snippet (.py file)
        file: PathBuf,
    },

    /// List the examples, or print one
    Examples {
        /// Example to print
        name: Option<String>,
    },

    /// Start the lesson runner server
    Serve {
        /// Host address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format sprout-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(sprout_err) = err.downcast_ref::<sprout_core::Error>() {
            anyhow::anyhow!("{}", sprout_err.with_hint())
        } else {
            err
        }
    };

    let config = RunnerConfig::load_or_default(cli.config.as_deref())
        .map_err(|e| format_error(e.into()))?;

    match cli.command {
        Commands::Run { file } => run::execute(&file, config).await.map_err(format_error)?,

        Commands::Check { file } => check::execute(&file, &config).map_err(format_error)?,

        Commands::Examples { name } => {
            examples::execute(name.as_deref(), &config).map_err(format_error)?;
        }

        Commands::Serve { host, port } => {
            serve::execute(host, port, config).await.map_err(format_error)?;
        }
    }

    Ok(())
}
