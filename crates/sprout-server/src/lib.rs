//! Sprout lesson runner server.
//!
//! Hosts the code runner widgets of lesson pages over a WebSocket, with one
//! shared interpreter runtime for every connected page.
//!
//! # Architecture
//!
//! The server consists of:
//! - **Protocol**: Defines client/server message types
//! - **Routes**: HTTP and WebSocket handlers
//! - **Owners**: Which connection owns which session
//! - **Progress**: Lesson completion store

pub mod error;
pub mod owners;
pub mod progress;
pub mod protocol;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use sprout_core::{PythonLoader, RunnerConfig, SessionRegistry};

pub use error::{ServerError, ServerResult};
pub use owners::{ConnectionId, SessionOwners};
pub use progress::{InMemoryProgress, ProgressBackend, ProgressRecord, ProgressUpdate};
pub use protocol::{ClientMessage, ExampleInfo, ServerMessage};
pub use routes::{AppState, create_router};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    /// Parsed listen address.
    pub fn addr(&self) -> ServerResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", self.host, self.port)))
    }
}

/// Build the application state for a runner configuration, using the local
/// Python interpreter and an in-memory progress store.
pub fn app_state(runner: RunnerConfig) -> Arc<AppState> {
    let loader = PythonLoader::new(runner.interpreter.clone());
    Arc::new(AppState {
        registry: Arc::new(SessionRegistry::with_loader(runner, loader)),
        owners: SessionOwners::new(),
        progress: Arc::new(InMemoryProgress::new()),
    })
}

/// Start the Sprout server.
pub async fn serve(runner: RunnerConfig, config: ServerConfig) -> ServerResult<()> {
    let addr = config.addr()?;
    let state = app_state(runner);
    let app = create_router(state.clone());

    tracing::info!("Starting Sprout server at http://{}", addr);

    // Start server with graceful shutdown
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Create shutdown signal channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    // Handle Ctrl+C for graceful shutdown
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(());
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .await?;

    // Sessions left by connections that never closed cleanly.
    for id in state.registry.ids() {
        state.registry.destroy(&id);
    }

    tracing::info!("Server shutdown complete");

    Ok(())
}
