//! Rill notebook server.
//!
//! Hosts reactive notebooks over HTTP and WebSocket.
//!
//! # Architecture
//!
//! - **Service**: locked notebook CRUD with optimistic revisions
//! - **Scheduler**: per-notebook run queue with coalescing
//! - **Coordinator**: kernel lifecycle and notification fan-in
//! - **Broadcaster**: per-observer fan-out of live-channel messages
//! - **Protocol**: client/server message types
//! - **Routes**: HTTP and WebSocket handlers

pub mod broadcast;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod routes;
pub mod scheduler;
pub mod service;

use std::net::SocketAddr;
use std::sync::Arc;

use rill_core::auth::AuthBroker;
use rill_core::store::NotebookStore;

pub use broadcast::Broadcaster;
pub use coordinator::NotebookCoordinator;
pub use error::{ServerError, ServerResult};
pub use protocol::{ClientMessage, ServerMessage};
pub use routes::{AppState, create_router};
pub use scheduler::ExecutionScheduler;
pub use service::{NotebookHandle, NotebookService, NotebookSnapshot};

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
            port: 8000,
        }
    }
}

/// Start the Rill server over the given store and auth broker.
pub async fn serve(
    config: ServerConfig,
    store: Arc<dyn NotebookStore>,
    auth: Arc<dyn AuthBroker>,
) -> ServerResult<()> {
    let service = Arc::new(NotebookService::new(store));
    let state = AppState::new(service, auth);
    let app = create_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|_| {
            ServerError::BadRequest(format!("invalid address: {}:{}", config.host, config.port))
        })?;

    tracing::info!("starting Rill server at http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Core(e.into()))?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received shutdown signal");
            let _ = shutdown_tx.send(());
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .await
        .map_err(|e| ServerError::Core(rill_core::Error::Io(e)))?;

    // Tear down any kernels still running.
    let coordinators: Vec<_> = state.coordinators.lock().await.drain().collect();
    for (_, coordinator) in coordinators {
        coordinator.shutdown().await;
    }

    tracing::info!("server shutdown complete");
    Ok(())
}
