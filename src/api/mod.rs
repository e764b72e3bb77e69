//! HTTP API server carrying the sync contract
//!
//! Displays and companion apps read retained topics, stream live updates
//! over a WebSocket, and post schedule commands.

pub mod health;
pub mod topics;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::publisher::{CommandSender, SyncBus};

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub bus: Arc<SyncBus>,
    pub commands: CommandSender,
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(bus: Arc<SyncBus>, commands: CommandSender, port: u16) -> Self {
        Self {
            state: Arc::new(ApiState { bus, commands }),
            port,
        }
    }

    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.state))
    }

    /// Run the API server until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

/// Router over shared state
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health::router(Arc::clone(&state)))
        .merge(topics::router(Arc::clone(&state)))
        .merge(websocket::router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
