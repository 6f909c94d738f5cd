//! Admin server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::AdminConfig;
use crate::error::{AdminError, AdminResult};
use crate::routes::create_router;
use crate::state::AppState;

/// HTTP server for the health check and the security admin API.
///
/// Every route sits behind the admission chain. Connection addresses are
/// exposed to the chain through `ConnectInfo`.
#[derive(Debug, Clone)]
pub struct AdminServer {
    state: Arc<AppState>,
}

impl AdminServer {
    /// Create a server over prepared state.
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Create a server from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the attack log
    /// cannot be opened.
    pub fn from_config(config: AdminConfig) -> AdminResult<Self> {
        Ok(Self::new(AppState::from_config(config)?))
    }

    /// Get the shared state for external access.
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Build the router without binding.
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(self.state())
    }

    /// Address from the configuration.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        self.state.config().bind_addr
    }

    async fn bind(&self, addr: SocketAddr) -> AdminResult<TcpListener> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AdminError::BindFailed(addr, e))?;
        let local = listener.local_addr().unwrap_or(addr);
        info!(addr = %local, "Admission server listening");
        Ok(listener)
    }

    /// Start the server and listen for connections.
    ///
    /// This method runs until the server encounters a fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn serve(&self, addr: SocketAddr) -> AdminResult<()> {
        let listener = self.bind(addr).await?;

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| AdminError::Internal(e.to_string()))?;

        Ok(())
    }

    /// Start the server with graceful shutdown support.
    ///
    /// The server will shut down when the provided future completes.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn serve_with_shutdown<F>(&self, addr: SocketAddr, shutdown: F) -> AdminResult<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind(addr).await?;

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AdminError::Internal(e.to_string()))?;

        info!("Admission server shut down");
        Ok(())
    }
}
