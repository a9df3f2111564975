//! Server instance management

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use crate::config::PortalConfig;
use crate::gateway::{AnalysisGateway, HttpGateway};
use crate::server::error::ApiError;
use crate::server::handlers::{create_router, AppState};

/// Job portal HTTP server
///
/// Manages the axum server lifecycle: startup, serving and graceful shutdown.
pub struct PortalServer {
    /// Application state shared with handlers
    state: AppState,
}

impl PortalServer {
    /// Create a server talking to the configured analysis service over HTTP
    ///
    /// # Arguments
    ///
    /// * `config` - Portal configuration
    ///
    /// # Returns
    ///
    /// `Result<PortalServer, ApiError>` - Server or error
    pub fn new(config: PortalConfig) -> Result<Self, ApiError> {
        let gateway = HttpGateway::from_config(&config).map_err(|e| {
            error!("Failed to build analysis service client: {}", e);
            ApiError::from(e)
        })?;
        Self::with_gateway(config, Arc::new(gateway))
    }

    /// Create a server around any analysis gateway
    pub fn with_gateway(
        config: PortalConfig,
        gateway: Arc<dyn AnalysisGateway>,
    ) -> Result<Self, ApiError> {
        if let Err(e) = config.validate() {
            return Err(ApiError::internal(format!("Invalid config: {}", e)));
        }
        let state = AppState::new(config, gateway)?;
        Ok(Self { state })
    }

    /// Portal configuration
    #[must_use]
    pub fn config(&self) -> &PortalConfig {
        &self.state.config
    }

    /// Get socket address for binding
    pub fn socket_addr(&self) -> Result<SocketAddr, ApiError> {
        self.state.config.socket_addr().map_err(ApiError::from)
    }

    /// Get server URL
    #[must_use]
    pub fn server_url(&self) -> String {
        self.state.config.server_url()
    }

    /// Bind and serve until a shutdown signal arrives
    pub async fn start(&self) -> Result<(), ApiError> {
        let addr = self.socket_addr()?;
        let app = create_router(&self.state.config).with_state(self.state.clone());

        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            error!("Failed to bind to {}: {:?}", addr, e);
            ApiError::internal(format!("Failed to bind to {}: {}", addr, e))
        })?;

        info!("Server listening on: {}", self.server_url());
        info!("Analysis service: {}", self.state.config.gateway_uri);

        axum::serve(listener, app)
            .with_graceful_shutdown(wait_for_shutdown())
            .await
            .map_err(|e| ApiError::internal(format!("Server error: {}", e)))?;

        info!("Server stopped");
        Ok(())
    }
}

/// Wait for Ctrl+C or TERM
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix;
        match unix::signal(unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
                info!("Received TERM signal");
            }
            Err(e) => {
                error!("Failed to install TERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_creation() {
        let server = PortalServer::new(PortalConfig::default()).expect("server");
        assert_eq!(server.server_url(), "http://127.0.0.1:7007");
        assert_eq!(
            server.socket_addr().expect("addr"),
            "127.0.0.1:7007".parse::<SocketAddr>().expect("parse")
        );
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = PortalConfig {
            port: 0,
            ..PortalConfig::default()
        };
        let err = PortalServer::new(config).err().expect("invalid config");
        assert!(err.message.contains("Invalid config"));
    }

    #[test]
    fn test_custom_models_reach_state() {
        let config = PortalConfig {
            substitution_models: vec!["HKY".to_string(), "GTR".to_string()],
            ..PortalConfig::default()
        };
        let server = PortalServer::new(config).expect("server");
        assert!(server.state.rules.substitution_model().matches("GTR"));
        assert!(!server.state.rules.substitution_model().matches("JC"));
    }
}
