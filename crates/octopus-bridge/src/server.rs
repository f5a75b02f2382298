//! Server setup and lifecycle management

use std::sync::Arc;

use octopus_fabric::{EventBroker, HttpFabricService, MemoryBroker, RestProxyBroker, TopicRegistry};
use octopus_session::{
    AuthorizationServer, FileTokenStore, MemoryTokenStore, NativeAppClient, SessionManager,
    TokenStore,
};
use tokio::net::TcpListener;

use crate::api::{create_router, AppState};
use crate::bridge::FabricBridge;
use crate::config::{BackendConfig, BridgeConfig};
use crate::error::{DaemonError, DaemonResult};
use crate::mcp::McpServer;

/// Octopus bridge server
pub struct Server {
    config: BridgeConfig,
    mcp: McpServer,
}

impl Server {
    /// Create a new server with the given configuration
    pub fn new(config: BridgeConfig) -> DaemonResult<Self> {
        let auth: Arc<dyn AuthorizationServer> =
            Arc::new(NativeAppClient::new(config.auth.native_app_config())?);

        let tokens: Arc<dyn TokenStore> = match &config.auth.token_file {
            Some(path) => Arc::new(FileTokenStore::new(path.clone())),
            None => Arc::new(MemoryTokenStore::new()),
        };

        let session = SessionManager::new(config.auth.session_config(), auth, tokens);
        let (broker, registry) = build_backend(&config)?;
        let bridge = FabricBridge::new(session, broker, registry, config.delivery_timeout());

        Ok(Self {
            config,
            mcp: McpServer::new(Arc::new(bridge)),
        })
    }

    /// Run the server
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let mcp = self.mcp.clone();
        let app = create_router(AppState::new(self.mcp), &self.config.server);

        let listener = TcpListener::bind(addr).await?;

        tracing::info!(
            %addr,
            path = %self.config.server.mcp_path,
            "Octopus bridge listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("Octopus bridge shutting down");
        mcp.bridge().flush().await;
        Ok(())
    }
}

fn build_backend(
    config: &BridgeConfig,
) -> DaemonResult<(Arc<dyn EventBroker>, Arc<dyn TopicRegistry>)> {
    match &config.fabric.backend {
        BackendConfig::Memory { partitions } => {
            if *partitions < 1 {
                return Err(DaemonError::Config(format!(
                    "memory backend needs at least one partition, got {}",
                    partitions
                )));
            }
            let broker = MemoryBroker::new(*partitions);
            tracing::info!(partitions, "Using in-process broker");
            Ok((Arc::new(broker.clone()), Arc::new(broker)))
        }
        BackendConfig::Rest {
            service_url,
            proxy_url,
        } => {
            let timeout = config.fabric_http_timeout();
            let broker = RestProxyBroker::new(proxy_url, timeout)?;
            let registry = HttpFabricService::new(service_url, timeout)?;
            tracing::info!(%service_url, %proxy_url, "Using remote event fabric");
            Ok((Arc::new(broker), Arc::new(registry)))
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
