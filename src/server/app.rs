//! HTTP server with axum router and graceful shutdown.

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{
    delete_webhook, get_dead_letters, get_events_sse, get_position, get_status, get_webhooks,
    post_pause, post_resume, post_stop, post_webhook, AppState,
};
use super::ServerError;
use crate::config::ServerConfig;
use crate::monitor::RealTimeMonitor;

/// HTTP control and event-stream surface for a monitor.
pub struct MonitorServer {
    config: ServerConfig,
    state: AppState,
    cancel: CancellationToken,
}

impl MonitorServer {
    /// Server with default configuration that stops when `cancel` fires.
    #[must_use]
    pub fn new(monitor: RealTimeMonitor, cancel: CancellationToken) -> Self {
        Self {
            config: ServerConfig::default(),
            state: AppState::new(monitor),
            cancel,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn address(&self) -> String {
        self.config.address()
    }

    pub fn build_router(&self) -> Router {
        let router = Router::new()
            .route("/api/status", get(get_status))
            .route("/api/position", get(get_position))
            .route("/api/events", get(get_events_sse))
            .route("/api/pause", post(post_pause))
            .route("/api/resume", post(post_resume))
            .route("/api/stop", post(post_stop))
            .route("/api/webhooks", get(get_webhooks).post(post_webhook))
            .route("/api/webhooks/:id", delete(delete_webhook))
            .route("/api/dead-letters", get(get_dead_letters))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.config.cors_permissive {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    /// Bind the configured address and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if binding or serving fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let address = self.address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::BindError {
                address: address.clone(),
                source,
            })?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if serving fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let cancel = self.cancel.clone();
        let app = self.build_router();

        if let Ok(local) = listener.local_addr() {
            tracing::info!(address = %local, "Starting HTTP server");
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                tracing::info!("HTTP server shutting down gracefully");
            })
            .await
            .map_err(ServerError::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;

    fn server() -> MonitorServer {
        MonitorServer::new(
            RealTimeMonitor::new(MonitorConfig::default()),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_default_address() {
        assert_eq!(server().address(), "127.0.0.1:3000");
    }

    #[test]
    fn test_with_config() {
        let server = server().with_config(ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_permissive: false,
        });
        assert_eq!(server.address(), "0.0.0.0:8080");
        assert!(!server.config.cors_permissive);
        let _router = server.build_router();
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let server = MonitorServer::new(RealTimeMonitor::new(MonitorConfig::default()), cancel.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let handle = tokio::spawn(server.serve(listener));
        cancel.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
