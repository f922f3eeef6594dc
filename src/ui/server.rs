//! HTTP control server

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

use crate::config::UiConfig;
use crate::error::{Error, Result};
use crate::session::SessionHandle;
use crate::ui::handlers;

/// Shared state for handlers
pub struct AppState {
    pub session: SessionHandle,
}

pub struct WebServer {
    config: UiConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: UiConfig, session: SessionHandle) -> Self {
        Self {
            config,
            state: Arc::new(AppState { session }),
        }
    }

    /// Build the API router
    pub fn router(&self) -> Router {
        let router = Router::new()
            .route("/api/status", get(handlers::get_status).post(handlers::set_status))
            .route("/api/toggle", post(handlers::toggle))
            .route("/api/start", post(handlers::start))
            .route("/api/stop", post(handlers::stop));

        #[cfg(feature = "device")]
        let router = router.route("/api/devices", get(handlers::get_devices));

        router.layer(CorsLayer::permissive()).with_state(self.state.clone())
    }

    /// Bind and serve until the task is dropped
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.http_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Control API listening on http://{}", addr);

        axum::serve(listener, self.router())
            .await
            .map_err(Error::Io)
    }

    /// Serve on a background task, logging failure
    pub fn start_background(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!("Control API stopped: {}", e);
            }
        })
    }
}
