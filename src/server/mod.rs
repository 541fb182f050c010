//! HTTP Server
//!
//! Axum application wiring: routes, CORS allow-list, and the listener loop.

pub mod routes;
pub mod stream;

use axum::http::{HeaderValue, Method};
use tower_http::cors::{AllowHeaders, CorsLayer};
use tracing::{info, warn};

use crate::config::KestrelConfig;
use crate::error::{AppError, AppResult};

pub use routes::{build_router, AppState};

/// Build the CORS layer from the configured origin allow-list.
fn cors_layer(config: &KestrelConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(target: "kestrel_server", origin, "ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::any())
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState) -> AppResult<()> {
    let config = state.engine.config().clone();
    let app = build_router(state).layer(cors_layer(&config));

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .map_err(|e| {
            AppError::internal(format!("failed to bind {}: {}", config.server.bind, e))
        })?;
    info!(target: "kestrel_server", bind = %config.server.bind, "listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::internal(format!("server error: {}", e)))?;
    Ok(())
}
