//! wardwatch REST API
//!
//! HTTP API layer, built with Axum. Serves the row store, the
//! notification function and the realtime WebSocket.
//!
//! # Endpoints
//!
//! ## Tables
//! - `GET /rest/v1/:table` - Select rows (`col=eq.value`, `order=col.asc`, `limit=n`)
//! - `POST /rest/v1/:table` - Insert one row or an array of rows
//! - `PATCH /rest/v1/:table` - Update rows matching the filters
//! - `DELETE /rest/v1/:table` - Delete rows matching the filters
//!
//! ## Functions
//! - `POST /functions/v1/create-notification` - Notify one user or all staff
//!
//! ## Realtime
//! - `GET /realtime/v1/websocket` - Change feed and presence
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! Everything except health requires the anonymous key (`apikey`).
//!
//! # Example
//!
//! ```rust,ignore
//! use wardwatch::api::{serve, AppState};
//! use wardwatch::config::Config;
//! use wardwatch::realtime::ChangeFeed;
//! use wardwatch::store::SqliteStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let feed = Arc::new(ChangeFeed::new(config.realtime.feed_capacity));
//!     let store = Arc::new(SqliteStore::open(config.storage.path.as_ref(), feed)?);
//!
//!     serve(AppState::new(store, config)).await?;
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{
    http::{HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::websocket::websocket_handler;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
}

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);
    let shared_state = Arc::new(state);

    let protected = Router::new()
        .route(
            "/rest/v1/:table",
            get(routes::tables::select_rows)
                .post(routes::tables::insert_rows)
                .patch(routes::tables::update_rows)
                .delete(routes::tables::delete_rows),
        )
        .route(
            "/functions/v1/create-notification",
            post(routes::functions::create_notification),
        )
        .route("/realtime/v1/websocket", get(websocket_handler))
        .route_layer(from_fn_with_state(
            Arc::clone(&shared_state),
            middleware::require_api_key,
        ));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    Router::new()
        .merge(protected)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

/// Start the API server on the configured address
pub async fn serve(state: AppState) -> Result<(), ApiError> {
    let addr = state.config.server.addr();
    let listener = TcpListener::bind(&addr).await?;
    serve_listener(listener, state, shutdown_signal()).await
}

/// Serve on an already-bound listener until `shutdown` resolves
pub async fn serve_listener<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<(), ApiError>
where
    F: Future<Output = ()> + Send + 'static,
{
    state.start_realtime();
    let hub = Arc::clone(&state.hub);
    let router = build_router(state);

    tracing::info!("wardwatch API listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    hub.shutdown();
    tracing::info!("wardwatch API shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install signal handler");
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

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
