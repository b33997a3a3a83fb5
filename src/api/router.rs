//! Route table and server lifecycle.
//!
//! Returns a composable `Router` mounted under `/api/`; the binary serves
//! it with graceful shutdown on ctrl-c. The CORS layer exists for the
//! external web UI that consumes these endpoints.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api::endpoints;
use crate::state::AppState;

/// Build the API router.
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(endpoints::health))
        .route("/api/cron/reminders", get(endpoints::cron::reminders))
        .route("/api/cron/audit", get(endpoints::cron::audit_sweep))
        .route("/api/dose-logs", get(endpoints::dose_logs::list))
        .route("/api/dose-logs/create", post(endpoints::dose_logs::create))
        .route(
            "/api/medications",
            get(endpoints::medications::list).post(endpoints::medications::create),
        )
        .route(
            "/api/medications/:id",
            get(endpoints::medications::detail)
                .put(endpoints::medications::update)
                .delete(endpoints::medications::remove),
        )
        .route(
            "/api/notifications/subscribe",
            post(endpoints::notifications::subscribe),
        )
        .route(
            "/api/notifications/unsubscribe",
            post(endpoints::notifications::unsubscribe),
        )
        .route("/api/telegram/webhook", post(endpoints::telegram::webhook))
        .route("/api/telegram/test", post(endpoints::telegram::test))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn serve(state: Arc<AppState>) -> Result<(), std::io::Error> {
    let addr = state.config.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");

    let app = api_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════
