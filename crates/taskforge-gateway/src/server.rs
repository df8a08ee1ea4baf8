//! HTTP server assembly using Axum.

use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use taskforge_core::error::Result;
use taskforge_engine::Engine;

/// Shared state for the gateway handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(super::routes::status))
        .route("/api/scheduler/start", post(super::routes::scheduler_start))
        .route("/api/scheduler/stop", post(super::routes::scheduler_stop))
        .route("/api/scheduler/mode", post(super::routes::scheduler_mode))
        .route("/api/tasks", get(super::routes::list_tasks))
        .route("/api/tasks", post(super::routes::create_task))
        .route("/api/tasks/{id}", get(super::routes::get_task))
        .route("/api/tasks/{id}", put(super::routes::update_task))
        .route("/api/tasks/{id}", delete(super::routes::delete_task))
        .route("/api/tasks/{id}/run", post(super::routes::run_task))
        .route("/api/tasks/{id}/cancel", post(super::routes::cancel_task))
        .route("/api/tasks/{id}/logs", get(super::routes::task_logs))
        .route("/api/logs", get(super::routes::global_logs))
        .route("/api/events", get(super::routes::recent_events))
        .route("/api/resource-groups", get(super::routes::resource_groups))
        .route(
            "/api/test-notification",
            post(super::routes::test_notification),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the process exits. A port already in use surfaces
/// as an error so startup can fail loudly.
pub async fn serve(engine: Arc<Engine>, host: &str, port: u16) -> Result<()> {
    let state = Arc::new(AppState { engine });
    let app = build_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "control API listening");
    axum::serve(listener, app).await?;
    Ok(())
}
