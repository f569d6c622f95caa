//! HTTP surface
//!
//! The duplex protocol lives at `/ws`; the REST CRUD surface is an external
//! collaborator, so HTTP here is just the health probe and middleware.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::websocket::ws_handler;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.sessions.count(),
        "stt": state.stt.is_some(),
        "tts": state.tts.is_some(),
        "persistence": state.config.database.enabled,
    }))
}
