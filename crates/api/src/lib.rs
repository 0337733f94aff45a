pub mod error;
pub mod state;
pub mod ws;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use error::ApiError;
use state::AppState;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new().route("/room/{room_id}", get(get_room));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api)
        .route("/ws", get(ws::handler::ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "workers": state.scheduler.worker_count(),
    }))
}

async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<roomcast_core::types::RoomSnapshot>, ApiError> {
    let snapshot = state.scheduler.room_snapshot(&room_id).await?;
    Ok(Json(snapshot))
}
