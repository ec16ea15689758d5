use axum::{extract::State, response::IntoResponse, Json};

use crate::{mcp::handler::SERVER_NAME, AppState};

pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "sandbox_api": state.config.api_key.is_none(),
    }))
}
