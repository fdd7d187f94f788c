use axum::{Json, extract::State};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthCheckResponse {
    status: String,
    database: String,
}

/// Liveness probe. Never triggers a connect; reports whether one happened yet.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    let database = if state.store.is_connected() {
        "connected"
    } else {
        "pending"
    };
    Json(HealthCheckResponse {
        status: "ok".to_string(),
        database: database.to_string(),
    })
}
