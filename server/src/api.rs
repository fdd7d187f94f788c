use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    routing::{get, post},
};
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::{
    AppState,
    auth::Authorized,
    error::ApiError,
    health::health_check,
    operation::{OperationKind, encode, execute, normalize},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/find", post(find).fallback(method_not_allowed))
        .route("/api/findOne", post(find_one).fallback(method_not_allowed))
        .route("/api/insertOne", post(insert_one).fallback(method_not_allowed))
        .route("/api/updateMany", post(update_many).fallback(method_not_allowed))
        .route("/api/bot-status", post(bot_status).fallback(method_not_allowed))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn find(_: Authorized, State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    run(OperationKind::FindMany, &state, &body).await
}

async fn find_one(_: Authorized, State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    run(OperationKind::FindOne, &state, &body).await
}

async fn insert_one(_: Authorized, State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    run(OperationKind::InsertOne, &state, &body).await
}

async fn update_many(_: Authorized, State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    run(OperationKind::UpdateMany, &state, &body).await
}

async fn bot_status(_: Authorized, State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    run(OperationKind::StatusUpsert, &state, &body).await
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

/// Shared pipeline behind every endpoint: normalize, execute, encode.
async fn run(kind: OperationKind, state: &AppState, body: &[u8]) -> Result<Json<Value>, ApiError> {
    let request = normalize(kind, body, &state.namespace_defaults()).inspect_err(|e| {
        tracing::debug!(operation = kind.as_str(), "Rejected request body: {}", e);
    })?;
    let result = execute(state.store.as_ref(), request).await?;
    Ok(Json(encode(result, state.config.response_format)))
}
