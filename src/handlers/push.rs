use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SubscribeRequest {
    pub phone: String,
    pub endpoint: String,
    pub auth_key: String,
}

// POST /api/push/subscribe
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubscribeRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if req.phone.trim().is_empty() || req.endpoint.trim().is_empty() {
        return Err(AppError::Validation("phone and endpoint are required".into()));
    }

    let db = state.db.lock().unwrap();
    queries::add_push_subscription(&db, req.phone.trim(), req.endpoint.trim(), &req.auth_key)
        .map_err(AppError::Internal)?;

    Ok(Json(serde_json::json!({ "subscribed": true })))
}
