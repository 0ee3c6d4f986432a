use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::Appointment;
use crate::services::booking::{self, BookingRequest};
use crate::state::AppState;

// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(mut req): Json<BookingRequest>,
) -> Result<Json<Appointment>, AppError> {
    // Public self-bookings always start pending; owner-created ones come
    // through the admin surface.
    req.owner_created = false;
    let appointment = booking::book_appointment(&state, req).await?;
    Ok(Json(appointment))
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub requester_phone: String,
}

// POST /api/bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    booking::cancel_appointment(&state, &id, &req.requester_phone, true).await?;
    Ok(Json(serde_json::json!({ "cancelled": true })))
}
