use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Appointment, CalendarRules, Owner, Service};
use crate::services::booking::{self, BookingRequest};
use crate::state::AppState;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

#[derive(Deserialize)]
pub struct OwnerQuery {
    pub owner_id: String,
}

// GET /api/admin/settings
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Owner>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let db = state.db.lock().unwrap();
    let owner = queries::get_owner(&db, &query.owner_id)?
        .ok_or_else(|| AppError::NotFound(format!("owner {}", query.owner_id)))?;
    Ok(Json(owner))
}

#[derive(Deserialize)]
pub struct UpdateSettingsRequest {
    pub owner_id: String,
    pub business_name: String,
    pub owner_name: String,
    pub owner_phone: String,
    pub calendar_rules: CalendarRules,
    pub sms_notifications_enabled: bool,
    pub cancellation_notice_hours: i64,
}

// POST /api/admin/settings
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<Owner>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    req.calendar_rules
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    if req.cancellation_notice_hours < 0 {
        return Err(AppError::Validation("notice hours must be non-negative".into()));
    }

    let db = state.db.lock().unwrap();
    // Credits are managed through the credits endpoints, never clobbered
    // by a settings update.
    let credits = queries::get_owner(&db, &req.owner_id)?
        .map(|o| o.credits)
        .unwrap_or(0);

    let owner = Owner {
        id: req.owner_id,
        business_name: req.business_name,
        owner_name: req.owner_name,
        owner_phone: req.owner_phone,
        calendar_rules: req.calendar_rules,
        sms_notifications_enabled: req.sms_notifications_enabled,
        credits,
        cancellation_notice_hours: req.cancellation_notice_hours,
    };
    queries::save_owner(&db, &owner)?;
    Ok(Json(owner))
}

#[derive(Deserialize)]
pub struct AppointmentsQuery {
    pub owner_id: String,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

// GET /api/admin/appointments
pub async fn get_appointments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AppointmentsQuery>,
) -> Result<Json<Vec<Appointment>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let db = state.db.lock().unwrap();
    let appointments = queries::get_appointments(
        &db,
        &query.owner_id,
        query.status.as_deref(),
        query.limit.unwrap_or(50),
    )?;
    Ok(Json(appointments))
}

// POST /api/admin/appointments
//
// Owner-created bookings go through the same guard as public ones but
// start out confirmed.
pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut req): Json<BookingRequest>,
) -> Result<Json<Appointment>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    req.owner_created = true;
    let appointment = booking::book_appointment(&state, req).await?;
    Ok(Json(appointment))
}

// POST /api/admin/appointments/:id/cancel
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    // Owner cancels bypass the notice-window policy.
    booking::cancel_appointment(&state, &id, "", false).await?;
    Ok(Json(serde_json::json!({ "cancelled": true })))
}

// GET /api/admin/credits
pub async fn get_credits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let db = state.db.lock().unwrap();
    let credits = queries::get_credits(&db, &query.owner_id)?
        .ok_or_else(|| AppError::NotFound(format!("owner {}", query.owner_id)))?;
    Ok(Json(serde_json::json!({ "credits": credits })))
}

#[derive(Deserialize)]
pub struct AddCreditsRequest {
    pub owner_id: String,
    pub amount: i64,
}

// POST /api/admin/credits/add
pub async fn add_credits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AddCreditsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    if req.amount <= 0 {
        return Err(AppError::Validation("amount must be positive".into()));
    }

    let db = state.db.lock().unwrap();
    let credits = queries::add_credits(&db, &req.owner_id, req.amount)?
        .ok_or_else(|| AppError::NotFound(format!("owner {}", req.owner_id)))?;
    Ok(Json(serde_json::json!({ "credits": credits })))
}

// POST /api/admin/services
pub async fn save_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(service): Json<Service>,
) -> Result<Json<Service>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    if service.duration_minutes <= 0
        || service.duration_minutes > crate::services::slots::MINUTES_PER_DAY as i32
    {
        return Err(AppError::Validation(
            "duration must be between 1 minute and 24 hours".into(),
        ));
    }

    let db = state.db.lock().unwrap();
    queries::save_service(&db, &service).map_err(AppError::Internal)?;
    Ok(Json(service))
}
