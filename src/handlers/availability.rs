use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::services::{booking, slots};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub owner_id: String,
    pub date: String,
    pub service_id: Option<String>,
    pub duration_minutes: Option<u32>,
}

#[derive(Serialize)]
pub struct AvailabilityResponse {
    pub date: String,
    pub slots: Vec<String>,
}

// GET /api/availability
pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let date: chrono::NaiveDate = query
        .date
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid date: {}", query.date)))?;

    let duration_minutes = match &query.service_id {
        Some(service_id) => {
            let db = state.db.lock().unwrap();
            let service = queries::get_service(&db, service_id)?
                .filter(|s| s.owner_id == query.owner_id)
                .ok_or_else(|| AppError::NotFound(format!("service {service_id}")))?;
            service.duration_minutes as u32
        }
        None => query
            .duration_minutes
            .ok_or_else(|| AppError::Validation("service_id or duration_minutes required".into()))?,
    };
    if duration_minutes == 0 || duration_minutes > slots::MINUTES_PER_DAY {
        return Err(AppError::Validation(
            "duration must be between 1 minute and 24 hours".into(),
        ));
    }

    let slots = booking::get_available_slots(&state, &query.owner_id, date, duration_minutes)?;

    Ok(Json(AvailabilityResponse {
        date: query.date,
        slots,
    }))
}
