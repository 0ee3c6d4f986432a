use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::errors::AppError;
use crate::services::reminders::{self, ScanOutcome};
use crate::state::AppState;

// POST /api/jobs/reminder-scan
//
// Externally-invocable scan pass for cron-style setups running alongside
// (or instead of) the in-process scheduler. Safe to call concurrently:
// the flag claim keeps dispatch at-most-once.
pub async fn reminder_scan(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ScanOutcome>, AppError> {
    let outcome = reminders::run_reminder_scan(&state)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(outcome))
}
