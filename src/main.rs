use std::sync::{Arc, Mutex};

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use slotdesk::clock::SystemClock;
use slotdesk::config::AppConfig;
use slotdesk::db;
use slotdesk::handlers;
use slotdesk::services::booking::DayLocks;
use slotdesk::services::notifications::push::HttpPushProvider;
use slotdesk::services::notifications::sms::TwilioSmsProvider;
use slotdesk::services::reminders::{ReminderScheduler, SCAN_INTERVAL};
use slotdesk::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    let sms = TwilioSmsProvider::new(
        config.twilio_account_sid.clone(),
        config.twilio_auth_token.clone(),
        config.twilio_phone_number.clone(),
    );

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        sms: Box::new(sms),
        push: Box::new(HttpPushProvider::new()),
        day_locks: DayLocks::new(),
        clock: Arc::new(SystemClock),
    });

    let _scheduler = ReminderScheduler::start(state.clone(), SCAN_INTERVAL);

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/availability", get(handlers::availability::get_availability))
        .route("/api/bookings", post(handlers::bookings::create_booking))
        .route(
            "/api/bookings/:id/cancel",
            post(handlers::bookings::cancel_booking),
        )
        .route("/api/push/subscribe", post(handlers::push::subscribe))
        .route("/api/jobs/reminder-scan", post(handlers::jobs::reminder_scan))
        .route("/api/admin/settings", get(handlers::admin::get_settings))
        .route("/api/admin/settings", post(handlers::admin::update_settings))
        .route(
            "/api/admin/appointments",
            get(handlers::admin::get_appointments),
        )
        .route(
            "/api/admin/appointments",
            post(handlers::admin::create_appointment),
        )
        .route(
            "/api/admin/appointments/:id/cancel",
            post(handlers::admin::cancel_appointment),
        )
        .route("/api/admin/credits", get(handlers::admin::get_credits))
        .route("/api/admin/credits/add", post(handlers::admin::add_credits))
        .route("/api/admin/services", post(handlers::admin::save_service))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
