use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Appointment, AppointmentStatus, NotificationPayload, Owner};
use crate::services::{notifications, slots};
use crate::state::AppState;

/// Bound on waiting for an owner-day critical section before giving up
/// with a retryable Busy.
const LOCK_WAIT: Duration = Duration::from_secs(5);

/// One async mutex per (owner, date). Bookings for the same owner-day are
/// serialized through it; different owners or days proceed in parallel.
/// Entries are pruned when the last holder or waiter releases, so the map
/// does not accumulate one lock per day ever booked.
#[derive(Default)]
pub struct DayLocks {
    locks: Mutex<HashMap<(String, NaiveDate), Arc<tokio::sync::Mutex<()>>>>,
}

impl DayLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(
        &self,
        owner_id: &str,
        date: NaiveDate,
    ) -> Result<DayGuard<'_>, AppError> {
        let key = (owner_id.to_string(), date);
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            locks.entry(key.clone()).or_default().clone()
        };

        match tokio::time::timeout(LOCK_WAIT, lock.clone().lock_owned()).await {
            Ok(guard) => Ok(DayGuard {
                guard: Some(guard),
                locks: self,
                key,
            }),
            Err(_) => {
                drop(lock);
                self.prune(&key);
                Err(AppError::Busy)
            }
        }
    }

    fn prune(&self, key: &(String, NaiveDate)) {
        let mut locks = self.locks.lock().unwrap();
        // strong_count 1 means the map holds the only reference: no one
        // is holding or waiting on this lock anymore.
        if let Some(lock) = locks.get(key) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(key);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

/// Holds the owner-day critical section; releasing it prunes the registry
/// entry when no other booking is holding or waiting on it.
pub struct DayGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a DayLocks,
    key: (String, NaiveDate),
}

impl Drop for DayGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.prune(&self.key);
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub owner_id: String,
    pub service_id: Option<String>,
    pub duration_minutes: Option<u32>,
    pub date: String,
    pub start_time: String,
    pub customer_name: String,
    pub customer_phone: String,
    /// Owner-created bookings start confirmed; public self-bookings
    /// start pending.
    #[serde(default)]
    pub owner_created: bool,
}

/// Browse-time availability for one owner-day. The booking path never
/// trusts this result: it recomputes inside its critical section.
pub fn get_available_slots(
    state: &AppState,
    owner_id: &str,
    date: NaiveDate,
    duration_minutes: u32,
) -> Result<Vec<String>, AppError> {
    let db = state.db.lock().unwrap();
    let owner = queries::get_owner(&db, owner_id)?
        .ok_or_else(|| AppError::NotFound(format!("owner {owner_id}")))?;
    let existing = queries::get_live_appointments_for_day(&db, owner_id, date)?;
    Ok(slots::available_slots(
        &owner.calendar_rules,
        date,
        duration_minutes,
        &existing,
    ))
}

/// Books a slot or fails with SlotUnavailable. Availability is recomputed
/// against current persisted state while the owner-day lock is held, so
/// two concurrent requests for the same slot cannot both pass validation.
pub async fn book_appointment(
    state: &AppState,
    req: BookingRequest,
) -> Result<Appointment, AppError> {
    let date: NaiveDate = req
        .date
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid date: {}", req.date)))?;
    let start_time = NaiveTime::parse_from_str(&req.start_time, "%H:%M")
        .map_err(|_| AppError::Validation(format!("invalid start time: {}", req.start_time)))?;
    if req.customer_name.trim().is_empty() || req.customer_phone.trim().is_empty() {
        return Err(AppError::Validation("customer name and phone are required".into()));
    }

    let (owner, duration_minutes, price) = {
        let db = state.db.lock().unwrap();
        let owner = queries::get_owner(&db, &req.owner_id)?
            .ok_or_else(|| AppError::NotFound(format!("owner {}", req.owner_id)))?;

        match &req.service_id {
            Some(service_id) => {
                let service = queries::get_service(&db, service_id)?
                    .filter(|s| s.owner_id == owner.id)
                    .ok_or_else(|| AppError::NotFound(format!("service {service_id}")))?;
                (owner, service.duration_minutes as u32, service.price)
            }
            None => {
                let duration = req
                    .duration_minutes
                    .ok_or_else(|| AppError::Validation("service_id or duration_minutes required".into()))?;
                (owner, duration, None)
            }
        }
    };
    if duration_minutes == 0 || duration_minutes > slots::MINUTES_PER_DAY {
        return Err(AppError::Validation(
            "duration must be between 1 minute and 24 hours".into(),
        ));
    }

    let _guard = state.day_locks.acquire(&req.owner_id, date).await?;

    let appointment = {
        let db = state.db.lock().unwrap();

        let existing = queries::get_live_appointments_for_day(&db, &req.owner_id, date)?;
        let available =
            slots::available_slots(&owner.calendar_rules, date, duration_minutes, &existing);
        let requested = start_time.format("%H:%M").to_string();
        if !available.iter().any(|s| s == &requested) {
            return Err(AppError::SlotUnavailable);
        }

        let now = state.clock.now();
        let appointment = Appointment {
            id: Uuid::new_v4().to_string(),
            owner_id: req.owner_id.clone(),
            service_id: req.service_id.clone(),
            customer_name: req.customer_name.trim().to_string(),
            customer_phone: req.customer_phone.trim().to_string(),
            date,
            start_time,
            end_time: start_time + chrono::Duration::minutes(duration_minutes as i64),
            duration_minutes: duration_minutes as i32,
            status: if req.owner_created {
                AppointmentStatus::Confirmed
            } else {
                AppointmentStatus::Pending
            },
            price,
            day_before_reminder_sent: false,
            thirty_min_reminder_sent: false,
            sms_confirmation_sent: false,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = queries::create_appointment(&db, &appointment) {
            // The live-slot unique index is the last-resort guard.
            if queries::is_slot_conflict(&e) {
                return Err(AppError::SlotUnavailable);
            }
            return Err(e.into());
        }
        appointment
    };
    drop(_guard);

    tracing::info!(
        owner = %appointment.owner_id,
        date = %appointment.date,
        start = %req.start_time,
        "appointment booked"
    );

    dispatch_confirmation(state, &owner, &appointment).await;

    Ok(appointment)
}

/// Best-effort confirmation; a transport failure never rolls back the
/// booking.
async fn dispatch_confirmation(state: &AppState, owner: &Owner, appointment: &Appointment) {
    let body = format!(
        "Your appointment with {} on {} at {} is booked.",
        owner.business_name,
        appointment.date.format("%Y-%m-%d"),
        appointment.start_time.format("%H:%M"),
    );

    let outcome =
        notifications::send_owner_sms(state, &owner.id, &appointment.customer_phone, &body).await;
    if outcome.was_sent() {
        let db = state.db.lock().unwrap();
        if let Err(e) = queries::mark_sms_confirmation_sent(&db, &appointment.id) {
            tracing::warn!(appointment = %appointment.id, error = %e, "failed to record SMS confirmation");
        }
    }

    let payload = NotificationPayload::new(
        "New booking",
        format!(
            "{} booked {} at {}",
            appointment.customer_name,
            appointment.date.format("%Y-%m-%d"),
            appointment.start_time.format("%H:%M"),
        ),
    );
    notifications::push_to_user(state, &owner.owner_phone, &payload).await;
}

/// Customer-initiated cancellation; `enforce_policy` is false for
/// owner/admin cancels, which bypass the notice window.
pub async fn cancel_appointment(
    state: &AppState,
    id: &str,
    requester_phone: &str,
    enforce_policy: bool,
) -> Result<(), AppError> {
    let (appointment, owner) = {
        let db = state.db.lock().unwrap();
        let appointment = queries::get_appointment_by_id(&db, id)?
            .ok_or_else(|| AppError::NotFound(format!("appointment {id}")))?;
        let owner = queries::get_owner(&db, &appointment.owner_id)?
            .ok_or_else(|| AppError::NotFound(format!("owner {}", appointment.owner_id)))?;
        (appointment, owner)
    };

    if enforce_policy && appointment.customer_phone != requester_phone {
        return Err(AppError::Unauthorized);
    }

    if !appointment.status.occupies_calendar() {
        // Already terminal; nothing left to cancel.
        return Ok(());
    }

    if enforce_policy {
        let deadline = appointment.starts_at()
            - chrono::Duration::hours(owner.cancellation_notice_hours);
        if state.clock.now() > deadline {
            return Err(AppError::PolicyViolation(format!(
                "cancellations require {} hours notice",
                owner.cancellation_notice_hours
            )));
        }
    }

    {
        let db = state.db.lock().unwrap();
        queries::update_appointment_status(&db, id, AppointmentStatus::Cancelled)?;
    }

    tracing::info!(appointment = %id, "appointment cancelled");

    let payload = NotificationPayload::new(
        "Booking cancelled",
        format!(
            "{} cancelled {} at {}",
            appointment.customer_name,
            appointment.date.format("%Y-%m-%d"),
            appointment.start_time.format("%H:%M"),
        ),
    );
    notifications::push_to_user(state, &owner.owner_phone, &payload).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::AppConfig;
    use crate::db;
    use crate::models::{CalendarRules, NotificationPayload, PushSubscription, Service};
    use crate::services::notifications::push::{PushError, PushProvider};
    use crate::services::notifications::sms::SmsProvider;
    use async_trait::async_trait;
    use chrono::NaiveDateTime;
    use std::sync::Arc;

    struct NoopSms;

    #[async_trait]
    impl SmsProvider for NoopSms {
        async fn send_sms(&self, _to: &str, _body: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct NoopPush;

    #[async_trait]
    impl PushProvider for NoopPush {
        async fn send_push(
            &self,
            _subscription: &PushSubscription,
            _payload: &NotificationPayload,
        ) -> Result<(), PushError> {
            Ok(())
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2025-06-10 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn test_state() -> (Arc<AppState>, Arc<ManualClock>) {
        let conn = db::init_db(":memory:").unwrap();
        let clock = Arc::new(ManualClock::new(now()));
        let state = Arc::new(AppState {
            db: Arc::new(std::sync::Mutex::new(conn)),
            config: AppConfig {
                port: 3000,
                database_url: ":memory:".to_string(),
                admin_token: "test-token".to_string(),
                twilio_account_sid: "".to_string(),
                twilio_auth_token: "".to_string(),
                twilio_phone_number: "+15551234567".to_string(),
            },
            sms: Box::new(NoopSms),
            push: Box::new(NoopPush),
            day_locks: DayLocks::new(),
            clock: clock.clone(),
        });

        {
            let db = state.db.lock().unwrap();
            let owner = crate::models::Owner {
                id: "owner-1".to_string(),
                business_name: "Test Biz".to_string(),
                owner_name: "Alice".to_string(),
                owner_phone: "+15559999999".to_string(),
                calendar_rules: CalendarRules {
                    start_hour: 9,
                    end_hour: 17,
                    working_days: vec![1, 2, 3, 4, 5],
                    slot_interval_minutes: 30,
                    break_window: None,
                    min_gap_minutes: 0,
                },
                sms_notifications_enabled: true,
                credits: 100,
                cancellation_notice_hours: 24,
            };
            queries::save_owner(&db, &owner).unwrap();
            queries::save_service(
                &db,
                &Service {
                    id: "svc-1".to_string(),
                    owner_id: "owner-1".to_string(),
                    name: "Haircut".to_string(),
                    duration_minutes: 30,
                    price: Some(25.0),
                },
            )
            .unwrap();
        }

        (state, clock)
    }

    // 2025-06-16 is a Monday.
    fn request(start_time: &str, phone: &str) -> BookingRequest {
        BookingRequest {
            owner_id: "owner-1".to_string(),
            service_id: Some("svc-1".to_string()),
            duration_minutes: None,
            date: "2025-06-16".to_string(),
            start_time: start_time.to_string(),
            customer_name: "Bob".to_string(),
            customer_phone: phone.to_string(),
            owner_created: false,
        }
    }

    #[tokio::test]
    async fn test_booking_succeeds_and_is_pending() {
        let (state, _clock) = test_state();
        let appt = book_appointment(&state, request("10:00", "+15551110000"))
            .await
            .unwrap();
        assert_eq!(appt.status, AppointmentStatus::Pending);
        assert_eq!(appt.duration_minutes, 30);
        assert_eq!(appt.end_time.format("%H:%M").to_string(), "10:30");
        assert_eq!(appt.price, Some(25.0));
    }

    #[tokio::test]
    async fn test_owner_created_booking_is_confirmed() {
        let (state, _clock) = test_state();
        let mut req = request("10:00", "+15551110000");
        req.owner_created = true;
        let appt = book_appointment(&state, req).await.unwrap();
        assert_eq!(appt.status, AppointmentStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_taken_slot_rejected() {
        let (state, _clock) = test_state();
        book_appointment(&state, request("10:00", "+15551110000"))
            .await
            .unwrap();

        let err = book_appointment(&state, request("10:00", "+15552220000"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SlotUnavailable));
    }

    #[tokio::test]
    async fn test_slot_inside_buffer_rejected() {
        let (state, _clock) = test_state();
        book_appointment(&state, request("10:00", "+15551110000"))
            .await
            .unwrap();

        // 10:30 starts inside the trailing buffer of the 10:00-10:30 booking.
        let err = book_appointment(&state, request("10:30", "+15552220000"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SlotUnavailable));

        // 09:30 ends exactly at 10:00 and stays valid.
        book_appointment(&state, request("09:30", "+15552220000"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_inputs_rejected_before_side_effects() {
        let (state, _clock) = test_state();

        let mut req = request("10:00", "+15551110000");
        req.date = "not-a-date".to_string();
        assert!(matches!(
            book_appointment(&state, req).await.unwrap_err(),
            AppError::Validation(_)
        ));

        let mut req = request("25:99", "+15551110000");
        req.start_time = "25:99".to_string();
        assert!(matches!(
            book_appointment(&state, req).await.unwrap_err(),
            AppError::Validation(_)
        ));

        let mut req = request("10:00", "+15551110000");
        req.customer_name = "".to_string();
        assert!(matches!(
            book_appointment(&state, req).await.unwrap_err(),
            AppError::Validation(_)
        ));

        let db = state.db.lock().unwrap();
        let appointments =
            queries::get_appointments(&db, "owner-1", None, 10).unwrap();
        assert!(appointments.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_bookings_one_winner() {
        let (state, _clock) = test_state();

        let a = {
            let state = state.clone();
            tokio::spawn(async move {
                book_appointment(&state, request("11:00", "+15551110000")).await
            })
        };
        let b = {
            let state = state.clone();
            tokio::spawn(async move {
                book_appointment(&state, request("11:00", "+15552220000")).await
            })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1, "exactly one concurrent booking must win");
        for r in &results {
            if let Err(e) = r {
                assert!(matches!(e, AppError::SlotUnavailable | AppError::Busy));
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_respects_notice_window() {
        let (state, clock) = test_state();
        let appt = book_appointment(&state, request("10:00", "+15551110000"))
            .await
            .unwrap();

        // 23h before a 10:00 appointment with a 24h notice policy.
        clock.set(
            NaiveDateTime::parse_from_str("2025-06-15 11:00:00", "%Y-%m-%d %H:%M:%S").unwrap(),
        );
        let err = cancel_appointment(&state, &appt.id, "+15551110000", true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PolicyViolation(_)));

        // Two days out is fine.
        clock.set(
            NaiveDateTime::parse_from_str("2025-06-14 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap(),
        );
        cancel_appointment(&state, &appt.id, "+15551110000", true)
            .await
            .unwrap();

        let db = state.db.lock().unwrap();
        let stored = queries::get_appointment_by_id(&db, &appt.id).unwrap().unwrap();
        assert_eq!(stored.status, AppointmentStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_requires_matching_phone() {
        let (state, _clock) = test_state();
        let appt = book_appointment(&state, request("10:00", "+15551110000"))
            .await
            .unwrap();

        let err = cancel_appointment(&state, &appt.id, "+15559998888", true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn test_booking_returns_busy_while_day_lock_held() {
        // Paused time lets the lock-wait bound elapse without sleeping.
        tokio::time::pause();
        let (state, _clock) = test_state();

        let date: chrono::NaiveDate = "2025-06-16".parse().unwrap();
        let _held = state.day_locks.acquire("owner-1", date).await.unwrap();

        let err = book_appointment(&state, request("10:00", "+15551110000"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Busy));

        // Nothing was persisted while the calendar was busy.
        let db = state.db.lock().unwrap();
        let appointments = queries::get_appointments(&db, "owner-1", None, 10).unwrap();
        assert!(appointments.is_empty());
    }

    #[tokio::test]
    async fn test_day_lock_entry_pruned_after_release() {
        let (state, _clock) = test_state();
        let date: chrono::NaiveDate = "2025-06-16".parse().unwrap();

        let guard = state.day_locks.acquire("owner-1", date).await.unwrap();
        assert_eq!(state.day_locks.len(), 1);
        drop(guard);
        assert_eq!(state.day_locks.len(), 0);

        // A full booking leaves no entry behind either.
        book_appointment(&state, request("10:00", "+15551110000"))
            .await
            .unwrap();
        assert_eq!(state.day_locks.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_slot_becomes_bookable_again() {
        let (state, _clock) = test_state();
        let appt = book_appointment(&state, request("10:00", "+15551110000"))
            .await
            .unwrap();
        cancel_appointment(&state, &appt.id, "", false).await.unwrap();

        book_appointment(&state, request("10:00", "+15552220000"))
            .await
            .unwrap();
    }
}
