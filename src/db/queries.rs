use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::{params, Connection};

use crate::models::{
    Appointment, AppointmentStatus, CalendarRules, Owner, PushSubscription, Service,
};

// ── Owners ──

pub fn get_owner(conn: &Connection, id: &str) -> anyhow::Result<Option<Owner>> {
    let result = conn.query_row(
        "SELECT id, business_name, owner_name, owner_phone, calendar_rules,
                sms_notifications_enabled, credits, cancellation_notice_hours
         FROM owners WHERE id = ?1",
        params![id],
        |row| {
            let rules_json: String = row.get(4)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                rules_json,
                row.get::<_, i32>(5)? != 0,
                row.get::<_, i64>(6)?,
                row.get::<_, i64>(7)?,
            ))
        },
    );

    match result {
        Ok((id, business_name, owner_name, owner_phone, rules_json, sms, credits, notice)) => {
            let calendar_rules = CalendarRules::from_json(&rules_json)?;
            Ok(Some(Owner {
                id,
                business_name,
                owner_name,
                owner_phone,
                calendar_rules,
                sms_notifications_enabled: sms,
                credits,
                cancellation_notice_hours: notice,
            }))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn save_owner(conn: &Connection, owner: &Owner) -> anyhow::Result<()> {
    let rules_json = serde_json::to_string(&owner.calendar_rules)?;
    conn.execute(
        "INSERT INTO owners (id, business_name, owner_name, owner_phone, calendar_rules,
                             sms_notifications_enabled, credits, cancellation_notice_hours)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
           business_name = excluded.business_name,
           owner_name = excluded.owner_name,
           owner_phone = excluded.owner_phone,
           calendar_rules = excluded.calendar_rules,
           sms_notifications_enabled = excluded.sms_notifications_enabled,
           credits = excluded.credits,
           cancellation_notice_hours = excluded.cancellation_notice_hours,
           updated_at = datetime('now')",
        params![
            owner.id,
            owner.business_name,
            owner.owner_name,
            owner.owner_phone,
            rules_json,
            owner.sms_notifications_enabled as i32,
            owner.credits,
            owner.cancellation_notice_hours,
        ],
    )?;
    Ok(())
}

pub fn get_credits(conn: &Connection, owner_id: &str) -> anyhow::Result<Option<i64>> {
    let result = conn.query_row(
        "SELECT credits FROM owners WHERE id = ?1",
        params![owner_id],
        |row| row.get(0),
    );

    match result {
        Ok(credits) => Ok(Some(credits)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Atomic debit-if-sufficient. Returns false (and charges nothing) when
/// the balance is below `amount`, closing the race where two concurrent
/// sends both pass a separate balance check.
pub fn debit_credits(conn: &Connection, owner_id: &str, amount: i64) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE owners SET credits = credits - ?2, updated_at = datetime('now')
         WHERE id = ?1 AND credits >= ?2",
        params![owner_id, amount],
    )?;
    Ok(count > 0)
}

/// Returns the new balance, or None when no such owner exists.
pub fn add_credits(conn: &Connection, owner_id: &str, amount: i64) -> anyhow::Result<Option<i64>> {
    conn.execute(
        "UPDATE owners SET credits = credits + ?2, updated_at = datetime('now') WHERE id = ?1",
        params![owner_id, amount],
    )?;
    get_credits(conn, owner_id)
}

// ── Services ──

pub fn get_service(conn: &Connection, id: &str) -> anyhow::Result<Option<Service>> {
    let result = conn.query_row(
        "SELECT id, owner_id, name, duration_minutes, price FROM services WHERE id = ?1",
        params![id],
        |row| {
            Ok(Service {
                id: row.get(0)?,
                owner_id: row.get(1)?,
                name: row.get(2)?,
                duration_minutes: row.get(3)?,
                price: row.get(4)?,
            })
        },
    );

    match result {
        Ok(service) => Ok(Some(service)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn save_service(conn: &Connection, service: &Service) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO services (id, owner_id, name, duration_minutes, price)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           duration_minutes = excluded.duration_minutes,
           price = excluded.price",
        params![
            service.id,
            service.owner_id,
            service.name,
            service.duration_minutes,
            service.price,
        ],
    )?;
    Ok(())
}

// ── Appointments ──

const APPOINTMENT_COLUMNS: &str = "id, owner_id, service_id, customer_name, customer_phone, \
     date, start_time, end_time, duration_minutes, status, price, \
     day_before_reminder_sent, thirty_min_reminder_sent, sms_confirmation_sent, \
     created_at, updated_at";

pub fn create_appointment(conn: &Connection, appt: &Appointment) -> anyhow::Result<()> {
    conn.execute(
        &format!("INSERT INTO appointments ({APPOINTMENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"),
        params![
            appt.id,
            appt.owner_id,
            appt.service_id,
            appt.customer_name,
            appt.customer_phone,
            appt.date.format("%Y-%m-%d").to_string(),
            appt.start_time.format("%H:%M").to_string(),
            appt.end_time.format("%H:%M").to_string(),
            appt.duration_minutes,
            appt.status.as_str(),
            appt.price,
            appt.day_before_reminder_sent as i32,
            appt.thirty_min_reminder_sent as i32,
            appt.sms_confirmation_sent as i32,
            appt.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            appt.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ],
    )?;
    Ok(())
}

/// True when the error is the live-slot unique index firing, i.e. a
/// concurrent booking won the same (owner, date, start_time). Other
/// constraint failures (foreign keys, NOT NULL) are not slot conflicts
/// and must keep surfacing as internal errors.
pub fn is_slot_conflict(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

pub fn get_appointment_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Appointment>> {
    let result = conn.query_row(
        &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1"),
        params![id],
        |row| Ok(parse_appointment_row(row)),
    );

    match result {
        Ok(appt) => Ok(Some(appt?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Live (pending/confirmed) appointments for one owner-day, ascending.
pub fn get_live_appointments_for_day(
    conn: &Connection,
    owner_id: &str,
    date: NaiveDate,
) -> anyhow::Result<Vec<Appointment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE owner_id = ?1 AND date = ?2 AND status IN ('pending', 'confirmed')
         ORDER BY start_time ASC"
    ))?;

    let rows = stmt.query_map(
        params![owner_id, date.format("%Y-%m-%d").to_string()],
        |row| Ok(parse_appointment_row(row)),
    )?;

    let mut appointments = vec![];
    for row in rows {
        appointments.push(row??);
    }
    Ok(appointments)
}

pub fn get_appointments(
    conn: &Connection,
    owner_id: &str,
    status_filter: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<Appointment>> {
    let (sql, params_vec): (String, Vec<Box<dyn rusqlite::types::ToSql>>) = match status_filter {
        Some(status) => (
            format!(
                "SELECT {APPOINTMENT_COLUMNS} FROM appointments
                 WHERE owner_id = ?1 AND status = ?2
                 ORDER BY date DESC, start_time DESC LIMIT ?3"
            ),
            vec![
                Box::new(owner_id.to_string()) as Box<dyn rusqlite::types::ToSql>,
                Box::new(status.to_string()),
                Box::new(limit),
            ],
        ),
        None => (
            format!(
                "SELECT {APPOINTMENT_COLUMNS} FROM appointments
                 WHERE owner_id = ?1 ORDER BY date DESC, start_time DESC LIMIT ?2"
            ),
            vec![
                Box::new(owner_id.to_string()) as Box<dyn rusqlite::types::ToSql>,
                Box::new(limit),
            ],
        ),
    };

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), |row| Ok(parse_appointment_row(row)))?;

    let mut appointments = vec![];
    for row in rows {
        appointments.push(row??);
    }
    Ok(appointments)
}

pub fn update_appointment_status(
    conn: &Connection,
    id: &str,
    status: AppointmentStatus,
) -> anyhow::Result<bool> {
    let now = Utc::now()
        .naive_utc()
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    let count = conn.execute(
        "UPDATE appointments SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), now, id],
    )?;
    Ok(count > 0)
}

pub fn mark_sms_confirmation_sent(conn: &Connection, id: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE appointments SET sms_confirmation_sent = 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

// ── Reminder flags ──

/// Which of the two reminder lead times a scan pass is working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderKind {
    DayBefore,
    ThirtyMin,
}

impl ReminderKind {
    fn flag_column(&self) -> &'static str {
        match self {
            ReminderKind::DayBefore => "day_before_reminder_sent",
            ReminderKind::ThirtyMin => "thirty_min_reminder_sent",
        }
    }
}

/// Appointments whose start falls inside [lower, upper], are still live,
/// and have not had this reminder sent yet.
pub fn get_reminder_candidates(
    conn: &Connection,
    kind: ReminderKind,
    lower: NaiveDateTime,
    upper: NaiveDateTime,
) -> anyhow::Result<Vec<Appointment>> {
    let flag = kind.flag_column();
    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE status IN ('pending', 'confirmed')
           AND {flag} = 0
           AND (date || ' ' || start_time) >= ?1
           AND (date || ' ' || start_time) <= ?2
         ORDER BY date ASC, start_time ASC"
    ))?;

    let lower_str = lower.format("%Y-%m-%d %H:%M").to_string();
    let upper_str = upper.format("%Y-%m-%d %H:%M").to_string();

    let rows = stmt.query_map(params![lower_str, upper_str], |row| {
        Ok(parse_appointment_row(row))
    })?;

    let mut appointments = vec![];
    for row in rows {
        appointments.push(row??);
    }
    Ok(appointments)
}

/// Atomic check-and-set of a reminder flag. Returns true for exactly one
/// caller per appointment per kind; a second overlapping scan loses the
/// conditional update and must not dispatch.
pub fn claim_reminder(conn: &Connection, id: &str, kind: ReminderKind) -> anyhow::Result<bool> {
    let flag = kind.flag_column();
    let count = conn.execute(
        &format!("UPDATE appointments SET {flag} = 1 WHERE id = ?1 AND {flag} = 0"),
        params![id],
    )?;
    Ok(count > 0)
}

fn parse_appointment_row(row: &rusqlite::Row) -> anyhow::Result<Appointment> {
    let id: String = row.get(0)?;
    let owner_id: String = row.get(1)?;
    let service_id: Option<String> = row.get(2)?;
    let customer_name: String = row.get(3)?;
    let customer_phone: String = row.get(4)?;
    let date_str: String = row.get(5)?;
    let start_str: String = row.get(6)?;
    let end_str: String = row.get(7)?;
    let duration_minutes: i32 = row.get(8)?;
    let status_str: String = row.get(9)?;
    let price: Option<f64> = row.get(10)?;
    let day_before: i32 = row.get(11)?;
    let thirty_min: i32 = row.get(12)?;
    let sms_confirmation: i32 = row.get(13)?;
    let created_at_str: String = row.get(14)?;
    let updated_at_str: String = row.get(15)?;

    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")?;
    let start_time = NaiveTime::parse_from_str(&start_str, "%H:%M")?;
    let end_time = NaiveTime::parse_from_str(&end_str, "%H:%M")?;
    let created_at = NaiveDateTime::parse_from_str(&created_at_str, "%Y-%m-%d %H:%M:%S")
        .unwrap_or_else(|_| Utc::now().naive_utc());
    let updated_at = NaiveDateTime::parse_from_str(&updated_at_str, "%Y-%m-%d %H:%M:%S")
        .unwrap_or_else(|_| Utc::now().naive_utc());

    Ok(Appointment {
        id,
        owner_id,
        service_id,
        customer_name,
        customer_phone,
        date,
        start_time,
        end_time,
        duration_minutes,
        status: AppointmentStatus::parse(&status_str),
        price,
        day_before_reminder_sent: day_before != 0,
        thirty_min_reminder_sent: thirty_min != 0,
        sms_confirmation_sent: sms_confirmation != 0,
        created_at,
        updated_at,
    })
}

// ── Push subscriptions ──

pub fn add_push_subscription(
    conn: &Connection,
    phone: &str,
    endpoint: &str,
    auth_key: &str,
) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO push_subscriptions (phone, endpoint, auth_key) VALUES (?1, ?2, ?3)
         ON CONFLICT(phone, endpoint) DO UPDATE SET auth_key = excluded.auth_key",
        params![phone, endpoint, auth_key],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_push_subscriptions(
    conn: &Connection,
    phone: &str,
) -> anyhow::Result<Vec<PushSubscription>> {
    let mut stmt = conn.prepare(
        "SELECT id, phone, endpoint, auth_key FROM push_subscriptions WHERE phone = ?1",
    )?;

    let rows = stmt.query_map(params![phone], |row| {
        Ok(PushSubscription {
            id: row.get(0)?,
            phone: row.get(1)?,
            endpoint: row.get(2)?,
            auth_key: row.get(3)?,
        })
    })?;

    let mut subs = vec![];
    for row in rows {
        subs.push(row?);
    }
    Ok(subs)
}

pub fn remove_push_subscription(conn: &Connection, id: i64) -> anyhow::Result<bool> {
    let count = conn.execute(
        "DELETE FROM push_subscriptions WHERE id = ?1",
        params![id],
    )?;
    Ok(count > 0)
}
