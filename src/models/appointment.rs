use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub owner_id: String,
    pub service_id: Option<String>,
    pub customer_name: String,
    pub customer_phone: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub price: Option<f64>,
    pub day_before_reminder_sent: bool,
    pub thirty_min_reminder_sent: bool,
    pub sms_confirmation_sent: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Appointment {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
    Blocked,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::NoShow => "no_show",
            AppointmentStatus::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "confirmed" => AppointmentStatus::Confirmed,
            "cancelled" => AppointmentStatus::Cancelled,
            "completed" => AppointmentStatus::Completed,
            "no_show" => AppointmentStatus::NoShow,
            "blocked" => AppointmentStatus::Blocked,
            _ => AppointmentStatus::Pending,
        }
    }

    /// Only pending and confirmed appointments occupy calendar space
    /// and are eligible for reminders.
    pub fn occupies_calendar(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            AppointmentStatus::Pending,
            AppointmentStatus::Confirmed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::Completed,
            AppointmentStatus::NoShow,
            AppointmentStatus::Blocked,
        ] {
            assert_eq!(AppointmentStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_terminal_statuses_release_calendar() {
        assert!(AppointmentStatus::Pending.occupies_calendar());
        assert!(AppointmentStatus::Confirmed.occupies_calendar());
        assert!(!AppointmentStatus::Cancelled.occupies_calendar());
        assert!(!AppointmentStatus::Completed.occupies_calendar());
        assert!(!AppointmentStatus::NoShow.occupies_calendar());
        assert!(!AppointmentStatus::Blocked.occupies_calendar());
    }
}
