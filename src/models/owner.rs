use serde::{Deserialize, Serialize};

/// Business owner record. Calendar rules are embedded: they have no
/// lifecycle of their own and change only through settings updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub business_name: String,
    pub owner_name: String,
    pub owner_phone: String,
    pub calendar_rules: CalendarRules,
    pub sms_notifications_enabled: bool,
    pub credits: i64,
    pub cancellation_notice_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarRules {
    pub start_hour: u32,
    pub end_hour: u32,
    /// Weekday indices 0-6, Sunday = 0.
    pub working_days: Vec<u32>,
    pub slot_interval_minutes: u32,
    pub break_window: Option<BreakWindow>,
    #[serde(default)]
    pub min_gap_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakWindow {
    pub start_hour: u32,
    pub start_minute: u32,
    pub end_hour: u32,
    pub end_minute: u32,
}

impl BreakWindow {
    pub fn start_minutes(&self) -> u32 {
        self.start_hour * 60 + self.start_minute
    }

    pub fn end_minutes(&self) -> u32 {
        self.end_hour * 60 + self.end_minute
    }
}

impl CalendarRules {
    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        let rules: CalendarRules = serde_json::from_str(s)?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.start_hour > 23 || self.end_hour > 23 {
            anyhow::bail!("business hours must be within 0-23");
        }
        if self.start_hour >= self.end_hour {
            anyhow::bail!("start hour must be before end hour");
        }
        if self.slot_interval_minutes == 0 || self.slot_interval_minutes > 24 * 60 {
            anyhow::bail!("slot interval must be between 1 minute and 24 hours");
        }
        if self.min_gap_minutes > 24 * 60 {
            anyhow::bail!("minimum gap must not exceed 24 hours");
        }
        if let Some(day) = self.working_days.iter().find(|d| **d > 6) {
            anyhow::bail!("invalid weekday index: {day}");
        }
        if let Some(b) = &self.break_window {
            if b.start_minute > 59 || b.end_minute > 59 {
                anyhow::bail!("break window minutes out of range");
            }
            if b.start_minutes() >= b.end_minutes() {
                anyhow::bail!("break window must start before it ends");
            }
            if b.start_minutes() < self.start_hour * 60 || b.end_minutes() > self.end_hour * 60 {
                anyhow::bail!("break window must lie within business hours");
            }
        }
        Ok(())
    }

    pub fn is_working_day(&self, date: chrono::NaiveDate) -> bool {
        use chrono::Datelike;
        let weekday = date.weekday().num_days_from_sunday();
        self.working_days.contains(&weekday)
    }
}
