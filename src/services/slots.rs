use chrono::{NaiveDate, Timelike};

use crate::models::{Appointment, CalendarRules};

/// Cleanup margin appended after every occupied interval before overlap
/// testing. A candidate may end exactly when an appointment starts, but
/// cannot begin until the buffer after it has passed.
pub const BUFFER_MINUTES: u32 = 5;

/// Upper bound on durations, intervals, and gaps. Nothing schedulable
/// exceeds one day, and bounding here keeps the minute arithmetic below
/// far away from u32 overflow.
pub const MINUTES_PER_DAY: u32 = 24 * 60;

fn fmt_hhmm(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Half-open interval overlap.
fn overlaps(a_start: u32, a_end: u32, b_start: u32, b_end: u32) -> bool {
    a_start < b_end && a_end > b_start
}

/// Candidate start times for one day, ascending, at the rules' slot
/// granularity. A non-working day yields an empty list, which is a valid
/// "no availability" answer rather than an error. Pure and idempotent.
pub fn generate_slots(rules: &CalendarRules, date: NaiveDate, duration_minutes: u32) -> Vec<String> {
    if duration_minutes == 0
        || duration_minutes > MINUTES_PER_DAY
        || rules.slot_interval_minutes == 0
        || rules.slot_interval_minutes > MINUTES_PER_DAY
        || !rules.is_working_day(date)
    {
        return vec![];
    }

    let open = rules.start_hour * 60;
    let close = rules.end_hour * 60;

    let mut slots = vec![];
    let mut start = open;
    while start < close {
        let end = start + duration_minutes;
        if end > close {
            break;
        }

        let in_break = rules
            .break_window
            .as_ref()
            .map(|b| overlaps(start, end, b.start_minutes(), b.end_minutes()))
            .unwrap_or(false);

        if !in_break {
            slots.push(fmt_hhmm(start));
        }
        start += rules.slot_interval_minutes;
    }
    slots
}

/// Drops every candidate whose occupied interval collides with a live
/// appointment's buffered interval. Cancelled/completed appointments must
/// already be filtered out by the caller's query. The result is never
/// cached: the booking path re-runs this against current state inside its
/// critical section.
pub fn filter_conflicts(
    candidates: Vec<String>,
    existing: &[Appointment],
    duration_minutes: u32,
    min_gap_minutes: u32,
) -> Vec<String> {
    let busy: Vec<(u32, u32)> = existing
        .iter()
        .filter(|a| a.status.occupies_calendar())
        .map(|a| {
            let start = a.start_time.hour() * 60 + a.start_time.minute();
            let end = start.saturating_add(a.duration_minutes.max(0) as u32);
            (
                start.saturating_sub(min_gap_minutes),
                end.saturating_add(BUFFER_MINUTES)
                    .saturating_add(min_gap_minutes),
            )
        })
        .collect();

    candidates
        .into_iter()
        .filter(|slot| {
            let Some(start) = parse_hhmm(slot) else {
                return false;
            };
            let end = start.saturating_add(duration_minutes);
            !busy.iter().any(|&(b_start, b_end)| overlaps(start, end, b_start, b_end))
        })
        .collect()
}

/// Full availability computation for one owner-day.
pub fn available_slots(
    rules: &CalendarRules,
    date: NaiveDate,
    duration_minutes: u32,
    existing: &[Appointment],
) -> Vec<String> {
    let candidates = generate_slots(rules, date, duration_minutes);
    filter_conflicts(candidates, existing, duration_minutes, rules.min_gap_minutes)
}

fn parse_hhmm(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    Some(hour * 60 + minute)
}
